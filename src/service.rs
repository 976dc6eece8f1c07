use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use tracing::{error, info, warn};

use crate::{
    error::AppError,
    models::{FileRecord, IncomingFile, NewFileRecord, ReconcileReport},
    repository::FileRepository,
    storage::{FileReader, Storage, StorageError},
    utils::{generate_stored_name, get_file_extension, is_extension_allowed, secure_filename},
};

/// Upload constraints applied to every batch.
#[derive(Debug, Clone)]
pub struct UploadLimits {
    /// Maximum summed size of all files in one request.
    pub max_request_size: u64,
    pub allowed_extensions: Option<Vec<String>>,
}

/// Keeps the storage directory and the metadata table in step.
///
/// Uploads write the file before the row, deletes remove the row before the
/// file. Either way a crash can only leave an untracked file behind, which
/// [`FileService::reconcile`] cleans up.
pub struct FileService {
    repo: FileRepository,
    storage: Arc<dyn Storage>,
    limits: UploadLimits,
}

/// A file validated and named, ready to persist.
struct PreparedFile {
    original_name: String,
    content_type: Option<String>,
    data: Bytes,
}

impl FileService {
    pub fn new(repo: FileRepository, storage: Arc<dyn Storage>, limits: UploadLimits) -> Self {
        Self {
            repo,
            storage,
            limits,
        }
    }

    #[cfg(test)]
    pub fn repository(&self) -> &FileRepository {
        &self.repo
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Persist a batch of files.
    ///
    /// The whole batch is validated before anything touches disk, so a
    /// rejected request leaves no trace. Once writing starts there is no
    /// cross-file rollback: if file k fails, files before it stay stored and
    /// the error is returned.
    pub async fn upload(&self, files: Vec<IncomingFile>) -> Result<Vec<FileRecord>, AppError> {
        let prepared = self.validate_batch(files)?;

        let mut saved = Vec::with_capacity(prepared.len());
        for file in prepared {
            let record = self.persist(file).await.inspect_err(|e| {
                if !saved.is_empty() {
                    warn!(
                        "Upload batch failed after {} file(s) were stored: {}",
                        saved.len(),
                        e
                    );
                }
            })?;
            saved.push(record);
        }

        info!("Uploaded {} file(s)", saved.len());
        Ok(saved)
    }

    fn validate_batch(&self, files: Vec<IncomingFile>) -> Result<Vec<PreparedFile>, AppError> {
        if files.is_empty() {
            return Err(AppError::BadRequest("No file provided".into()));
        }

        let total: u64 = files.iter().map(|f| f.data.len() as u64).sum();
        if total > self.limits.max_request_size {
            warn!(
                "Upload of {} bytes exceeds maximum limit of {} bytes",
                total, self.limits.max_request_size
            );
            return Err(AppError::PayloadTooLarge(format!(
                "Upload size {} exceeds maximum limit of {} bytes",
                total, self.limits.max_request_size
            )));
        }

        files
            .into_iter()
            .map(|file| {
                let original_name = secure_filename(&file.filename);
                if original_name.is_empty() {
                    return Err(AppError::BadRequest(format!(
                        "Invalid filename: {:?}",
                        file.filename
                    )));
                }

                if !is_extension_allowed(&original_name, self.limits.allowed_extensions.as_deref())
                {
                    let extension = get_file_extension(&original_name).unwrap_or_default();
                    return Err(AppError::UnsupportedMediaType(format!(
                        "File type not allowed: {} (.{})",
                        original_name, extension
                    )));
                }

                Ok(PreparedFile {
                    original_name,
                    content_type: file.content_type,
                    data: file.data,
                })
            })
            .collect()
    }

    /// File first, then row. A failed insert removes the file it just wrote.
    async fn persist(&self, file: PreparedFile) -> Result<FileRecord, AppError> {
        let stored_name = generate_stored_name(&file.original_name);
        let size_bytes = self.storage.save(&stored_name, file.data).await?;

        let new_file = NewFileRecord {
            original_name: file.original_name,
            stored_name,
            size_bytes: size_bytes as i64,
            mime_type: file.content_type,
        };

        match self.repo.insert(&new_file).await {
            Ok(record) => {
                info!(
                    "File uploaded: {} as {} ({} bytes)",
                    record.id, record.stored_name, record.size_bytes
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&new_file.stored_name).await {
                    warn!(
                        "Failed to remove {} after insert error: {}",
                        new_file.stored_name, cleanup
                    );
                }
                Err(e.into())
            }
        }
    }

    pub async fn list(&self) -> Result<Vec<FileRecord>, AppError> {
        Ok(self.repo.list().await?)
    }

    /// Case-insensitive substring match on the original name. A blank query
    /// is the same as [`FileService::list`].
    pub async fn search(&self, query: &str) -> Result<Vec<FileRecord>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return self.list().await;
        }
        Ok(self.repo.search(query).await?)
    }

    pub async fn get(&self, id: i64) -> Result<FileRecord, AppError> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// Metadata plus a reader over the stored bytes.
    pub async fn download(&self, id: i64) -> Result<(FileRecord, FileReader), AppError> {
        let file = self.get(id).await?;

        match self.storage.open(&file.stored_name).await {
            Ok(reader) => Ok((file, reader)),
            Err(StorageError::NotFound(_)) => Err(AppError::StorageInconsistency(format!(
                "record {} points at missing file {}",
                file.id, file.stored_name
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Row first, then file. Returns the removed record.
    pub async fn delete(&self, id: i64) -> Result<FileRecord, AppError> {
        let file = self.get(id).await?;

        // A concurrent delete may have won between the lookup and here
        if !self.repo.delete(id).await? {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        match self.storage.delete(&file.stored_name).await {
            Ok(true) => {}
            Ok(false) => warn!(
                "Storage inconsistency: deleted record {} had no file {}",
                file.id, file.stored_name
            ),
            Err(e) => warn!(
                "Record {} deleted but file {} could not be removed: {}",
                file.id, file.stored_name, e
            ),
        }

        info!("File Deleted: {} ({})", file.id, file.original_name);
        Ok(file)
    }

    /// Remove stored files that no row refers to and report rows whose
    /// file is missing.
    ///
    /// Must not run alongside uploads: a file written but not yet recorded
    /// looks exactly like an orphan.
    pub async fn reconcile(&self) -> Result<ReconcileReport, AppError> {
        let tracked: HashSet<String> = self.repo.list_stored_names().await?.into_iter().collect();
        let on_disk: HashSet<String> = self.storage.list().await?.into_iter().collect();

        let mut report = ReconcileReport::default();

        for name in on_disk.difference(&tracked) {
            match self.storage.delete(name).await {
                Ok(_) => {
                    info!("Removed orphaned file {}", name);
                    report.orphaned_files_removed.push(name.clone());
                }
                Err(e) => warn!("Failed to remove orphaned file {}: {}", name, e),
            }
        }

        for file in self.repo.list().await? {
            if !on_disk.contains(&file.stored_name) {
                error!(
                    "Storage inconsistency: record {} ({}) has no file {}",
                    file.id, file.original_name, file.stored_name
                );
                report.dangling_records.push(file.id);
            }
        }

        report.orphaned_files_removed.sort();
        report.dangling_records.sort();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::init_db, storage::LocalStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct TestContext {
        _dir: TempDir,
        storage: Arc<LocalStorage>,
        service: FileService,
    }

    async fn setup_with_limits(limits: UploadLimits) -> TestContext {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = init_db(&url).await.unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().join("uploads")).await.unwrap());
        let service = FileService::new(FileRepository::new(pool), storage.clone(), limits);
        TestContext {
            _dir: dir,
            storage,
            service,
        }
    }

    async fn read_download(service: &FileService, id: i64) -> (FileRecord, Vec<u8>) {
        let (record, mut reader) = match service.download(id).await {
            Ok(found) => found,
            Err(e) => panic!("download failed: {e}"),
        };
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        (record, content)
    }

    async fn setup() -> TestContext {
        setup_with_limits(UploadLimits {
            max_request_size: 1024,
            allowed_extensions: None,
        })
        .await
    }

    #[tokio::test]
    async fn test_report_pdf_scenario() {
        let ctx = setup().await;
        let content = b"0123456789".to_vec();

        let saved = ctx
            .service
            .upload(vec![IncomingFile::new("report.pdf", content.clone())])
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].original_name, "report.pdf");
        assert_eq!(saved[0].size_bytes, 10);

        let (record, bytes) = read_download(&ctx.service, saved[0].id).await;
        assert_eq!(record.original_name, "report.pdf");
        assert_eq!(bytes, content);

        ctx.service.delete(saved[0].id).await.unwrap();
        assert!(!ctx.storage.exists(&record.stored_name).await.unwrap());
        assert!(matches!(
            ctx.service.download(saved[0].id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            ctx.service.delete(saved[0].id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let ctx = setup().await;
        assert!(matches!(ctx.service.download(42).await, Err(AppError::NotFound(_))));
        assert!(matches!(ctx.service.delete(42).await, Err(AppError::NotFound(_))));
        assert!(matches!(ctx.service.get(42).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_oversized_batch_persists_nothing() {
        let ctx = setup().await;

        let result = ctx
            .service
            .upload(vec![
                IncomingFile::new("a.bin", vec![0u8; 600]),
                IncomingFile::new("b.bin", vec![0u8; 600]),
            ])
            .await;

        assert!(matches!(result, Err(AppError::PayloadTooLarge(_))));
        assert_eq!(ctx.service.repository().count().await.unwrap(), 0);
        assert!(ctx.storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filename_rejects_whole_batch() {
        let ctx = setup().await;

        let result = ctx
            .service
            .upload(vec![
                IncomingFile::new("good.txt", b"ok".to_vec()),
                IncomingFile::new("../", b"bad".to_vec()),
            ])
            .await;

        assert!(matches!(result, Err(AppError::BadRequest(_))));
        assert_eq!(ctx.service.repository().count().await.unwrap(), 0);
        assert!(ctx.storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let ctx = setup().await;
        assert!(matches!(
            ctx.service.upload(Vec::new()).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_disallowed_extension() {
        let ctx = setup_with_limits(UploadLimits {
            max_request_size: 1024,
            allowed_extensions: Some(vec!["pdf".to_string()]),
        })
        .await;

        let result = ctx
            .service
            .upload(vec![IncomingFile::new("run.exe", b"MZ".to_vec())])
            .await;
        assert!(matches!(result, Err(AppError::UnsupportedMediaType(_))));

        ctx.service
            .upload(vec![IncomingFile::new("doc.PDF", b"%PDF".to_vec())])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_filename_is_sanitized_and_mime_kept() {
        let ctx = setup().await;

        let saved = ctx
            .service
            .upload(vec![
                IncomingFile::new("../../etc/passwd", b"root".to_vec())
                    .with_content_type("text/plain"),
            ])
            .await
            .unwrap();

        assert_eq!(saved[0].original_name, "etc_passwd");
        assert_eq!(saved[0].mime_type.as_deref(), Some("text/plain"));
        assert!(saved[0].stored_name.ends_with("_etc_passwd"));
    }

    #[tokio::test]
    async fn test_search_matches_list_for_blank_query() {
        let ctx = setup().await;
        ctx.service
            .upload(vec![
                IncomingFile::new("Alpha.txt", b"a".to_vec()),
                IncomingFile::new("beta.txt", b"b".to_vec()),
            ])
            .await
            .unwrap();

        let all = ctx.service.list().await.unwrap();
        assert_eq!(ctx.service.search("").await.unwrap(), all);
        assert_eq!(ctx.service.search("   ").await.unwrap(), all);

        let hits = ctx.service.search(" ALPHA ").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].original_name, "Alpha.txt");
    }

    #[tokio::test]
    async fn test_missing_file_is_reported_as_inconsistency() {
        let ctx = setup().await;
        let saved = ctx
            .service
            .upload(vec![IncomingFile::new("lost.txt", b"bytes".to_vec())])
            .await
            .unwrap();

        ctx.storage.delete(&saved[0].stored_name).await.unwrap();

        let err = match ctx.service.download(saved[0].id).await {
            Ok(_) => panic!("expected a storage inconsistency"),
            Err(e) => e,
        };
        assert!(matches!(err, AppError::StorageInconsistency(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::NOT_FOUND);

        // Deleting the dangling row still succeeds
        ctx.service.delete(saved[0].id).await.unwrap();
        assert_eq!(ctx.service.repository().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_get_distinct_stored_names() {
        let ctx = setup().await;
        let service = &ctx.service;

        let uploads = (0..20).map(|i| async move {
            service
                .upload(vec![IncomingFile::new("same.txt", format!("payload {i}").into_bytes())])
                .await
        });
        let results = futures::future::join_all(uploads).await;

        let mut stored_names = HashSet::new();
        for result in results {
            let saved = result.unwrap();
            assert!(stored_names.insert(saved[0].stored_name.clone()));
        }
        assert_eq!(stored_names.len(), 20);
        assert_eq!(ctx.service.repository().count().await.unwrap(), 20);
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans_and_reports_dangling_rows() {
        let ctx = setup().await;
        let saved = ctx
            .service
            .upload(vec![
                IncomingFile::new("kept.txt", b"1".to_vec()),
                IncomingFile::new("dangling.txt", b"2".to_vec()),
            ])
            .await
            .unwrap();

        ctx.storage
            .save("orphan_file.txt", Bytes::from_static(b"left over"))
            .await
            .unwrap();
        ctx.storage.delete(&saved[1].stored_name).await.unwrap();

        let report = ctx.service.reconcile().await.unwrap();
        assert_eq!(report.orphaned_files_removed, vec!["orphan_file.txt"]);
        assert_eq!(report.dangling_records, vec![saved[1].id]);
        assert!(!ctx.storage.exists("orphan_file.txt").await.unwrap());
        assert!(ctx.storage.exists(&saved[0].stored_name).await.unwrap());

        // Rows are never dropped automatically
        assert_eq!(ctx.service.repository().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reconcile_on_consistent_store_is_clean() {
        let ctx = setup().await;
        ctx.service
            .upload(vec![IncomingFile::new("a.txt", b"a".to_vec())])
            .await
            .unwrap();
        assert!(ctx.service.reconcile().await.unwrap().is_clean());
    }

    /// Stores the first `succeed` files, then fails every write.
    struct FlakyStorage {
        inner: LocalStorage,
        succeed: usize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl Storage for FlakyStorage {
        async fn save(&self, stored_name: &str, content: Bytes) -> Result<u64, StorageError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) >= self.succeed {
                return Err(StorageError::IoError(std::io::Error::other("disk full")));
            }
            self.inner.save(stored_name, content).await
        }

        async fn open(&self, stored_name: &str) -> Result<FileReader, StorageError> {
            self.inner.open(stored_name).await
        }

        async fn delete(&self, stored_name: &str) -> Result<bool, StorageError> {
            self.inner.delete(stored_name).await
        }

        async fn exists(&self, stored_name: &str) -> Result<bool, StorageError> {
            self.inner.exists(stored_name).await
        }

        async fn list(&self) -> Result<Vec<String>, StorageError> {
            self.inner.list().await
        }
    }

    #[tokio::test]
    async fn test_partial_batch_failure_keeps_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let pool = init_db(&url).await.unwrap();
        let inner = LocalStorage::new(dir.path().join("uploads")).await.unwrap();
        let storage = Arc::new(FlakyStorage {
            inner: inner.clone(),
            succeed: 1,
            saves: AtomicUsize::new(0),
        });
        let service = FileService::new(
            FileRepository::new(pool),
            storage,
            UploadLimits {
                max_request_size: 1024,
                allowed_extensions: None,
            },
        );

        let result = service
            .upload(vec![
                IncomingFile::new("first.txt", b"1".to_vec()),
                IncomingFile::new("second.txt", b"2".to_vec()),
            ])
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, AppError::StorageError(_)));
        assert_eq!(err.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let remaining = service.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].original_name, "first.txt");
        assert_eq!(inner.list().await.unwrap(), vec![remaining[0].stored_name.clone()]);
    }
}
