use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;

/// Metadata row for one stored file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileRecord {
    pub id: i64,
    pub original_name: String,
    /// Name of the bytes on disk, unique across all rows.
    pub stored_name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub original_name: String,
    pub stored_name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
}

/// One file part received from a multipart upload.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl IncomingFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub id: i64,
    pub original_name: String,
    pub size_bytes: i64,
    pub mime_type: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub download_url: String,
}

impl From<FileRecord> for FileResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            download_url: format!("/download/{}", file.id),
            id: file.id,
            original_name: file.original_name,
            size_bytes: file.size_bytes,
            mime_type: file.mime_type,
            uploaded_at: file.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub count: usize,
    pub files: Vec<FileResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub files: Vec<FileResponse>,
    /// The search term that produced `files`, empty for a full listing.
    pub q: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
}

/// Outcome of a storage/metadata consistency pass.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub orphaned_files_removed: Vec<String>,
    /// Ids of rows whose file is missing from storage.
    pub dangling_records: Vec<i64>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_files_removed.is_empty() && self.dangling_records.is_empty()
    }
}
