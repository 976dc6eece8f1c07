use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{fs, io::AsyncWriteExt};

use super::{FileReader, Storage, StorageError, validate_stored_name};

// Local filesystem storage
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf, // Directory holding every stored file
}

impl LocalStorage {
    /// Creates a new LocalStorage, creating the base directory if needed.
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        tracing::info!("Using local storage at {:?}", base_path);
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Full path of a stored file inside the base directory.
    pub fn get_full_path(&self, stored_name: &str) -> Result<PathBuf, StorageError> {
        validate_stored_name(stored_name)?;
        Ok(self.base_path.join(stored_name))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(&self, stored_name: &str, content: Bytes) -> Result<u64, StorageError> {
        let full_path = self.get_full_path(stored_name)?;

        // create_new: a generated name that already exists is a collision, not an overwrite
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(stored_name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&content).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            // Don't leave a truncated file behind
            if let Err(cleanup) = fs::remove_file(&full_path).await {
                tracing::warn!("Failed to remove partial file {:?}: {}", full_path, cleanup);
            }
            return Err(e.into());
        }

        tracing::debug!("Saved file at {:?}", full_path);
        Ok(content.len() as u64)
    }

    async fn open(&self, stored_name: &str) -> Result<FileReader, StorageError> {
        let full_path = self.get_full_path(stored_name)?;

        match fs::File::open(&full_path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(stored_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, stored_name: &str) -> Result<bool, StorageError> {
        let full_path = self.get_full_path(stored_name)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, stored_name: &str) -> Result<bool, StorageError> {
        let full_path = self.get_full_path(stored_name)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = fs::read_dir(&self.base_path).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Names we generate are always valid UTF-8
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}
