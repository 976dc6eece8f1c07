mod local;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncRead;

pub use local::LocalStorage;

/// Readable handle to stored content.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

// Storage error types
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String), // No file under this stored name

    #[error("File already exists: {0}")]
    AlreadyExists(String), // Refused to overwrite an existing stored name

    #[error("Invalid stored name: {0:?}")]
    InvalidName(String), // Name would escape the storage directory

    #[error("Io Error: {0}")]
    IoError(#[from] std::io::Error), // Wraps standard I/O errors
}

/// Byte storage addressed by flat, generated names.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Write `content` under `stored_name`. Never overwrites an existing file.
    /// Returns the number of bytes written.
    async fn save(&self, stored_name: &str, content: Bytes) -> Result<u64, StorageError>;

    /// Open a file for streaming reads.
    async fn open(&self, stored_name: &str) -> Result<FileReader, StorageError>;

    /// Remove a file. Returns `false` if it was already gone.
    async fn delete(&self, stored_name: &str) -> Result<bool, StorageError>;

    async fn exists(&self, stored_name: &str) -> Result<bool, StorageError>;

    /// Names of every file currently held.
    async fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Rejects names that are empty, contain path separators or refer to
/// the current/parent directory.
pub fn validate_stored_name(stored_name: &str) -> Result<(), StorageError> {
    let invalid = stored_name.is_empty()
        || stored_name == "."
        || stored_name == ".."
        || stored_name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(StorageError::InvalidName(stored_name.to_string()));
    }
    Ok(())
}
