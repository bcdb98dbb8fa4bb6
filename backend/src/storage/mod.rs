pub mod local_storage;
pub mod s3_service;

use futures::future::BoxFuture;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub use local_storage::LocalFileStorage;
pub use s3_service::S3Service;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 error: {0}")]
    S3(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Invalid file format")]
    InvalidFormat,
    #[error("File too large")]
    FileTooLarge,
}

/// Blob storage for uploaded photographs, addressed by opaque keys.
pub trait FileStorage: Send + Sync {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>>;

    /// Removing a key that does not exist is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>>;
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

pub fn generate_storage_key(owner_id: Uuid, image_hash: &str, file_extension: &str) -> String {
    format!("images/{}/{}.{}", owner_id, image_hash, file_extension)
}

pub fn extract_file_extension(mime_type: &str) -> Result<&'static str, StorageError> {
    match mime_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/heic" => Ok("heic"),
        "image/heif" => Ok("heif"),
        _ => Err(StorageError::InvalidFormat),
    }
}

/// Checks a byte count against the upload limit, so callers can reject a
/// stream before buffering all of it.
pub fn validate_image_size(len: usize, max_bytes: usize) -> Result<(), StorageError> {
    if len > max_bytes {
        return Err(StorageError::FileTooLarge);
    }
    Ok(())
}
