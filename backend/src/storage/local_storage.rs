use futures::future::BoxFuture;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::{FileStorage, StorageError};

/// Stores uploads under a root directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let is_plain = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    async fn write_file(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        log::debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }

    async fn read_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn remove_file(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("{} already removed", path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl FileStorage for LocalFileStorage {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        _mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.write_file(key, data))
    }

    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        Box::pin(self.read_file(key))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.remove_file(key))
    }
}
