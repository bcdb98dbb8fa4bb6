use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use futures::future::BoxFuture;

use super::{FileStorage, StorageError};

#[derive(Clone)]
pub struct S3Service {
    client: Client,
    bucket_name: String,
}

impl S3Service {
    pub fn new(client: Client, bucket_name: String) -> Self {
        Self {
            client,
            bucket_name,
        }
    }

    pub async fn upload_image(
        &self,
        image_data: &[u8],
        s3_key: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from(image_data.to_vec());

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .body(body)
            .content_type(mime_type)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        log::debug!("Uploaded {} bytes to s3://{}/{}", image_data.len(), self.bucket_name, s3_key);
        Ok(())
    }

    pub async fn get_image(&self, s3_key: &str) -> Result<Vec<u8>, StorageError> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    pub async fn delete_image(&self, s3_key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(s3_key)
            .send()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?;

        Ok(())
    }
}

impl FileStorage for S3Service {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.upload_image(data, key, mime_type))
    }

    fn read<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<u8>, StorageError>> {
        Box::pin(self.get_image(key))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(self.delete_image(key))
    }
}
