use s3::creds::Credentials;
use s3::error::S3Error;
use s3::serde_types::Part;
use s3::{Bucket, Region};

use crate::config::StorageConfig;

/// Presigned URL lifetime for uploads and multipart parts.
pub const PRESIGN_EXPIRY_SECS: u32 = 3600;

/// Content type enforced on stored source files and chunk artifacts.
pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Client for any S3-compatible object store (MinIO, Supabase Storage, R2,
/// AWS). Holds file bytes and chunk artifacts, decoupling the API tier that
/// accepts uploads from the workers that consume them.
pub struct ObjectStore {
    bucket: Box<Bucket>,
}

impl ObjectStore {
    pub fn new(cfg: &StorageConfig) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: cfg.region.clone(),
            endpoint: cfg.endpoint.clone(),
        };

        let credentials =
            Credentials::new(Some(&cfg.access_key), Some(&cfg.secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(&cfg.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }

    /// Presigned PUT URL the client uploads file bytes to, so the API tier
    /// never proxies large files.
    pub async fn presigned_put_url(&self, key: &str) -> Result<String, StorageError> {
        let url = self
            .bucket
            .presign_put(key, PRESIGN_EXPIRY_SECS, None, None)
            .await?;
        Ok(url)
    }

    /// Direct upload, used by the split task for chunk artifacts.
    pub async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        Ok(())
    }

    /// Direct authenticated download, used by workers.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        Ok(response.to_vec())
    }

    /// HEAD probe; guards commits and retries against missing uploads.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.bucket.head_object(key).await {
            Ok((_, code)) => Ok(code == 200),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await?;
        Ok(())
    }

    /// Start a multipart upload for very large files; returns the upload id.
    pub async fn start_multipart(&self, key: &str) -> Result<String, StorageError> {
        let response = self
            .bucket
            .initiate_multipart_upload(key, CSV_CONTENT_TYPE)
            .await?;
        Ok(response.upload_id)
    }

    /// Presigned URL for uploading a single part of a multipart upload.
    pub async fn presigned_part_url(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, StorageError> {
        let queries = std::collections::HashMap::from([
            ("partNumber".to_string(), part_number.to_string()),
            ("uploadId".to_string(), upload_id.to_string()),
        ]);
        let url = self
            .bucket
            .presign_put(key, PRESIGN_EXPIRY_SECS, None, Some(queries))
            .await?;
        Ok(url)
    }

    /// Complete a multipart upload from (part_number, etag) pairs.
    pub async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<(u32, String)>,
    ) -> Result<(), StorageError> {
        let parts: Vec<Part> = parts
            .into_iter()
            .map(|(part_number, etag)| Part { part_number, etag })
            .collect();
        self.bucket
            .complete_multipart_upload(key, upload_id, parts)
            .await?;
        Ok(())
    }

    pub async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.bucket.abort_upload(key, upload_id).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("storage configuration error: {0}")]
    Config(String),
}
