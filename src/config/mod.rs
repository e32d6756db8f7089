use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the task queue
    pub redis_url: String,

    /// S3 bucket name. Storage settings are optional as a group: when any is
    /// missing, the jobs pipeline reports a configuration error at
    /// job-creation time instead of failing process startup.
    pub s3_bucket: Option<String>,

    /// S3-compatible endpoint URL (MinIO, Supabase Storage, R2, AWS)
    pub s3_endpoint: Option<String>,

    /// S3 access key id
    pub s3_access_key: Option<String>,

    /// S3 secret access key
    pub s3_secret_key: Option<String>,

    /// S3 region (custom endpoints usually accept any value)
    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Maximum data lines per chunk when splitting a source file
    #[serde(default = "default_chunk_lines")]
    pub chunk_lines: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_chunk_lines() -> usize {
    20_000
}

/// Complete object-storage settings, present only when every field is set.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Storage settings if fully configured; `None` disables the pipeline.
    pub fn storage(&self) -> Option<StorageConfig> {
        Some(StorageConfig {
            bucket: self.s3_bucket.clone()?,
            endpoint: self.s3_endpoint.clone()?,
            access_key: self.s3_access_key.clone()?,
            secret_key: self.s3_secret_key.clone()?,
            region: self.s3_region.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AppConfig {
        AppConfig {
            bind_addr: default_bind_addr(),
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://localhost".into(),
            s3_bucket: Some("uploads".into()),
            s3_endpoint: Some("http://localhost:9000".into()),
            s3_access_key: Some("key".into()),
            s3_secret_key: Some("secret".into()),
            s3_region: default_s3_region(),
            chunk_lines: default_chunk_lines(),
        }
    }

    #[test]
    fn storage_requires_every_setting() {
        assert!(base().storage().is_some());

        let mut partial = base();
        partial.s3_secret_key = None;
        assert!(partial.storage().is_none());
    }
}
