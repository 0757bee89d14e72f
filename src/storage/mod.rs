//! Object storage abstraction for generated artifacts
//!
//! Wraps the Apache Arrow `object_store` crate behind the four operations the
//! engine needs: upload, streaming download, idempotent delete, and existence
//! checks. The backend variant (S3-compatible, local filesystem, or in-memory
//! for tests) is chosen at construction and is invisible to callers.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StoragePath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload,
};
use thiserror::Error;

use crate::config::{StorageConfig, StorageProvider};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(String),
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound(path),
            other => StorageError::Io(other.to_string()),
        }
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Metadata returned after upload
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub storage_path: String,
    pub public_url: Option<String>,
    pub etag: Option<String>,
    pub size: usize,
}

/// Byte stream handed out by [`StorageClient::download`]
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Storage client wrapping an `object_store` backend
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    provider: StorageProvider,
    pub bucket: String,
    endpoint: Option<String>,
    region: Option<String>,
    local_root: Option<String>,
}

impl StorageClient {
    /// Build the backend selected by configuration
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.provider {
            StorageProvider::S3 => {
                let mut builder = AmazonS3Builder::new()
                    .with_bucket_name(&config.bucket)
                    .with_region(config.region.clone().unwrap_or_else(|| "us-east-1".into()))
                    .with_allow_http(!config.use_ssl);

                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let (Some(access_key), Some(secret_key)) =
                    (&config.access_key, &config.secret_key)
                {
                    builder = builder
                        .with_access_key_id(access_key)
                        .with_secret_access_key(secret_key);
                }

                let store = builder
                    .build()
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;

                Ok(Self {
                    store: Arc::new(store),
                    provider: StorageProvider::S3,
                    bucket: config.bucket.clone(),
                    endpoint: config.endpoint.clone(),
                    region: config.region.clone(),
                    local_root: None,
                })
            }
            StorageProvider::Local => {
                std::fs::create_dir_all(&config.local_root)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                let store = LocalFileSystem::new_with_prefix(&config.local_root)
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;

                Ok(Self {
                    store: Arc::new(store),
                    provider: StorageProvider::Local,
                    bucket: config.bucket.clone(),
                    endpoint: None,
                    region: None,
                    local_root: Some(config.local_root.to_string_lossy().into_owned()),
                })
            }
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            provider: StorageProvider::Local,
            bucket: "mediabox-local".to_string(),
            endpoint: None,
            region: None,
            local_root: None,
        }
    }

    pub fn provider(&self) -> StorageProvider {
        self.provider
    }

    /// Upload bytes to storage
    ///
    /// The content type is recorded as object metadata on the S3 backend.
    /// Never leaves a partially written object observable.
    pub async fn upload(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<StoredObject> {
        let path = StoragePath::from(key);
        let size = data.len();
        let payload = PutPayload::from(data);

        let put_result = if self.provider == StorageProvider::S3 {
            let attributes = Attributes::from_iter([(
                Attribute::ContentType,
                AttributeValue::from(content_type.to_string()),
            )]);
            let opts = PutOptions {
                attributes,
                ..Default::default()
            };
            self.store.put_opts(&path, payload, opts).await?
        } else {
            self.store.put(&path, payload).await?
        };

        let public_url = self.public_url(key);

        tracing::info!(key, size, content_type, "Uploaded to storage");

        Ok(StoredObject {
            storage_path: key.to_string(),
            public_url,
            etag: put_result.e_tag.clone(),
            size,
        })
    }

    /// Download from storage as a chunked byte stream
    ///
    /// Returns the stream plus the total length when known.
    pub async fn download(&self, path: &str) -> Result<(ByteStream, Option<u64>)> {
        let key = self.resolve_key(path);
        let result = self.store.get(&key).await?;

        let content_length = u64::try_from(result.meta.size).ok();
        let stream = result
            .into_stream()
            .map(|chunk| chunk.map_err(StorageError::from))
            .boxed();

        Ok((stream, content_length))
    }

    /// Delete an object; returns whether one was removed
    ///
    /// Idempotent: deleting an absent object is not an error.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let key = self.resolve_key(path);
        match self.store.delete(&key).await {
            Ok(()) => {
                tracing::info!(path, "Deleted from storage");
                Ok(true)
            }
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a key exists
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.resolve_key(path);
        match self.store.head(&key).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Accept both backend-relative keys and absolute paths under the local
    /// root; absolute paths are stripped back to their relative key.
    fn resolve_key(&self, path: &str) -> StoragePath {
        if let Some(root) = &self.local_root {
            if let Ok(stripped) = Path::new(path).strip_prefix(root) {
                return StoragePath::from(stripped.to_string_lossy().as_ref());
            }
        }
        StoragePath::from(path)
    }

    fn public_url(&self, key: &str) -> Option<String> {
        if self.provider != StorageProvider::S3 {
            return None;
        }
        match &self.endpoint {
            // MinIO or custom S3
            Some(endpoint) => Some(format!("{}/{}/{}", endpoint, self.bucket, key)),
            // AWS virtual-hosted style
            None => {
                let region = self.region.as_deref().unwrap_or("us-east-1");
                Some(format!(
                    "https://{}.s3.{}.amazonaws.com/{}",
                    self.bucket, region, key
                ))
            }
        }
    }
}
