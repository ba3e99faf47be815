//! Blob storage
//!
//! Holds the generated metadata documents and the bodies of queue messages
//! too large to travel inline.

use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Object store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bucket (or namespace) the store writes into
    fn bucket(&self) -> &str;

    /// Store `content` under `key`, replacing any existing object
    async fn put(&self, key: &str, content: Vec<u8>, content_type: &str) -> Result<()>;

    /// Read the object stored under `key`
    async fn fetch(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete the object stored under `key`
    async fn remove(&self, key: &str) -> Result<()>;
}

/// [`BlobStore`] backed by S3
#[derive(Clone, Debug)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    /// Create a store for `bucket` from a shared AWS configuration
    pub fn new(sdk_config: &aws_config::SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::new(sdk_config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, content))]
    async fn put(&self, key: &str, content: Vec<u8>, content_type: &str) -> Result<()> {
        let size = content.len();
        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                Error::BlobStore(format!(
                    "put s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::BlobStore(format!(
                    "get s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::BlobStore(format!("read s3://{}/{}: {e}", self.bucket, key)))?
            .into_bytes()
            .to_vec();
        Ok(data)
    }

    #[instrument(skip(self))]
    async fn remove(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                Error::BlobStore(format!(
                    "delete s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

/// [`BlobStore`] held in memory
#[derive(Default)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MemoryBlobStore {
    /// Create an empty store named `bucket`
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            ..Default::default()
        }
    }

    /// Stored object, if any
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(key).cloned()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Whether nothing has been stored
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Make subsequent puts fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, content: Vec<u8>, _content_type: &str) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::BlobStore(format!("put {}/{key} rejected", self.bucket)));
        }
        self.objects.lock().await.insert(key.to_string(), content);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::BlobStore(format!("no object {}/{key}", self.bucket)))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.objects.lock().await.remove(key);
        Ok(())
    }
}
