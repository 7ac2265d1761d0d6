//! In-process object store.
//!
//! Selected with `s3.provider = "memory"`. Listings are paged like S3's
//! ListObjectsV2 so callers exercise the continuation-token loop; the token is
//! the last key returned on the previous page.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

use super::{ListPage, ObjectBackend, ObjectRef};
use crate::types::{PresignMethod, StorageError, StorageResult};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
}

pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    page_size: usize,
    list_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Number of listing pages served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    pub async fn content_type(&self, object: &ObjectRef) -> Option<String> {
        let buckets = self.buckets.read().await;
        buckets
            .get(&object.bucket)
            .and_then(|b| b.get(&object.key))
            .map(|o| o.content_type.clone())
    }

    async fn store(&self, object: &ObjectRef, data: Bytes, content_type: &str) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(object.bucket.clone()).or_default().insert(
            object.key.clone(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn signature_version(&self) -> &'static str {
        "unsigned"
    }

    fn region(&self) -> String {
        "memory".to_string()
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> StorageResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        let buckets = self.buckets.read().await;
        let Some(objects) = buckets.get(bucket) else {
            return Ok(ListPage::default());
        };

        // Keys sharing a prefix are contiguous in the map; resume right after the token.
        let start = match continuation_token.as_deref() {
            Some(token) if token >= prefix => Bound::Excluded(token),
            _ => Bound::Included(prefix),
        };
        let mut matching = objects
            .range::<str, _>((start, Bound::Unbounded))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(self.page_size).cloned().collect();
        let next_continuation_token = match matching.next() {
            Some(_) => keys.last().cloned(),
            None => None,
        };

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }

    async fn put_object(&self, object: &ObjectRef, data: &[u8], content_type: &str) -> StorageResult<()> {
        self.store(object, Bytes::copy_from_slice(data), content_type).await;
        Ok(())
    }

    async fn put_stream(
        &self,
        object: &ObjectRef,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> StorageResult<()> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::TransferFailed {
                status: None,
                message: format!("reading upload stream: {}", e),
            })?;
        let content_type = mime_guess::from_path(&object.key).first_or_octet_stream();
        self.store(object, Bytes::from(data), content_type.essence_str()).await;
        Ok(())
    }

    async fn get_object(&self, object: &ObjectRef) -> StorageResult<Bytes> {
        let buckets = self.buckets.read().await;
        buckets
            .get(&object.bucket)
            .and_then(|b| b.get(&object.key))
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(object.to_string()))
    }

    async fn get_to_writer(
        &self,
        object: &ObjectRef,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> StorageResult<()> {
        let data = self.get_object(object).await?;
        writer
            .write_all(&data)
            .await
            .map_err(|e| StorageError::TransferFailed {
                status: None,
                message: format!("writing download stream: {}", e),
            })
    }

    async fn delete_object(&self, object: &ObjectRef) -> StorageResult<()> {
        let mut buckets = self.buckets.write().await;
        if let Some(objects) = buckets.get_mut(&object.bucket) {
            objects.remove(&object.key);
        }
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StorageResult<usize> {
        let mut buckets = self.buckets.write().await;
        let Some(objects) = buckets.get_mut(bucket) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|k| objects.remove(k.as_str()).is_some()).count())
    }

    async fn presign(&self, object: &ObjectRef, _method: PresignMethod, _expiry_secs: u32) -> StorageResult<String> {
        Err(StorageError::SigningFailed(format!(
            "the in-memory backend cannot sign URLs (object {})",
            object
        )))
    }
}
