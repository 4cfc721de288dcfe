//! Opaque byte storage for uploaded MBOX chunks, attachment bytes, and
//! oversized-message-body spills.
//!
//! Backed by `object_store`, which speaks the same keyed put/get/delete/
//! list-by-prefix contract over local disk or S3-compatible backends
//! uniformly, so the blob store needs no vendor-specific branch here.

use crate::error::StoreError;
use bytes::Bytes;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, parse_url_opts};
use std::sync::Arc;
use url::Url;

/// Upload chunk key: `uploads/<source_id>/chunk-<index, 6-digit zero-padded>`.
pub fn chunk_key(source_id: i64, index: u32) -> String {
    format!("uploads/{source_id}/chunk-{index:06}")
}

/// Oversized message body spill key: `uploads/<source_id>/email-body-<uuid>`.
pub fn body_spill_key(source_id: i64, id: uuid::Uuid) -> String {
    format!("uploads/{source_id}/email-body-{id}")
}

#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let parsed = Url::parse(url).map_err(|e| StoreError::BlobConfig(e.to_string()))?;
        let (store, _) = parse_url_opts(&parsed, Vec::<(String, String)>::new())
            .map_err(StoreError::Blob)?;
        Ok(Self {
            inner: Arc::from(store),
        })
    }

    pub async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = ObjectPath::from(key);
        self.inner
            .put(&path, Bytes::from(bytes).into())
            .await
            .map_err(StoreError::Blob)?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = ObjectPath::from(key);
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await.map_err(StoreError::Blob)?;
                Ok(Some(bytes.to_vec()))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(StoreError::Blob(e)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = ObjectPath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::Blob(e)),
        }
    }

    /// List all keys under `prefix`, e.g. `uploads/<source_id>/`.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        use futures::TryStreamExt;
        let path = ObjectPath::from(prefix);
        let mut stream = self.inner.list(Some(&path));
        let mut keys = Vec::new();
        while let Some(meta) = stream.try_next().await.map_err(StoreError::Blob)? {
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }
}
