//! Ephemeral short-TTL state: chunk carryover bytes between consecutive
//! `process-chunk` invocations for a source.
//!
//! Backed by `redis`; the carryover entity (SPEC_FULL.md §3) is exactly the
//! short-TTL ephemeral value Redis's `SET ... EX` models natively, and
//! nothing in the teacher's own stack covers this concept.

use crate::error::StoreError;
use redis::AsyncCommands;

#[derive(Clone)]
pub struct KvStore {
    client: redis::Client,
}

impl KvStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(StoreError::Kv)?;
        Ok(Self { client })
    }

    /// `carryover:<source_id>` key per SPEC_FULL.md §3.
    pub fn carryover_key(source_id: i64) -> String {
        format!("carryover:{source_id}")
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Kv)?;
        let _: () = conn
            .set_ex(key, value, ttl_secs)
            .await
            .map_err(StoreError::Kv)?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Kv)?;
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(StoreError::Kv)?;
        Ok(value)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(StoreError::Kv)?;
        let _: () = conn.del(key).await.map_err(StoreError::Kv)?;
        Ok(())
    }
}
