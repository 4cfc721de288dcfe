//! Dense vector index: per-vector string metadata, upsert, top-K cosine
//! query, delete-by-id.
//!
//! Backed by `qdrant-client`; chosen because its payload-as-metadata model
//! and point-id semantics map directly onto the vector store contract in
//! SPEC_FULL.md §6 without any adaptation layer.

use crate::error::StoreError;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, DeletePointsBuilder, Filter, PointStruct, ScoredPoint, SearchPointsBuilder,
    UpsertPointsBuilder, point_id::PointIdOptions, value::Kind,
};
use std::collections::HashMap;

/// Qdrant point ids must be u64 or UUID; message ids are arbitrary strings,
/// so each is mapped to a deterministic UUIDv5 derived from it. The original
/// `message_id` string is still the logical key: it round-trips through the
/// `message_id` payload field, and every public method here accepts/returns
/// the original string, not the derived UUID.
const MESSAGE_ID_NAMESPACE: uuid::Uuid = uuid::Uuid::from_bytes([
    0x6d, 0x61, 0x69, 0x6c, 0x66, 0x69, 0x6e, 0x64, 0x2d, 0x76, 0x65, 0x63, 0x2d, 0x6e, 0x73, 0x31,
]);

fn point_id_for(message_id: &str) -> String {
    uuid::Uuid::new_v5(&MESSAGE_ID_NAMESPACE, message_id.as_bytes()).to_string()
}

/// Metadata carried alongside a vector entry, keyed by `message_id`.
#[derive(Debug, Clone)]
pub struct VectorMetadata {
    pub tenant_id: i64,
    pub message_id: String,
    pub subject: String,
    pub sent_at: String,
    pub from_email: String,
}

impl VectorMetadata {
    fn into_payload(self) -> HashMap<String, qdrant_client::qdrant::Value> {
        HashMap::from([
            ("tenant_id".to_string(), (self.tenant_id as i64).into()),
            ("message_id".to_string(), self.message_id.into()),
            ("subject".to_string(), self.subject.into()),
            ("sent_at".to_string(), self.sent_at.into()),
            ("from_email".to_string(), self.from_email.into()),
        ])
    }

    fn from_payload(payload: &HashMap<String, qdrant_client::qdrant::Value>) -> Option<Self> {
        let get_str = |key: &str| -> Option<String> {
            match payload.get(key)?.kind.as_ref()? {
                Kind::StringValue(s) => Some(s.clone()),
                _ => None,
            }
        };
        let tenant_id = match payload.get("tenant_id")?.kind.as_ref()? {
            Kind::IntegerValue(i) => *i,
            _ => return None,
        };
        Some(Self {
            tenant_id,
            message_id: get_str("message_id")?,
            subject: get_str("subject").unwrap_or_default(),
            sent_at: get_str("sent_at").unwrap_or_default(),
            from_email: get_str("from_email").unwrap_or_default(),
        })
    }
}

/// A single hit returned from a top-K query, higher score is better (cosine).
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Option<VectorMetadata>,
}

#[derive(Clone)]
pub struct VectorStore {
    client: std::sync::Arc<Qdrant>,
    collection: String,
}

impl VectorStore {
    pub fn new(url: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        Ok(Self {
            client: std::sync::Arc::new(client),
            collection: collection.to_string(),
        })
    }

    /// Upsert a vector keyed by `message_id` with the metadata described in
    /// SPEC_FULL.md §3 (tenant, message_id, subject, sent_at, from_email).
    pub async fn upsert(
        &self,
        id: &str,
        values: Vec<f32>,
        metadata: VectorMetadata,
    ) -> Result<(), StoreError> {
        let point = PointStruct::new(point_id_for(id), values, metadata.into_payload());
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), vec![point]))
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        Ok(())
    }

    /// Upsert many vectors in a single round trip.
    pub async fn upsert_batch(
        &self,
        entries: Vec<(String, Vec<f32>, VectorMetadata)>,
    ) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let points: Vec<PointStruct> = entries
            .into_iter()
            .map(|(id, values, metadata)| {
                PointStruct::new(point_id_for(&id), values, metadata.into_payload())
            })
            .collect();
        self.client
            .upsert_points(UpsertPointsBuilder::new(self.collection.clone(), points))
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        Ok(())
    }

    /// Top-K cosine similarity query, restricted to `tenant_id` via payload
    /// filter (defense in depth alongside the relational verification query
    /// performed by the retrieval pipeline's dense stage).
    pub async fn query(
        &self,
        vector: Vec<f32>,
        top_k: u64,
        tenant_id: i64,
    ) -> Result<Vec<VectorMatch>, StoreError> {
        let filter = Filter::must([Condition::matches("tenant_id", tenant_id)]);
        let request = SearchPointsBuilder::new(self.collection.clone(), vector, top_k)
            .filter(filter)
            .with_payload(true);
        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(Self::scored_point_to_match)
            .collect())
    }

    pub async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let point_ids: Vec<qdrant_client::qdrant::PointId> = ids
            .iter()
            .map(|id| qdrant_client::qdrant::PointId {
                point_id_options: Some(PointIdOptions::Uuid(point_id_for(id))),
            })
            .collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(self.collection.clone())
                    .points(qdrant_client::qdrant::PointsIdsList { ids: point_ids }),
            )
            .await
            .map_err(|e| StoreError::Vector(e.to_string()))?;
        Ok(())
    }

    fn scored_point_to_match(point: ScoredPoint) -> Option<VectorMatch> {
        let raw_id = match point.id?.point_id_options? {
            PointIdOptions::Uuid(s) => s,
            PointIdOptions::Num(n) => n.to_string(),
        };
        let metadata = VectorMetadata::from_payload(&point.payload);
        // Prefer the logical message_id carried in payload over the derived
        // UUID point id, since callers key everything on message_id.
        let id = metadata
            .as_ref()
            .map(|m| m.message_id.clone())
            .unwrap_or(raw_id);
        Some(VectorMatch {
            id,
            score: point.score,
            metadata,
        })
    }
}
