//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait covers the four operations the index builder
//! and retriever need from a vector database service: listing indexes,
//! creating one, upserting records, and similarity queries.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_indexes`](VectorIndex::list_indexes) | Names of existing indexes |
//! | [`create_index`](VectorIndex::create_index) | Create an index from an [`IndexSpec`] |
//! | [`upsert`](VectorIndex::upsert) | Insert or replace records |
//! | [`query`](VectorIndex::query) | Top-k nearest records matching a [`MetadataFilter`] |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::EMBEDDING_DIMS;

/// Distance metric of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    Dotproduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dotproduct => "dotproduct",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub metric: Metric,
    pub dimension: usize,
}

impl IndexSpec {
    /// Cosine index sized for the embedding model in use.
    pub fn cosine(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: Metric::Cosine,
            dimension: EMBEDDING_DIMS,
        }
    }
}

/// One vector with its metadata, as written to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Metadata key holding the id of the upload batch a record was indexed in.
pub const BATCH_ID_KEY: &str = "batch_id";

/// Equality constraints on record metadata. A record matches when every
/// condition holds; the empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    conditions: Vec<(String, serde_json::Value)>,
}

impl MetadataFilter {
    /// Matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `metadata[key] == value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }

    /// Only records indexed in upload batch `batch_id`.
    pub fn batch(batch_id: &str) -> Self {
        Self::all().eq(BATCH_ID_KEY, batch_id)
    }

    pub fn conditions(&self) -> &[(String, serde_json::Value)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        self.conditions
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn list_indexes(&self) -> Result<Vec<String>>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<()>;

    async fn upsert(&self, index: &str, records: &[IndexRecord]) -> Result<()>;

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>>;
}

/// Create the index described by `spec` unless it already exists.
///
/// Returns `true` when the index was created by this call.
pub async fn ensure_index(index: &dyn VectorIndex, spec: &IndexSpec) -> Result<bool> {
    let existing = index.list_indexes().await?;
    if existing.iter().any(|name| name == &spec.name) {
        return Ok(false);
    }
    index.create_index(spec).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_requires_every_condition() {
        let metadata = json!({ "batch_id": "b1", "source": "source_0" });
        assert!(MetadataFilter::all().matches(&metadata));
        assert!(MetadataFilter::batch("b1").matches(&metadata));
        assert!(!MetadataFilter::batch("b2").matches(&metadata));
        assert!(!MetadataFilter::batch("b1")
            .eq("source", "source_1")
            .matches(&metadata));
        assert!(!MetadataFilter::batch("b1").matches(&json!({ "source": "source_0" })));
    }
}
