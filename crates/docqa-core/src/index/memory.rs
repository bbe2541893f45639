//! In-memory [`VectorIndex`] for tests and offline runs.
//!
//! Indexes live in a `HashMap` behind `std::sync::RwLock`. Queries are
//! brute-force cosine similarity over every stored record.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{IndexRecord, IndexSpec, MetadataFilter, ScoredRecord, VectorIndex};
use crate::embedding::cosine_similarity;

struct StoredIndex {
    spec: IndexSpec,
    records: Vec<IndexRecord>,
}

/// In-memory vector index.
pub struct InMemoryIndex {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, StoredIndex>> {
        self.indexes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, StoredIndex>> {
        self.indexes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of records stored in `index` (0 when the index is absent).
    pub fn record_count(&self, index: &str) -> usize {
        let indexes = self.read();
        indexes.get(index).map(|i| i.records.len()).unwrap_or(0)
    }

    /// Snapshot of all records stored in `index`.
    pub fn records(&self, index: &str) -> Vec<IndexRecord> {
        let indexes = self.read();
        indexes
            .get(index)
            .map(|i| i.records.clone())
            .unwrap_or_default()
    }

    pub fn spec(&self, index: &str) -> Option<IndexSpec> {
        let indexes = self.read();
        indexes.get(index).map(|i| i.spec.clone())
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn list_indexes(&self) -> Result<Vec<String>> {
        let indexes = self.read();
        let mut names: Vec<String> = indexes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let mut indexes = self.write();
        if indexes.contains_key(&spec.name) {
            bail!("index already exists: {}", spec.name);
        }
        indexes.insert(
            spec.name.clone(),
            StoredIndex {
                spec: spec.clone(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    async fn upsert(&self, index: &str, records: &[IndexRecord]) -> Result<()> {
        let mut indexes = self.write();
        let stored = match indexes.get_mut(index) {
            Some(s) => s,
            None => bail!("index not found: {}", index),
        };
        if let Some(bad) = records
            .iter()
            .find(|r| r.values.len() != stored.spec.dimension)
        {
            bail!(
                "vector dimension {} does not match index dimension {}",
                bad.values.len(),
                stored.spec.dimension
            );
        }
        for record in records {
            stored.records.retain(|r| r.id != record.id);
            stored.records.push(record.clone());
        }
        Ok(())
    }

    async fn query(
        &self,
        index: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<ScoredRecord>> {
        let indexes = self.read();
        let stored = match indexes.get(index) {
            Some(s) => s,
            None => bail!("index not found: {}", index),
        };
        let mut hits: Vec<ScoredRecord> = stored
            .records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| ScoredRecord {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: r.metadata.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ensure_index, Metric, BATCH_ID_KEY};

    fn spec(dim: usize) -> IndexSpec {
        IndexSpec {
            name: "docs".into(),
            metric: Metric::Cosine,
            dimension: dim,
        }
    }

    fn record(id: &str, values: Vec<f32>) -> IndexRecord {
        IndexRecord {
            id: id.into(),
            values,
            metadata: serde_json::json!({ "source": id }),
        }
    }

    #[tokio::test]
    async fn ensure_index_creates_once() {
        let index = InMemoryIndex::new();
        assert!(ensure_index(&index, &spec(2)).await.unwrap());
        assert!(!ensure_index(&index, &spec(2)).await.unwrap());
        assert_eq!(index.list_indexes().await.unwrap(), vec!["docs"]);
    }

    #[tokio::test]
    async fn query_ranks_by_cosine() {
        let index = InMemoryIndex::new();
        index.create_index(&spec(2)).await.unwrap();
        index
            .upsert(
                "docs",
                &[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        let hits = index
            .query("docs", &[0.9, 0.1], 1, &MetadataFilter::all())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].metadata["source"], "a");
    }

    #[tokio::test]
    async fn upsert_replaces_same_id_and_checks_dimension() {
        let index = InMemoryIndex::new();
        index.create_index(&spec(2)).await.unwrap();
        index.upsert("docs", &[record("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert("docs", &[record("a", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.record_count("docs"), 1);
        assert!(index
            .upsert("docs", &[record("c", vec![1.0, 0.0, 0.0])])
            .await
            .is_err());
        assert!(index.upsert("missing", &[]).await.is_err());
    }

    #[tokio::test]
    async fn mismatched_dimension_writes_nothing() {
        let index = InMemoryIndex::new();
        index.create_index(&spec(2)).await.unwrap();
        let err = index
            .upsert(
                "docs",
                &[record("a", vec![1.0, 0.0]), record("b", vec![1.0, 0.0, 0.0])],
            )
            .await;
        assert!(err.is_err());
        assert_eq!(index.record_count("docs"), 0);
    }

    #[tokio::test]
    async fn query_skips_records_outside_the_filter() {
        let index = InMemoryIndex::new();
        index.create_index(&spec(2)).await.unwrap();
        let tagged = |id: &str, values: Vec<f32>, batch: &str| IndexRecord {
            id: id.into(),
            values,
            metadata: serde_json::json!({ "source": id, BATCH_ID_KEY: batch }),
        };
        index
            .upsert(
                "docs",
                &[
                    tagged("near", vec![1.0, 0.0], "old"),
                    tagged("far", vec![0.0, 1.0], "new"),
                ],
            )
            .await
            .unwrap();

        let hits = index
            .query("docs", &[1.0, 0.0], 4, &MetadataFilter::batch("new"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "far");
    }
}
