//! Similarity retrieval over an indexed chunk set.

use std::sync::Arc;

use anyhow::Result;
use docqa_core::embedding::{embed_query, Embedder};
use docqa_core::index::{MetadataFilter, VectorIndex};

/// A chunk returned by a similarity query, rebuilt from index metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Handle bound to one upload batch in one index; returned by the index
/// builder.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    index_name: String,
    /// Only records stamped with this batch id are returned.
    batch_id: String,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        index_name: impl Into<String>,
        batch_id: impl Into<String>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            index_name: index_name.into(),
            batch_id: batch_id.into(),
            top_k,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The `top_k` chunks of this batch most similar to `question`.
    ///
    /// Hits without `source`/`text` metadata are skipped.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        let vector = embed_query(self.embedder.as_ref(), question).await?;
        let hits = self
            .index
            .query(
                &self.index_name,
                &vector,
                self.top_k,
                &MetadataFilter::batch(&self.batch_id),
            )
            .await?;

        let chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                let source = hit.metadata.get("source")?.as_str()?.to_string();
                let text = hit.metadata.get("text")?.as_str()?.to_string();
                Some(RetrievedChunk {
                    source,
                    text,
                    score: hit.score,
                })
            })
            .collect();

        tracing::debug!(index = %self.index_name, hits = chunks.len(), "retrieved chunks");
        Ok(chunks)
    }
}
