//! Index builder.
//!
//! Writes a chunk batch into the vector index and returns a [`Retriever`]
//! bound to it. Every record is stamped with a fresh batch id and the
//! retriever only reads records carrying that id, so other sessions and
//! earlier uploads sharing the index are never retrieved. The session's chunk set is replaced only after the upsert
//! succeeds, so the chunks a question is answered against are always the
//! chunks most recently indexed.

use anyhow::{bail, Result};
use docqa_core::index::{ensure_index, IndexRecord, IndexSpec, Metric, BATCH_ID_KEY};
use docqa_core::models::Chunk;

use crate::retriever::Retriever;
use crate::services::Services;
use crate::session::SessionContext;

/// Embed and upsert `chunks`, then commit them to `session`.
///
/// An empty batch is a no-op and yields `Ok(None)`. The index is created
/// with the cosine metric and the embedder's dimensionality when it does
/// not exist yet.
pub async fn build_index(
    services: &Services,
    session: &mut SessionContext,
    chunks: Vec<Chunk>,
) -> Result<Option<Retriever>> {
    if chunks.is_empty() {
        tracing::info!(session = %session.id(), "no chunks to index");
        return Ok(None);
    }

    let spec = IndexSpec {
        name: services.index_name.clone(),
        metric: Metric::Cosine,
        dimension: services.embedder.dims(),
    };
    if ensure_index(services.index.as_ref(), &spec).await? {
        tracing::info!(index = %spec.name, "created vector index");
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = services.embedder.embed(&texts).await?;
    if vectors.len() != chunks.len() {
        bail!(
            "embedder returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        );
    }

    let batch_id = uuid::Uuid::new_v4().to_string();
    let records: Vec<IndexRecord> = chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, values)| {
            let mut metadata = chunk.metadata_json();
            metadata[BATCH_ID_KEY] = serde_json::Value::String(batch_id.clone());
            IndexRecord {
                id: uuid::Uuid::new_v4().to_string(),
                values,
                metadata,
            }
        })
        .collect();
    services.index.upsert(&spec.name, &records).await?;

    tracing::info!(
        session = %session.id(),
        index = %spec.name,
        batch = %batch_id,
        chunks = chunks.len(),
        "indexed chunks"
    );
    session.set_chunks(chunks);

    Ok(Some(Retriever::new(
        services.index.clone(),
        services.embedder.clone(),
        spec.name,
        batch_id,
        services.config.index.top_k,
    )))
}
