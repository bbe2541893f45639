//! The remote (or offline) services a session talks to, bundled once at
//! startup and shared by every session.

use std::sync::Arc;

use anyhow::Result;
use docqa_core::embedding::Embedder;
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::index::VectorIndex;

use crate::config::{Config, Credentials};
use crate::embedding::OpenAiEmbedder;
use crate::generation::{ChatModel, OpenAiChat};
use crate::loader::LoaderRegistry;
use crate::offline::{ExtractiveChat, HashingEmbedder};
use crate::pinecone::PineconeIndex;

/// Index name used by `--offline` when none is configured.
pub const OFFLINE_INDEX_NAME: &str = "docqa-offline";

/// Everything a session needs beyond its own state.
///
/// Built once by `main` (or a test) and shared behind an `Arc` by the
/// HTTP host; the terminal host borrows it.
pub struct Services {
    /// Application configuration, shared with every session.
    pub config: Arc<Config>,
    /// Parser and splitter per accepted MIME type.
    pub loader: LoaderRegistry,
    /// Turns chunk text and questions into vectors.
    pub embedder: Arc<dyn Embedder>,
    /// Vector index shared by all sessions; batches are kept apart by
    /// their batch id.
    pub index: Arc<dyn VectorIndex>,
    /// Generates answers from the stuffed prompt.
    pub model: Arc<dyn ChatModel>,
    /// Name of the index inside `index`.
    pub index_name: String,
}

impl Services {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
        index_name: impl Into<String>,
    ) -> Self {
        let loader = LoaderRegistry::from_config(&config.splitting);
        Self {
            config: Arc::new(config),
            loader,
            embedder,
            index,
            model,
            index_name: index_name.into(),
        }
    }

    /// OpenAI embeddings and chat, Pinecone index.
    pub fn remote(config: Config, credentials: &Credentials) -> Result<Self> {
        let embedder = OpenAiEmbedder::new(&config.embedding, &credentials.openai_api_key)?;
        let model = OpenAiChat::new(&config.generation, &credentials.openai_api_key)?;
        let index = PineconeIndex::new(
            &config.index,
            &credentials.pinecone_api_key,
            &credentials.pinecone_env,
        )?;
        tracing::info!(
            index = %credentials.pinecone_index_name,
            environment = %credentials.pinecone_env,
            embedding_model = %config.embedding.model,
            chat_model = %config.generation.model,
            "using remote services"
        );
        let index_name = credentials.pinecone_index_name.clone();
        Ok(Self::new(
            config,
            Arc::new(embedder),
            Arc::new(index),
            Arc::new(model),
            index_name,
        ))
    }

    /// Hashing embedder, extractive model and in-memory index.
    pub fn offline(config: Config) -> Self {
        let index_name = config
            .index
            .name
            .clone()
            .unwrap_or_else(|| OFFLINE_INDEX_NAME.to_string());
        let embedder = HashingEmbedder::new(config.embedding.dims);
        tracing::info!(index = %index_name, "using offline services");
        Self::new(
            config,
            Arc::new(embedder),
            Arc::new(InMemoryIndex::new()),
            Arc::new(ExtractiveChat),
            index_name,
        )
    }
}
