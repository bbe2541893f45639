//! # docqa
//!
//! Conversational question answering over uploaded documents.
//!
//! A session uploads a file, tags it with the departments allowed to see
//! it, and asks questions. The file is split into chunks, embedded, and
//! upserted into a vector index; each question retrieves the closest chunks,
//! generates an answer with a chat model, and maps the cited sources back to
//! the chunks so they can be shown next to the answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────┐   ┌───────────┐
//! │  Upload  │──▶│ Loader/Split │──▶│  Indexer   │──▶│  Pinecone │
//! │ + tags   │   │ txt/pdf/csv  │   │ embed+upsert│  │  (or mem) │
//! └──────────┘   └──────────────┘   └─────┬──────┘   └─────┬─────┘
//!                                         ▼                │
//!                                  ┌────────────┐          │
//!                   question ─────▶│   Chain    │◀─────────┘
//!                                  │ retrieve+LLM│
//!                                  └─────┬──────┘
//!                                        ▼
//!                              answer + citations (streamed)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa chat notes.txt --departments DevOps   # terminal session
//! docqa serve                                 # HTTP chat host
//! docqa --offline chat notes.txt              # no credentials needed
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and credentials |
//! | [`error`] | Typed errors surfaced to the hosts |
//! | [`extract`] | Text, PDF and CSV parsers |
//! | [`loader`] | Upload batch → chunks |
//! | [`embedding`] | OpenAI embeddings |
//! | [`retry`] | Backoff for remote calls |
//! | [`pinecone`] | Pinecone vector index client |
//! | [`indexer`] | Embed, upsert, and commit chunks to the session |
//! | [`retriever`] | Similarity retrieval |
//! | [`generation`] | Streaming chat model |
//! | [`chain`] | Retrieval-augmented answer chain |
//! | [`session`] | Per-session state |
//! | [`flow`] | Session start, upload, department settings |
//! | [`query`] | Question answering with citations |
//! | [`server`] | HTTP host |
//! | [`chat`] | Terminal host |
//! | [`services`] | Shared embedder, index and model |
//! | [`offline`] | Credential-free embedder and model |

pub mod chain;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod flow;
pub mod generation;
pub mod indexer;
pub mod loader;
pub mod offline;
pub mod pinecone;
pub mod query;
pub mod retriever;
pub mod retry;
pub mod server;
pub mod services;
pub mod session;
