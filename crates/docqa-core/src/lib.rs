//! # docqa core
//!
//! Shared, I/O-free logic for docqa: the data model, the recursive
//! character splitter, department tag folding, citation matching, and the
//! [`embedding::Embedder`] / [`index::VectorIndex`] traits that the
//! application crate implements against remote services.
//!
//! This crate contains no tokio, reqwest, or filesystem access.

pub mod citations;
pub mod departments;
pub mod embedding;
pub mod index;
pub mod models;
pub mod split;
