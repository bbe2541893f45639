//! Pinecone vector index client.
//!
//! Talks to the environment-scoped REST API:
//!
//! | Plane | Method | Path | Use |
//! |-------|--------|------|-----|
//! | controller | `GET` | `/databases` | list index names |
//! | controller | `POST` | `/databases` | create an index |
//! | controller | `GET` | `/databases/{name}` | readiness and data-plane host |
//! | data | `POST` | `/vectors/upsert` | write records |
//! | data | `POST` | `/query` | filtered top-k search with metadata |
//!
//! The controller lives at `https://controller.{env}.pinecone.io`. Data-plane
//! hosts are looked up once per index and cached. Every request carries the
//! `Api-Key` header and goes through [`send_with_retry`].

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use docqa_core::index::{IndexRecord, IndexSpec, MetadataFilter, ScoredRecord, VectorIndex};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::IndexConfig;
use crate::retry::send_with_retry;

/// Attempts made while waiting for a new index to report `ready`.
const READY_POLL_ATTEMPTS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct PineconeIndex {
    client: reqwest::Client,
    api_key: String,
    controller_url: String,
    upsert_batch_size: usize,
    max_retries: u32,
    hosts: RwLock<HashMap<String, String>>,
}

impl PineconeIndex {
    pub fn new(config: &IndexConfig, api_key: impl Into<String>, environment: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            controller_url: format!("https://controller.{}.pinecone.io", environment),
            upsert_batch_size: config.upsert_batch_size.max(1),
            max_retries: config.max_retries,
            hosts: RwLock::new(HashMap::new()),
        })
    }

    async fn describe(&self, index: &str) -> Result<serde_json::Value> {
        let url = format!("{}/databases/{}", self.controller_url, index);
        let response = send_with_retry("Pinecone", self.max_retries, || {
            self.client.get(&url).header("Api-Key", &self.api_key)
        })
        .await?;
        Ok(response.json().await?)
    }

    /// Data-plane base URL for `index`, cached after the first lookup.
    async fn data_url(&self, index: &str) -> Result<String> {
        if let Some(url) = self.hosts.read().await.get(index) {
            return Ok(url.clone());
        }

        let description = self.describe(index).await?;
        let host = index_host(&description)
            .with_context(|| format!("Pinecone index '{}' has no host yet", index))?;
        let url = format!("https://{}", host);
        self.hosts
            .write()
            .await
            .insert(index.to_string(), url.clone());
        Ok(url)
    }

    async fn wait_until_ready(&self, index: &str) -> Result<()> {
        for _ in 0..READY_POLL_ATTEMPTS {
            let description = self.describe(index).await?;
            if index_ready(&description) {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        bail!("Pinecone index '{}' did not become ready", index)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn list_indexes(&self) -> Result<Vec<String>> {
        let url = format!("{}/databases", self.controller_url);
        let response = send_with_retry("Pinecone", self.max_retries, || {
            self.client.get(&url).header("Api-Key", &self.api_key)
        })
        .await?;
        let json: serde_json::Value = response.json().await?;
        parse_index_list(&json)
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        let url = format!("{}/databases", self.controller_url);
        let body = serde_json::json!({
            "name": spec.name,
            "dimension": spec.dimension,
            "metric": spec.metric.as_str(),
        });
        send_with_retry("Pinecone", self.max_retries, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .json(&body)
        })
        .await?;
        tracing::info!(index = %spec.name, dimension = spec.dimension, metric = spec.metric.as_str(), "created Pinecone index");

        self.wait_until_ready(&spec.name).await
    }

    async fn upsert(&self, index: &str, records: &[IndexRecord]) -> Result<()> {
        let base = self.data_url(index).await?;
        let url = format!("{}/vectors/upsert", base);

        for batch in records.chunks(self.upsert_batch_size) {
            let body = UpsertRequest {
                vectors: batch.iter().map(UpsertVector::from).collect(),
            };
            send_with_retry("Pinecone", self.max_retries, || {
                self.client
                    .post(&url)
                    .header("Api-Key", &self.api_key)
                    .json(&body)
            })
            .await?;
            tracing::debug!(index, records = batch.len(), "upserted batch");
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
        let base = self.data_url(index).await?;
        let url = format!("{}/query", base);
        let mut body = serde_json::json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "includeValues": false,
        });
        if let Some(filter) = filter_json(filter) {
            body["filter"] = filter;
        }
        let response = send_with_retry("Pinecone", self.max_retries, || {
            self.client
                .post(&url)
                .header("Api-Key", &self.api_key)
                .json(&body)
        })
        .await?;
        let json: serde_json::Value = response.json().await?;
        parse_matches(&json)
    }
}

/// Render `filter` in Pinecone's `{"key": {"$eq": value}}` form.
fn filter_json(filter: &MetadataFilter) -> Option<serde_json::Value> {
    if filter.is_empty() {
        return None;
    }
    let conditions: serde_json::Map<String, serde_json::Value> = filter
        .conditions()
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::json!({ "$eq": value })))
        .collect();
    Some(serde_json::Value::Object(conditions))
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a serde_json::Value,
}

impl<'a> From<&'a IndexRecord> for UpsertVector<'a> {
    fn from(record: &'a IndexRecord) -> Self {
        Self {
            id: &record.id,
            values: &record.values,
            metadata: &record.metadata,
        }
    }
}

fn parse_index_list(json: &serde_json::Value) -> Result<Vec<String>> {
    let names = json
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: expected a list of indexes"))?;
    Ok(names
        .iter()
        .filter_map(|n| n.as_str().map(str::to_string))
        .collect())
}

fn index_host(description: &serde_json::Value) -> Option<&str> {
    description
        .pointer("/status/host")
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
}

fn index_ready(description: &serde_json::Value) -> bool {
    description
        .pointer("/status/ready")
        .and_then(|r| r.as_bool())
        .unwrap_or(false)
}

fn parse_matches(json: &serde_json::Value) -> Result<Vec<ScoredRecord>> {
    let matches = json
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: missing matches"))?;

    matches
        .iter()
        .map(|m| {
            let id = m
                .get("id")
                .and_then(|i| i.as_str())
                .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: match without id"))?;
            Ok(ScoredRecord {
                id: id.to_string(),
                score: m.get("score").and_then(|s| s.as_f64()).unwrap_or(0.0) as f32,
                metadata: m.get("metadata").cloned().unwrap_or(serde_json::Value::Null),
            })
        })
        .collect()
}
