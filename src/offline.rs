//! Credential-free stand-ins for the remote services.
//!
//! `--offline` swaps the OpenAI and Pinecone clients for these: a
//! deterministic bag-of-words [`HashingEmbedder`], an [`ExtractiveChat`]
//! model that quotes the best matching context chunk, and the in-memory
//! vector index from the core crate.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use async_trait::async_trait;
use docqa_core::embedding::Embedder;
use futures::StreamExt;

use crate::generation::{ChatModel, TokenStream};

/// Hashes lowercase words into a fixed number of buckets and L2-normalizes.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for word in words(text) {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "offline-hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Answers with the first sentence of the context chunk sharing the most
/// words with the question, citing that chunk.
pub struct ExtractiveChat;

#[async_trait]
impl ChatModel for ExtractiveChat {
    fn model_name(&self) -> &str {
        "offline-extractive"
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let completion = extractive_answer(prompt);
        let fragments: Vec<Result<String>> = completion
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}

fn extractive_answer(prompt: &str) -> String {
    let question = prompt
        .lines()
        .find_map(|l| l.strip_prefix("QUESTION: "))
        .unwrap_or("");
    let question_words: Vec<String> = words(question).collect();

    let best = context_blocks(prompt)
        .into_iter()
        .max_by_key(|(content, _)| {
            let content_words: Vec<String> = words(content).collect();
            question_words
                .iter()
                .filter(|w| content_words.contains(w))
                .count()
        });

    match best {
        Some((content, source)) => {
            let sentence = first_sentence(&content);
            format!("{}\nSOURCES: {}", sentence, source)
        }
        None => "I don't know.\nSOURCES:".to_string(),
    }
}

/// `(content, source)` pairs from the stuffed prompt, in prompt order.
fn context_blocks(prompt: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut content: Option<String> = None;

    for line in prompt.lines() {
        if let Some(text) = line.strip_prefix("Content: ") {
            content = Some(text.to_string());
        } else if let Some(source) = line.strip_prefix("Source: ") {
            if let Some(text) = content.take() {
                blocks.push((text, source.trim().to_string()));
            }
        } else if let Some(text) = content.as_mut() {
            text.push('\n');
            text.push_str(line);
        }
    }
    blocks
}

fn first_sentence(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.find(". ") {
        Some(pos) => flat[..=pos].to_string(),
        None => flat,
    }
}
