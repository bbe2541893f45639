//! Retrieval-augmented answer chain.
//!
//! A [`RetrievalChain`] pairs a [`Retriever`] with a [`ChatModel`]. Every
//! retrieved chunk is "stuffed" into one prompt as
//! `Content: ...\nSource: source_i`, and the model is asked to answer and
//! to list the sources it used on a trailing `SOURCES:` line.
//!
//! [`RetrievalChain::ask_streaming`] runs generation on a spawned task and
//! hands back a [`ChainStream`]: zero or more [`ChainEvent::Token`]s carrying
//! answer text, then exactly one [`ChainEvent::Final`] with the parsed
//! output. Dropping the stream stops generation.

use std::sync::Arc;

use anyhow::Result;
use docqa_core::citations::{parse_chain_output, AnswerStreamFilter, FINAL_ANSWER_MARKER};
use docqa_core::models::ChainOutput;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::generation::{ChatModel, TokenStream};
use crate::retriever::{RetrievedChunk, Retriever};

/// Capacity of the channel between the generation task and its consumer.
const STREAM_BUFFER: usize = 32;

const PROMPT_HEADER: &str = "Given the following extracted parts of a long document and a question, \
create a final answer with references (\"SOURCES\").
If you don't know the answer, just say that you don't know. Don't try to make up an answer.
ALWAYS return a \"SOURCES\" part in your answer, listing the Source values you used separated by commas.";

#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// Newly generated answer text.
    Token(String),
    /// The complete output; always the last event of a successful run.
    Final(ChainOutput),
}

pub type ChainStream = ReceiverStream<Result<ChainEvent>>;

/// A retriever paired with the model that answers from its hits.
///
/// Replaced, never mutated, when the session re-indexes.
pub struct RetrievalChain {
    /// Reads the batch this chain was built for.
    retriever: Retriever,
    /// Shared with [`Services`](crate::services::Services).
    model: Arc<dyn ChatModel>,
}

impl RetrievalChain {
    pub fn new(retriever: Retriever, model: Arc<dyn ChatModel>) -> Self {
        Self { retriever, model }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    async fn generate(&self, question: &str) -> Result<TokenStream> {
        let context = self.retriever.retrieve(question).await?;
        tracing::info!(
            retrieved = context.len(),
            model = self.model.model_name(),
            "generating answer"
        );
        let prompt = build_prompt(question, &context);
        self.model.stream(&prompt).await
    }

    /// Answer `question`, waiting for the whole generation.
    pub async fn ask(&self, question: &str) -> Result<ChainOutput> {
        let mut tokens = self.generate(question).await?;
        let mut raw = String::new();
        while let Some(fragment) = tokens.next().await {
            raw.push_str(&fragment?);
        }
        Ok(parse_chain_output(&raw))
    }

    /// Answer `question` incrementally.
    ///
    /// Errors are delivered as the last item of the stream.
    pub fn ask_streaming(self: Arc<Self>, question: String) -> ChainStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            if let Err(e) = self.run_streaming(&question, &tx).await {
                tracing::warn!(error = %e, "answer generation failed");
                let _ = tx.send(Err(e)).await;
            }
        });
        ReceiverStream::new(rx)
    }

    async fn run_streaming(
        &self,
        question: &str,
        tx: &mpsc::Sender<Result<ChainEvent>>,
    ) -> Result<()> {
        let mut tokens = self.generate(question).await?;
        let mut filter = AnswerStreamFilter::new();

        loop {
            let fragment = tokio::select! {
                _ = tx.closed() => {
                    tracing::debug!("answer consumer dropped, stopping generation");
                    return Ok(());
                }
                next = tokens.next() => next,
            };
            let Some(fragment) = fragment else { break };

            let visible = filter.push(&fragment?);
            if !visible.is_empty() && tx.send(Ok(ChainEvent::Token(visible))).await.is_err() {
                return Ok(());
            }
        }

        let tail = filter.finish();
        if !tail.is_empty() && tx.send(Ok(ChainEvent::Token(tail))).await.is_err() {
            return Ok(());
        }
        let output = parse_chain_output(filter.raw());
        let _ = tx.send(Ok(ChainEvent::Final(output))).await;
        Ok(())
    }
}

/// Render the "stuff" prompt for `question` over `context`.
pub fn build_prompt(question: &str, context: &[RetrievedChunk]) -> String {
    let summaries: Vec<String> = context
        .iter()
        .map(|chunk| format!("Content: {}\nSource: {}", chunk.text, chunk.source))
        .collect();

    format!(
        "{}\n\nQUESTION: {}\n=========\n{}\n=========\n{}",
        PROMPT_HEADER,
        question.trim(),
        summaries.join("\n\n"),
        FINAL_ANSWER_MARKER
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_lists_every_chunk_with_its_source() {
        let context = vec![
            RetrievedChunk {
                source: "source_0".into(),
                text: "Deploys run nightly.".into(),
                score: 0.9,
            },
            RetrievedChunk {
                source: "source_3".into(),
                text: "Rollbacks are manual.".into(),
                score: 0.7,
            },
        ];
        let prompt = build_prompt(" When do deploys run? ", &context);
        assert!(prompt.contains("QUESTION: When do deploys run?\n"));
        assert!(prompt.contains("Content: Deploys run nightly.\nSource: source_0\n\nContent: Rollbacks are manual.\nSource: source_3"));
        assert!(prompt.ends_with("FINAL ANSWER:"));
    }

    #[test]
    fn prompt_without_context_still_has_question() {
        let prompt = build_prompt("Anything?", &[]);
        assert!(prompt.contains("QUESTION: Anything?"));
        assert!(prompt.contains("=========\n\n========="));
    }
}
