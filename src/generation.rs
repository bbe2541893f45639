//! Chat model used to generate answers.
//!
//! [`ChatModel::stream`] returns the generated text as a lazy stream of
//! fragments. [`OpenAiChat`] implements it against the OpenAI chat
//! completions endpoint with `stream: true`, decoding the server-sent event
//! lines (`data: {...}` until `data: [DONE]`).

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::retry::send_with_retry;

/// Generated text fragments, in order.
pub type TokenStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start generating a completion for `prompt`.
    async fn stream(&self, prompt: &str) -> Result<TokenStream>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    config: GenerationConfig,
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "stream": true,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = send_with_retry("OpenAI", self.config.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        tracing::debug!(model = %self.config.model, "chat completion stream opened");
        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| anyhow::anyhow!("OpenAI stream error: {}", e))
            })
            .boxed();
        Ok(sse_token_stream(bytes))
    }
}

/// One decoded event line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let json: serde_json::Value = serde_json::from_str(data)?;
    if let Some(err) = json.get("error") {
        anyhow::bail!("OpenAI stream error: {}", err);
    }
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(content) if !content.is_empty() => Ok(SseLine::Token(content.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>>>,
    buffer: Vec<u8>,
    eof: bool,
    done: bool,
}

/// Decode a raw event-stream body into content fragments.
fn sse_token_stream(bytes: BoxStream<'static, Result<Vec<u8>>>) -> TokenStream {
    let state = SseState {
        bytes,
        buffer: Vec::new(),
        eof: false,
        done: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }

            if let Some(pos) = st.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(line.trim_end()) {
                    Ok(SseLine::Token(token)) => return Some((Ok(token), st)),
                    Ok(SseLine::Done) => return None,
                    Ok(SseLine::Skip) => continue,
                    Err(e) => {
                        st.done = true;
                        return Some((Err(e), st));
                    }
                }
            }

            if st.eof {
                if st.buffer.is_empty() {
                    return None;
                }
                st.buffer.push(b'\n');
                continue;
            }

            match st.bytes.next().await {
                Some(Ok(chunk)) => st.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => st.eof = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> BoxStream<'static, Result<Vec<u8>>> {
        let owned: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(owned).boxed()
    }

    async fn collect(parts: &[&str]) -> Vec<String> {
        sse_token_stream(body(parts))
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[test]
    fn parses_event_lines() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            SseLine::Token("Hi".into())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            SseLine::Skip
        );
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[tokio::test]
    async fn decodes_fragments_split_across_chunks() {
        let tokens = collect(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Deploys \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"con",
            "tent\":\"run nightly.\"}}]}\n\ndata: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ])
        .await;
        assert_eq!(tokens, vec!["Deploys ", "run nightly."]);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_decoded() {
        let tokens = collect(&["data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"]).await;
        assert_eq!(tokens, vec!["end"]);
    }

    #[tokio::test]
    async fn stream_error_event_surfaces() {
        let mut stream = sse_token_stream(body(&["data: {\"error\":{\"message\":\"quota\"}}\n"]));
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn transport_error_ends_the_stream() {
        let parts: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n".to_vec()),
            Err(anyhow::anyhow!("connection reset")),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n".to_vec()),
        ];
        let mut stream = sse_token_stream(futures::stream::iter(parts).boxed());
        assert_eq!(stream.next().await.unwrap().unwrap(), "Hi");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn done_marker_stops_before_trailing_data() {
        let tokens = collect(&[
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ])
        .await;
        assert!(tokens.is_empty());
    }
}
