//! End-to-end tests of a chat session: upload, department settings,
//! indexing and sourced answers, driven through the library with a
//! scripted chat model and the in-memory vector index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use docqa::config::Config;
use docqa::error::QaError;
use docqa::flow::{apply_settings, receive_upload, UploadPolicy};
use docqa::generation::{ChatModel, TokenStream};
use docqa::offline::{ExtractiveChat, HashingEmbedder};
use docqa::query::{answer, answer_streaming, AnswerEvent};
use docqa::services::Services;
use docqa::session::SessionContext;
use docqa_core::index::memory::InMemoryIndex;
use docqa_core::models::UploadedFile;
use futures::StreamExt;
use serde_json::json;

const INDEX: &str = "test-index";

// ─── Test doubles ───────────────────────────────────────────────────

/// Replies with a fixed completion, a few characters per fragment, and
/// records every prompt it receives.
struct ScriptedChat {
    completion: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedChat {
    fn new(completion: &str) -> Self {
        Self {
            completion: completion.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, prompt: &str) -> Result<TokenStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let chars: Vec<char> = self.completion.chars().collect();
        let fragments: Vec<Result<String>> = chars
            .chunks(5)
            .map(|c| Ok(c.iter().collect::<String>()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }
}

/// Sets a flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Generates tokens forever; flags when its stream is dropped.
struct EndlessChat {
    dropped: Arc<AtomicBool>,
}

#[async_trait]
impl ChatModel for EndlessChat {
    fn model_name(&self) -> &str {
        "endless"
    }

    async fn stream(&self, _prompt: &str) -> Result<TokenStream> {
        let flag = DropFlag(self.dropped.clone());
        let stream = futures::stream::unfold(flag, |flag| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((Ok("word ".to_string()), flag))
        });
        Ok(stream.boxed())
    }
}

/// Yields one fragment, then fails.
struct FailingChat;

#[async_trait]
impl ChatModel for FailingChat {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn stream(&self, _prompt: &str) -> Result<TokenStream> {
        let fragments: Vec<Result<String>> = vec![
            Ok("Deploys run nightly ".to_string()),
            Err(anyhow::anyhow!("connection reset by peer")),
        ];
        Ok(futures::stream::iter(fragments).boxed())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn services(model: Arc<dyn ChatModel>) -> (Services, Arc<InMemoryIndex>) {
    let index = Arc::new(InMemoryIndex::new());
    let services = Services::new(
        Config::default(),
        Arc::new(HashingEmbedder::new(64)),
        index.clone(),
        model,
        INDEX,
    );
    (services, index)
}

fn text_file(name: &str, body: &str) -> UploadedFile {
    UploadedFile::new(name, "text/plain", body.as_bytes().to_vec())
}

fn session_with(file: UploadedFile) -> SessionContext {
    let mut session = SessionContext::new(Duration::from_secs(1800));
    let policy = UploadPolicy::from(&Config::default().upload);
    receive_upload(&policy, &mut session, vec![file]).unwrap();
    session
}

fn notes_600() -> UploadedFile {
    let mut body = "Deploys run nightly at 2am from the main branch. ".repeat(13);
    body.truncate(600);
    UploadedFile::new("notes.txt", "text/plain", body.into_bytes())
}

/// 2000 characters without separators: three chunks.
fn three_chunk_file() -> UploadedFile {
    UploadedFile::new("long.txt", "text/plain", "y".repeat(2000).into_bytes())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn small_file_tagged_devops_is_one_indexed_chunk() {
    let (services, index) = services(Arc::new(ScriptedChat::new("ok\nSOURCES: source_0")));
    let mut session = session_with(notes_600());

    let outcome = apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();
    assert!(outcome.chain_ready);
    assert_eq!(outcome.chunk_count, 1);
    assert_eq!(session.chunks().len(), 1);
    assert!(session.chain().is_some());

    let records = index.records(INDEX);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata["departments"], json!(["DevOps"]));
    assert_eq!(records[0].metadata["source"], "source_0");
    assert_eq!(records[0].metadata["file_name"], "notes.txt");

    let spec = index.spec(INDEX).unwrap();
    assert_eq!(spec.metric.as_str(), "cosine");
    assert_eq!(spec.dimension, 64);
}

#[tokio::test]
async fn none_selection_stores_unrestricted() {
    let (services, index) = services(Arc::new(ScriptedChat::new("ok")));
    let mut session = session_with(notes_600());

    let outcome = apply_settings(&services, &mut session, &["none", "DevOps"])
        .await
        .unwrap();
    assert!(outcome.departments.is_unrestricted());
    assert_eq!(
        serde_json::to_value(session.metadata().unwrap()).unwrap(),
        json!({ "departments": "unrestricted" })
    );
    assert_eq!(index.records(INDEX)[0].metadata["departments"], "unrestricted");
}

#[tokio::test]
async fn settings_update_reindexes_under_new_tags() {
    let (services, index) = services(Arc::new(ScriptedChat::new("ok")));
    let mut session = session_with(notes_600());

    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();
    let first_chain = session.chain().unwrap();

    apply_settings(&services, &mut session, &["Data management", "none"])
        .await
        .unwrap();
    let second_chain = session.chain().unwrap();

    assert!(!Arc::ptr_eq(&first_chain, &second_chain));
    assert!(session.chunks()[0].departments.is_unrestricted());
    assert_eq!(index.record_count(INDEX), 2);
}

#[tokio::test]
async fn cited_sources_become_suffix_and_panels() {
    let chat = Arc::new(ScriptedChat::new(
        "FINAL ANSWER: They run nightly.\nSOURCES: source_0, source_2.",
    ));
    let (services, _) = services(chat.clone());
    let mut session = session_with(three_chunk_file());
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();
    assert_eq!(session.chunks().len(), 3);

    let result = answer(&session, "When do deploys run?").await.unwrap();
    assert_eq!(result.answer, "They run nightly.\nSources: source_0,source_2");
    assert_eq!(result.citations.len(), 2);
    assert_eq!(result.citations[0].name, "source_0");
    assert_eq!(result.citations[1].content, session.chunks()[2].text);

    let prompts = chat.prompts.lock().unwrap();
    assert!(prompts[0].contains("QUESTION: When do deploys run?"));
    assert!(prompts[0].contains("Source: source_"));
}

#[tokio::test]
async fn unknown_source_reports_none_found() {
    let (services, _) = services(Arc::new(ScriptedChat::new("Blue.\nSOURCES: source_9")));
    let mut session = session_with(three_chunk_file());
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();

    let result = answer(&session, "What colour?").await.unwrap();
    assert_eq!(result.answer, "Blue.\nNo sources found");
    assert!(result.citations.is_empty());
}

#[tokio::test]
async fn streaming_yields_tokens_then_one_final_answer() {
    let (services, _) = services(Arc::new(ScriptedChat::new(
        "FINAL ANSWER: They run nightly at two.\nSOURCES: source_1",
    )));
    let mut session = session_with(three_chunk_file());
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();

    let events: Vec<AnswerEvent> = answer_streaming(&session, "When?")
        .unwrap()
        .map(|e| e.unwrap())
        .collect()
        .await;

    let (last, tokens) = events.split_last().unwrap();
    let streamed: String = tokens
        .iter()
        .map(|e| match e {
            AnswerEvent::Token(t) => t.as_str(),
            AnswerEvent::Done(_) => panic!("Done before the end of the stream"),
        })
        .collect();
    assert_eq!(streamed, "They run nightly at two.");

    match last {
        AnswerEvent::Done(answer) => {
            assert_eq!(answer.answer, "They run nightly at two.\nSources: source_1");
            assert_eq!(answer.citations.len(), 1);
        }
        AnswerEvent::Token(_) => panic!("stream did not end with the final answer"),
    }
}

#[tokio::test]
async fn dropping_the_answer_stream_stops_generation() {
    let dropped = Arc::new(AtomicBool::new(false));
    let (services, _) = services(Arc::new(EndlessChat {
        dropped: dropped.clone(),
    }));
    let mut session = session_with(notes_600());
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();

    let mut stream = answer_streaming(&session, "Anything?").unwrap();
    assert!(matches!(stream.next().await, Some(Ok(AnswerEvent::Token(_)))));
    drop(stream);

    for _ in 0..100 {
        if dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("generation kept running after the consumer went away");
}

#[tokio::test]
async fn question_before_indexing_has_no_active_chain() {
    let session = session_with(notes_600());
    let err = answer(&session, "Hello?").await.unwrap_err();
    assert!(matches!(err, QaError::NoActiveChain));
    assert_eq!(err.code(), "no_active_chain");
}

#[tokio::test]
async fn settings_without_upload_are_rejected() {
    let (services, _) = services(Arc::new(ScriptedChat::new("ok")));
    let mut session = SessionContext::new(Duration::from_secs(60));
    let err = apply_settings(&services, &mut session, &["DevOps"]).await.unwrap_err();
    assert!(matches!(err, QaError::NoFilesUploaded));
}

#[tokio::test]
async fn empty_document_indexes_nothing() {
    let (services, index) = services(Arc::new(ScriptedChat::new("ok")));
    let mut session = session_with(UploadedFile::new("empty.txt", "text/plain", b"   \n".to_vec()));

    let outcome = apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();
    assert!(!outcome.chain_ready);
    assert_eq!(outcome.chunk_count, 0);
    assert!(session.chain().is_none());
    assert!(index.spec(INDEX).is_none());
}

#[tokio::test]
async fn sessions_sharing_an_index_only_see_their_own_chunks() {
    let (services, index) = services(Arc::new(ExtractiveChat));
    let mut cafeteria = session_with(text_file("lunch.txt", "The cafeteria serves lunch at noon."));
    let mut deploys = session_with(text_file("deploys.txt", "Deploys run nightly at 2am."));
    apply_settings(&services, &mut cafeteria, &["none"]).await.unwrap();
    apply_settings(&services, &mut deploys, &["DevOps"]).await.unwrap();
    assert_eq!(index.record_count(INDEX), 2);

    let result = answer(&deploys, "When does the cafeteria serve lunch?").await.unwrap();
    assert_eq!(result.answer, "Deploys run nightly at 2am.\nSources: source_0");
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].content, "Deploys run nightly at 2am.");

    let result = answer(&cafeteria, "When do deploys run?").await.unwrap();
    assert_eq!(result.answer, "The cafeteria serves lunch at noon.\nSources: source_0");
}

#[tokio::test]
async fn reupload_retrieves_only_the_latest_batch() {
    let (services, index) = services(Arc::new(ExtractiveChat));
    let mut session = session_with(text_file("lunch.txt", "The cafeteria serves lunch at noon."));
    apply_settings(&services, &mut session, &["none"]).await.unwrap();

    let policy = UploadPolicy::from(&Config::default().upload);
    receive_upload(
        &policy,
        &mut session,
        vec![text_file("deploys.txt", "Deploys run nightly at 2am.")],
    )
    .unwrap();
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();
    assert_eq!(index.record_count(INDEX), 2);

    let result = answer(&session, "When does the cafeteria serve lunch?").await.unwrap();
    assert_eq!(result.answer, "Deploys run nightly at 2am.\nSources: source_0");
    assert_eq!(result.citations[0].content, session.chunks()[0].text);
}

#[tokio::test]
async fn generation_failure_after_tokens_ends_the_stream_with_an_error() {
    let (services, _) = services(Arc::new(FailingChat));
    let mut session = session_with(notes_600());
    apply_settings(&services, &mut session, &["DevOps"]).await.unwrap();

    let events: Vec<_> = answer_streaming(&session, "When?").unwrap().collect().await;
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], Ok(AnswerEvent::Token(t)) if t == "Deploys run nightly"));
    match &events[1] {
        Err(err) => {
            assert!(matches!(err, QaError::Internal(_)));
            assert_eq!(err.code(), "internal");
        }
        Ok(event) => panic!("expected an error, got {:?}", event),
    }
}
