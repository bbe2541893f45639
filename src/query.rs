//! Question answering against a session's active chain.
//!
//! The cited sources returned by the chain are matched back to the
//! session's chunk set (see [`resolve_sources`]) to build the final
//! [`SourcedAnswer`] with its citation panels.

use docqa_core::citations::resolve_sources;
use docqa_core::models::SourcedAnswer;
use futures::stream::{BoxStream, StreamExt};

use crate::chain::{ChainEvent, RetrievalChain};
use crate::error::{QaError, QaResult};
use crate::session::SessionContext;

#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// Answer text as it is generated.
    Token(String),
    /// The finished answer; citation panels attach to the streamed message.
    Done(SourcedAnswer),
}

pub type AnswerStream = BoxStream<'static, QaResult<AnswerEvent>>;

fn active_chain(session: &SessionContext, question: &str) -> QaResult<std::sync::Arc<RetrievalChain>> {
    if question.trim().is_empty() {
        return Err(QaError::InvalidRequest("question must not be empty".to_string()));
    }
    session.chain().ok_or(QaError::NoActiveChain)
}

/// Answer `question` in one piece.
pub async fn answer(session: &SessionContext, question: &str) -> QaResult<SourcedAnswer> {
    let chain = active_chain(session, question)?;
    let chunks = session.chunks();
    let output = chain.ask(question).await?;
    let answer = resolve_sources(&output, &chunks);
    tracing::info!(
        session = %session.id(),
        sources = ?answer.found_sources,
        "answered question"
    );
    Ok(answer)
}

/// Answer `question` as a stream of tokens ending in [`AnswerEvent::Done`].
///
/// The chain and chunk set are captured when this is called, so the
/// session can be released while the answer streams.
pub fn answer_streaming(session: &SessionContext, question: &str) -> QaResult<AnswerStream> {
    let chain = active_chain(session, question)?;
    let chunks = session.chunks();
    let session_id = session.id().to_string();

    let stream = chain
        .ask_streaming(question.to_string())
        .map(move |event| match event {
            Ok(ChainEvent::Token(token)) => Ok(AnswerEvent::Token(token)),
            Ok(ChainEvent::Final(output)) => {
                let answer = resolve_sources(&output, &chunks);
                tracing::info!(session = %session_id, sources = ?answer.found_sources, "answered question");
                Ok(AnswerEvent::Done(answer))
            }
            Err(e) => Err(QaError::Internal(e)),
        });
    Ok(stream.boxed())
}
