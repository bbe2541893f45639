//! Per-session state.
//!
//! A [`SessionContext`] is created when a chat session starts and dropped
//! when it ends. It holds the uploaded files, the department metadata, the
//! chunk set most recently indexed, and the active [`RetrievalChain`].
//! Sessions never share state; the [`SessionStore`] only maps ids to
//! contexts for the HTTP host.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use docqa_core::models::{Chunk, SessionMetadata, UploadedFile};
use tokio::sync::{Mutex, RwLock};

use crate::chain::RetrievalChain;
use crate::error::{QaError, QaResult};

/// State of one chat session, owned by whichever host runs it.
pub struct SessionContext {
    /// Random uuid; the key in [`SessionStore`].
    id: String,
    started_at: DateTime<Utc>,
    /// The first upload must arrive before this instant.
    upload_deadline: Instant,
    /// Files of the latest upload batch.
    files: Vec<UploadedFile>,
    /// Department selection; `None` until a batch is uploaded.
    metadata: Option<SessionMetadata>,
    /// Chunks of the batch most recently indexed, matched against cited
    /// sources.
    chunks: Arc<Vec<Chunk>>,
    /// Chain bound to that same batch; `None` until indexing succeeds.
    chain: Option<Arc<RetrievalChain>>,
}

impl SessionContext {
    /// A fresh session whose upload window closes after `upload_timeout`.
    pub fn new(upload_timeout: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            upload_deadline: Instant::now() + upload_timeout,
            files: Vec::new(),
            metadata: None,
            chunks: Arc::new(Vec::new()),
            chain: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn upload_window_expired(&self) -> bool {
        Instant::now() >= self.upload_deadline
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn set_files(&mut self, files: Vec<UploadedFile>) {
        self.files = files;
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: SessionMetadata) {
        self.metadata = Some(metadata);
    }

    /// Snapshot of the chunk set most recently indexed.
    pub fn chunks(&self) -> Arc<Vec<Chunk>> {
        Arc::clone(&self.chunks)
    }

    pub fn set_chunks(&mut self, chunks: Vec<Chunk>) {
        self.chunks = Arc::new(chunks);
    }

    pub fn chain(&self) -> Option<Arc<RetrievalChain>> {
        self.chain.clone()
    }

    /// Replace the active chain.
    pub fn set_chain(&mut self, chain: RetrievalChain) {
        self.chain = Some(Arc::new(chain));
    }
}

pub type SessionHandle = Arc<Mutex<SessionContext>>;

/// Live sessions keyed by id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    /// Upload window given to every new session.
    upload_timeout: Duration,
}

impl SessionStore {
    pub fn new(upload_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            upload_timeout,
        }
    }

    pub async fn start(&self) -> (String, SessionHandle) {
        let context = SessionContext::new(self.upload_timeout);
        let id = context.id().to_string();
        let handle = Arc::new(Mutex::new(context));
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&handle));
        tracing::info!(session = %id, "session started");
        (id, handle)
    }

    pub async fn get(&self, id: &str) -> QaResult<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| QaError::SessionNotFound(id.to_string()))
    }

    /// Drop a session and everything it holds.
    pub async fn end(&self, id: &str) -> QaResult<()> {
        match self.sessions.write().await.remove(id) {
            Some(_) => {
                tracing::info!(session = %id, "session ended");
                Ok(())
            }
            None => Err(QaError::SessionNotFound(id.to_string())),
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::models::Departments;

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (a, handle_a) = store.start().await;
        let (b, _) = store.start().await;
        assert_ne!(a, b);

        handle_a.lock().await.set_metadata(SessionMetadata {
            departments: Departments::Restricted(vec!["DevOps".into()]),
        });

        let handle_b = store.get(&b).await.unwrap();
        assert!(handle_b.lock().await.metadata().is_none());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn ending_a_session_drops_it() {
        let store = SessionStore::new(Duration::from_secs(60));
        let (id, _) = store.start().await;
        store.end(&id).await.unwrap();
        assert!(matches!(store.get(&id).await, Err(QaError::SessionNotFound(_))));
        assert!(store.end(&id).await.is_err());
    }

    #[test]
    fn new_session_is_empty() {
        let session = SessionContext::new(Duration::from_secs(1800));
        assert!(session.files().is_empty());
        assert!(session.metadata().is_none());
        assert!(session.chunks().is_empty());
        assert!(session.chain().is_none());
        assert!(!session.upload_window_expired());
    }

    #[test]
    fn zero_timeout_expires_immediately() {
        let session = SessionContext::new(Duration::ZERO);
        assert!(session.upload_window_expired());
    }
}
