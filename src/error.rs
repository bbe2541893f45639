//! Typed errors surfaced to the chat hosts.
//!
//! Plumbing failures (network, auth, quota, parsing) travel as
//! `anyhow::Error` and end up in [`QaError::Internal`]. The other variants
//! are the conditions the hosts turn into specific user-facing messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QaError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("No active retrieval chain. Upload a document and choose its departments before asking questions.")]
    NoActiveChain,

    #[error("Department metadata has not been set for this session")]
    MetadataNotSet,

    #[error("No files have been uploaded in this session")]
    NoFilesUploaded,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("file '{name}' is {size} bytes, above the {limit} byte limit")]
    FileTooLarge {
        name: String,
        size: usize,
        limit: usize,
    },

    #[error("upload window of {0} seconds has expired")]
    UploadTimeout(u64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QaError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            QaError::UnsupportedFileType(_) => "unsupported_file_type",
            QaError::NoActiveChain => "no_active_chain",
            QaError::MetadataNotSet | QaError::NoFilesUploaded | QaError::InvalidRequest(_) => {
                "bad_request"
            }
            QaError::SessionNotFound(_) => "not_found",
            QaError::FileTooLarge { .. } => "payload_too_large",
            QaError::UploadTimeout(_) => "upload_timeout",
            QaError::Internal(_) => "internal",
        }
    }
}

pub type QaResult<T> = std::result::Result<T, QaError>;
