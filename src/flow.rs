//! Session start, upload and department settings.
//!
//! The host calls [`welcome`] when a session starts, [`receive_upload`] with
//! the file batch the user picked, and [`apply_settings`] every time the
//! department selection is submitted. Each settings submission re-processes
//! the stored files under the new tags, re-indexes them, and replaces the
//! session's chain.

use docqa_core::departments::{department_options, metadata_for_selection};
use docqa_core::models::{Departments, SessionMetadata, UploadedFile};
use serde::Serialize;

use crate::chain::RetrievalChain;
use crate::config::{Config, UploadConfig};
use crate::error::{QaError, QaResult};
use crate::indexer::build_index;
use crate::loader::process_files;
use crate::services::Services;
use crate::session::SessionContext;

pub const GREETING: &str =
    "Welcome to this space, you can use this to chat with your PDFs, text and CSV files";
pub const UPLOAD_PROMPT: &str = "To get started:\n  1. Upload a PDF, text or CSV file\n  2. Choose the department(s) it belongs to\n  3. Ask questions about the file";
pub const SELECT_DEPARTMENTS: &str =
    "Now select the department(s) the uploaded document should be assigned to.";
pub const UNRESTRICTED_NOTICE: &str = "Be aware that if you don't choose any department or include the option \"none\" in the list of tags, the document will be accessible for any department";
pub const PROCESSING: &str = "Uploaded files are being processed...";
pub const PROCESSED: &str = "Uploaded files processed successfully!";
pub const NO_METADATA_FILTER: &str = "In this interface you can't filter your results with metadata, use the corresponding interface for that";
pub const NOTHING_INDEXED: &str = "No text could be extracted from the uploaded files, nothing was indexed.";

/// What the host's upload prompt enforces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadPolicy {
    pub accept: Vec<String>,
    pub max_files: usize,
    pub max_size_mb: usize,
    pub timeout_secs: u64,
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            accept: config.accept.clone(),
            max_files: config.max_files,
            max_size_mb: config.max_size_mb,
            timeout_secs: config.timeout_secs,
        }
    }
}

impl UploadPolicy {
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_mb * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Welcome {
    pub messages: Vec<String>,
    pub upload: UploadPolicy,
    pub department_options: Vec<String>,
}

/// Messages, upload policy and tag options shown at session start.
pub fn welcome(config: &Config) -> Welcome {
    Welcome {
        messages: vec![GREETING.to_string(), UPLOAD_PROMPT.to_string()],
        upload: UploadPolicy::from(&config.upload),
        department_options: department_options(config.departments.names.as_slice()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub messages: Vec<String>,
    pub file_names: Vec<String>,
}

/// Validate and store an upload batch.
///
/// The first batch must arrive before the session's upload window closes;
/// later batches replace the stored files. Metadata starts out
/// unrestricted until settings are submitted.
pub fn receive_upload(
    policy: &UploadPolicy,
    session: &mut SessionContext,
    files: Vec<UploadedFile>,
) -> QaResult<UploadReceipt> {
    if session.files().is_empty() && session.upload_window_expired() {
        return Err(QaError::UploadTimeout(policy.timeout_secs));
    }
    if files.is_empty() {
        return Err(QaError::InvalidRequest("no files in upload".to_string()));
    }
    if files.len() > policy.max_files {
        return Err(QaError::InvalidRequest(format!(
            "at most {} file(s) may be uploaded, got {}",
            policy.max_files,
            files.len()
        )));
    }

    let limit = policy.max_size_bytes();
    for file in &files {
        if !policy.accept.iter().any(|m| m == &file.mime_type) {
            return Err(QaError::UnsupportedFileType(file.mime_type.clone()));
        }
        if file.size() > limit {
            return Err(QaError::FileTooLarge {
                name: file.name.clone(),
                size: file.size(),
                limit,
            });
        }
    }

    let file_names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
    tracing::info!(session = %session.id(), files = ?file_names, "upload received");

    session.set_files(files);
    session.set_metadata(SessionMetadata::default());

    Ok(UploadReceipt {
        messages: vec![
            format!(
                "{} file : {} is being uploaded...",
                file_names.len(),
                file_names.join(",")
            ),
            SELECT_DEPARTMENTS.to_string(),
            UNRESTRICTED_NOTICE.to_string(),
        ],
        file_names,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsOutcome {
    pub messages: Vec<String>,
    pub departments: Departments,
    pub chunk_count: usize,
    pub chain_ready: bool,
}

/// Apply a department selection and rebuild the index and chain.
pub async fn apply_settings<S: AsRef<str>>(
    services: &Services,
    session: &mut SessionContext,
    selection: &[S],
) -> QaResult<SettingsOutcome> {
    if session.files().is_empty() {
        return Err(QaError::NoFilesUploaded);
    }

    let metadata = metadata_for_selection(selection);
    tracing::info!(session = %session.id(), departments = ?metadata.departments, "settings updated");
    session.set_metadata(metadata.clone());

    let (chunk_count, chain_ready) = reindex(services, session).await?;

    let mut messages = vec![PROCESSING.to_string()];
    if chain_ready {
        messages.push(PROCESSED.to_string());
        messages.push(NO_METADATA_FILTER.to_string());
    } else {
        messages.push(NOTHING_INDEXED.to_string());
    }

    Ok(SettingsOutcome {
        messages,
        departments: metadata.departments,
        chunk_count,
        chain_ready,
    })
}

/// Split the stored files under the current metadata, index them and
/// install a new chain. Returns the chunk count and whether a chain was
/// built.
async fn reindex(services: &Services, session: &mut SessionContext) -> QaResult<(usize, bool)> {
    let metadata = session.metadata().cloned().ok_or(QaError::MetadataNotSet)?;
    let chunks = process_files(&services.loader, session.files(), &metadata).await?;
    let chunk_count = chunks.len();

    match build_index(services, session, chunks).await? {
        Some(retriever) => {
            session.set_chain(RetrievalChain::new(retriever, services.model.clone()));
            Ok((chunk_count, true))
        }
        None => Ok((0, false)),
    }
}
