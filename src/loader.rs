//! Loader/splitter adapter.
//!
//! Turns an upload batch into ordered [`Chunk`]s. Each supported
//! [`FileKind`] maps to a (parser, splitter settings) pair; the mapping is
//! built from the `[splitting]` configuration.
//!
//! Every file is written to a named temporary file for the parser and the
//! temporary file is removed when it goes out of scope, whether parsing
//! succeeds or not. Parsing and splitting run on the blocking thread pool.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use docqa_core::models::{Chunk, FileKind, SessionMetadata, UploadedFile};
use docqa_core::split::{RecursiveCharacterSplitter, SplitterConfig};

use crate::config::SplittingConfig;
use crate::error::{QaError, QaResult};
use crate::extract::{parser_for, DocumentParser};

/// Parser and splitter for one file kind.
pub struct LoaderEntry {
    parser: Box<dyn DocumentParser>,
    splitter: RecursiveCharacterSplitter,
}

impl LoaderEntry {
    pub fn new(parser: Box<dyn DocumentParser>, config: SplitterConfig) -> Self {
        Self {
            parser,
            splitter: RecursiveCharacterSplitter::new(config),
        }
    }

    pub fn splitter_config(&self) -> SplitterConfig {
        self.splitter.config()
    }

    /// Persist `content` to a scoped temporary file, parse it, and split
    /// every logical document in order.
    fn load_and_split(&self, content: &[u8]) -> anyhow::Result<Vec<String>> {
        let mut temp = tempfile::NamedTempFile::new().context("failed to create temp file")?;
        temp.write_all(content)
            .context("failed to write upload to temp file")?;
        temp.flush()?;

        let documents = self.parser.parse(temp.path())?;
        Ok(documents
            .iter()
            .flat_map(|doc| self.splitter.split_text(doc))
            .collect())
    }
}

/// Mapping from file kind to its loader entry.
pub struct LoaderRegistry {
    entries: HashMap<FileKind, Arc<LoaderEntry>>,
}

impl LoaderRegistry {
    pub fn from_config(config: &SplittingConfig) -> Self {
        let mut entries = HashMap::new();
        for kind in FileKind::ALL {
            let splitter = match kind {
                FileKind::Pdf => config.pdf,
                FileKind::Text => config.text,
                FileKind::Csv => config.csv,
            };
            entries.insert(kind, Arc::new(LoaderEntry::new(parser_for(kind), splitter)));
        }
        Self { entries }
    }

    /// Look up the entry for a MIME type.
    pub fn entry(&self, mime_type: &str) -> QaResult<Arc<LoaderEntry>> {
        FileKind::from_mime(mime_type)
            .and_then(|kind| self.entries.get(&kind).cloned())
            .ok_or_else(|| QaError::UnsupportedFileType(mime_type.to_string()))
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::from_config(&SplittingConfig::default())
    }
}

/// Split an upload batch into chunks stamped with `metadata`.
///
/// All MIME types are checked before any file is processed, so an
/// unsupported type aborts the whole batch. Chunks get `source_<i>` ids
/// numbered from 0 across the whole batch, in file order. An empty batch
/// yields no chunks.
pub async fn process_files(
    registry: &LoaderRegistry,
    files: &[UploadedFile],
    metadata: &SessionMetadata,
) -> QaResult<Vec<Chunk>> {
    let entries = files
        .iter()
        .map(|f| registry.entry(&f.mime_type))
        .collect::<QaResult<Vec<_>>>()?;

    let mut chunks = Vec::new();
    for (file, entry) in files.iter().zip(entries) {
        let content = file.content.clone();
        let texts = tokio::task::spawn_blocking(move || entry.load_and_split(&content))
            .await
            .context("loader task panicked")?
            .with_context(|| format!("failed to load {}", file.name))?;

        tracing::info!(
            file = %file.name,
            mime = %file.mime_type,
            bytes = file.size(),
            chunks = texts.len(),
            "split upload"
        );

        for text in texts {
            let source_id = format!("source_{}", chunks.len());
            chunks.push(Chunk {
                source_id,
                departments: metadata.departments.clone(),
                file_name: file.name.clone(),
                text,
            });
        }
    }

    Ok(chunks)
}
