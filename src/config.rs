//! Configuration loading.
//!
//! Non-secret settings come from an optional TOML file; every section has
//! defaults so the file may be absent. Credentials and the index name are
//! read from the process environment (after `.env` is loaded in `main`).

use anyhow::{bail, Context, Result};
use docqa_core::departments::DEFAULT_DEPARTMENTS;
use docqa_core::models::{MIME_CSV, MIME_PDF, MIME_TEXT};
use docqa_core::split::SplitterConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub splitting: SplittingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub departments: DepartmentsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Limits the host enforces on the upload prompt.
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_accept")]
    pub accept: Vec<String>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,
    #[serde(default = "default_upload_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            accept: default_accept(),
            max_files: default_max_files(),
            max_size_mb: default_max_size_mb(),
            timeout_secs: default_upload_timeout_secs(),
        }
    }
}

impl UploadConfig {
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_mb * 1024 * 1024
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_accept() -> Vec<String> {
    vec![
        MIME_TEXT.to_string(),
        MIME_PDF.to_string(),
        MIME_CSV.to_string(),
    ]
}
fn default_max_files() -> usize {
    1
}
fn default_max_size_mb() -> usize {
    20
}
fn default_upload_timeout_secs() -> u64 {
    1800
}

/// Window/overlap per file kind.
#[derive(Debug, Deserialize, Clone)]
pub struct SplittingConfig {
    #[serde(default = "default_pdf_splitter")]
    pub pdf: SplitterConfig,
    #[serde(default = "default_text_splitter")]
    pub text: SplitterConfig,
    #[serde(default = "default_csv_splitter")]
    pub csv: SplitterConfig,
}

impl Default for SplittingConfig {
    fn default() -> Self {
        Self {
            pdf: SplitterConfig::PDF,
            text: SplitterConfig::TEXT,
            csv: SplitterConfig::CSV,
        }
    }
}

fn default_pdf_splitter() -> SplitterConfig {
    SplitterConfig::PDF
}
fn default_text_splitter() -> SplitterConfig {
    SplitterConfig::TEXT
}
fn default_csv_splitter() -> SplitterConfig {
    SplitterConfig::CSV
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_embedding_model() -> String {
    "text-embedding-ada-002".to_string()
}
fn default_dims() -> usize {
    docqa_core::embedding::EMBEDDING_DIMS
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Overrides `PINECONE_INDEX_NAME` when set.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: None,
            top_k: default_top_k(),
            upsert_batch_size: default_upsert_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    4
}
fn default_upsert_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout_secs(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct DepartmentsConfig {
    #[serde(default = "default_department_names")]
    pub names: Vec<String>,
}

impl Default for DepartmentsConfig {
    fn default() -> Self {
        Self {
            names: default_department_names(),
        }
    }
}

fn default_department_names() -> Vec<String> {
    DEFAULT_DEPARTMENTS.iter().map(|s| s.to_string()).collect()
}

/// Credentials and the index name, taken from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub pinecone_api_key: String,
    pub pinecone_env: String,
    pub pinecone_index_name: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &"<redacted>")
            .field("pinecone_api_key", &"<redacted>")
            .field("pinecone_env", &self.pinecone_env)
            .field("pinecone_index_name", &self.pinecone_index_name)
            .finish()
    }
}

impl Credentials {
    /// Read `OPENAI_API_KEY`, `PINECONE_API_KEY`, `PINECONE_ENV` and
    /// `PINECONE_INDEX_NAME`. `index_override` wins over the last one.
    pub fn from_env(index_override: Option<&str>) -> Result<Self> {
        let pinecone_index_name = match index_override {
            Some(name) => name.to_string(),
            None => require_env("PINECONE_INDEX_NAME")?,
        };
        Ok(Self {
            openai_api_key: require_env("OPENAI_API_KEY")?,
            pinecone_api_key: require_env("PINECONE_API_KEY")?,
            pinecone_env: require_env("PINECONE_ENV")?,
            pinecone_index_name,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} environment variable not set", name),
    }
}

/// Load and validate the configuration file. A missing file yields the
/// defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

fn validate(config: &Config) -> Result<()> {
    for (kind, splitter) in [
        ("pdf", &config.splitting.pdf),
        ("text", &config.splitting.text),
        ("csv", &config.splitting.csv),
    ] {
        splitter
            .validate()
            .with_context(|| format!("invalid splitting.{} settings", kind))?;
    }

    if config.upload.max_files == 0 {
        bail!("upload.max_files must be >= 1");
    }
    if config.upload.max_size_mb == 0 {
        bail!("upload.max_size_mb must be >= 1");
    }
    for mime in &config.upload.accept {
        if docqa_core::models::FileKind::from_mime(mime).is_none() {
            bail!(
                "upload.accept contains unsupported type '{}'. Must be text/plain, application/pdf, or text/csv.",
                mime
            );
        }
    }

    if config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.index.top_k == 0 {
        bail!("index.top_k must be >= 1");
    }
    if config.index.upsert_batch_size == 0 {
        bail!("index.upsert_batch_size must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
