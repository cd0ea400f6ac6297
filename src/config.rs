//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all) yields
//! a working configuration that talks to Ollama on `localhost:11434`.
//! [`load_config`] parses and then runs [`Config::validate`]; any
//! [`ConfigError`] is fatal at startup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model_runtime: ModelRuntimeConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelEntry>,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model_runtime: ModelRuntimeConfig::default(),
            models: default_models(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            history: HistoryConfig::default(),
            embedding: EmbeddingConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted request body. Uploads arrive base64-encoded, so
    /// this is about 4/3 of the largest file.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Sessions unused for this long are dropped. `0` keeps them forever.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}
fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}
fn default_session_idle_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelRuntimeConfig {
    #[serde(default = "default_runtime_url")]
    pub url: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Display name of the model selected for new sessions.
    #[serde(default = "default_model_name")]
    pub default_model: String,
}

impl Default for ModelRuntimeConfig {
    fn default() -> Self {
        Self {
            url: default_runtime_url(),
            timeout_secs: default_generation_timeout(),
            temperature: default_temperature(),
            system_prompt: default_system_prompt(),
            default_model: default_model_name(),
        }
    }
}

fn default_runtime_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_generation_timeout() -> u64 {
    600
}
fn default_temperature() -> f32 {
    0.6
}
fn default_system_prompt() -> String {
    "You are an AI assistant, answering user questions accurately.".to_string()
}
fn default_model_name() -> String {
    "DeepSeek-R1 8B".to_string()
}

/// One `[[models]]` entry: a display name mapped to a runtime model tag.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ModelEntry {
    pub name: String,
    pub tag: String,
}

fn default_models() -> Vec<ModelEntry> {
    [
        ("DeepSeek-R1 1.5B", "deepseek-r1:1.5b"),
        ("DeepSeek-R1 8B", "deepseek-r1:8b"),
        ("DeepSeek-R1 14B", "deepseek-r1:14b"),
        ("llama 3.1 8B", "llama3.1:8b"),
    ]
    .into_iter()
    .map(|(name, tag)| ModelEntry {
        name: name.to_string(),
        tag: tag.to_string(),
    })
    .collect()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Fixed-size character windows with overlap.
    #[default]
    Window,
    /// Paragraph and heading aware grouping, bounded by `max_tokens`.
    Sections,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    /// Window size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared by adjacent windows.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Whitespace-token bound for the `sections` strategy.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_max_tokens() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity, in `[-1, 1]`.
    #[default]
    Cosine,
    /// Euclidean distance mapped to `1 / (1 + d)`, in `(0, 1]`.
    L2,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Maximum characters of retrieved material per prompt.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    /// Hits scoring below this are discarded.
    #[serde(default)]
    pub similarity_threshold: f32,
    #[serde(default)]
    pub metric: Metric,
    /// Extra attempts for embedding and index lookups.
    #[serde(default = "default_retrieval_retries")]
    pub max_retries: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_budget: default_context_budget(),
            similarity_threshold: 0.0,
            metric: Metric::default(),
            max_retries: default_retrieval_retries(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_context_budget() -> usize {
    4000
}
fn default_retrieval_retries() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

fn default_max_messages() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: None,
            dims: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("all-minilm".to_string())
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Retrieve the top-K most similar chunks.
    #[default]
    Smart,
    /// Include whole uploaded documents.
    Full,
}

impl std::str::FromStr for ContextMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "smart" => Ok(ContextMode::Smart),
            "full" => Ok(ContextMode::Full),
            other => Err(format!("unknown context mode '{}': use smart or full", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorpusPolicy {
    /// A new upload discards previously uploaded documents.
    #[default]
    Replace,
    /// A new upload is added next to earlier ones.
    Append,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionConfig {
    /// JSON file merged into every prompt.
    #[serde(default)]
    pub standing_context: Option<PathBuf>,
    #[serde(default)]
    pub corpus_policy: CorpusPolicy,
    #[serde(default)]
    pub default_mode: ContextMode,
}

impl Config {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let c = &self.chunking;
        if c.chunk_size == 0 || c.overlap >= c.chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size: c.chunk_size,
                overlap: c.overlap,
            });
        }
        if c.strategy == ChunkStrategy::Sections && c.max_tokens == 0 {
            return Err(ConfigError::Invalid(
                "chunking.max_tokens must be > 0".to_string(),
            ));
        }

        ModelCatalog::new(&self.models, &self.model_runtime.default_model)?;

        if self.model_runtime.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "model_runtime.url must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model_runtime.temperature) {
            return Err(ConfigError::Invalid(
                "model_runtime.temperature must be in [0.0, 2.0]".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.top_k must be >= 1".to_string(),
            ));
        }
        if self.retrieval.context_budget == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.context_budget must be >= 1".to_string(),
            ));
        }
        if !self.retrieval.similarity_threshold.is_finite() {
            return Err(ConfigError::Invalid(
                "retrieval.similarity_threshold must be finite".to_string(),
            ));
        }

        if self.history.max_messages == 0 {
            return Err(ConfigError::Invalid(
                "history.max_messages must be >= 1".to_string(),
            ));
        }

        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "local" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown embedding provider '{}': must be disabled, ollama, or local",
                    other
                )))
            }
        }
        if self.embedding.provider == "ollama" && self.embedding.model.is_none() {
            return Err(ConfigError::Invalid(
                "embedding.model must be specified when provider is 'ollama'".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be >= 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Display name → runtime tag mapping, in configuration order.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    entries: Vec<ModelEntry>,
    default_index: usize,
}

impl ModelCatalog {
    pub fn new(entries: &[ModelEntry], default_name: &str) -> std::result::Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::InvalidModelMapping(
                "at least one [[models]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::InvalidModelMapping(
                    "model name must not be empty".to_string(),
                ));
            }
            if entry.tag.trim().is_empty() {
                return Err(ConfigError::InvalidModelMapping(format!(
                    "model '{}' has an empty tag",
                    entry.name
                )));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigError::InvalidModelMapping(format!(
                    "duplicate model name '{}'",
                    entry.name
                )));
            }
        }

        let default_index = entries
            .iter()
            .position(|e| e.name == default_name)
            .ok_or_else(|| {
                ConfigError::InvalidModelMapping(format!(
                    "default model '{}' is not in [[models]]",
                    default_name
                ))
            })?;

        Ok(Self {
            entries: entries.to_vec(),
            default_index,
        })
    }

    pub fn from_config(config: &Config) -> std::result::Result<Self, ConfigError> {
        Self::new(&config.models, &config.model_runtime.default_model)
    }

    /// Runtime tag for a display name.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.tag.as_str())
    }

    pub fn default_name(&self) -> &str {
        &self.entries[self.default_index].name
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }
}
