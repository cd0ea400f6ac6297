//! Error taxonomy for the chat pipeline.
//!
//! Only [`ConfigError`] is fatal (and only at startup). Everything else is
//! recoverable and is turned into a chat-visible message at the session
//! boundary by [`Session::submit`](crate::session::Session::submit).

use thiserror::Error;

/// Invalid configuration: chunk sizes, model mapping, or malformed settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid chunking: overlap ({overlap}) must be strictly less than chunk size ({chunk_size}) and chunk size must be > 0")]
    InvalidChunking { chunk_size: usize, overlap: usize },

    #[error("invalid model mapping: {0}")]
    InvalidModelMapping(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// An uploaded or standing-context file could not be turned into plain text.
#[derive(Debug, Error)]
pub enum DocumentParseError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("invalid JSON in {name}: {message}")]
    Json { name: String, message: String },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("could not read {name}: {message}")]
    Io { name: String, message: String },
}

/// The embedding service or vector index could not answer.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),
}

/// Failures talking to the model runtime.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The runtime could not be reached or refused the request.
    #[error("model runtime unavailable: {0}")]
    Unavailable(String),

    /// The response stream stopped before the runtime signalled completion.
    #[error("generation interrupted: {0}")]
    Incomplete(String),
}

/// A session-level request that cannot be honoured.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error(transparent)]
    Document(#[from] DocumentParseError),
}
