// ── Recall Atoms: Error Types ──────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, DB, Network, Embedding…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • ConflictDetected is data, not an error — contradictions flow through the
//     resolution machinery, never through this enum.
//   • No variant carries secret material (API keys) in its message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure. Write transactions roll back;
    /// retries are not automatic.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Embedding model unavailable or returned garbage. Fatal to the
    /// transaction that needed the vector.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The deep extractor returned un-parseable output after one retry.
    /// Logged by callers; never fails the turn that produced it.
    #[error("Extractor parse error: {0}")]
    ExtractorParse(String),

    /// External LLM HTTP or API-level failure (non-secret detail only).
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Malformed inbound request (maps to HTTP 400, no side effects).
    #[error("Input error: {0}")]
    Input(String),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create a provider error with name and message.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }
}

// ── Bridges: String → EngineError ──────────────────────────────────────────
// Allows `?` on helpers that produce `Result<T, String>` inside functions
// that return `EngineResult<T>`.

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations should return this type.
pub type EngineResult<T> = Result<T, EngineError>;
