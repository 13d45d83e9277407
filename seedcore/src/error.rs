//! Error types for seedcore.

use thiserror::Error;

/// Result type alias using seedcore's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Sub-kinds of decomposition failure, named so callers can branch without
/// string matching.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompositionErrorKind {
    #[error("maximum decomposition depth reached")]
    MaxDepth,
    #[error("child content is cyclic with its parent")]
    Cyclic,
    #[error("fewer than the minimum number of children were produced")]
    InsufficientChildren,
    #[error("more than the maximum number of children were produced")]
    TooManyChildren,
    #[error("a child had empty content")]
    EmptyChild,
    #[error("could not parse a JSON object from the LLM response")]
    ParseFailure,
    #[error("{0}")]
    ProcessingError(String),
}

/// Errors that can occur during orchestration.
///
/// Each variant corresponds to one of the error kinds named as contracts:
/// components return these directly, callers match on kind rather than text.
#[derive(Error, Debug)]
pub enum Error {
    /// Input failed a structural or range check.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration was missing or internally inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// The LLM provider refused or failed the request.
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: String,
        message: String,
        retriable: bool,
    },

    /// Durable storage failed to read, write, or parse.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A tool invocation failed.
    #[error("tool error ({tool}): {message}")]
    Tool {
        tool: String,
        message: String,
        retriable: bool,
    },

    /// Transport-level connection failure (retriable by default).
    #[error("connection error: {0}")]
    Connection(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Authentication or authorization was denied.
    #[error("auth error: {0}")]
    Auth(String),

    /// AC decomposition failed; see `DecompositionErrorKind` for the reason.
    #[error("decomposition error: {kind}")]
    Decomposition { kind: DecompositionErrorKind },

    /// The routing ladder is exhausted at Frontier; not retryable, a pure
    /// signal for the caller to decide what happens next.
    #[error("stagnation: no viable tier above current for pattern {fingerprint}")]
    Stagnation { fingerprint: String },

    /// Catch-all for conditions that don't fit another kind.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite error from the event log or checkpoint store.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport error from the LLM client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>, retriable: bool) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            retriable,
        }
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>, retriable: bool) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
            retriable,
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn decomposition(kind: DecompositionErrorKind) -> Self {
        Self::Decomposition { kind }
    }

    pub fn stagnation(fingerprint: impl Into<String>) -> Self {
        Self::Stagnation {
            fingerprint: fingerprint.into(),
        }
    }

    /// Whether a caller should retry this error under the shared retry policy.
    ///
    /// Auth, validation, config, not-found, cyclic/max-depth decomposition, and
    /// stagnation are never retriable; everything else defaults to retriable
    /// unless explicitly marked otherwise.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Auth(_) | Self::Stagnation { .. } => {
                false
            }
            Self::Decomposition { kind } => matches!(kind, DecompositionErrorKind::ParseFailure),
            Self::Provider { retriable, .. } => *retriable,
            Self::Tool { retriable, .. } => *retriable,
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Persistence(_) | Self::Internal(_) => false,
            Self::Serialization(_) | Self::Io(_) | Self::Sqlite(_) => false,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
        }
    }
}
