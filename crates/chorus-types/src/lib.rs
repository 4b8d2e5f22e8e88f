//! Shared types for the chorus crates.
//!
//! - `ChorusError`: unified error taxonomy for routing, provider calls and history
//! - `ErrorKind`: copyable discriminant of `ChorusError`
//! - `QueryContext`: cancellation and deadline signal threaded through every query

mod context;

pub use context::QueryContext;

/// Unified error type for all chorus subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ChorusError {
    // === Routing Errors ===
    #[error("model is required for {provider} provider")]
    MissingModel { provider: String },

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("provider {0} not configured")]
    ProviderNotConfigured(String),

    #[error("no models available for provider {0}")]
    NoDefaultModel(String),

    // === Provider Errors ===
    #[error("error sending request to {provider}: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} API error ({}): {message}", backend_label(.status, .category))]
    Backend {
        provider: String,
        status: u16,
        category: Option<String>,
        message: String,
    },

    #[error("error parsing response from {provider}: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("request to {provider} was canceled")]
    Canceled { provider: String },

    #[error("request to {provider} timed out")]
    Timeout { provider: String },

    // === History Errors ===
    #[error("failed to log query: {0}")]
    HistoryWrite(String),

    #[error("failed to read query history: {0}")]
    HistoryRead(String),

    // === Configuration Errors ===
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid model registry: {0}")]
    InvalidRegistry(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

fn backend_label(status: &u16, category: &Option<String>) -> String {
    match category {
        Some(category) => category.clone(),
        None => format!("status {status}"),
    }
}

/// Failure class of a [`ChorusError`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingModel,
    UnknownModel,
    ProviderNotConfigured,
    NoDefaultModel,
    Transport,
    Backend,
    MalformedResponse,
    EmptyResponse,
    Canceled,
    Timeout,
    HistoryWrite,
    HistoryRead,
    Config,
    InvalidRegistry,
    Io,
    Json,
    Other,
}

impl ChorusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChorusError::MissingModel { .. } => ErrorKind::MissingModel,
            ChorusError::UnknownModel(_) => ErrorKind::UnknownModel,
            ChorusError::ProviderNotConfigured(_) => ErrorKind::ProviderNotConfigured,
            ChorusError::NoDefaultModel(_) => ErrorKind::NoDefaultModel,
            ChorusError::Transport { .. } => ErrorKind::Transport,
            ChorusError::Backend { .. } => ErrorKind::Backend,
            ChorusError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            ChorusError::EmptyResponse { .. } => ErrorKind::EmptyResponse,
            ChorusError::Canceled { .. } => ErrorKind::Canceled,
            ChorusError::Timeout { .. } => ErrorKind::Timeout,
            ChorusError::HistoryWrite(_) => ErrorKind::HistoryWrite,
            ChorusError::HistoryRead(_) => ErrorKind::HistoryRead,
            ChorusError::Config(_) => ErrorKind::Config,
            ChorusError::InvalidRegistry(_) => ErrorKind::InvalidRegistry,
            ChorusError::Io(_) => ErrorKind::Io,
            ChorusError::Json(_) => ErrorKind::Json,
            ChorusError::Other(_) => ErrorKind::Other,
        }
    }

    /// Returns `true` if the call was abandoned because the query context was
    /// canceled or its deadline passed.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ChorusError::Canceled { .. } | ChorusError::Timeout { .. }
        )
    }

    /// Names the stage of a query that produced the error.
    pub fn stage(&self) -> &'static str {
        match self {
            ChorusError::MissingModel { .. }
            | ChorusError::UnknownModel(_)
            | ChorusError::NoDefaultModel(_) => "model validation",
            ChorusError::ProviderNotConfigured(_)
            | ChorusError::Config(_)
            | ChorusError::InvalidRegistry(_) => "provider configuration",
            ChorusError::Transport { .. }
            | ChorusError::Backend { .. }
            | ChorusError::MalformedResponse { .. }
            | ChorusError::EmptyResponse { .. }
            | ChorusError::Canceled { .. }
            | ChorusError::Timeout { .. } => "backend call",
            ChorusError::HistoryWrite(_) | ChorusError::HistoryRead(_) => "query history",
            ChorusError::Io(_) | ChorusError::Json(_) | ChorusError::Other(_) => "internal",
        }
    }
}

/// A convenience alias for `Result<T, ChorusError>`.
pub type Result<T> = std::result::Result<T, ChorusError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
