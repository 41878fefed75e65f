use thiserror::Error;

/// Coordinator errors
///
/// `Validation`, `Capacity`, `State` and `Configuration` are returned
/// synchronously and never reach the network. `Network`, `Http`, `Decode` and
/// `Timeout` are observed on a later tick and surface as `api_error` events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input: {reason}")]
    Validation { reason: String },

    #[error("Too many requests in flight (limit {limit})")]
    Capacity { limit: usize },

    #[error("Network error: {message}")]
    Network { message: String, refused: bool },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Malformed response: {reason}")]
    Decode { reason: String },

    #[error("Request {request} timed out after {elapsed_ms} ms")]
    Timeout { request: String, elapsed_ms: u128 },

    #[error("No route for {kind}")]
    UnknownRoute { kind: String },

    #[error("Invalid state: {reason}")]
    State { reason: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

impl CoreError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode { reason: reason.into() }
    }

    pub fn state(reason: impl Into<String>) -> Self {
        Self::State { reason: reason.into() }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration { reason: reason.into() }
    }

    /// True for refused connections, i.e. the backend is not running
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::Network { refused: true, .. })
    }

    /// Human-readable message for status bars and notifications
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { refused: true, .. } => {
                "Backend service unavailable - is the minds backend running?".to_string()
            }
            Self::Validation { reason } | Self::State { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
