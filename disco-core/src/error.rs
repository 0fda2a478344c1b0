use thiserror::Error;

/// Core error type for the disco client.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum DiscoError {
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server answered with a status outside the caller's expected set.
    /// `body` is the full response text, captured before the error is raised.
    #[error("HTTP error: {status} {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("json encode error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DiscoError {
    /// Status code carried by an `UnexpectedStatus`, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 401/403, i.e. the server refused the API key.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

pub type CoreResult<T> = std::result::Result<T, DiscoError>;
