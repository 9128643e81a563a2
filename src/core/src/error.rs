use quill_protocol::{ErrorKind, ErrorPayload, ProtocolError};
use thiserror::Error;

/// Errors raised inside the orchestration core.
///
/// The tool pipeline never lets these escape: they are converted into an
/// [`ErrorPayload`] on a terminal message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not configured: {0}")]
    Configuration(String),

    #[error("io error on `{path}`: {message}")]
    Io { path: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl CoreError {
    pub fn io(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Protocol(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io { .. } => ErrorKind::Io,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
