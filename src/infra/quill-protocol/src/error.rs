use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty delta line")]
    EmptyLine,

    #[error("delta is missing an identity")]
    MissingIdentity,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
