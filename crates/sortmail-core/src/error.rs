use thiserror::Error;

/// Failures the tool distinguishes when reporting back to the user.
///
/// Per-item problems (`Parse`) are normally recovered where they happen;
/// the rest abort the running command.
#[derive(Debug, Error)]
pub enum SortError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("mail connection failed: {0}")]
    Connection(String),

    #[error("ingest failed: {0}")]
    Ingest(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("model call failed: {0}")]
    ModelCall(String),
}
