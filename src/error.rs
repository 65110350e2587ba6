//! Error taxonomy shared by every fallible operation in the crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NtripError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing: {0}")]
    Framing(String),

    #[error("checksum mismatch")]
    Checksum,

    #[error("not authorized")]
    Auth,

    #[error("mount not found")]
    NotFound,

    #[error("mount already has a publisher")]
    Conflict,

    #[error("channel closed")]
    Closed,

    #[error("config: {0}")]
    Config(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("task join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, NtripError>;
