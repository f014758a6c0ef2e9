use thiserror::Error;

use crate::types::FileId;

pub type Result<T> = std::result::Result<T, CofferError>;

#[derive(Debug, Error)]
pub enum CofferError {
    #[error("invalid stream format: {0}")]
    InvalidFormat(String),

    #[error("HMAC verification failed for stream {0}")]
    InvalidHmac(FileId),

    #[error("corrupted metadata for stream {id}: {msg}")]
    CorruptedMetaData { id: FileId, msg: &'static str },

    #[error("message verification failed for stream {id} at byte offset {offset}")]
    MessageVerification { id: FileId, offset: u64 },

    #[error("stream too long: byte offset {requested} exceeds maximum {max}")]
    StreamTooLong { max: u64, requested: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("wrong password")]
    WrongPassword,

    #[error("config serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
