//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid seed: need {expected} bytes, got {actual}")]
    InvalidSeed { expected: usize, actual: usize },

    #[error("bloom filter import: need {expected} bytes, got {actual}")]
    FilterSize { expected: usize, actual: usize },

    #[error("bloom filter size 2^{0} is not addressable")]
    FilterTooLarge(u32),

    #[error("sealed share is malformed")]
    MalformedShare,

    #[error("decryption failed")]
    DecryptFailed,

    #[error("trust domain {0} has no private key loaded")]
    MissingPrivateKey(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("read request carries {actual} shares for {expected} trust domains")]
    ShareCount { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
