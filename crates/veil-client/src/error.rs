//! Client error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("message of {actual} bytes exceeds the maximum of {max}")]
    MessageTooLong { actual: usize, max: usize },

    #[error("item of {actual} bytes does not fit in {data_size}-byte items")]
    ChunkTooLarge { actual: usize, data_size: usize },

    #[error("polling requires at least 2 trust domains, got {0}")]
    TooFewTrustDomains(usize),

    #[error("encryption failed")]
    Seal,

    #[error("invalid signing key")]
    SigningKey,

    #[error("core error: {0}")]
    Core(#[from] veil_core::Error),
}
