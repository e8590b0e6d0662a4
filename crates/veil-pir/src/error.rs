//! PIR error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PirError {
    #[error("kernel is not configured")]
    NotConfigured,

    #[error("request batch of {actual} bytes is not a multiple of the request length {req_len}")]
    RequestSize { actual: usize, req_len: usize },

    #[error("batch of {actual} requests does not match the configured batch size {expected}")]
    BatchSize { expected: usize, actual: usize },

    #[error("database of {actual} bytes does not match geometry ({expected} bytes)")]
    DbSize { expected: usize, actual: usize },

    #[error("bucket {bucket} out of range: only {num_buckets} buckets")]
    InvalidBucket { bucket: u64, num_buckets: u64 },

    #[error("request shares need at least 2 servers, got {0}")]
    TooFewServers(u64),

    #[error("responses of unequal length cannot be combined")]
    ResponseLength,

    #[error("no responses to combine")]
    NoResponses,
}
