//! Shared configuration for clients and servers
//!
//! The config is process-wide and hot-replaceable: holders keep it behind
//! an `ArcSwap` and load a snapshot at the top of each loop iteration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::trustdomain::TrustDomainConfig;
use crate::Result;

/// Parameters every participant must agree on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// How many buckets are in the database
    pub num_buckets: u64,
    /// How many items fit in one bucket
    pub bucket_depth: u64,
    /// How many bytes are in an item
    pub data_size: u64,
    /// False positive rate of interest vectors
    pub bloom_false_positive: f64,
    /// Minimum period between writes
    pub write_interval: Duration,
    /// Minimum period between reads
    pub read_interval: Duration,
    /// Max fraction of capacity that can store messages
    pub max_load_factor: f64,
    /// Fraction of capacity evicted when the window overflows
    pub load_factor_step: f64,
    /// Number of requests served per PIR batch
    pub read_batch: usize,
}

impl Config {
    /// Total number of item slots in the database.
    pub fn capacity(&self) -> u64 {
        self.num_buckets * self.bucket_depth
    }

    /// How many items are visible at a time under the load factor.
    pub fn window_size(&self) -> u64 {
        (self.capacity() as f64 * self.max_load_factor) as u64
    }

    /// Bytes in one bucket.
    pub fn bucket_size(&self) -> usize {
        (self.bucket_depth * self.data_size) as usize
    }

    /// Bytes in one server-side request vector: one bit per bucket.
    pub fn request_length(&self) -> usize {
        self.num_buckets.div_ceil(8) as usize
    }

    /// Load a config from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Client-side configuration: the shared config plus the trust domains
/// the client splits its requests across.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(flatten)]
    pub config: Config,
    /// One entry per PIR trust domain, leader first.
    pub trust_domains: Vec<TrustDomainConfig>,
    /// The update loop polls every `write_interval * interest_multiple`
    /// when no wake arrives sooner.
    pub interest_multiple: u64,
}

impl ClientConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl std::ops::Deref for ClientConfig {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.config
    }
}
