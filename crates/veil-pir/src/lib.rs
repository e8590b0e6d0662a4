//! veil-pir: XOR-based private information retrieval over bucketed data
//!
//! This crate provides:
//! - the [`Kernel`] capability set a shard drives its PIR backend through
//! - a CPU kernel that answers batched XOR-masked reads
//! - client-side request-vector share generation and response combining
//!
//! The database is an opaque byte array of `num_buckets` buckets, each
//! `bucket_size` bytes. A request is one bit per bucket, little-endian:
//! bit `b` lives in byte `b / 8` under mask `1 << (b % 8)`. The response
//! to a request is the XOR of every bucket whose bit is set.

mod cpu;
mod error;
mod kernel;
pub mod client;
pub mod xor;

pub use cpu::KernelCpu;
pub use error::PirError;
pub use kernel::Kernel;

pub type Result<T> = std::result::Result<T, PirError>;
