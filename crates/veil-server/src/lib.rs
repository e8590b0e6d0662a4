//! veil-server: the per-shard storage and serving pipeline
//!
//! A [`Shard`] owns one cuckoo table over the pending database image and
//! one PIR kernel over the active snapshot. Three workers cooperate:
//! the write worker places incoming items and evicts the oldest when the
//! window overflows, the read worker batches XOR reads and promotes the
//! pending image on sync ticks, and the reply worker pairs raw kernel
//! output with waiting callers in strict FIFO order.

mod error;
mod shard;

pub use error::ShardError;
pub use shard::{DecodedBatchReadRequest, Shard};

pub type Result<T> = std::result::Result<T, ShardError>;
