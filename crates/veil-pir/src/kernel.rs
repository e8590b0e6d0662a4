//! The capability set a shard drives its PIR backend through
//!
//! Deployments back this with different engines (the CPU scan here; a
//! GPU daemon over a local socket elsewhere). One implementation is
//! picked per deployment; the shard never branches on which.

use crate::Result;

/// A PIR read backend.
///
/// Lifecycle: `configure` fixes the geometry, `set_db` publishes a
/// database snapshot, `read` answers batches against the most recent
/// snapshot, `free` releases backend resources.
pub trait Kernel {
    /// Fix bucket geometry and the batch size `read` will serve.
    fn configure(&mut self, bucket_size: usize, num_buckets: usize, batch_size: usize)
        -> Result<()>;

    /// Publish a database snapshot. Copies the image: reads in flight
    /// keep the buffer they started on.
    fn set_db(&mut self, db: &[u8]) -> Result<()>;

    /// Answer a batch of requests.
    ///
    /// `reqs` is `batch_size` request vectors of `req_len` bytes each,
    /// concatenated. The reply is `batch_size * bucket_size` bytes in
    /// request order.
    fn read(&self, reqs: &[u8], req_len: usize) -> Result<Vec<u8>>;

    /// Release backend resources. The kernel must not be read after.
    fn free(&mut self) -> Result<()>;
}
