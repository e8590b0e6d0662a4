//! CPU PIR kernel: a bucket-major XOR scan
//!
//! Holds its own copy of the database image; `set_db` is the snapshot
//! flip. The scan visits each bucket once and folds it into every
//! response whose request bit is set, so cost is `O(db + hits)`
//! regardless of batch composition.

use crate::xor::xor_into;
use crate::{Kernel, PirError, Result};

pub struct KernelCpu {
    name: String,
    bucket_size: usize,
    num_buckets: usize,
    batch_size: usize,
    active: Vec<u8>,
    configured: bool,
}

impl KernelCpu {
    pub fn new(name: &str) -> KernelCpu {
        KernelCpu {
            name: name.to_string(),
            bucket_size: 0,
            num_buckets: 0,
            batch_size: 0,
            active: Vec::new(),
            configured: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }
}

impl Kernel for KernelCpu {
    fn configure(
        &mut self,
        bucket_size: usize,
        num_buckets: usize,
        batch_size: usize,
    ) -> Result<()> {
        self.bucket_size = bucket_size;
        self.num_buckets = num_buckets;
        self.batch_size = batch_size;
        self.active = vec![0u8; bucket_size * num_buckets];
        self.configured = true;
        tracing::debug!(
            kernel = %self.name,
            bucket_size,
            num_buckets,
            batch_size,
            "configured"
        );
        Ok(())
    }

    fn set_db(&mut self, db: &[u8]) -> Result<()> {
        if !self.configured {
            return Err(PirError::NotConfigured);
        }
        if db.len() != self.active.len() {
            return Err(PirError::DbSize {
                expected: self.active.len(),
                actual: db.len(),
            });
        }
        self.active.copy_from_slice(db);
        Ok(())
    }

    fn read(&self, reqs: &[u8], req_len: usize) -> Result<Vec<u8>> {
        if !self.configured {
            return Err(PirError::NotConfigured);
        }
        if req_len == 0 || reqs.len() % req_len != 0 {
            return Err(PirError::RequestSize {
                actual: reqs.len(),
                req_len: req_len.max(1),
            });
        }
        let batch = reqs.len() / req_len;
        if batch != self.batch_size {
            return Err(PirError::BatchSize {
                expected: self.batch_size,
                actual: batch,
            });
        }

        let mut responses = vec![0u8; batch * self.bucket_size];
        for bucket_index in 0..self.num_buckets {
            let byte = bucket_index / 8;
            if byte >= req_len {
                break;
            }
            let mask = 1u8 << (bucket_index % 8);
            let bucket =
                &self.active[bucket_index * self.bucket_size..(bucket_index + 1) * self.bucket_size];
            for req_index in 0..batch {
                if reqs[req_index * req_len + byte] & mask != 0 {
                    let response = &mut responses
                        [req_index * self.bucket_size..(req_index + 1) * self.bucket_size];
                    xor_into(response, bucket);
                }
            }
        }
        Ok(responses)
    }

    fn free(&mut self) -> Result<()> {
        self.active = Vec::new();
        self.configured = false;
        Ok(())
    }
}
