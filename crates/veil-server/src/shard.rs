//! One shard of the database
//!
//! Workers:
//! - write: ingests `WriteArgs`, maintains the in-window log, triggers
//!   eviction and snapshot flips
//! - read: serves batched PIR reads, applies flips on sync ticks
//! - reply: pairs kernel output with callers, FIFO
//!
//! An item becomes visible to readers at the next snapshot flip, not at
//! insert time. Flips fire every `capacity / 2` writes and whenever
//! [`Shard::sync`] is called.

use std::sync::{Arc, Mutex};
use std::thread;

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, select, Receiver, Sender};

use veil_core::{BatchReadReply, Config, PingArgs, PingReply, PirArgs, ReadReply, WriteArgs};
use veil_cuckoo::{Item, Table};
use veil_pir::{Kernel, KernelCpu};

use crate::Result;

/// Depth of the outstanding-read FIFO between the read and reply workers.
const OUTSTANDING_READS: usize = 5;

/// A batch of PIR requests, already unsealed by the trust domain.
pub struct DecodedBatchReadRequest {
    pub args: Vec<PirArgs>,
    pub reply: Sender<BatchReadReply>,
}

/// Handle to a running shard. Cheap to share; all methods are
/// thread-safe. Dropping the handle without [`Shard::close`] leaves the
/// workers running until the process exits.
pub struct Shard {
    name: String,
    config: Arc<ArcSwap<Config>>,
    write_tx: Sender<Option<WriteArgs>>,
    read_tx: Sender<Option<DecodedBatchReadRequest>>,
    sync_tx: Sender<usize>,
    done_rx: Receiver<()>,
}

impl Shard {
    pub fn new(name: &str, config: Config) -> Result<Shard> {
        let table = Table::new(
            &format!("{name}-table"),
            config.num_buckets,
            config.bucket_depth,
            config.data_size as usize,
            None,
            0,
        )?;

        let mut kernel = KernelCpu::new(name);
        kernel.configure(
            config.bucket_size(),
            config.num_buckets as usize,
            config.read_batch,
        )?;
        kernel.set_db(table.data())?;

        let config = Arc::new(ArcSwap::from_pointee(config));
        let table = Arc::new(Mutex::new(table));

        let (write_tx, write_rx) = bounded(0);
        let (read_tx, read_rx) = bounded(0);
        let (sync_tx, sync_rx) = bounded(0);
        let (replies_tx, replies_rx) = bounded::<Vec<u8>>(0);
        let (outstanding_tx, outstanding_rx) =
            bounded::<Sender<BatchReadReply>>(OUTSTANDING_READS);
        let (done_tx, done_rx) = bounded(0);

        {
            let name = name.to_string();
            let config = Arc::clone(&config);
            let table = Arc::clone(&table);
            let sync_tx = sync_tx.clone();
            thread::spawn(move || {
                write_worker(&name, &config, &table, &write_rx, &sync_tx);
            });
        }
        {
            let name = name.to_string();
            let config = Arc::clone(&config);
            let table = Arc::clone(&table);
            thread::spawn(move || {
                read_worker(
                    &name,
                    &config,
                    &table,
                    kernel,
                    &read_rx,
                    &sync_rx,
                    &replies_tx,
                    &outstanding_tx,
                    &done_tx,
                );
            });
        }
        {
            let name = name.to_string();
            let config = Arc::clone(&config);
            thread::spawn(move || {
                reply_worker(&name, &config, &replies_rx, &outstanding_rx);
            });
        }

        Ok(Shard {
            name: name.to_string(),
            config,
            write_tx,
            read_tx,
            sync_tx,
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the shard's config snapshot.
    pub fn set_config(&self, config: Config) {
        self.config.store(Arc::new(config));
    }

    pub fn ping(&self, args: &PingArgs, reply: &mut PingReply) {
        tracing::info!(shard = %self.name, msg = %args.msg, "ping");
        reply.msg = "PONG".to_string();
        reply.err = String::new();
    }

    /// Enqueue a write. Blocks until the write worker accepts it; a
    /// write racing shutdown is dropped.
    pub fn write(&self, args: WriteArgs) {
        if self.write_tx.send(Some(args)).is_err() {
            tracing::warn!(shard = %self.name, "write dropped: shard is closed");
        }
    }

    /// Enqueue a decoded read batch. Blocks until the read worker
    /// accepts it; the reply arrives on the request's channel.
    pub fn batch_read(&self, req: DecodedBatchReadRequest) {
        if self.read_tx.send(Some(req)).is_err() {
            tracing::warn!(shard = %self.name, "read dropped: shard is closed");
        }
    }

    /// Force a snapshot flip, making all applied writes visible.
    pub fn sync(&self) {
        if self.sync_tx.send(1).is_err() {
            tracing::warn!(shard = %self.name, "sync dropped: shard is closed");
        }
    }

    /// Graceful shutdown: drain both loops and wait for the ack.
    pub fn close(&self) {
        tracing::info!(shard = %self.name, "graceful shutdown");
        let _ = self.write_tx.send(None);
        let _ = self.read_tx.send(None);
        let _ = self.done_rx.recv();
    }
}

fn write_worker(
    name: &str,
    config: &ArcSwap<Config>,
    table: &Mutex<Table>,
    write_rx: &Receiver<Option<WriteArgs>>,
    sync_tx: &Sender<usize>,
) {
    let mut entries: Vec<Item> = Vec::new();
    let mut since_flip = 0usize;

    while let Ok(Some(args)) = write_rx.recv() {
        let conf = config.load_full();
        let outstanding_limit = (conf.capacity() as f64 * 0.5) as usize;

        if args.bucket1 >= conf.num_buckets
            || args.bucket2 >= conf.num_buckets
            || args.data.len() != conf.data_size as usize
        {
            tracing::warn!(
                shard = %name,
                seq = args.global_seq_no,
                bucket1 = args.bucket1,
                bucket2 = args.bucket2,
                len = args.data.len(),
                "rejecting malformed write"
            );
            if let Some(reply) = &args.reply {
                let _ = reply.send(veil_core::WriteReply {
                    global_seq_no: args.global_seq_no,
                    err: "malformed write".to_string(),
                });
            }
            continue;
        }

        let item = Item::new(args.global_seq_no, args.data.clone(), args.bucket1, args.bucket2);
        // The log keeps identity only; the bytes live in the table buffer.
        entries.push(Item::new(
            args.global_seq_no,
            Vec::new(),
            args.bucket1,
            args.bucket2,
        ));

        let evicted = {
            let mut table = table.lock().expect("table lock poisoned");
            let (ok, evicted) = table.insert(&item);
            if !ok || entries.len() as u64 > conf.window_size() {
                evict_old(&mut table, &mut entries, &conf);
            }
            evicted
        };

        if let Some(orphan) = evicted {
            let mut table = table.lock().expect("table lock poisoned");
            let (ok, evicted) = table.insert(&orphan);
            if !ok || evicted.is_some() {
                tracing::error!(shard = %name, id = orphan.id, "lost an in-window item");
                panic!("consistency violation: lost an in-window DB item");
            }
        }

        if let Some(reply) = &args.reply {
            let _ = reply.send(veil_core::WriteReply {
                global_seq_no: args.global_seq_no,
                err: String::new(),
            });
        }

        since_flip += 1;
        if since_flip > outstanding_limit {
            if sync_tx.send(1).is_err() {
                return;
            }
            since_flip = 0;
        }
    }
    tracing::info!(shard = %name, "write loop closed");
}

/// Remove the oldest `capacity * load_factor_step` entries, oldest
/// first. Window semantics: the anonymity set is the recent writes.
fn evict_old(table: &mut Table, entries: &mut Vec<Item>, conf: &Config) {
    let mut to_remove = (conf.capacity() as f64 * conf.load_factor_step) as usize;
    if to_remove >= entries.len() {
        to_remove = entries.len().saturating_sub(1);
    }
    for entry in entries.iter().take(to_remove) {
        table.remove(entry);
    }
    entries.drain(..to_remove);
}

#[allow(clippy::too_many_arguments)]
fn read_worker(
    name: &str,
    config: &ArcSwap<Config>,
    table: &Mutex<Table>,
    mut kernel: KernelCpu,
    read_rx: &Receiver<Option<DecodedBatchReadRequest>>,
    sync_rx: &Receiver<usize>,
    replies_tx: &Sender<Vec<u8>>,
    outstanding_tx: &Sender<Sender<BatchReadReply>>,
    done_tx: &Sender<()>,
) {
    loop {
        select! {
            recv(read_rx) -> msg => match msg {
                Ok(Some(req)) => {
                    let conf = config.load_full();
                    batch_read(name, &kernel, req, &conf, replies_tx, outstanding_tx);
                }
                Ok(None) | Err(_) => {
                    tracing::info!(shard = %name, "read loop closed");
                    let _ = kernel.free();
                    let _ = done_tx.send(());
                    return;
                }
            },
            recv(sync_rx) -> msg => {
                if msg.is_err() {
                    return;
                }
                let table = table.lock().expect("table lock poisoned");
                if let Err(e) = kernel.set_db(table.data()) {
                    tracing::error!(shard = %name, error = %e, "snapshot flip failed");
                    panic!("snapshot flip failed: {e}");
                }
            }
        }
    }
}

fn batch_read(
    name: &str,
    kernel: &KernelCpu,
    req: DecodedBatchReadRequest,
    conf: &Config,
    replies_tx: &Sender<Vec<u8>>,
    outstanding_tx: &Sender<Sender<BatchReadReply>>,
) {
    let req_len = conf.request_length();

    if req.args.len() != conf.read_batch {
        tracing::info!(
            shard = %name,
            expected = conf.read_batch,
            actual = req.args.len(),
            "read failed: incorrect batch size"
        );
        let _ = req.reply.send(BatchReadReply {
            err: "invalid batch size".to_string(),
            replies: Vec::new(),
        });
        return;
    }

    let mut pirvector = vec![0u8; req_len * conf.read_batch];
    for (i, args) in req.args.iter().enumerate() {
        let n = args.request_vector.len().min(req_len);
        pirvector[req_len * i..req_len * i + n].copy_from_slice(&args.request_vector[..n]);
    }

    match kernel.read(&pirvector, req_len) {
        Ok(raw) => {
            // Order matters: hand the bytes to the reply worker first so
            // the FIFO of waiting callers can never outrun its data.
            let _ = replies_tx.send(raw);
            let _ = outstanding_tx.send(req.reply);
        }
        Err(e) => {
            tracing::error!(shard = %name, error = %e, "PIR kernel read failed");
            let _ = req.reply.send(BatchReadReply {
                err: format!("failed to read: {e}"),
                replies: Vec::new(),
            });
            panic!("PIR kernel read failed: {e}");
        }
    }
}

fn reply_worker(
    name: &str,
    config: &ArcSwap<Config>,
    replies_rx: &Receiver<Vec<u8>>,
    outstanding_rx: &Receiver<Sender<BatchReadReply>>,
) {
    while let Ok(raw) = replies_rx.recv() {
        let Ok(output) = outstanding_rx.recv() else {
            return;
        };
        let conf = config.load_full();
        let bucket_size = conf.bucket_size();

        let replies = raw
            .chunks(bucket_size)
            .map(|chunk| ReadReply {
                data: chunk.to_vec(),
                ..ReadReply::default()
            })
            .collect();
        let _ = output.send(BatchReadReply {
            err: String::new(),
            replies,
        });
    }
    tracing::debug!(shard = %name, "reply loop closed");
}
