//! The request scheduler
//!
//! Three loops, each pacing one kind of traffic:
//! - write: one item per `write_interval`, real if queued, cover if not
//! - read: one PIR request per `read_interval`; polling handles rotate
//!   round-robin and prime their second request so a pair always
//!   travels back-to-back
//! - update: imports the signed, compressed interest filter and
//!   reorders the polling rotation by it
//!
//! All queues are bounded at depth 5: publishers feel backpressure when
//! the pipeline cannot keep up, while cover traffic continues
//! unaffected.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use arc_swap::ArcSwap;
use crossbeam_channel::{after, bounded, select, unbounded, Receiver, Sender};
use flate2::read::DeflateDecoder;
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use veil_core::{
    ClientConfig, Filter, GetUpdatesArgs, GetUpdatesReply, Leader, PirArgs, ReadArgs, ReadReply,
    Seed, WriteArgs, WriteReply,
};

use crate::messages::{split_message, LENGTH_PREFIX_MAX};
use crate::{ClientError, Handle, Result, Topic, MSG_MAX_FRAGMENTS, PUBLISHING_OVERHEAD};

/// Depth of the pending write/read/update queues.
const PENDING_DEPTH: usize = 5;

struct PollRequest {
    args: ReadArgs,
    handle: Option<Arc<Mutex<Handle>>>,
}

struct Inner {
    name: String,
    config: ArcSwap<ClientConfig>,
    dead: AtomicBool,
    leader: Arc<dyn Leader>,

    handles: Mutex<Vec<Arc<Mutex<Handle>>>>,

    pending_writes_tx: Sender<WriteArgs>,
    pending_writes_rx: Receiver<WriteArgs>,
    pending_reads_tx: Sender<PollRequest>,
    pending_reads_rx: Receiver<PollRequest>,
    pending_updates_tx: Sender<bool>,
    pending_updates_rx: Receiver<bool>,

    write_count: Mutex<usize>,
    write_waiters: Condvar,

    last_seq_no: AtomicU64,
    last_interest_sn: AtomicU64,
    interest: Mutex<Filter>,
}

/// A connection to the system: manages reads and writes on the caller's
/// behalf, emitting indistinguishable traffic whether or not the caller
/// is active.
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(name: &str, config: ClientConfig, leader: Arc<dyn Leader>) -> Result<Client> {
        let inner = Inner::new(name, config, leader)?;

        let loops: [fn(&Inner); 3] = [write_loop, read_loop, update_loop];
        for entry in loops {
            let inner = Arc::clone(&inner);
            thread::spawn(move || entry(&inner));
        }

        Ok(Client { inner })
    }

    /// Replace the client's configuration, e.g. after server membership
    /// changes. Takes effect from each loop's next iteration.
    pub fn set_config(&self, config: ClientConfig) {
        self.inner.config.store(Arc::new(config));
    }

    /// Stop emitting traffic after in-progress writes drain.
    pub fn kill(&self) {
        self.inner.dead.store(true, Ordering::SeqCst);
        self.flush();
    }

    /// Longest message [`Client::publish`] is guaranteed to accept.
    /// Reserves room for the framed stream's length prefix.
    pub fn max_length(&self) -> usize {
        let conf = self.inner.config.load_full();
        ((conf.data_size as usize).saturating_sub(PUBLISHING_OVERHEAD) * MSG_MAX_FRAGMENTS)
            .saturating_sub(LENGTH_PREFIX_MAX)
    }

    /// Append a message to a topic. Fragments as needed; each fragment
    /// occupies one write tick.
    pub fn publish(&self, topic: &mut Topic, data: &[u8]) -> Result<()> {
        self.inner.publish(topic, data)
    }

    /// Block until all queued writes have been dispatched.
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// Start polling a topic. Returns the delivery channel, or `None`
    /// if this topic is already being polled.
    pub fn poll(&self, handle: Handle) -> Option<Receiver<Vec<u8>>> {
        self.inner.poll(handle)
    }

    /// Stop polling a topic. Returns whether it was being polled.
    pub fn done(&self, handle: &Handle) -> bool {
        self.inner.done(handle)
    }

    /// Highest global sequence number observed in replies.
    pub fn last_seq_no(&self) -> u64 {
        self.inner.last_seq_no.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn new(name: &str, config: ClientConfig, leader: Arc<dyn Leader>) -> Result<Arc<Inner>> {
        let bf_size = (config.num_buckets as f64).log2().ceil().max(1.0) as u32;
        let interest = Filter::new(bf_size, config.bloom_false_positive)?;

        let (pending_writes_tx, pending_writes_rx) = bounded(PENDING_DEPTH);
        let (pending_reads_tx, pending_reads_rx) = bounded(PENDING_DEPTH);
        let (pending_updates_tx, pending_updates_rx) = bounded(PENDING_DEPTH);

        Ok(Arc::new(Inner {
            name: name.to_string(),
            config: ArcSwap::from_pointee(config),
            dead: AtomicBool::new(false),
            leader,
            handles: Mutex::new(Vec::new()),
            pending_writes_tx,
            pending_writes_rx,
            pending_reads_tx,
            pending_reads_rx,
            pending_updates_tx,
            pending_updates_rx,
            write_count: Mutex::new(0),
            write_waiters: Condvar::new(),
            last_seq_no: AtomicU64::new(0),
            last_interest_sn: AtomicU64::new(0),
            interest: Mutex::new(interest),
        }))
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn publish(&self, topic: &mut Topic, data: &[u8]) -> Result<()> {
        let conf = self.config.load_full();
        let chunk_size = (conf.data_size as usize).saturating_sub(PUBLISHING_OVERHEAD);

        // The cap is on framed fragments, and the length prefix counts
        // toward them, so bound the actual split rather than data.len().
        let parts = split_message(data, chunk_size);
        if parts.len() > MSG_MAX_FRAGMENTS {
            return Err(ClientError::MessageTooLong {
                actual: data.len(),
                max: (chunk_size * MSG_MAX_FRAGMENTS).saturating_sub(LENGTH_PREFIX_MAX),
            });
        }

        for part in parts {
            let args = topic.generate_publish(&conf.config, &part)?;
            tracing::debug!(
                client = %self.name,
                bucket1 = args.bucket1,
                bucket2 = args.bucket2,
                len = args.data.len(),
                "queueing write"
            );
            {
                let mut count = self.write_count.lock().expect("write count poisoned");
                *count += 1;
            }
            // Bounded send: publishers block when the pipeline is behind.
            let _ = self.pending_writes_tx.send(args);
        }
        Ok(())
    }

    fn flush(&self) {
        let mut count = self.write_count.lock().expect("write count poisoned");
        while *count > 0 {
            count = self
                .write_waiters
                .wait(count)
                .expect("write count poisoned");
        }
    }

    fn poll(&self, mut handle: Handle) -> Option<Receiver<Vec<u8>>> {
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        if handles
            .iter()
            .any(|h| h.lock().expect("handle lock poisoned").same_topic(&handle))
        {
            tracing::info!(client = %self.name, "ignoring poll request: already polling");
            return None;
        }

        let (tx, rx) = unbounded();
        handle.set_updates(tx);
        handles.push(Arc::new(Mutex::new(handle)));
        Some(rx)
    }

    fn done(&self, handle: &Handle) -> bool {
        let mut handles = self.handles.lock().expect("handles lock poisoned");
        let before = handles.len();
        handles.retain(|h| !h.lock().expect("handle lock poisoned").same_topic(handle));
        handles.len() != before
    }

    /// Pick the next read: rotate the polling round-robin and prime the
    /// second half of the pair, or fall back to a cover read.
    fn next_request(&self, conf: &ClientConfig) -> PollRequest {
        let mut handles = self.handles.lock().expect("handles lock poisoned");

        if !handles.is_empty() {
            let next = handles.remove(0);
            handles.push(Arc::clone(&next));

            let poll = next
                .lock()
                .expect("handle lock poisoned")
                .generate_poll(conf);
            match poll {
                Ok((first, second)) => {
                    let _ = self.pending_reads_tx.try_send(PollRequest {
                        args: second,
                        handle: Some(Arc::clone(&next)),
                    });
                    return PollRequest {
                        args: first,
                        handle: Some(next),
                    };
                }
                Err(e) => {
                    tracing::error!(client = %self.name, error = %e, "poll generation failed");
                }
            }
        }
        drop(handles);

        PollRequest {
            args: self.generate_random_read(conf),
            handle: None,
        }
    }

    /// Cover write: uniform buckets, uniform bytes, exactly item-sized.
    fn generate_random_write(&self, conf: &ClientConfig) -> WriteArgs {
        let mut data = vec![0u8; conf.data_size as usize];
        OsRng.fill_bytes(&mut data);
        WriteArgs {
            global_seq_no: 0,
            bucket1: OsRng.gen_range(0..conf.num_buckets),
            bucket2: OsRng.gen_range(0..conf.num_buckets),
            data,
            interest_vector: Vec::new(),
            reply: None,
        }
    }

    /// Cover read: per domain, a uniform vector and a fresh pad seed,
    /// byte-identical in shape to a real poll share.
    fn generate_random_read(&self, conf: &ClientConfig) -> ReadArgs {
        let vector_len = conf.request_length() + 1;
        let td = (0..conf.trust_domains.len())
            .map(|_| {
                let mut vector = vec![0u8; vector_len];
                OsRng.fill_bytes(&mut vector);
                PirArgs {
                    request_vector: vector,
                    pad_seed: Seed::random().to_bytes().to_vec(),
                }
            })
            .collect();
        ReadArgs { td }
    }

    /// Reorder the rotation: handles whose next item the interest
    /// filter flags come first, internal order preserved.
    fn prioritize_requests(&self) {
        let interest = self.interest.lock().expect("interest lock poisoned");
        let mut handles = self.handles.lock().expect("handles lock poisoned");

        let mut prioritized = Vec::with_capacity(handles.len());
        let mut deprioritized = Vec::with_capacity(handles.len());
        for handle in handles.iter() {
            let fingerprint = handle
                .lock()
                .expect("handle lock poisoned")
                .next_interest_vector();
            if interest.test(&fingerprint) {
                prioritized.push(Arc::clone(handle));
            } else {
                deprioritized.push(Arc::clone(handle));
            }
        }
        prioritized.extend(deprioritized);
        *handles = prioritized;
    }
}

fn write_loop(inner: &Inner) {
    while !inner.is_dead() {
        let conf = inner.config.load_full();

        let req = match inner.pending_writes_rx.try_recv() {
            Ok(req) => {
                let mut count = inner.write_count.lock().expect("write count poisoned");
                *count -= 1;
                if *count == 0 {
                    inner.write_waiters.notify_all();
                }
                req
            }
            Err(_) => inner.generate_random_write(&conf),
        };

        let mut reply = WriteReply::default();
        if let Err(e) = inner.leader.write(&req, &mut reply) {
            reply.err = e.to_string();
        }
        inner
            .last_seq_no
            .fetch_max(reply.global_seq_no, Ordering::SeqCst);
        if let Some(ch) = &req.reply {
            let _ = ch.send(reply);
        }

        // TODO: draw the sleep from an exponential distribution with
        // mean write_interval so tick phase carries no information.
        thread::sleep(conf.write_interval);
    }
}

fn read_loop(inner: &Inner) {
    while !inner.is_dead() {
        let conf = inner.config.load_full();

        let req = match inner.pending_reads_rx.try_recv() {
            Ok(req) => req,
            Err(_) => inner.next_request(&conf),
        };

        let mut reply = ReadReply::default();
        match req.args.encode(&conf.trust_domains) {
            Ok(encoded) => {
                if let Err(e) = inner.leader.read(&encoded, &mut reply) {
                    reply.err = e.to_string();
                }
            }
            Err(e) => reply.err = e.to_string(),
        }

        inner
            .last_seq_no
            .fetch_max(reply.global_seq_no.end, Ordering::SeqCst);

        if let Some(handle) = &req.handle {
            handle
                .lock()
                .expect("handle lock poisoned")
                .on_response(&req.args, &reply, conf.data_size as usize);
        }

        let sn = reply.last_interest_sn;
        if sn != inner.last_interest_sn.load(Ordering::SeqCst) {
            inner.last_interest_sn.store(sn, Ordering::SeqCst);
            let _ = inner.pending_updates_tx.try_send(true);
        }

        thread::sleep(conf.read_interval);
    }
}

fn update_loop(inner: &Inner) {
    while !inner.is_dead() {
        let conf = inner.config.load_full();
        let fallback = conf.write_interval * conf.interest_multiple.max(1) as u32;

        select! {
            recv(inner.pending_updates_rx) -> _ => {}
            recv(after(fallback)) -> _ => {
                tracing::trace!(client = %inner.name, "interest poll timer");
            }
        }
        if inner.is_dead() {
            return;
        }

        let mut reply = GetUpdatesReply::default();
        if let Err(e) = inner.leader.get_updates(&GetUpdatesArgs {}, &mut reply) {
            tracing::warn!(client = %inner.name, error = %e, "interest update fetch failed");
            continue;
        }

        let mut bits = Vec::new();
        let mut decoder = DeflateDecoder::new(reply.interest_vector.as_slice());
        if let Err(e) = decoder.read_to_end(&mut bits) {
            tracing::warn!(client = %inner.name, error = %e, "failed to decompress interest update");
            continue;
        }

        if !update_verified(&conf, &bits, &reply.signatures) {
            tracing::warn!(client = %inner.name, "rejecting unsigned interest update");
            continue;
        }

        if let Err(e) = inner
            .interest
            .lock()
            .expect("interest lock poisoned")
            .import(&bits)
        {
            tracing::warn!(client = %inner.name, error = %e, "interest import failed");
            continue;
        }
        inner.prioritize_requests();
    }
}

/// Signatures cover the uncompressed bits; every valid trust domain
/// must vouch for the update.
fn update_verified(conf: &ClientConfig, bits: &[u8], signatures: &[Vec<u8>]) -> bool {
    let valid: Vec<_> = conf
        .trust_domains
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_valid)
        .collect();
    !valid.is_empty()
        && valid.iter().all(|(i, domain)| {
            signatures
                .get(*i)
                .is_some_and(|sig| domain.verify_interest(bits, sig))
        })
}
