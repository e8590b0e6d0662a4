//! End-to-end: publish through a leader backed by real shards, poll it
//! back privately, and check the scheduler's traffic discipline.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::bounded;

use veil_client::{Client, Topic};
use veil_core::drbg::pad_bytes;
use veil_core::{
    ClientConfig, Config, EncodedReadArgs, GetUpdatesArgs, GetUpdatesReply, Leader, PingArgs,
    PingReply, Range, ReadReply, TrustDomainConfig, WriteArgs, WriteReply,
};
use veil_pir::xor::xor_into;
use veil_server::{DecodedBatchReadRequest, Shard};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_config() -> Config {
    Config {
        num_buckets: 32,
        bucket_depth: 2,
        data_size: 160,
        bloom_false_positive: 0.05,
        write_interval: Duration::from_millis(5),
        read_interval: Duration::from_millis(5),
        max_load_factor: 0.95,
        load_factor_step: 0.05,
        read_batch: 1,
    }
}

fn client_config(config: &Config, domains: &[TrustDomainConfig]) -> ClientConfig {
    ClientConfig {
        config: config.clone(),
        trust_domains: domains.to_vec(),
        interest_multiple: 100,
    }
}

/// In-process stand-in for the leader frontend: one shard per trust
/// domain, all fed the same write stream. Reads are unsealed with each
/// domain's private key, padded the way replicas do, and combined.
struct TestLeader {
    config: Config,
    domains: Vec<TrustDomainConfig>,
    shards: Vec<Shard>,
    seq: AtomicU64,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl TestLeader {
    fn new(config: Config, domains: Vec<TrustDomainConfig>) -> TestLeader {
        let shards = domains
            .iter()
            .map(|d| Shard::new(d.name.as_str(), config.clone()).unwrap())
            .collect();
        TestLeader {
            config,
            domains,
            shards,
            seq: AtomicU64::new(0),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }
}

impl Leader for TestLeader {
    fn ping(&self, _: &PingArgs, reply: &mut PingReply) -> veil_core::Result<()> {
        reply.msg = "PONG".to_string();
        Ok(())
    }

    fn write(&self, args: &WriteArgs, reply: &mut WriteReply) -> veil_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut forwarded = args.clone();
        forwarded.global_seq_no = seq;
        forwarded.reply = None;
        for shard in &self.shards {
            shard.write(forwarded.clone());
            // Leader-triggered flip: make the write visible immediately.
            shard.sync();
        }

        reply.global_seq_no = seq;
        Ok(())
    }

    fn read(&self, args: &EncodedReadArgs, reply: &mut ReadReply) -> veil_core::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let mut combined = vec![0u8; self.config.bucket_size()];
        for (i, domain) in self.domains.iter().enumerate() {
            let share = args.decode_for(i, domain)?;
            let pad_seed = share.pad_seed.clone();

            let (reply_tx, reply_rx) = bounded(1);
            self.shards[i].batch_read(DecodedBatchReadRequest {
                args: vec![share],
                reply: reply_tx,
            });
            let batch = reply_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("shard reply timed out");

            // Replica-side masking: each domain folds its pad stream in.
            let mut data = batch.replies[0].data.clone();
            let pad = pad_bytes(&pad_seed, data.len())?;
            xor_into(&mut data, &pad);
            xor_into(&mut combined, &data);
        }

        reply.data = combined;
        reply.global_seq_no = Range {
            start: 0,
            end: self.seq.load(Ordering::SeqCst),
        };
        Ok(())
    }

    fn get_updates(&self, _: &GetUpdatesArgs, _: &mut GetUpdatesReply) -> veil_core::Result<()> {
        Ok(())
    }

    fn get_config(&self) -> veil_core::Result<Config> {
        Ok(self.config.clone())
    }
}

#[test]
fn test_publish_then_poll_roundtrip() {
    init_tracing();
    let config = test_config();
    let domains = vec![
        TrustDomainConfig::new("zero", "localhost:9000", true, false),
        TrustDomainConfig::new("one", "localhost:9001", true, false),
    ];
    let leader = Arc::new(TestLeader::new(config.clone(), domains.clone()));
    let client = Client::new("reader", client_config(&config, &domains), leader.clone()).unwrap();

    let mut topic = Topic::new();
    let updates = client.poll(topic.handle()).expect("fresh topic must poll");

    client.publish(&mut topic, b"hello veil").unwrap();
    client.flush();

    let message = updates
        .recv_timeout(Duration::from_secs(10))
        .expect("poll never returned the message");
    assert_eq!(message, b"hello veil".to_vec());

    assert!(client.last_seq_no() > 0);

    client.kill();
    for shard in &leader.shards {
        shard.close();
    }
}

#[test]
fn test_multi_fragment_message_roundtrip() {
    init_tracing();
    let config = test_config();
    let domains = vec![
        TrustDomainConfig::new("zero", "localhost:9000", true, false),
        TrustDomainConfig::new("one", "localhost:9001", true, false),
    ];
    let leader = Arc::new(TestLeader::new(config.clone(), domains.clone()));
    let client = Client::new("reader", client_config(&config, &domains), leader.clone()).unwrap();

    let mut topic = Topic::new();
    let updates = client.poll(topic.handle()).expect("fresh topic must poll");

    // Spans several items at data_size 160.
    let message: Vec<u8> = (0..200u8).collect();
    client.publish(&mut topic, &message).unwrap();
    client.flush();

    let received = updates
        .recv_timeout(Duration::from_secs(20))
        .expect("poll never returned the message");
    assert_eq!(received, message);

    client.kill();
    for shard in &leader.shards {
        shard.close();
    }
}

/// A leader that answers instantly and records traffic shape.
#[derive(Default)]
struct CountingLeader {
    writes: AtomicUsize,
    reads: AtomicUsize,
    write_lens: Mutex<Vec<usize>>,
}

impl Leader for CountingLeader {
    fn ping(&self, _: &PingArgs, _: &mut PingReply) -> veil_core::Result<()> {
        Ok(())
    }
    fn write(&self, args: &WriteArgs, _: &mut WriteReply) -> veil_core::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.write_lens.lock().unwrap().push(args.data.len());
        Ok(())
    }
    fn read(&self, _: &EncodedReadArgs, _: &mut ReadReply) -> veil_core::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn get_updates(&self, _: &GetUpdatesArgs, _: &mut GetUpdatesReply) -> veil_core::Result<()> {
        Ok(())
    }
    fn get_config(&self) -> veil_core::Result<Config> {
        Ok(test_config())
    }
}

#[test]
fn test_idle_client_emits_paced_cover_traffic() {
    init_tracing();
    let mut config = test_config();
    config.write_interval = Duration::from_millis(100);
    config.read_interval = Duration::from_millis(100);
    let domains = vec![
        TrustDomainConfig::new("zero", "localhost:9000", true, false),
        TrustDomainConfig::new("one", "localhost:9001", true, false),
    ];

    let leader = Arc::new(CountingLeader::default());
    let client = Client::new("idle", client_config(&config, &domains), leader.clone()).unwrap();

    std::thread::sleep(Duration::from_secs(1));
    client.kill();

    let writes = leader.writes.load(Ordering::SeqCst);
    let reads = leader.reads.load(Ordering::SeqCst);
    assert!((8..=12).contains(&writes), "writes off pace: {writes}");
    assert!((8..=12).contains(&reads), "reads off pace: {reads}");

    // Cover writes are exactly item-sized, like real ones.
    let lens = leader.write_lens.lock().unwrap();
    assert!(lens.iter().all(|len| *len == config.data_size as usize));
}
