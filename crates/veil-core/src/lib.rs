//! veil-core: Shared types and primitives for the veil messaging system
//!
//! This crate defines what every other component agrees on:
//! - the process-wide [`Config`] and its client refinement
//! - the wire argument/reply types and the [`Leader`] contract
//! - the SipHash-2-4 counter-mode DRBG used for keystreams and pads
//! - the compressed bloom interest filter
//! - trust-domain key material and the sealed per-domain request share
//!
//! # Privacy & Threat Model
//!
//! Reads are private information retrieval across `K` trust domains: no
//! single domain learns which bucket a client fetched as long as at
//! least one domain does not collude. Writes are unlinkable because the
//! two candidate buckets derive from a per-topic keystream.
//!
//! ## What a trust domain learns
//!
//! | Information | Domain knowledge |
//! |-------------|------------------|
//! | That a client read *something* | **YES** - traffic is visible |
//! | Which bucket was read | NO - XOR-share of the request only |
//! | Which topic a write belongs to | NO - buckets look uniform |
//! | Client request timing | YES - but fixed-interval cover traffic |
//!
//! Integrity of interest-vector updates rests on ed25519 signatures from
//! each trust domain; updates that fail verification are discarded.

pub mod bloom;
pub mod config;
pub mod drbg;
mod error;
pub mod trustdomain;
pub mod wire;

pub use bloom::{BitSet, Filter};
pub use config::{ClientConfig, Config};
pub use drbg::{HashDrbg, Seed, SEED_LEN};
pub use error::Error;
pub use trustdomain::TrustDomainConfig;
pub use wire::{
    BatchReadReply, EncodedReadArgs, GetUpdatesArgs, GetUpdatesReply, Leader, PingArgs, PingReply,
    PirArgs, Range, ReadArgs, ReadReply, WriteArgs, WriteReply,
};

pub type Result<T> = std::result::Result<T, Error>;
