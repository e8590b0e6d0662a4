//! Argument and reply types shared between clients and servers
//!
//! These mirror the RPC surface of the leader frontend. The transport
//! itself lives elsewhere; everything here is plain data plus the
//! per-trust-domain sealing of read requests.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::trustdomain::TrustDomainConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingArgs {
    pub msg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReply {
    pub msg: String,
    pub err: String,
}

/// A write as it travels from client to shards.
///
/// `interest_vector` is the topic's per-sequence fingerprint; the
/// coordinator folds it into the global interest filter. The reply
/// channel never crosses the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteArgs {
    pub global_seq_no: u64,
    pub bucket1: u64,
    pub bucket2: u64,
    pub data: Vec<u8>,
    pub interest_vector: Vec<u8>,
    #[serde(skip)]
    pub reply: Option<Sender<WriteReply>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteReply {
    pub global_seq_no: u64,
    pub err: String,
}

/// One trust domain's share of a read: an XOR-share of the request
/// vector plus the seed for the response pad that domain will apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PirArgs {
    pub request_vector: Vec<u8>,
    pub pad_seed: Vec<u8>,
}

/// A read request before sealing: one [`PirArgs`] per trust domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadArgs {
    pub td: Vec<PirArgs>,
}

/// A read request sealed for transit: each share encrypted to its
/// domain so no single domain sees the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedReadArgs {
    pub td: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadReply {
    pub data: Vec<u8>,
    pub global_seq_no: Range,
    pub last_interest_sn: u64,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUpdatesArgs {}

/// Interest filter bits, deflate-compressed, with one signature per
/// trust domain over the uncompressed bits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUpdatesReply {
    pub interest_vector: Vec<u8>,
    pub signatures: Vec<Vec<u8>>,
    pub last_interest_sn: u64,
    pub err: String,
}

/// A batch of PIR replies in request order.
#[derive(Debug, Clone, Default)]
pub struct BatchReadReply {
    pub err: String,
    pub replies: Vec<ReadReply>,
}

/// The leader frontend as seen by a client. Implementations carry the
/// requests over whatever transport the deployment uses.
pub trait Leader: Send + Sync {
    fn ping(&self, args: &PingArgs, reply: &mut PingReply) -> Result<()>;
    fn write(&self, args: &WriteArgs, reply: &mut WriteReply) -> Result<()>;
    fn read(&self, args: &EncodedReadArgs, reply: &mut ReadReply) -> Result<()>;
    fn get_updates(&self, args: &GetUpdatesArgs, reply: &mut GetUpdatesReply) -> Result<()>;
    fn get_config(&self) -> Result<crate::Config>;
}

impl PirArgs {
    /// Flat byte form sealed into a share blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.request_vector.len() + self.pad_seed.len());
        buf.extend_from_slice(&(self.request_vector.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.request_vector);
        buf.extend_from_slice(&(self.pad_seed.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.pad_seed);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<PirArgs> {
        let (request_vector, rest) = take_field(data)?;
        let (pad_seed, rest) = take_field(rest)?;
        if !rest.is_empty() {
            return Err(Error::MalformedShare);
        }
        Ok(PirArgs {
            request_vector,
            pad_seed,
        })
    }
}

fn take_field(data: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    if data.len() < 4 {
        return Err(Error::MalformedShare);
    }
    let len = u32::from_le_bytes(data[..4].try_into().unwrap()) as usize;
    if data.len() < 4 + len {
        return Err(Error::MalformedShare);
    }
    Ok((data[4..4 + len].to_vec(), &data[4 + len..]))
}

impl ReadArgs {
    /// Seal each trust domain's share to that domain's public key.
    pub fn encode(&self, domains: &[TrustDomainConfig]) -> Result<EncodedReadArgs> {
        if self.td.len() != domains.len() {
            return Err(Error::ShareCount {
                expected: domains.len(),
                actual: self.td.len(),
            });
        }
        let mut td = Vec::with_capacity(self.td.len());
        for (share, domain) in self.td.iter().zip(domains) {
            td.push(domain.seal_share(&share.to_bytes())?);
        }
        Ok(EncodedReadArgs { td })
    }
}

impl EncodedReadArgs {
    /// Open the share addressed to `domain`. Only that domain's private
    /// key can do this; the other shares stay opaque.
    pub fn decode_for(&self, index: usize, domain: &TrustDomainConfig) -> Result<PirArgs> {
        let blob = self.td.get(index).ok_or(Error::ShareCount {
            expected: index + 1,
            actual: self.td.len(),
        })?;
        PirArgs::from_bytes(&domain.open_share(blob)?)
    }
}
