//! The subscriber half of a topic
//!
//! A handle walks the topic's sequence space with a read cursor. Each
//! poll derives the cursor's two candidate buckets and builds one PIR
//! request pair; each response is pad-stripped and scanned for an item
//! that decrypts under the cursor's key. Decrypt failure is not an
//! error: the item may simply not be published yet, so the cursor
//! stays put and the next rotation retries.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use crossbeam_channel::Sender;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use veil_core::drbg::pad_bytes;
use veil_core::{ClientConfig, PirArgs, ReadArgs, ReadReply, Seed};
use veil_pir::xor::xor_into;

use crate::keys;
use crate::messages::{read_varint, Reassembler};
use crate::{ClientError, Result};

const SIG_LEN: usize = 64;

/// Subscription state for one topic.
#[derive(Debug, Serialize, Deserialize)]
pub struct Handle {
    #[serde(with = "hex")]
    shared_secret: [u8; 32],
    #[serde(with = "hex")]
    signing_public_key: [u8; 32],
    seq_no: u64,
    #[serde(skip)]
    updates: Option<Sender<Vec<u8>>>,
    #[serde(skip)]
    reassembler: Reassembler,
}

impl Handle {
    pub(crate) fn new(shared_secret: [u8; 32], signing_public_key: [u8; 32], seq_no: u64) -> Handle {
        Handle {
            shared_secret,
            signing_public_key,
            seq_no,
            updates: None,
            reassembler: Reassembler::default(),
        }
    }

    /// The sequence number the handle will try to read next.
    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }

    pub(crate) fn set_updates(&mut self, tx: Sender<Vec<u8>>) {
        self.updates = Some(tx);
    }

    pub(crate) fn same_topic(&self, other: &Handle) -> bool {
        self.shared_secret == other.shared_secret
    }

    /// Build the request pair for the cursor's two candidate buckets.
    ///
    /// Both requests look identical on the wire: per trust domain, a
    /// vector of uniform bytes plus a fresh pad seed. Only the XOR of
    /// all domains' vectors is the basis vector at the target bucket.
    pub fn generate_poll(&mut self, config: &ClientConfig) -> Result<(ReadArgs, ReadArgs)> {
        let num_domains = config.trust_domains.len();
        if num_domains < 2 {
            return Err(ClientError::TooFewTrustDomains(num_domains));
        }

        let derived = keys::derive(&self.shared_secret, self.seq_no);
        let bucket1 = derived.bucket1_raw % config.num_buckets;
        let bucket2 = derived.bucket2_raw % config.num_buckets;

        Ok((
            poll_request(bucket1, num_domains, &config.config),
            poll_request(bucket2, num_domains, &config.config),
        ))
    }

    /// Fingerprint the coordinator's interest filter would carry if the
    /// next expected sequence has been published.
    pub fn next_interest_vector(&self) -> Vec<u8> {
        keys::derive(&self.shared_secret, self.seq_no).fingerprint.to_vec()
    }

    /// Digest one PIR reply: strip the response pads, then scan each
    /// item-sized frame for something that decrypts at the cursor.
    /// Returns whether the cursor advanced.
    pub fn on_response(&mut self, args: &ReadArgs, reply: &ReadReply, data_size: usize) -> bool {
        if !reply.err.is_empty() {
            tracing::debug!(err = %reply.err, "poll reply carried an error");
            return false;
        }
        if reply.data.is_empty() || data_size == 0 {
            return false;
        }

        let mut data = reply.data.clone();
        for share in &args.td {
            match pad_bytes(&share.pad_seed, data.len()) {
                Ok(pad) => xor_into(&mut data, &pad),
                Err(_) => return false,
            }
        }

        for frame in data.chunks_exact(data_size) {
            if let Some(chunk) = self.open_item(frame) {
                self.seq_no += 1;
                for message in self.reassembler.push(&chunk) {
                    if let Some(updates) = &self.updates {
                        let _ = updates.send(message);
                    }
                }
                return true;
            }
        }
        false
    }

    /// Try to decrypt and authenticate one frame at the cursor's keys.
    fn open_item(&self, frame: &[u8]) -> Option<Vec<u8>> {
        let derived = keys::derive(&self.shared_secret, self.seq_no);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(derived.enc_key.as_ref()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&derived.nonce), frame)
            .ok()?;

        let (len, consumed) = read_varint(&plaintext)?;
        let end = consumed.checked_add(len as usize)?;
        if end + SIG_LEN > plaintext.len() {
            return None;
        }
        let chunk = &plaintext[consumed..end];
        let signature = Signature::from_slice(&plaintext[end..end + SIG_LEN]).ok()?;

        let verifying = VerifyingKey::from_bytes(&self.signing_public_key).ok()?;
        let mut signed = Vec::with_capacity(8 + chunk.len());
        signed.extend_from_slice(&self.seq_no.to_le_bytes());
        signed.extend_from_slice(chunk);
        verifying.verify(&signed, &signature).ok()?;

        Some(chunk.to_vec())
    }
}

/// One ReadArgs selecting `bucket`, split across `num_domains` shares.
/// Vectors carry one extra byte beyond the bucket bits so their length
/// matches cover reads byte-for-byte.
fn poll_request(bucket: u64, num_domains: usize, config: &veil_core::Config) -> ReadArgs {
    let vector_len = config.request_length() + 1;

    let mut secret = vec![0u8; vector_len];
    secret[(bucket / 8) as usize] |= 1 << (bucket % 8);

    let mut td = Vec::with_capacity(num_domains);
    td.push(PirArgs {
        request_vector: Vec::new(),
        pad_seed: Seed::random().to_bytes().to_vec(),
    });
    for _ in 1..num_domains {
        let mut vector = vec![0u8; vector_len];
        OsRng.fill_bytes(&mut vector);
        xor_into(&mut secret, &vector);
        td.push(PirArgs {
            request_vector: vector,
            pad_seed: Seed::random().to_bytes().to_vec(),
        });
    }
    td[0].request_vector = secret;

    ReadArgs { td }
}
