//! The publishing capability for one topic

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use veil_core::{Config, WriteArgs};

use crate::handle::Handle;
use crate::keys::{self, NONCE_LEN};
use crate::messages::write_varint;
use crate::{ClientError, Result};

/// AEAD tag bytes.
const TAG_LEN: usize = 16;
/// Ed25519 signature bytes inside each item.
const SIG_LEN: usize = 64;
/// Largest varint the item framing reserves room for.
const VARINT_MAX: usize = 5;

/// Bytes of each item consumed by framing, signature and AEAD tag.
/// Usable payload per item is `data_size - PUBLISHING_OVERHEAD`.
pub const PUBLISHING_OVERHEAD: usize = VARINT_MAX + SIG_LEN + TAG_LEN;

/// A topic: the shared secret subscribers need plus the signing key
/// only the publisher holds. Sequence state advances with each publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    #[serde(with = "hex")]
    shared_secret: [u8; 32],
    #[serde(with = "hex")]
    signing_private_key: [u8; 64],
    #[serde(with = "hex")]
    signing_public_key: [u8; 32],
    seq_no: u64,
}

impl Topic {
    /// Create a topic with fresh key material.
    pub fn new() -> Topic {
        let mut shared_secret = [0u8; 32];
        OsRng.fill_bytes(&mut shared_secret);

        let mut sign_seed = [0u8; 32];
        OsRng.fill_bytes(&mut sign_seed);
        let signing = SigningKey::from_bytes(&sign_seed);

        Topic {
            shared_secret,
            signing_private_key: signing.to_keypair_bytes(),
            signing_public_key: signing.verifying_key().to_bytes(),
            seq_no: 0,
        }
    }

    /// The subscriber half: can locate and decrypt items, not write them.
    pub fn handle(&self) -> Handle {
        Handle::new(self.shared_secret, self.signing_public_key, self.seq_no)
    }

    /// Next sequence number to be published.
    pub fn seq_no(&self) -> u64 {
        self.seq_no
    }

    /// Produce the write for one item carrying `chunk`, advancing the
    /// sequence. The item is exactly `data_size` bytes of ciphertext;
    /// candidate buckets and the interest fingerprint come from the
    /// per-sequence keystream.
    pub fn generate_publish(&mut self, config: &Config, chunk: &[u8]) -> Result<WriteArgs> {
        let n = self.seq_no;
        let derived = keys::derive(&self.shared_secret, n);
        let data = self.seal_item(&derived, n, chunk, config.data_size as usize)?;

        self.seq_no += 1;
        Ok(WriteArgs {
            global_seq_no: 0,
            bucket1: derived.bucket1_raw % config.num_buckets,
            bucket2: derived.bucket2_raw % config.num_buckets,
            data,
            interest_vector: derived.fingerprint.to_vec(),
            reply: None,
        })
    }

    /// Item layout inside the AEAD: `varint(len) || chunk || signature
    /// || zero padding` to a fixed plaintext size, so every item on the
    /// wire is `data_size` bytes of uniform-looking ciphertext.
    fn seal_item(
        &self,
        derived: &keys::SeqKeys,
        n: u64,
        chunk: &[u8],
        data_size: usize,
    ) -> Result<Vec<u8>> {
        let plaintext_len = data_size.saturating_sub(TAG_LEN);
        if chunk.len() + PUBLISHING_OVERHEAD > data_size {
            return Err(ClientError::ChunkTooLarge {
                actual: chunk.len(),
                data_size,
            });
        }

        let signing = SigningKey::from_keypair_bytes(&self.signing_private_key)
            .map_err(|_| ClientError::SigningKey)?;
        let mut signed = Vec::with_capacity(8 + chunk.len());
        signed.extend_from_slice(&n.to_le_bytes());
        signed.extend_from_slice(chunk);
        let signature = signing.sign(&signed);

        let mut plaintext = Vec::with_capacity(plaintext_len);
        write_varint(&mut plaintext, chunk.len() as u64);
        plaintext.extend_from_slice(chunk);
        plaintext.extend_from_slice(&signature.to_bytes());
        plaintext.resize(plaintext_len, 0);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(derived.enc_key.as_ref()));
        let nonce: [u8; NONCE_LEN] = derived.nonce;
        cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| ClientError::Seal)
    }
}

impl Default for Topic {
    fn default() -> Self {
        Topic::new()
    }
}
