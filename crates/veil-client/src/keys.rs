//! Per-sequence key material derived from a topic's shared secret
//!
//! Everything about sequence `n` of a topic comes out of two HKDF
//! expansions: one seeds a keystream that yields the candidate buckets,
//! the AEAD nonce and the interest fingerprint; the other yields the
//! item encryption key. Writers and subscribers derive identically, so
//! neither ever transmits placement or key material.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use veil_core::{HashDrbg, Seed, SEED_LEN};

const SEQ_INFO: &[u8] = b"veil seq v1";
const ENC_INFO: &[u8] = b"veil enc v1";

/// Bytes of interest fingerprint carried per write.
pub(crate) const FINGERPRINT_LEN: usize = 16;

/// AES-256-GCM nonce length.
pub(crate) const NONCE_LEN: usize = 12;

pub(crate) struct SeqKeys {
    /// Candidate buckets before reduction modulo the bucket count.
    pub bucket1_raw: u64,
    pub bucket2_raw: u64,
    pub nonce: [u8; NONCE_LEN],
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub enc_key: Zeroizing<[u8; 32]>,
}

pub(crate) fn derive(shared_secret: &[u8; 32], n: u64) -> SeqKeys {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);

    let mut info = Vec::with_capacity(SEQ_INFO.len() + 8);
    info.extend_from_slice(SEQ_INFO);
    info.extend_from_slice(&n.to_le_bytes());
    let mut seed = [0u8; SEED_LEN];
    hk.expand(&info, &mut seed)
        .expect("seed length is a valid HKDF-SHA256 output length");

    let mut drbg = HashDrbg::new(&Seed::from_bytes(&seed).expect("seed length fixed"));
    let bucket1_raw = drbg.next_u64();
    let bucket2_raw = drbg.next_u64();
    let mut nonce = [0u8; NONCE_LEN];
    drbg.fill_bytes(&mut nonce);
    let mut fingerprint = [0u8; FINGERPRINT_LEN];
    drbg.fill_bytes(&mut fingerprint);

    let mut info = Vec::with_capacity(ENC_INFO.len() + 8);
    info.extend_from_slice(ENC_INFO);
    info.extend_from_slice(&n.to_le_bytes());
    let mut enc_key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, enc_key.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");

    SeqKeys {
        bucket1_raw,
        bucket2_raw,
        nonce,
        fingerprint,
        enc_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_deterministic() {
        let secret = [7u8; 32];
        let a = derive(&secret, 3);
        let b = derive(&secret, 3);
        assert_eq!(a.bucket1_raw, b.bucket1_raw);
        assert_eq!(a.bucket2_raw, b.bucket2_raw);
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(*a.enc_key, *b.enc_key);
    }

    #[test]
    fn test_sequences_are_independent() {
        let secret = [7u8; 32];
        let a = derive(&secret, 3);
        let b = derive(&secret, 4);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_ne!(*a.enc_key, *b.enc_key);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_secrets_are_independent() {
        let a = derive(&[1u8; 32], 0);
        let b = derive(&[2u8; 32], 0);
        assert_ne!(a.fingerprint, b.fingerprint);
        assert_ne!(*a.enc_key, *b.enc_key);
    }
}
