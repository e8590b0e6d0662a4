//! Deterministic random byte generation
//!
//! A seed is 24 bytes: a 16-byte SipHash-2-4 key and an 8-byte
//! initialization vector. The generator produces 64-bit words by hashing
//! `iv || counter` under the key, so two generators built from the same
//! seed emit identical streams. The same keyed hash doubles as the pad
//! KDF that masks PIR responses in transit.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of bytes a seed occupies when marshalled.
pub const SEED_LEN: usize = 24;

/// Seed state for a [`HashDrbg`]: SipHash keys plus an IV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    #[serde(with = "hex")]
    value: [u8; SEED_LEN],
}

impl Seed {
    /// Draw a fresh seed from the OS entropy source.
    pub fn random() -> Seed {
        let mut value = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut value);
        Seed { value }
    }

    /// Reconstruct a seed from its marshalled form.
    pub fn from_bytes(data: &[u8]) -> Result<Seed> {
        if data.len() < SEED_LEN {
            return Err(Error::InvalidSeed {
                expected: SEED_LEN,
                actual: data.len(),
            });
        }
        let mut value = [0u8; SEED_LEN];
        value.copy_from_slice(&data[..SEED_LEN]);
        Ok(Seed { value })
    }

    /// Expand a bare integer into a full seed. Deterministic, for
    /// components that take a numeric PRNG seed.
    pub fn from_entropy(n: u64) -> Seed {
        let mut value = [0u8; SEED_LEN];
        value[..8].copy_from_slice(&n.to_le_bytes());
        value[8..16].copy_from_slice(&(n ^ 0x9e37_79b9_7f4a_7c15).to_le_bytes());
        value[16..24].copy_from_slice(&n.rotate_left(32).to_le_bytes());
        Seed { value }
    }

    /// Marshalled form: key bytes followed by the IV.
    pub fn to_bytes(&self) -> [u8; SEED_LEN] {
        self.value
    }

    /// The two 64-bit halves of the SipHash key.
    pub fn keys(&self) -> (u64, u64) {
        let k0 = u64::from_le_bytes(self.value[0..8].try_into().unwrap());
        let k1 = u64::from_le_bytes(self.value[8..16].try_into().unwrap());
        (k0, k1)
    }

    /// The 8-byte initialization vector.
    pub fn init_vec(&self) -> [u8; 8] {
        self.value[16..24].try_into().unwrap()
    }
}

/// SipHash-2-4 counter-mode generator.
pub struct HashDrbg {
    k0: u64,
    k1: u64,
    iv: [u8; 8],
    counter: u64,
}

impl HashDrbg {
    pub fn new(seed: &Seed) -> HashDrbg {
        let (k0, k1) = seed.keys();
        HashDrbg {
            k0,
            k1,
            iv: seed.init_vec(),
            counter: 0,
        }
    }

    /// Generator over a numeric seed, via [`Seed::from_entropy`].
    pub fn seeded(n: u64) -> HashDrbg {
        HashDrbg::new(&Seed::from_entropy(n))
    }

    /// Produce the next 64-bit word of the keystream.
    pub fn next_u64(&mut self) -> u64 {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&self.iv);
        block[8..].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);
        siphash24(self.k0, self.k1, &block)
    }

    /// Fill `dst` with keystream bytes.
    pub fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Expand a marshalled pad seed into `len` mask bytes.
///
/// Replicas XOR this stream into their responses; the client, holding
/// the same seed, strips it back out.
pub fn pad_bytes(seed: &[u8], len: usize) -> Result<Vec<u8>> {
    let seed = Seed::from_bytes(seed)?;
    let mut drbg = HashDrbg::new(&seed);
    let mut pad = vec![0u8; len];
    drbg.fill_bytes(&mut pad);
    Ok(pad)
}

/// Keyed SipHash-2-4 over an arbitrary byte string.
pub(crate) fn siphash24(k0: u64, k1: u64, data: &[u8]) -> u64 {
    let mut v0 = 0x736f_6d65_7073_6575u64 ^ k0;
    let mut v1 = 0x646f_7261_6e64_6f6du64 ^ k1;
    let mut v2 = 0x6c79_6765_6e65_7261u64 ^ k0;
    let mut v3 = 0x7465_6462_7974_6573u64 ^ k1;

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let m = u64::from_le_bytes(chunk.try_into().unwrap());
        v3 ^= m;
        sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
        sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
        v0 ^= m;
    }

    let tail = chunks.remainder();
    let mut last = [0u8; 8];
    last[..tail.len()].copy_from_slice(tail);
    let mut m = u64::from_le_bytes(last);
    m |= (data.len() as u64) << 56;

    v3 ^= m;
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    v0 ^= m;

    v2 ^= 0xff;
    for _ in 0..4 {
        sip_round(&mut v0, &mut v1, &mut v2, &mut v3);
    }

    v0 ^ v1 ^ v2 ^ v3
}

#[inline]
fn sip_round(v0: &mut u64, v1: &mut u64, v2: &mut u64, v3: &mut u64) {
    *v0 = v0.wrapping_add(*v1);
    *v1 = v1.rotate_left(13);
    *v1 ^= *v0;
    *v0 = v0.rotate_left(32);
    *v2 = v2.wrapping_add(*v3);
    *v3 = v3.rotate_left(16);
    *v3 ^= *v2;
    *v0 = v0.wrapping_add(*v3);
    *v3 = v3.rotate_left(21);
    *v3 ^= *v0;
    *v2 = v2.wrapping_add(*v1);
    *v1 = v1.rotate_left(17);
    *v1 ^= *v2;
    *v2 = v2.rotate_left(32);
}
