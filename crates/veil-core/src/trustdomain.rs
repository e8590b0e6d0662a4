//! Trust domain key material
//!
//! Each PIR trust domain publishes a curve25519 key for sealing request
//! shares and an ed25519 key for signing interest-vector updates. The
//! private halves live only on the domain's own servers; marshalling a
//! config emits the public half unless the caller explicitly asks for
//! the private view.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{Error, Result};

const SHARE_INFO: &[u8] = b"veil share seal v1";

/// Keys and endpoint of one PIR trust domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustDomainConfig {
    pub name: String,
    pub address: String,
    pub is_valid: bool,
    pub is_distributed: bool,
    /// Curve25519 key request shares are sealed to.
    #[serde(with = "hex")]
    pub public_key: [u8; 32],
    /// Ed25519 key interest vectors are signed under.
    #[serde(with = "hex")]
    pub sign_public_key: [u8; 32],
    #[serde(default, skip_serializing, with = "hex_opt")]
    private_key: Option<Vec<u8>>,
    #[serde(default, skip_serializing, with = "hex_opt")]
    sign_private_key: Option<Vec<u8>>,
}

/// Marshalling view that carries the private halves.
///
/// ```ignore
/// let json = serde_json::to_string(&domain.private())?;
/// ```
#[derive(Serialize)]
pub struct PrivateTrustDomainConfig<'a> {
    #[serde(flatten)]
    config: &'a TrustDomainConfig,
    private_key: String,
    sign_private_key: String,
}

impl TrustDomainConfig {
    /// Create a trust domain with freshly generated keypairs.
    pub fn new(name: &str, address: &str, is_valid: bool, is_distributed: bool) -> TrustDomainConfig {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        let public = PublicKey::from(&secret);

        let mut sign_seed = [0u8; 32];
        OsRng.fill_bytes(&mut sign_seed);
        let signing = SigningKey::from_bytes(&sign_seed);

        TrustDomainConfig {
            name: name.to_string(),
            address: address.to_string(),
            is_valid,
            is_distributed,
            public_key: public.to_bytes(),
            sign_public_key: signing.verifying_key().to_bytes(),
            private_key: Some(secret.to_bytes().to_vec()),
            sign_private_key: Some(signing.to_keypair_bytes().to_vec()),
        }
    }

    /// Name of the domain, when the config is valid.
    pub fn get_name(&self) -> Option<&str> {
        self.is_valid.then_some(self.name.as_str())
    }

    /// Remote address of the domain, when the config is valid.
    pub fn get_address(&self) -> Option<&str> {
        self.is_valid.then_some(self.address.as_str())
    }

    /// Whether the private halves are loaded.
    pub fn has_private(&self) -> bool {
        self.private_key.is_some() && self.sign_private_key.is_some()
    }

    /// View of this config that marshals the private keys too.
    pub fn private(&self) -> Result<PrivateTrustDomainConfig<'_>> {
        let private_key = self
            .private_key
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateKey(self.name.clone()))?;
        let sign_private_key = self
            .sign_private_key
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateKey(self.name.clone()))?;
        Ok(PrivateTrustDomainConfig {
            config: self,
            private_key: hex::encode(private_key),
            sign_private_key: hex::encode(sign_private_key),
        })
    }

    /// Seal a request share so only this domain can read it.
    ///
    /// Ephemeral-static ECDH to the domain key, HKDF-SHA256 into a
    /// single-use AES-256-GCM key. Layout: ephemeral key (32) followed
    /// by the ciphertext.
    pub fn seal_share(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(self.public_key));

        let key = derive_share_key(shared.as_bytes(), ephemeral_public.as_bytes(), &self.public_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext)
            .map_err(|_| Error::DecryptFailed)?;

        let mut blob = Vec::with_capacity(32 + ciphertext.len());
        blob.extend_from_slice(ephemeral_public.as_bytes());
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Open a sealed request share. Requires the private key.
    pub fn open_share(&self, blob: &[u8]) -> Result<Vec<u8>> {
        let private = self
            .private_key
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateKey(self.name.clone()))?;
        let private: [u8; 32] = private
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey(self.name.clone()))?;

        if blob.len() < 32 + 16 {
            return Err(Error::MalformedShare);
        }
        let ephemeral_public: [u8; 32] = blob[..32].try_into().unwrap();
        let shared = StaticSecret::from(private).diffie_hellman(&PublicKey::from(ephemeral_public));

        let key = derive_share_key(shared.as_bytes(), &ephemeral_public, &self.public_key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), &blob[32..])
            .map_err(|_| Error::DecryptFailed)
    }

    /// Sign an (uncompressed) interest vector. Requires the private key.
    pub fn sign_interest(&self, data: &[u8]) -> Result<Vec<u8>> {
        let keypair = self
            .sign_private_key
            .as_ref()
            .ok_or_else(|| Error::MissingPrivateKey(self.name.clone()))?;
        let keypair: [u8; 64] = keypair
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey(self.name.clone()))?;
        let signing =
            SigningKey::from_keypair_bytes(&keypair).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(signing.sign(data).to_bytes().to_vec())
    }

    /// Verify this domain's signature over an interest vector.
    pub fn verify_interest(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying) = VerifyingKey::from_bytes(&self.sign_public_key) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying.verify(data, &signature).is_ok()
    }
}

fn derive_share_key(shared: &[u8], ephemeral: &[u8], recipient: &[u8]) -> Zeroizing<[u8; 32]> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut info = Vec::with_capacity(SHARE_INFO.len() + 64);
    info.extend_from_slice(SHARE_INFO);
    info.extend_from_slice(ephemeral);
    info.extend_from_slice(recipient);

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(&info, key.as_mut())
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    key
}

mod hex_opt {
    use serde::{Deserialize, Deserializer};

    pub fn serialize<S: serde::Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        raw.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
