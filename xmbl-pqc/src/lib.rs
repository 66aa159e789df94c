//! Post-quantum signature primitive for XMBL.
//!
//! The scheme itself is explicitly out of scope for the ledger
//! specification — `xmbl-core` only ever talks to it through the
//! `SignatureProvider` trait. This crate is the default, real
//! implementation of that trait (Dilithium5 by default, with Falcon1024
//! and SPHINCS+-SHA256-128s available for crypto-agility).

use async_trait::async_trait;
use pqcrypto_dilithium::dilithium5;
use pqcrypto_falcon::falcon1024;
use pqcrypto_sphincsplus::sphincssha256128ssimple;
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _, SignedMessage as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Error, Debug)]
pub enum PqcError {
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("key file io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Dilithium5,
    Falcon1024,
    SphincsSha256128s,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub data: Vec<u8>,
    pub algorithm: SignatureAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize, Zeroize)]
pub struct KeyPair {
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
    #[zeroize(skip)]
    pub algorithm: SignatureAlgorithm,
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

fn generate_keypair(algorithm: SignatureAlgorithm) -> KeyPair {
    match algorithm {
        SignatureAlgorithm::Dilithium5 => {
            let (pk, sk) = dilithium5::keypair();
            KeyPair {
                public_key: pk.as_bytes().to_vec(),
                secret_key: sk.as_bytes().to_vec(),
                algorithm,
            }
        }
        SignatureAlgorithm::Falcon1024 => {
            let (pk, sk) = falcon1024::keypair();
            KeyPair {
                public_key: pk.as_bytes().to_vec(),
                secret_key: sk.as_bytes().to_vec(),
                algorithm,
            }
        }
        SignatureAlgorithm::SphincsSha256128s => {
            let (pk, sk) = sphincssha256128ssimple::keypair();
            KeyPair {
                public_key: pk.as_bytes().to_vec(),
                secret_key: sk.as_bytes().to_vec(),
                algorithm,
            }
        }
    }
}

fn sign_with(algorithm: SignatureAlgorithm, message: &[u8], secret_key: &[u8]) -> Result<Signature, PqcError> {
    let data = match algorithm {
        SignatureAlgorithm::Dilithium5 => {
            let sk = dilithium5::SecretKey::from_bytes(secret_key).map_err(|_| PqcError::InvalidKey)?;
            dilithium5::sign(message, &sk).as_bytes().to_vec()
        }
        SignatureAlgorithm::Falcon1024 => {
            let sk = falcon1024::SecretKey::from_bytes(secret_key).map_err(|_| PqcError::InvalidKey)?;
            falcon1024::sign(message, &sk).as_bytes().to_vec()
        }
        SignatureAlgorithm::SphincsSha256128s => {
            let sk = sphincssha256128ssimple::SecretKey::from_bytes(secret_key)
                .map_err(|_| PqcError::InvalidKey)?;
            sphincssha256128ssimple::sign(message, &sk).as_bytes().to_vec()
        }
    };
    Ok(Signature { data, algorithm })
}

fn verify_with(signature: &Signature, message: &[u8], public_key: &[u8]) -> Result<bool, PqcError> {
    match signature.algorithm {
        SignatureAlgorithm::Dilithium5 => {
            let pk = dilithium5::PublicKey::from_bytes(public_key).map_err(|_| PqcError::InvalidKey)?;
            let sm = dilithium5::SignedMessage::from_bytes(&signature.data)
                .map_err(|_| PqcError::InvalidSignature)?;
            Ok(dilithium5::open(&sm, &pk).map(|m| m == message).unwrap_or(false))
        }
        SignatureAlgorithm::Falcon1024 => {
            let pk = falcon1024::PublicKey::from_bytes(public_key).map_err(|_| PqcError::InvalidKey)?;
            let sm = falcon1024::SignedMessage::from_bytes(&signature.data)
                .map_err(|_| PqcError::InvalidSignature)?;
            Ok(falcon1024::open(&sm, &pk).map(|m| m == message).unwrap_or(false))
        }
        SignatureAlgorithm::SphincsSha256128s => {
            let pk = sphincssha256128ssimple::PublicKey::from_bytes(public_key)
                .map_err(|_| PqcError::InvalidKey)?;
            let sm = sphincssha256128ssimple::SignedMessage::from_bytes(&signature.data)
                .map_err(|_| PqcError::InvalidSignature)?;
            Ok(sphincssha256128ssimple::open(&sm, &pk).map(|m| m == message).unwrap_or(false))
        }
    }
}

/// `address = "xmb" + lowercase-hex(SHA-256(public_key))[..40]`, 43 chars total.
pub fn derive_address(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    let hex = hex::encode(digest);
    format!("xmb{}", &hex[..40])
}

/// The `keygen`/`sign`/`verify`/`deriveAddress` interface spec.md §6 names.
/// Async because signing/verification may be relatively expensive (§5,
/// "suspension points").
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn keygen(&self) -> Result<KeyPair, PqcError>;
    async fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Signature, PqcError>;
    async fn verify(&self, message: &[u8], signature: &Signature, public_key: &[u8]) -> Result<bool, PqcError>;
    fn derive_address(&self, public_key: &[u8]) -> String {
        derive_address(public_key)
    }
}

/// Default real implementation: generates keys with a configurable default
/// algorithm but can sign/verify with whatever algorithm a `Signature`
/// carries (crypto-agility — multiple algorithms can coexist on the wire).
#[derive(Debug, Clone, Copy)]
pub struct DilithiumProvider {
    pub default_algorithm: SignatureAlgorithm,
}

impl Default for DilithiumProvider {
    fn default() -> Self {
        Self {
            default_algorithm: SignatureAlgorithm::Dilithium5,
        }
    }
}

impl DilithiumProvider {
    pub fn new(default_algorithm: SignatureAlgorithm) -> Self {
        Self { default_algorithm }
    }
}

#[async_trait]
impl SignatureProvider for DilithiumProvider {
    async fn keygen(&self) -> Result<KeyPair, PqcError> {
        tracing::debug!(algorithm = ?self.default_algorithm, "generating signature keypair");
        Ok(generate_keypair(self.default_algorithm))
    }

    async fn sign(&self, message: &[u8], secret_key: &[u8]) -> Result<Signature, PqcError> {
        sign_with(self.default_algorithm, message, secret_key)
    }

    async fn verify(&self, message: &[u8], signature: &Signature, public_key: &[u8]) -> Result<bool, PqcError> {
        verify_with(signature, message, public_key)
    }
}

/// On-disk keypair persistence, matching the teacher's
/// `PQCManager::backup_to_file`/`restore_from_file` pattern. The secret key
/// is written as hex inside JSON — "never serialized outside the key
/// store" (spec.md §3) means callers are responsible for the file's
/// permissions and location, not this function.
pub fn save_keypair(path: impl AsRef<Path>, keypair: &KeyPair) -> Result<(), PqcError> {
    let data = serde_json::to_vec_pretty(keypair)?;
    std::fs::write(path, data)?;
    Ok(())
}

pub fn load_keypair(path: impl AsRef<Path>) -> Result<KeyPair, PqcError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Generates a keypair if `path` does not already hold one.
pub fn load_or_generate(path: impl AsRef<Path>, algorithm: SignatureAlgorithm) -> Result<KeyPair, PqcError> {
    let path = path.as_ref();
    if path.exists() {
        load_keypair(path)
    } else {
        let kp = generate_keypair(algorithm);
        save_keypair(path, &kp)?;
        Ok(kp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_then_verify_round_trips() {
        let provider = DilithiumProvider::default();
        let kp = provider.keygen().await.unwrap();
        let msg = b"xmbl transaction payload";
        let sig = provider.sign(msg, &kp.secret_key).await.unwrap();
        assert!(provider.verify(msg, &sig, &kp.public_key).await.unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_tampered_message() {
        let provider = DilithiumProvider::default();
        let kp = provider.keygen().await.unwrap();
        let sig = provider.sign(b"original", &kp.secret_key).await.unwrap();
        assert!(!provider.verify(b"tampered", &sig, &kp.public_key).await.unwrap());
    }

    #[tokio::test]
    async fn verify_rejects_wrong_public_key() {
        let provider = DilithiumProvider::default();
        let kp1 = provider.keygen().await.unwrap();
        let kp2 = provider.keygen().await.unwrap();
        let sig = provider.sign(b"hello", &kp1.secret_key).await.unwrap();
        assert!(!provider.verify(b"hello", &sig, &kp2.public_key).await.unwrap());
    }

    #[test]
    fn derive_address_is_deterministic_and_well_formed() {
        let a1 = derive_address(b"some-public-key-bytes");
        let a2 = derive_address(b"some-public-key-bytes");
        assert_eq!(a1, a2);
        assert_eq!(a1.len(), 43);
        assert!(a1.starts_with("xmb"));
    }

    #[test]
    fn derive_address_differs_across_keys() {
        assert_ne!(derive_address(b"key-a"), derive_address(b"key-b"));
    }

    #[test]
    fn load_or_generate_persists_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        let first = load_or_generate(&path, SignatureAlgorithm::Dilithium5).unwrap();
        let second = load_or_generate(&path, SignatureAlgorithm::Dilithium5).unwrap();
        assert_eq!(first.public_key, second.public_key);
    }

    #[tokio::test]
    async fn falcon_algorithm_round_trips() {
        let provider = DilithiumProvider::new(SignatureAlgorithm::Falcon1024);
        let kp = provider.keygen().await.unwrap();
        let sig = provider.sign(b"falcon message", &kp.secret_key).await.unwrap();
        assert!(provider.verify(b"falcon message", &sig, &kp.public_key).await.unwrap());
    }
}
