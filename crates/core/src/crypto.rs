//! RSA-PSS (SHA-256) signing and verification.
//!
//! Public keys are identified by their PKCS#1 PEM text, which doubles as the
//! key of every signer-indexed map in a [`Transaction`](crate::Transaction).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding,
};
use rsa::pss::{BlindedSigningKey, Signature as PssSignature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash as StdHash, Hasher};
use thiserror::Error;
use tracing::trace;

/// Modulus size used when no other size is requested.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),
    #[error("invalid PEM key: {0}")]
    InvalidPem(String),
    #[error("PEM encoding failed: {0}")]
    PemEncoding(String),
    #[error("invalid base64 signature: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),
    #[error("signing failed: {0}")]
    Signing(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Key generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyConfig {
    /// RSA modulus size in bits.
    pub bits: usize,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            bits: DEFAULT_KEY_BITS,
        }
    }
}

/// Largest PSS salt the key allows: `emLen - hLen - 2`.
fn max_salt_len(key: &RsaPublicKey) -> usize {
    let em_len = (key.n().bits() + 6) / 8;
    em_len.saturating_sub(<Sha256 as Digest>::output_size() + 2)
}

/// An RSA public key together with its canonical PEM text.
#[derive(Clone)]
pub struct PublicKey {
    key: RsaPublicKey,
    pem: String,
}

impl PublicKey {
    fn from_rsa(key: RsaPublicKey) -> Result<Self> {
        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::PemEncoding(e.to_string()))?;
        Ok(Self { key, pem })
    }

    /// Parse a PKCS#1 PEM public key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key =
            RsaPublicKey::from_pkcs1_pem(pem).map_err(|e| CryptoError::InvalidPem(e.to_string()))?;
        Self::from_rsa(key)
    }

    /// The canonical PKCS#1 PEM text of this key.
    pub fn to_pem(&self) -> &str {
        &self.pem
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }

    /// Check `signature` over `message`. Any failure is `false`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(sig) = PssSignature::try_from(signature.as_bytes()) else {
            return false;
        };
        let verifying_key =
            VerifyingKey::<Sha256>::new_with_salt_len(self.key.clone(), max_salt_len(&self.key));
        verifying_key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fingerprint = crate::hash::hash(self.pem.as_bytes());
        write!(f, "PublicKey({})", &fingerprint.to_hex()[..16])
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.pem == other.pem
    }
}

impl Eq for PublicKey {}

impl StdHash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pem.hash(state);
    }
}

/// Raw RSA-PSS signature bytes. Serialized as base64 text.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        Ok(Self(BASE64.decode(s)?))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base64();
        write!(f, "Signature({}...)", &encoded[..encoded.len().min(16)])
    }
}

impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        Signature::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// A private key and its public half.
pub struct KeyPair {
    private_key: RsaPrivateKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random 2048-bit keypair (public exponent 65537).
    pub fn generate() -> Result<Self> {
        Self::generate_with(&KeyConfig::default())
    }

    /// Generate a new random keypair with the given settings.
    pub fn generate_with(config: &KeyConfig) -> Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, config.bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Result<Self> {
        let public_key = PublicKey::from_rsa(RsaPublicKey::from(&private_key))?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Load a keypair from a PKCS#1 PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| CryptoError::InvalidPem(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Encode the private key as PKCS#1 PEM.
    pub fn to_pem(&self) -> Result<String> {
        let pem = self
            .private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::PemEncoding(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// Sign a message. Signatures are randomized: signing twice gives different bytes.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let salt_len = max_salt_len(&self.public_key.key);
        let signing_key =
            BlindedSigningKey::<Sha256>::new_with_salt_len(self.private_key.clone(), salt_len);
        let sig = signing_key
            .try_sign_with_rng(&mut OsRng, message)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        trace!(len = message.len(), "signed message");
        Ok(Signature(sig.to_bytes().into_vec()))
    }

    /// Verify a signature against our public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key.verify(message, signature)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Sign `message` with the private half of `keypair`.
pub fn sign(message: &[u8], keypair: &KeyPair) -> Result<Signature> {
    keypair.sign(message)
}

/// Returns true iff `signature` is a valid signature of `message` under `public_key`.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    public_key.verify(message, signature)
}
