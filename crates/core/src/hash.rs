//! SHA-256 digests for block hashing.

use hex::FromHex;
use sha2::{Digest, Sha256};
use std::fmt;

/// Raw 32-byte SHA-256 digest.
pub type H256 = [u8; 32];

/// A SHA-256 digest, printed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash(pub H256);

impl Hash {
    pub fn as_bytes(&self) -> &H256 {
        &self.0
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        H256::from_hex(s).map(Self)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hash arbitrary data using SHA-256.
pub fn hash(data: &[u8]) -> Hash {
    Hash(Sha256::digest(data).into())
}

/// Hash multiple pieces of data as if they were one concatenated buffer.
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"root"), hash(b"root"));
        assert_ne!(hash(b"root"), hash(b"roat"));
    }

    #[test]
    fn test_known_digest() {
        // SHA-256 of the empty string.
        assert_eq!(
            hash(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_hex_roundtrip() {
        let h = hash(b"test data");
        let parsed = Hash::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn test_hash_display() {
        let display = format!("{}", hash(b"test"));
        assert!(display.starts_with("0x"));
        assert_eq!(display.len(), 66); // "0x" + 64 hex chars
    }

    #[test]
    fn test_hash_concat() {
        let parent = hash(b"root");
        let h1 = hash_concat(&[&b"child"[..], &parent.as_bytes()[..]]);
        let mut joined = b"child".to_vec();
        joined.extend_from_slice(parent.as_bytes());
        assert_eq!(h1, hash(&joined));
    }
}
