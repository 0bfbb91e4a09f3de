//! Integrity core of a minimal ledger.
//!
//! This crate provides:
//! - SHA-256 hashing
//! - RSA-PSS signing and verification with PEM-identified public keys
//! - Multi-input/output transactions that every input owner and every
//!   required co-signer must sign
//! - Hash-linked blocks whose payload is a list of transactions
//!
//! # Example
//!
//! ```rust,no_run
//! use minledger_core::{Block, KeyPair, Transaction};
//!
//! let alice = KeyPair::generate().unwrap();
//! let bob = KeyPair::generate().unwrap();
//!
//! let tx = Transaction::new()
//!     .with_input(&alice.public_key, 1)
//!     .with_output(&bob.public_key, 1)
//!     .signed(&alice)
//!     .unwrap();
//!
//! let mut root = Block::root(Vec::new());
//! root.add_tx(&tx);
//! let root = root.into_ref();
//!
//! let child = Block::child(Vec::new(), &root);
//! assert!(child.is_valid());
//!
//! // Changing the parent afterwards breaks the link.
//! root.write().add_tx(&tx);
//! assert!(!child.is_valid());
//! ```

pub mod block;
mod canonical;
pub mod crypto;
pub mod hash;
pub mod transaction;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockError, BlockRef, BlockValidationError};
pub use crypto::{sign, verify, CryptoError, KeyConfig, KeyPair, PublicKey, Signature};
pub use hash::{hash, hash_concat, Hash, H256};
pub use transaction::{
    Amount, Entry, Transaction, TransactionError, ValidationError, MINING_REWARD,
};
