//! Hash-linked blocks.
//!
//! A block's payload is opaque bytes; in practice it is a sequence of
//! [`Transaction`]s, one JSON document per line. The block hash is
//! `SHA256(data)` for a root and `SHA256(data || previous_hash)` otherwise,
//! where `previous_hash` is the parent's hash captured when the child was built.
//! Recomputing the parent's hash later and comparing it with the captured one
//! detects any change made to the parent in the meantime.

use crate::canonical;
use crate::hash::{hash, hash_concat, Hash};
use crate::transaction::{Transaction, TransactionError, ValidationError};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Shared handle to a block. Children keep a clone of their parent's handle.
pub type BlockRef = Arc<RwLock<Block>>;

/// Errors that can occur while decoding or encoding blocks.
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("malformed block JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid previous_hash: {0}")]
    InvalidHash(#[from] hex::FromHexError),

    #[error("previous_block and previous_hash must both be set or both be null")]
    Inconsistent,

    #[error("block data is not valid UTF-8")]
    NonUtf8Data,

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

pub type Result<T> = std::result::Result<T, BlockError>;

/// Why a block is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockValidationError {
    #[error("transaction {index} could not be decoded: {reason}")]
    MalformedTransaction { index: usize, reason: String },

    #[error("transaction {index} is invalid: {reason}")]
    InvalidTransaction {
        index: usize,
        reason: ValidationError,
    },

    #[error("previous_hash does not match the previous block")]
    PreviousHashMismatch,
}

/// A block of opaque data linked to at most one parent.
pub struct Block {
    data: Vec<u8>,
    previous_block: Option<BlockRef>,
    previous_hash: Option<Hash>,
}

impl Block {
    /// Create a block, capturing the parent's current hash.
    pub fn new(data: impl Into<Vec<u8>>, previous_block: Option<BlockRef>) -> Self {
        let previous_hash = previous_block.as_ref().map(|parent| parent.read().hash());
        Self {
            data: data.into(),
            previous_block,
            previous_hash,
        }
    }

    /// Create a block without a parent.
    pub fn root(data: impl Into<Vec<u8>>) -> Self {
        Self::new(data, None)
    }

    /// Create a block on top of `parent`.
    pub fn child(data: impl Into<Vec<u8>>, parent: &BlockRef) -> Self {
        Self::new(data, Some(Arc::clone(parent)))
    }

    /// Wrap the block in a shareable handle so children can link to it.
    pub fn into_ref(self) -> BlockRef {
        Arc::new(RwLock::new(self))
    }

    /// Recompute the hash from the current data and the captured parent hash.
    pub fn hash(&self) -> Hash {
        match &self.previous_hash {
            None => hash(&self.data),
            Some(previous) => {
                hash_concat(&[self.data.as_slice(), previous.as_bytes().as_slice()])
            }
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn previous_block(&self) -> Option<&BlockRef> {
        self.previous_block.as_ref()
    }

    /// The parent hash captured when this block was created.
    pub fn previous_hash(&self) -> Option<Hash> {
        self.previous_hash
    }

    pub fn is_root(&self) -> bool {
        self.previous_hash.is_none()
    }

    /// Append raw bytes to the payload.
    pub fn append_data(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a transaction as one JSON line. Nothing is validated here.
    pub fn add_tx(&mut self, tx: &Transaction) {
        self.data.extend_from_slice(tx.to_json().as_bytes());
        self.data.push(b'\n');
        trace!(len = self.data.len(), "appended transaction");
    }

    fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.data.split(|b| *b == b'\n').filter(|line| !line.is_empty())
    }

    /// Decode every transaction in the payload.
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        self.lines()
            .map(|line| {
                let text = std::str::from_utf8(line).map_err(|_| BlockError::NonUtf8Data)?;
                Ok(Transaction::from_json(text)?)
            })
            .collect()
    }

    /// Iterate over the parent, grandparent, and so on up to the root.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.previous_block.clone(),
        }
    }

    /// Number of ancestors (0 for a root).
    pub fn depth(&self) -> usize {
        self.ancestors().count()
    }

    /// Check the payload transactions and the link to the immediate parent.
    ///
    /// The parent's own validity is not checked.
    pub fn validate(&self) -> std::result::Result<(), BlockValidationError> {
        let lines: Vec<&[u8]> = self.lines().collect();
        let failure = lines
            .par_iter()
            .enumerate()
            .find_map_first(|(index, line)| check_line(index, line).err());
        if let Some(err) = failure {
            return Err(err);
        }

        if let (Some(parent), Some(recorded)) = (&self.previous_block, &self.previous_hash) {
            if parent.read().hash() != *recorded {
                return Err(BlockValidationError::PreviousHashMismatch);
            }
        }

        Ok(())
    }

    /// Whether the block passes [`Block::validate`].
    pub fn is_valid(&self) -> bool {
        match self.validate() {
            Ok(()) => true,
            Err(reason) => {
                debug!(%reason, hash = %self.hash(), "block rejected");
                false
            }
        }
    }

    /// Encode the block and, recursively, all of its ancestors.
    pub fn to_json(&self) -> Result<String> {
        Ok(canonical::to_string(&self.to_repr()?))
    }

    /// Decode a block and rebuild its ancestor chain.
    ///
    /// The recorded `previous_hash` values are kept as-is, so a chain that was
    /// tampered with before encoding is still detected after decoding.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut de = serde_json::Deserializer::from_str(json);
        de.disable_recursion_limit();
        let repr = BlockJson::deserialize(serde_stacker::Deserializer::new(&mut de))?;
        de.end()?;
        Self::from_repr(repr)
    }

    fn to_repr(&self) -> Result<BlockJson> {
        let ancestors = self
            .ancestors()
            .map(|ancestor| ancestor.read().flat_repr())
            .collect::<Result<Vec<_>>>()?;

        // nest from the root outwards.
        let mut nested = None;
        for mut repr in ancestors.into_iter().rev() {
            repr.previous_block = nested;
            nested = Some(Box::new(repr));
        }
        let mut repr = self.flat_repr()?;
        repr.previous_block = nested;
        Ok(repr)
    }

    fn flat_repr(&self) -> Result<BlockJson> {
        let data = String::from_utf8(self.data.clone()).map_err(|_| BlockError::NonUtf8Data)?;
        Ok(BlockJson {
            data: Some(data),
            previous_block: None,
            previous_hash: self.previous_hash.map(|h| h.to_hex()),
        })
    }

    fn from_repr(mut repr: BlockJson) -> Result<Self> {
        let mut descendants = Vec::new();
        while let Some(parent) = repr.previous_block.take() {
            descendants.push(repr);
            repr = *parent;
        }

        let mut block = Self::link(repr, None)?;
        while let Some(child) = descendants.pop() {
            block = Self::link(child, Some(block.into_ref()))?;
        }
        Ok(block)
    }

    fn link(repr: BlockJson, previous_block: Option<BlockRef>) -> Result<Self> {
        let previous_hash = repr
            .previous_hash
            .as_deref()
            .map(Hash::from_hex)
            .transpose()?;
        if previous_block.is_some() != previous_hash.is_some() {
            return Err(BlockError::Inconsistent);
        }

        Ok(Self {
            data: repr.data.unwrap_or_default().into_bytes(),
            previous_block,
            previous_hash,
        })
    }
}

fn check_line(index: usize, line: &[u8]) -> std::result::Result<(), BlockValidationError> {
    let malformed = |reason: String| BlockValidationError::MalformedTransaction { index, reason };
    let text = std::str::from_utf8(line).map_err(|e| malformed(e.to_string()))?;
    let tx = Transaction::from_json(text).map_err(|e| malformed(e.to_string()))?;
    tx.validate()
        .map_err(|reason| BlockValidationError::InvalidTransaction { index, reason })
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash())
            .field("previous_hash", &self.previous_hash)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Iterator over a block's ancestors, nearest first.
pub struct Ancestors {
    next: Option<BlockRef>,
}

impl Iterator for Ancestors {
    type Item = BlockRef;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.read().previous_block.clone();
        Some(current)
    }
}

/// Wire form of a block. Every field must be present, `null` where absent.
#[derive(Serialize, Deserialize)]
struct BlockJson {
    #[serde(deserialize_with = "nullable")]
    data: Option<String>,
    #[serde(deserialize_with = "nullable")]
    previous_block: Option<Box<BlockJson>>,
    #[serde(deserialize_with = "nullable")]
    previous_hash: Option<String>,
}

// A plain `Option` field would silently default when missing.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}
