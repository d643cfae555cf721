use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use super::crypto::Address;
use super::transaction::{put_length_prefixed, Transaction};

/// Version tag prefixed to every canonical block encoding
pub const BLOCK_ENCODING_VERSION: u8 = 1;

/// Upper bound (exclusive) of the random nonce assigned at construction
pub const NONCE_RANGE: u64 = 1_000_000_000;

/// Length of a hex encoded SHA-256 digest
pub const HASH_HEX_LEN: usize = 64;

/// Errors that can occur while building a block
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("Malformed previous hash: {0:?}")]
    MalformedPrevHash(String),
}

/// Represents a block in the chain
///
/// A block carries exactly one transaction. Its hash is never stored: it is
/// recomputed from the current state, so it only becomes a stable identifier
/// once mining has fixed the nonce. Blocks are serialized for display but
/// never deserialized, so every block goes through the `prev_hash` check.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Block {
    /// Hash of the previous block, empty for the genesis block
    prev_hash: String,

    /// The transfer carried by this block
    transaction: Transaction,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Proof of work nonce
    nonce: u64,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `prev_hash` - The hash of the previous block
    /// * `transaction` - The transaction to carry
    ///
    /// # Returns
    ///
    /// A new Block with a random nonce, or `MalformedPrevHash` if
    /// `prev_hash` is not a hex encoded SHA-256 digest
    pub fn new(prev_hash: String, transaction: Transaction) -> Result<Self, BlockError> {
        Self::with_timestamp(prev_hash, transaction, Utc::now())
    }

    /// Creates a new block with an explicit timestamp
    pub fn with_timestamp(
        prev_hash: String,
        transaction: Transaction,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, BlockError> {
        if !is_digest(&prev_hash) {
            return Err(BlockError::MalformedPrevHash(prev_hash));
        }

        Ok(Block {
            prev_hash,
            transaction,
            timestamp,
            nonce: rand::thread_rng().gen_range(0..NONCE_RANGE),
        })
    }

    /// Creates the genesis block (first block in the chain)
    pub fn genesis() -> Self {
        let transaction = Transaction::new(
            100.0,
            Address("genesis".to_string()),
            Address("satoshi".to_string()),
        );

        Block {
            prev_hash: String::new(),
            transaction,
            timestamp: Utc::now(),
            nonce: rand::thread_rng().gen_range(0..NONCE_RANGE),
        }
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Overwrites the nonce; only the mining step may do this
    pub(crate) fn set_nonce(&mut self, nonce: u64) {
        self.nonce = nonce;
    }

    /// Encodes the full block state, current nonce included
    ///
    /// Layout: `version | len | prev_hash | len | transaction | secs | nanos | nonce`,
    /// all integers big endian.
    pub fn encode(&self) -> Vec<u8> {
        let transaction = self.transaction.encode();

        let mut bytes = Vec::with_capacity(1 + 4 + self.prev_hash.len() + 4 + transaction.len() + 8 + 4 + 8);
        bytes.push(BLOCK_ENCODING_VERSION);
        put_length_prefixed(&mut bytes, self.prev_hash.as_bytes());
        put_length_prefixed(&mut bytes, &transaction);
        bytes.extend_from_slice(&self.timestamp.timestamp().to_be_bytes());
        bytes.extend_from_slice(&self.timestamp.timestamp_subsec_nanos().to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the block as a hexadecimal string
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        hex::encode(hasher.finalize())
    }
}

/// Checks that `value` looks like a hex encoded SHA-256 digest
pub fn is_digest(value: &str) -> bool {
    value.len() == HASH_HEX_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
