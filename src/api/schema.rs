use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Block, Transaction};

/// A block as exposed over the API, with its derived hash
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    /// Hash of the block (SHA-256, hex)
    pub hash: String,

    /// Hash of the previous block, empty for the genesis block
    pub prev_hash: String,

    /// The transfer carried by the block
    pub transaction: Transaction,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Mined nonce
    pub nonce: u64,
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        BlockResponse {
            hash: block.hash(),
            prev_hash: block.prev_hash().to_string(),
            transaction: block.transaction().clone(),
            timestamp: block.timestamp(),
            nonce: block.nonce(),
        }
    }
}

/// Response for the chain endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain, genesis first
    pub chain: Vec<BlockResponse>,

    /// Whether the chain is valid
    pub is_valid: bool,

    /// Leading zero hex digits required by the proof of work
    pub difficulty: usize,
}

/// Response for the validate endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    pub is_valid: bool,

    /// Reason the chain failed validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response for the create wallet endpoint
///
/// Only the address is returned; the key pair stays with the node.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,
}

/// Request for the transfer endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    /// Address of a wallet created through this node
    pub from: String,

    /// The payee's address
    pub to: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Request for submitting a transaction signed outside the node
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitTransactionRequest {
    pub amount: f64,

    /// The payer's address, also used to verify the signature
    pub payer: String,

    pub payee: String,

    /// Base58 ed25519 signature over the canonical transaction encoding
    pub signature: String,
}

/// Response for endpoints that append a block
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockAdmittedResponse {
    /// The message
    pub message: String,

    /// The newly mined block
    pub block: BlockResponse,
}
