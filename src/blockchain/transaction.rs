use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::crypto::Address;

/// Version tag prefixed to every canonical transaction encoding
pub const TRANSACTION_ENCODING_VERSION: u8 = 1;

/// Represents a single fund transfer carried by a block
///
/// Fields are private so a transaction cannot change after it has been
/// signed. The amount is not validated: negative or zero transfers are
/// encoded and signed like any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Amount being transferred
    amount: f64,

    /// Address of the paying identity
    payer: Address,

    /// Address of the receiving identity
    payee: Address,
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// # Arguments
    ///
    /// * `amount` - The amount to transfer
    /// * `payer` - The address of the payer
    /// * `payee` - The address of the payee
    pub fn new(amount: f64, payer: Address, payee: Address) -> Self {
        Transaction {
            amount,
            payer,
            payee,
        }
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn payer(&self) -> &Address {
        &self.payer
    }

    pub fn payee(&self) -> &Address {
        &self.payee
    }

    /// Encodes the transaction into its canonical byte form
    ///
    /// This is the exact byte string that gets signed by the payer and
    /// hashed into the carrying block. Layout:
    ///
    /// `version | amount (f64, big endian) | len | payer | len | payee`
    ///
    /// with lengths as big endian `u32`.
    pub fn encode(&self) -> Vec<u8> {
        let payer = self.payer.0.as_bytes();
        let payee = self.payee.0.as_bytes();

        let mut bytes = Vec::with_capacity(1 + 8 + 4 + payer.len() + 4 + payee.len());
        bytes.push(TRANSACTION_ENCODING_VERSION);
        bytes.extend_from_slice(&self.amount.to_be_bytes());
        put_length_prefixed(&mut bytes, payer);
        put_length_prefixed(&mut bytes, payee);
        bytes
    }
}

/// Appends `data` to `buf` behind a big endian `u32` length
pub(crate) fn put_length_prefixed(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}
