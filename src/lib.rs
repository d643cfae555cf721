//! A minimal proof of work ledger.
//!
//! Wallets sign single-transfer transactions, the [`blockchain::Ledger`]
//! verifies them, mines a block for each and appends it to the chain.

pub mod api;
pub mod blockchain;
pub mod config;
