// Blockchain module
//
// This module contains the core ledger implementation including:
// - Transaction structure and its canonical encoding
// - Block structure and hash linkage
// - Proof of work search
// - Wallets (signing identities) and signature verification
// - The ledger that admits signed transactions

pub mod block;
pub mod chain;
pub mod crypto;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Ledger, LedgerError};
pub use crypto::{Address, DigitalSignature, Wallet};
pub use pow::ProofOfWork;
pub use transaction::Transaction;
