use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::crypto::{verify_signature, Address, DigitalSignature};
use super::pow::{MiningError, ProofOfWork};
use super::transaction::Transaction;
use crate::config::LedgerConfig;

/// Errors that can occur during ledger operations
///
/// Every error leaves the chain exactly as it was before the call.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Sender {sender} is not the payer {payer}")]
    PayerMismatch { sender: Address, payer: Address },

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    #[error("Chain is empty")]
    EmptyChain,

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Represents the ledger: an append-only chain of mined blocks
///
/// Clones are handles onto the same chain. All appends go through
/// [`admit`](Ledger::admit). Mining runs without the chain lock; the block
/// is only pushed if the tip it was mined on is still the tip, otherwise it
/// is mined again on the new tip. No two blocks ever share a `prev_hash`.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks, genesis first
    chain: Arc<Mutex<Vec<Block>>>,

    /// Solver used to mine every new block
    pow: ProofOfWork,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates a new ledger holding only the genesis block
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    /// Creates a new ledger with the given mining settings
    pub fn with_config(config: LedgerConfig) -> Self {
        let genesis = Block::genesis();
        info!(
            "Created ledger with genesis block {} (difficulty {})",
            genesis.hash(),
            config.difficulty
        );

        Ledger {
            chain: Arc::new(Mutex::new(vec![genesis])),
            pow: config.proof_of_work(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<Block>>, LedgerError> {
        self.chain
            .lock()
            .map_err(|_| LedgerError::SystemError("Chain lock poisoned".to_string()))
    }

    pub fn proof_of_work(&self) -> ProofOfWork {
        self.pow
    }

    /// Gets the last block in the chain (the tip)
    pub fn last_block(&self) -> Result<Block, LedgerError> {
        let chain = self.lock()?;
        chain.last().cloned().ok_or(LedgerError::EmptyChain)
    }

    /// Gets a snapshot of the entire chain
    pub fn chain(&self) -> Result<Vec<Block>, LedgerError> {
        Ok(self.lock()?.clone())
    }

    /// Number of blocks in the chain, genesis included
    pub fn block_count(&self) -> Result<usize, LedgerError> {
        Ok(self.lock()?.len())
    }

    /// Admits a signed transaction into a new block
    ///
    /// # Arguments
    ///
    /// * `transaction` - The transaction to record
    /// * `sender` - Address (public key) of the submitting identity
    /// * `signature` - Signature over the transaction's canonical encoding
    ///
    /// # Returns
    ///
    /// The mined block that was appended. The sender must be the payer and
    /// the signature must verify under the sender's key; otherwise nothing
    /// is appended.
    pub fn admit(
        &self,
        transaction: Transaction,
        sender: &Address,
        signature: &DigitalSignature,
    ) -> Result<Block, LedgerError> {
        self.admit_with(transaction, sender, signature, None)
    }

    /// Like [`admit`](Ledger::admit), aborting the mining step once `cancel` is set
    pub fn admit_cancellable(
        &self,
        transaction: Transaction,
        sender: &Address,
        signature: &DigitalSignature,
        cancel: &AtomicBool,
    ) -> Result<Block, LedgerError> {
        self.admit_with(transaction, sender, signature, Some(cancel))
    }

    fn admit_with(
        &self,
        transaction: Transaction,
        sender: &Address,
        signature: &DigitalSignature,
        cancel: Option<&AtomicBool>,
    ) -> Result<Block, LedgerError> {
        if sender != transaction.payer() {
            warn!("Rejected transaction: sender {} is not payer {}", sender, transaction.payer());
            return Err(LedgerError::PayerMismatch {
                sender: sender.clone(),
                payer: transaction.payer().clone(),
            });
        }

        if !Self::verify(&transaction, sender, signature) {
            warn!("Rejected transaction from {}: invalid signature", sender);
            return Err(LedgerError::InvalidSignature);
        }

        loop {
            let prev_hash = self.last_block()?.hash();
            let mut block = Block::new(prev_hash.clone(), transaction.clone())?;

            let seed = block.nonce();
            let solution = match cancel {
                Some(flag) => self.pow.solve_cancellable(seed, flag),
                None => self.pow.solve(seed),
            }
            .map_err(|err| {
                warn!("Failed to mine block for {}: {}", sender, err);
                err
            })?;

            // The stored nonce is the value whose digest meets the target
            block.set_nonce(seed.wrapping_add(solution));

            let mut chain = self.lock()?;
            let tip = chain.last().ok_or(LedgerError::EmptyChain)?;
            if tip.hash() != prev_hash {
                debug!("Tip moved while mining for {}, mining again", sender);
                continue;
            }

            info!(
                "Mined block {} at height {} after {} attempts",
                block.hash(),
                chain.len(),
                solution.saturating_add(1)
            );

            chain.push(block.clone());
            return Ok(block);
        }
    }

    fn verify(transaction: &Transaction, sender: &Address, signature: &DigitalSignature) -> bool {
        let public_key = match sender.to_public_key() {
            Ok(key) => key,
            Err(err) => {
                debug!("Cannot decode sender key {}: {}", sender, err);
                return false;
            }
        };

        match verify_signature(&transaction.encode(), signature, &public_key) {
            Ok(valid) => valid,
            Err(err) => {
                debug!("Cannot decode signature from {}: {}", sender, err);
                false
            }
        }
    }

    /// Validates the whole chain
    ///
    /// Checks the genesis block, the hash link between every pair of
    /// neighbours and the proof of work stored in every mined block.
    pub fn validate(&self) -> Result<(), LedgerError> {
        let chain = self.lock()?;
        self.validate_blocks(&chain)
    }

    /// Validates a chain snapshot, such as one returned by [`chain`](Ledger::chain),
    /// against this ledger's proof of work
    pub fn validate_blocks(&self, chain: &[Block]) -> Result<(), LedgerError> {
        let genesis = chain.first().ok_or(LedgerError::EmptyChain)?;
        if !genesis.is_genesis() {
            return Err(LedgerError::InvalidChain(
                "first block is not a genesis block".to_string(),
            ));
        }

        for (height, pair) in chain.windows(2).enumerate().map(|(i, pair)| (i + 1, pair)) {
            let (previous, current) = (&pair[0], &pair[1]);

            if current.prev_hash() != previous.hash() {
                return Err(LedgerError::InvalidChain(format!(
                    "block {} does not link to block {}",
                    height,
                    height - 1
                )));
            }

            if !self.pow.meets_target(current.nonce()) {
                return Err(LedgerError::InvalidChain(format!(
                    "block {} has an invalid proof of work",
                    height
                )));
            }
        }

        Ok(())
    }

    /// Returns true if [`validate`](Ledger::validate) passes
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Wallet;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::{Duration, Instant};

    fn quick_ledger() -> Ledger {
        Ledger::with_config(LedgerConfig {
            difficulty: 2,
            max_mining_attempts: None,
        })
    }

    fn corrupt(signature: &DigitalSignature) -> DigitalSignature {
        let mut bytes = signature.to_bytes().unwrap();
        bytes[0] ^= 0x01;
        DigitalSignature::from_bytes(&bytes)
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new();
        let chain = ledger.chain().unwrap();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].prev_hash(), "");
        assert_eq!(ledger.last_block().unwrap(), chain[0]);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_transfer_scenario() {
        let ledger = Ledger::new();
        let alice = Wallet::new();
        let bob = Wallet::new();

        let transaction = Transaction::new(50.0, alice.address().clone(), bob.address().clone());
        let signature = alice.sign(&transaction);

        ledger
            .admit(transaction.clone(), alice.address(), &signature)
            .unwrap();

        let chain = ledger.chain().unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].transaction().amount(), 50.0);
        assert_eq!(chain[1].prev_hash(), chain[0].hash());
        assert!(ProofOfWork::digest(chain[1].nonce()).starts_with("0000"));

        // Same transaction again with one signature byte flipped
        let result = ledger.admit(transaction, alice.address(), &corrupt(&signature));
        assert!(matches!(result, Err(LedgerError::InvalidSignature)));
        assert_eq!(ledger.block_count().unwrap(), 2);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_initiate_transfer() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();

        let block = alice.initiate_transfer(12.5, bob.address(), &ledger).unwrap();

        assert_eq!(block.transaction().payer(), alice.address());
        assert_eq!(block.transaction().payee(), bob.address());
        assert_eq!(ledger.last_block().unwrap(), block);
    }

    #[test]
    fn test_chain_linkage() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();

        for amount in 1..=5 {
            alice.initiate_transfer(amount as f64, bob.address(), &ledger).unwrap();
            bob.initiate_transfer(amount as f64, alice.address(), &ledger).unwrap();
        }

        let chain = ledger.chain().unwrap();
        assert_eq!(chain.len(), 11);
        assert_eq!(chain[0].prev_hash(), "");
        for i in 1..chain.len() {
            assert_eq!(chain[i].prev_hash(), chain[i - 1].hash());
        }
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_append_only_length() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();

        let before = ledger.block_count().unwrap();
        alice.initiate_transfer(1.0, bob.address(), &ledger).unwrap();
        assert_eq!(ledger.block_count().unwrap(), before + 1);

        let first = ledger.chain().unwrap();
        alice.initiate_transfer(2.0, bob.address(), &ledger).unwrap();
        let second = ledger.chain().unwrap();

        // Settled blocks are untouched by later appends
        assert_eq!(&second[..first.len()], &first[..]);
    }

    #[test]
    fn test_signature_from_other_wallet() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let mallory = Wallet::new();

        let transaction = Transaction::new(5.0, alice.address().clone(), mallory.address().clone());
        let signature = mallory.sign(&transaction);

        let result = ledger.admit(transaction, alice.address(), &signature);
        assert!(matches!(result, Err(LedgerError::InvalidSignature)));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_payer_mismatch() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let mallory = Wallet::new();

        // Mallory signs a transaction that claims Alice pays
        let transaction = Transaction::new(5.0, alice.address().clone(), mallory.address().clone());
        let signature = mallory.sign(&transaction);

        let result = ledger.admit(transaction, mallory.address(), &signature);
        assert!(matches!(result, Err(LedgerError::PayerMismatch { .. })));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_undecodable_sender() {
        let ledger = quick_ledger();
        let sender = Address("genesis".to_string());
        let transaction = Transaction::new(5.0, sender.clone(), Address("satoshi".to_string()));
        let signature = Wallet::new().sign(&transaction);

        let result = ledger.admit(transaction, &sender, &signature);
        assert!(matches!(result, Err(LedgerError::InvalidSignature)));
    }

    #[test]
    fn test_mining_exhausted_leaves_chain_untouched() {
        let ledger = Ledger::with_config(LedgerConfig {
            difficulty: 64,
            max_mining_attempts: Some(50),
        });
        let alice = Wallet::new();
        let bob = Wallet::new();

        let result = alice.initiate_transfer(1.0, bob.address(), &ledger);

        assert!(matches!(
            result,
            Err(LedgerError::Mining(MiningError::Exhausted { attempts: 50 }))
        ));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_mining_cancelled_leaves_chain_untouched() {
        let ledger = Ledger::with_config(LedgerConfig {
            difficulty: 64,
            max_mining_attempts: None,
        });
        let alice = Wallet::new();
        let bob = Wallet::new();
        let transaction = Transaction::new(1.0, alice.address().clone(), bob.address().clone());
        let signature = alice.sign(&transaction);
        let cancel = AtomicBool::new(true);

        let result = ledger.admit_cancellable(transaction, alice.address(), &signature, &cancel);

        assert!(matches!(
            result,
            Err(LedgerError::Mining(MiningError::Cancelled { .. }))
        ));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_validate_detects_tampered_nonce() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        alice.initiate_transfer(1.0, bob.address(), &ledger).unwrap();
        alice.initiate_transfer(2.0, bob.address(), &ledger).unwrap();

        {
            let mut chain = ledger.chain.lock().unwrap();
            let nonce = chain[1].nonce();
            chain[1].set_nonce(nonce + 1);
        }

        assert!(matches!(ledger.validate(), Err(LedgerError::InvalidChain(_))));
    }

    #[test]
    fn test_validate_detects_missing_proof_of_work() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        alice.initiate_transfer(1.0, bob.address(), &ledger).unwrap();

        {
            let mut chain = ledger.chain.lock().unwrap();
            let pow = ledger.pow;
            let mut nonce = chain[1].nonce() + 1;
            while pow.meets_target(nonce) {
                nonce += 1;
            }
            chain[1].set_nonce(nonce);
        }

        let err = ledger.validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid chain: block 1 has an invalid proof of work");
    }

    #[test]
    fn test_concurrent_admits_serialize() {
        let ledger = quick_ledger();
        let payee = Wallet::new();

        // More miners than blocks per round, so some must mine again on a moved tip
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                let payee = payee.address().clone();
                thread::spawn(move || {
                    let wallet = Wallet::new();
                    wallet.initiate_transfer(i as f64, &payee, &ledger).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let chain = ledger.chain().unwrap();
        assert_eq!(chain.len(), 9);

        let mut prev_hashes: Vec<&str> = chain.iter().map(|b| b.prev_hash()).collect();
        prev_hashes.sort();
        prev_hashes.dedup();
        assert_eq!(prev_hashes.len(), 9);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_reads_proceed_while_mining() {
        let ledger = Ledger::with_config(LedgerConfig {
            difficulty: 64,
            max_mining_attempts: None,
        });
        let alice = Wallet::new();
        let transaction = Transaction::new(1.0, alice.address().clone(), Wallet::new().address().clone());
        let signature = alice.sign(&transaction);
        let cancel = Arc::new(AtomicBool::new(false));

        let miner = {
            let ledger = ledger.clone();
            let cancel = Arc::clone(&cancel);
            let sender = alice.address().clone();
            thread::spawn(move || ledger.admit_cancellable(transaction, &sender, &signature, &cancel))
        };

        // Let the miner get into its search
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        let tip = ledger.last_block().unwrap();
        let count = ledger.block_count().unwrap();
        let valid = ledger.is_valid();
        let waited = started.elapsed();

        cancel.store(true, Ordering::Relaxed);
        let result = miner.join().unwrap();

        assert!(waited < Duration::from_millis(500), "reads waited {:?} behind mining", waited);
        assert!(tip.is_genesis());
        assert_eq!(count, 1);
        assert!(valid);
        assert!(matches!(
            result,
            Err(LedgerError::Mining(MiningError::Cancelled { .. }))
        ));
        assert_eq!(ledger.block_count().unwrap(), 1);
    }

    #[test]
    fn test_validate_blocks_checks_given_snapshot() {
        let ledger = quick_ledger();
        let alice = Wallet::new();
        let bob = Wallet::new();
        alice.initiate_transfer(1.0, bob.address(), &ledger).unwrap();

        let mut snapshot = ledger.chain().unwrap();
        assert!(ledger.validate_blocks(&snapshot).is_ok());

        let mut nonce = snapshot[1].nonce() + 1;
        while ledger.pow.meets_target(nonce) {
            nonce += 1;
        }
        snapshot[1].set_nonce(nonce);

        assert!(matches!(
            ledger.validate_blocks(&snapshot),
            Err(LedgerError::InvalidChain(_))
        ));
        assert!(matches!(ledger.validate_blocks(&[]), Err(LedgerError::EmptyChain)));
        // The ledger itself is untouched
        assert!(ledger.is_valid());
    }
}
