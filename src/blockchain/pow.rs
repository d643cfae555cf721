use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Default number of leading zero hex digits a solution must produce
pub const DEFAULT_DIFFICULTY: usize = 4;

/// Errors that can end a proof of work search without a solution
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining exhausted after {attempts} attempts")]
    Exhausted { attempts: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },
}

/// Brute force puzzle solver used to admit new blocks
///
/// The puzzle: given a seed, find the smallest `solution` such that the
/// BLAKE3 digest of the decimal string of `seed + solution` starts with
/// `difficulty` zero hex digits. The difficulty is fixed for the lifetime
/// of the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    /// Number of leading zero hex digits required
    difficulty: usize,

    /// Maximum number of candidates to try, unbounded if `None`
    max_attempts: Option<u64>,
}

impl Default for ProofOfWork {
    fn default() -> Self {
        ProofOfWork {
            difficulty: DEFAULT_DIFFICULTY,
            max_attempts: None,
        }
    }
}

impl ProofOfWork {
    /// Creates a solver
    ///
    /// `difficulty` is clamped to the 64 hex digits of a BLAKE3 digest.
    pub fn new(difficulty: usize, max_attempts: Option<u64>) -> Self {
        ProofOfWork {
            difficulty: difficulty.min(blake3::OUT_LEN * 2),
            max_attempts,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn max_attempts(&self) -> Option<u64> {
        self.max_attempts
    }

    /// Hex digest of the candidate value
    pub fn digest(value: u64) -> String {
        blake3::hash(value.to_string().as_bytes()).to_hex().to_string()
    }

    /// Checks whether `value` (seed plus solution) satisfies the target
    pub fn meets_target(&self, value: u64) -> bool {
        Self::digest(value)
            .bytes()
            .take(self.difficulty)
            .all(|b| b == b'0')
    }

    /// Searches for the smallest solution for `seed`
    ///
    /// The search starts at `solution = 0` rather than 1, so a seed that
    /// already meets the target is returned with a solution of 0 and the
    /// result is always the smallest non-negative solution.
    ///
    /// # Returns
    ///
    /// The solution, or `MiningError::Exhausted` once `max_attempts`
    /// candidates have failed
    pub fn solve(&self, seed: u64) -> Result<u64, MiningError> {
        self.search(seed, None)
    }

    /// Like [`solve`](Self::solve) but gives up as soon as `cancel` is set
    pub fn solve_cancellable(&self, seed: u64, cancel: &AtomicBool) -> Result<u64, MiningError> {
        self.search(seed, Some(cancel))
    }

    fn search(&self, seed: u64, cancel: Option<&AtomicBool>) -> Result<u64, MiningError> {
        let mut solution: u64 = 0;

        loop {
            if let Some(max) = self.max_attempts {
                if solution >= max {
                    return Err(MiningError::Exhausted { attempts: solution });
                }
            }

            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(MiningError::Cancelled { attempts: solution });
                }
            }

            if self.meets_target(seed.wrapping_add(solution)) {
                return Ok(solution);
            }

            solution = solution.wrapping_add(1);
        }
    }
}
