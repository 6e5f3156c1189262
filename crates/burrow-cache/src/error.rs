//! Cache error types.

use crate::rank::Rank;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors surfaced by the record cache.
///
/// Callers in the resolver treat every variant as a miss: a broken cache
/// degrades resolution speed, never correctness.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Nothing stored under the key.
    #[error("cache miss")]
    Miss,

    /// The entry exists but its TTL has drained.
    #[error("cache entry expired (rank {rank})")]
    Stale {
        /// Rank of the expired entry, still useful for decisions.
        rank: Rank,
    },

    /// A stored value failed to decode.
    #[error("corrupt cache value: {reason}")]
    Corrupt {
        /// What failed to decode.
        reason: &'static str,
    },

    /// The backing store rejected the operation.
    #[error("cache backend: {reason}")]
    Backend {
        /// Backend diagnostic.
        reason: String,
    },

    /// The transaction was already consumed or is read-only.
    #[error("invalid cache transaction use: {reason}")]
    BadTxn {
        /// What was attempted.
        reason: &'static str,
    },
}

impl CacheError {
    /// Rank of a stale entry, when this is a stale error.
    pub fn stale_rank(&self) -> Option<Rank> {
        match self {
            Self::Stale { rank } => Some(*rank),
            _ => None,
        }
    }
}
