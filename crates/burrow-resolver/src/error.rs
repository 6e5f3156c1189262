//! Resolver error types.

use burrow_proto::Name;
use thiserror::Error;

/// Result type alias for resolver operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Errors surfaced by the iterator core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Pushing the query would create a dependency cycle.
    #[error("resolution loop detected for {name}")]
    Loop {
        /// The name whose resolution would cycle.
        name: Name,
    },

    /// The per-request iteration ceiling was hit.
    #[error("iteration limit of {limit} reached")]
    Limit {
        /// The configured ceiling.
        limit: u16,
    },

    /// The zone cut ran out of usable nameservers.
    #[error("no usable nameserver for {zone}")]
    NoNameserver {
        /// The zone being iterated.
        zone: Name,
    },

    /// A malformed name or packet reached the resolver.
    #[error(transparent)]
    Wire(#[from] burrow_proto::Error),
}
