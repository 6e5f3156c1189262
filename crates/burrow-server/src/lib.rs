//! # burrow-server
//!
//! The worker side of the burrow resolver: per-request tasks that drive
//! the iterator core, UDP fan-out with retransmission and timeout,
//! leader/follower coalescing of identical in-flight sub-queries, TCP
//! message assembly, and the listening endpoint registry.
//!
//! Concurrency model: one cooperative event loop. The binary runs a
//! current-thread tokio runtime; nothing here spawns blocking threads,
//! and tasks only yield at I/O and timer boundaries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod net;
pub mod tcp;
pub mod worker;

pub(crate) mod task;
pub(crate) mod udp;

pub use net::{EndpointInfo, InterfaceInfo, NetFlags, Network};
pub use tcp::StreamAssembler;
pub use worker::{Origin, Worker, WorkerConfig, WorkerStats};

use thiserror::Error;

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised by the worker and the endpoint registry.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Socket-level failure.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A packet failed to parse or serialize.
    #[error(transparent)]
    Wire(#[from] burrow_proto::Error),

    /// The iterator core reported a failure.
    #[error(transparent)]
    Resolve(#[from] burrow_resolver::ResolveError),

    /// A stream message exceeded the 16-bit length prefix.
    #[error("message of {length} bytes does not fit a stream frame")]
    MessageTooLong {
        /// Offending length.
        length: usize,
    },

    /// No endpoint is bound at the given address and port.
    #[error("no endpoint at {addr}@{port}")]
    NoEndpoint {
        /// Address searched.
        addr: String,
        /// Port searched.
        port: u16,
    },

    /// The listen address did not parse.
    #[error("unusable listen address {addr}: {reason}")]
    BadAddress {
        /// Offending address text.
        addr: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The origin handle went away before the answer was ready.
    #[error("query origin disconnected")]
    OriginClosed,
}

/// Datagram retransmission period.
pub const RETRY_MS: u64 = 250;

/// Per-iteration I/O deadline.
pub const RTT_MAX_MS: u64 = 2000;

/// In-flight datagram bound per task: the address fan-out plus half.
pub const MAX_PENDING: usize =
    burrow_resolver::MAX_NS_ADDRESSES + burrow_resolver::MAX_NS_ADDRESSES / 2;

/// Reusable packet-buffer freelist bound.
pub const BUF_FREELIST_SIZE: usize = 8;

/// Concurrent-task level above which new tasks lose `NO_THROTTLE`.
pub const THROTTLE_THRESHOLD: u64 = 2 * BUF_FREELIST_SIZE as u64;

/// UDP receive batch the socket buffers are sized for.
pub const RECV_BATCH: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_bound_is_one_and_a_half_fanouts() {
        assert_eq!(MAX_PENDING, 6);
        assert!(MAX_PENDING > burrow_resolver::MAX_NS_ADDRESSES);
    }
}
