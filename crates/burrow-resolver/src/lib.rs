//! # burrow-resolver
//!
//! The iterator core of the burrow resolver: the resolution plan (a stack
//! of outstanding sub-queries), the layer pipeline (cache, iterator,
//! validator), nameserver reputation and election, and the produce/consume
//! state machine the worker drives.
//!
//! The crate is transport-free by design: it decides *what* to send and
//! *to whom*; the worker in `burrow-server` owns sockets, retransmission
//! and timeouts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hints;
pub mod layer;
pub mod layers;
pub mod nsrep;
pub mod plan;
pub mod resolve;
pub mod zonecut;

pub use error::{ResolveError, Result};
pub use hints::{RootHint, RootHints, ROOT_HINTS};
pub use layer::{Layer, Pipeline, State};
pub use nsrep::{elect, Election, Reputation, MAX_NS_ADDRESSES};
pub use plan::{ElectedNs, Plan, Query, QueryFlags, QueryId};
pub use resolve::{Context, Options, Produced, Request, SockType, ITER_LIMIT};
pub use zonecut::ZoneCut;
