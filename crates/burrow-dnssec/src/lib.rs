//! # burrow-dnssec
//!
//! Trust anchor management for the burrow resolver: a per-name store of
//! DS/DNSKEY RRSets consumed by the validator layer, and the RFC 5011
//! state machine that tracks key rollovers between active refreshes.
//!
//! Signature verification itself is not implemented here; the validator
//! layer only needs to know which subtrees are covered by an anchor and
//! which keys are currently trustworthy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod keystate;

pub use keystate::{AnchorKeeper, KeyState, ObservedKey, HOLD_DOWN_SECS};

use burrow_proto::{Name, RClass, RType, RrSet};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

/// Result type alias for trust anchor operations.
pub type Result<T> = std::result::Result<T, TaError>;

/// Trust anchor errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaError {
    /// Only DS and DNSKEY records can anchor trust.
    #[error("record type {0} cannot be a trust anchor")]
    BadAnchorType(RType),

    /// No anchor stored at the name.
    #[error("no trust anchor at {0}")]
    NotFound(Name),
}

/// Per-name store of trust anchor RRSets.
///
/// Lookups walk the ancestor chain, so `covers` answers "could this name
/// be validated at all" before any network work happens.
#[derive(Debug, Default)]
pub struct TaStore {
    anchors: RwLock<HashMap<Name, RrSet>>,
}

impl TaStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends anchor rdata at `name`, creating the RRSet when absent.
    pub fn add(&self, name: &Name, rtype: RType, ttl: u32, rdata: Bytes) -> Result<()> {
        if !matches!(rtype, RType::Ds | RType::Dnskey) {
            return Err(TaError::BadAnchorType(rtype));
        }
        let owner = name.to_lowercase();
        let mut anchors = self.anchors.write();
        let set = anchors
            .entry(owner.clone())
            .or_insert_with(|| RrSet::new(owner.clone(), rtype, RClass::In));
        set.push(ttl, rdata);
        debug!(name = %owner, %rtype, "trust anchor added");
        Ok(())
    }

    /// The anchor RRSet at exactly `name`, if any.
    pub fn get(&self, name: &Name) -> Option<RrSet> {
        self.anchors.read().get(&name.to_lowercase()).cloned()
    }

    /// True when `name` or any ancestor up to the root holds an anchor.
    pub fn covers(&self, name: &Name) -> bool {
        let anchors = self.anchors.read();
        if anchors.is_empty() {
            return false;
        }
        let mut cursor = Some(name.to_lowercase());
        while let Some(n) = cursor {
            if anchors.contains_key(&n) {
                return true;
            }
            cursor = n.parent();
        }
        false
    }

    /// Removes the anchor at `name`.
    pub fn del(&self, name: &Name) -> Result<()> {
        self.anchors
            .write()
            .remove(&name.to_lowercase())
            .map(|_| ())
            .ok_or_else(|| TaError::NotFound(name.clone()))
    }

    /// Drops every anchor.
    pub fn clear(&self) {
        self.anchors.write().clear();
    }

    /// True when no anchors are configured.
    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }

    /// Number of anchored names.
    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }
}
