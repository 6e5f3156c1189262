//! The validator layer.
//!
//! Attaches to queries whose ancestry is covered by the trust anchor
//! store and is a strict no-op otherwise. When attached it requests
//! DNSSEC data on sub-queries (DO bit via the `dnssec_want` flag), plants
//! a DNSKEY fetch for each newly entered zone cut, and absorbs returned
//! keysets into the cut. The cryptographic verification itself lives
//! behind the narrow [`Verifier`] hook; the default accepts nothing,
//! leaving covered data at its attempted-validation rank.

use crate::layer::{Layer, State};
use crate::resolve::{Context, Request};
use burrow_proto::{Message, Name, RType, RrSet};
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Signature verification hook. Out of scope for the core: the default
/// implementation verifies nothing.
pub trait Verifier: Send {
    /// Whether `rrset` is properly signed by a key in `keys`.
    fn verify(&self, rrset: &RrSet, keys: &RrSet) -> bool;
}

/// The default hook: treats every RRSet as unverifiable.
#[derive(Debug, Default)]
pub struct NullVerifier;

impl Verifier for NullVerifier {
    fn verify(&self, _rrset: &RrSet, _keys: &RrSet) -> bool {
        false
    }
}

/// See the module docs.
pub struct ValidateLayer {
    verifier: Box<dyn Verifier>,
    /// Cut name a DNSKEY fetch was already planted for.
    planted: Option<Name>,
}

impl Default for ValidateLayer {
    fn default() -> Self {
        Self {
            verifier: Box::new(NullVerifier),
            planted: None,
        }
    }
}

impl ValidateLayer {
    /// A validator with a custom verification hook.
    pub fn with_verifier(verifier: Box<dyn Verifier>) -> Self {
        Self {
            verifier,
            planted: None,
        }
    }

    /// Marks an RRSet verified against the cut's keys, when possible.
    /// With the default hook this never fires; it is the seam a real
    /// validator plugs into.
    pub fn verify_with_keys(&self, rrset: &RrSet, keys: Option<&RrSet>) -> bool {
        keys.map(|k| self.verifier.verify(rrset, k)).unwrap_or(false)
    }
}

impl Layer for ValidateLayer {
    fn name(&self) -> &'static str {
        "validate"
    }

    fn begin(&mut self, ctx: &Context, req: &mut Request, state: State) -> State {
        let Some(id) = req.plan.current() else {
            return state;
        };
        if ctx.ta.covers(&req.plan.query(id).sname) {
            trace!("query covered by a trust anchor, validation armed");
            req.plan.query_mut(id).flags.dnssec_want = true;
        }
        state
    }

    fn consume(
        &mut self,
        ctx: &Context,
        req: &mut Request,
        _source: Option<SocketAddr>,
        pkt: &Message,
        state: State,
    ) -> State {
        let Some(id) = req.plan.current() else {
            return state;
        };
        let (want, stype, sclass, cut_name, have_keys) = {
            let qry = req.plan.query(id);
            (
                qry.flags.dnssec_want,
                qry.stype,
                qry.sclass,
                qry.zone_cut.name.clone(),
                qry.zone_cut.keys.is_some(),
            )
        };
        if !want {
            return state;
        }

        // Absorb a keyset travelling in the answer.
        let keys = RrSet::gather(pkt.answers().iter(), &cut_name, RType::Dnskey);
        if !keys.is_empty() {
            trace!(zone = %cut_name, keys = keys.len(), "keyset absorbed into cut");
            req.plan.query_mut(id).zone_cut.keys = Some(keys);
            return state;
        }

        // Entering a covered cut without keys: fetch its DNSKEY set once
        // before the iteration continues.
        if !have_keys
            && stype != RType::Dnskey
            && ctx.ta.covers(&cut_name)
            && self.planted.as_ref() != Some(&cut_name)
        {
            if req.plan.push(Some(id), &cut_name, sclass, RType::Dnskey).is_ok() {
                debug!(zone = %cut_name, "planting DNSKEY fetch for validation");
                self.planted = Some(cut_name);
            }
        }
        state
    }
}

impl std::fmt::Debug for ValidateLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidateLayer")
            .field("planted", &self.planted)
            .finish()
    }
}
