//! Zone cuts: the delegation point a query is currently anchored at.

use burrow_cache::{materialize, CacheTxn};
use burrow_proto::{Name, RType, Record, RrSet};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::trace;

/// A delegation point: the cut owner plus its NS set with any known
/// addresses, and the zone's DNSKEY set once fetched.
#[derive(Debug, Clone, Default)]
pub struct ZoneCut {
    /// Owner of the delegation.
    pub name: Name,
    /// Nameserver name to known addresses. An empty list means the
    /// address is not known yet and must be resolved.
    servers: BTreeMap<Name, Vec<IpAddr>>,
    /// DNSKEY RRSet of the zone, once the validator fetched it.
    pub keys: Option<RrSet>,
}

impl ZoneCut {
    /// An empty cut at `name`.
    pub fn new(name: Name) -> Self {
        Self {
            name,
            servers: BTreeMap::new(),
            keys: None,
        }
    }

    /// Registers a nameserver, optionally with one address.
    pub fn add(&mut self, ns: Name, addr: Option<IpAddr>) {
        let entry = self.servers.entry(ns.to_lowercase()).or_default();
        if let Some(addr) = addr {
            if !entry.contains(&addr) {
                entry.push(addr);
            }
        }
    }

    /// Removes a nameserver entirely.
    pub fn remove(&mut self, ns: &Name) {
        self.servers.remove(&ns.to_lowercase());
    }

    /// Known addresses of one nameserver.
    pub fn addrs_of(&self, ns: &Name) -> Option<&[IpAddr]> {
        self.servers.get(&ns.to_lowercase()).map(Vec::as_slice)
    }

    /// Iterates `(nameserver, addresses)` pairs in name order.
    pub fn servers(&self) -> impl Iterator<Item = (&Name, &[IpAddr])> {
        self.servers.iter().map(|(n, a)| (n, a.as_slice()))
    }

    /// True when the cut has no nameservers left.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Number of nameservers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Builds the closest enclosing cut for `name` out of cached NS
    /// records, harvesting cached glue for each nameserver. Returns
    /// `None` when no ancestor has a cached delegation.
    pub fn find_cached(txn: &CacheTxn<'_>, name: &Name, now: u32) -> Option<Self> {
        let mut cursor = Some(name.to_lowercase());
        while let Some(owner) = cursor {
            if let Ok((set, drift, _rank, _)) = txn.peek_rr(&owner, RType::Ns, now) {
                let fresh = materialize(&set, drift);
                if !fresh.is_empty() {
                    let mut cut = ZoneCut::new(owner.clone());
                    for rec in fresh.to_records() {
                        if let Some(target) = rec.name_target() {
                            cut.add(target.clone(), None);
                            cut.harvest_glue(txn, &target, now);
                        }
                    }
                    trace!(cut = %cut.name, servers = cut.len(), "cut anchored from cache");
                    return Some(cut);
                }
            }
            cursor = owner.parent();
        }
        None
    }

    /// Pulls cached A/AAAA records for `ns` into the cut.
    pub fn harvest_glue(&mut self, txn: &CacheTxn<'_>, ns: &Name, now: u32) {
        for rtype in [RType::A, RType::Aaaa] {
            if let Ok((set, drift, _, _)) = txn.peek_rr(ns, rtype, now) {
                for rec in materialize(&set, drift).to_records() {
                    if let Some(ip) = rec.ip_addr() {
                        self.add(ns.clone(), Some(ip));
                    }
                }
            }
        }
    }

    /// Absorbs the addresses of a resolved A/AAAA dependency.
    pub fn absorb_addresses(&mut self, ns: &Name, records: &[Record]) -> usize {
        let mut added = 0;
        for rec in records {
            if let Some(ip) = rec.ip_addr() {
                self.add(ns.clone(), Some(ip));
                added += 1;
            }
        }
        added
    }
}
