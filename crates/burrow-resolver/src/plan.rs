//! The resolution plan: a stack of outstanding sub-queries.
//!
//! Queries live in an arena `Vec` and refer to their parent by index, so
//! the plan owns every query outright and parent links can never dangle.
//! `pending` is a stack whose top is the query being worked on; a child is
//! always pushed above its parent and must resolve first. `resolved` keeps
//! the history for answer assembly.

use crate::error::{ResolveError, Result};
use crate::zonecut::ZoneCut;
use burrow_proto::{Name, RClass, RType, Record};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Index of a query within its plan.
pub type QueryId = usize;

/// Per-query control flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFlags {
    /// Address sub-queries for the elected NS are in flight.
    pub await_addr: bool,
    /// The zone cut must be re-anchored from cache before iterating.
    pub await_cut: bool,
    /// Iterate over TCP (set on truncation or network fallback).
    pub tcp: bool,
    /// Bypass cache lookups for this query.
    pub no_cache: bool,
    /// Do not throttle the retry budget for this request.
    pub no_throttle: bool,
    /// The query has its answer; pop it from the plan.
    pub resolved: bool,
    /// The query failed; the parent decides what that means.
    pub failed: bool,
    /// Ancestry is covered by a trust anchor; ask for DNSSEC data.
    pub dnssec_want: bool,
}

/// The nameserver elected for one iteration step.
#[derive(Debug, Clone)]
pub struct ElectedNs {
    /// Name of the nameserver.
    pub name: Name,
    /// Candidate addresses, best first.
    pub addrs: Vec<SocketAddr>,
    /// Election score; lower is better.
    pub score: u64,
}

/// One node of the resolution plan.
#[derive(Debug)]
pub struct Query {
    /// Sought name, lowercased at push time.
    pub sname: Name,
    /// Sought class.
    pub sclass: RClass,
    /// Sought type.
    pub stype: RType,
    /// Control flags.
    pub flags: QueryFlags,
    /// Parent query, if this is a dependency.
    pub parent: Option<QueryId>,
    /// Current delegation point.
    pub zone_cut: ZoneCut,
    /// Elected nameserver for the in-flight iteration.
    pub ns: Option<ElectedNs>,
    /// Message id of the in-flight sub-query.
    pub msgid: u16,
    /// 0x20 case secret of the in-flight sub-query; zero disables the
    /// case check (used when replaying a coalescing leader's response).
    pub secret: u128,
    /// Creation time, seconds since the epoch.
    pub created_at: u64,
    /// Answer-section records accumulated for this query.
    pub result: Vec<Record>,
    /// Authority-section records to carry into the final answer.
    pub authority: Vec<Record>,
}

impl Query {
    fn new(sname: Name, sclass: RClass, stype: RType, parent: Option<QueryId>, now: u64) -> Self {
        Self {
            zone_cut: ZoneCut::new(Name::root()),
            sname,
            sclass,
            stype,
            flags: QueryFlags::default(),
            parent,
            ns: None,
            msgid: 0,
            secret: 0,
            created_at: now,
            result: Vec::new(),
            authority: Vec::new(),
        }
    }

    /// True when this query's sought triple matches.
    pub fn provides(&self, name: &Name, sclass: RClass, stype: RType) -> bool {
        self.sclass == sclass && self.stype == stype && self.sname == *name
    }
}

/// The plan itself.
#[derive(Debug, Default)]
pub struct Plan {
    queries: Vec<Query>,
    pending: Vec<QueryId>,
    resolved: Vec<QueryId>,
}

impl Plan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a new query above `parent`.
    ///
    /// The name is lowercased. If any ancestor already provides the same
    /// triple the push is refused with a loop error; resolving it could
    /// never terminate.
    pub fn push(
        &mut self,
        parent: Option<QueryId>,
        name: &Name,
        sclass: RClass,
        stype: RType,
    ) -> Result<QueryId> {
        if self.satisfies(parent, name, sclass, stype) {
            return Err(ResolveError::Loop { name: name.clone() });
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let id = self.queries.len();
        self.queries
            .push(Query::new(name.to_lowercase(), sclass, stype, parent, now));
        self.pending.push(id);
        tracing::debug!(query = %name, %stype, parent = ?parent, "plan push");
        Ok(id)
    }

    /// Moves a query from pending to the resolved history.
    pub fn pop(&mut self, id: QueryId) {
        if let Some(at) = self.pending.iter().rposition(|&q| q == id) {
            self.pending.remove(at);
            self.resolved.push(id);
        }
    }

    /// The query currently on top of the stack.
    pub fn current(&self) -> Option<QueryId> {
        self.pending.last().copied()
    }

    /// The most recently resolved query.
    pub fn last_resolved(&self) -> Option<QueryId> {
        self.resolved.last().copied()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of queries ever pushed.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Shared access to a query.
    pub fn query(&self, id: QueryId) -> &Query {
        &self.queries[id]
    }

    /// Mutable access to a query.
    pub fn query_mut(&mut self, id: QueryId) -> &mut Query {
        &mut self.queries[id]
    }

    /// Walks the ancestor chain from `start` looking for a query that
    /// provides `(name, sclass, stype)`.
    pub fn satisfies(
        &self,
        start: Option<QueryId>,
        name: &Name,
        sclass: RClass,
        stype: RType,
    ) -> bool {
        let mut cursor = start;
        while let Some(id) = cursor {
            let q = &self.queries[id];
            if q.provides(name, sclass, stype) {
                return true;
            }
            cursor = q.parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn push_pop_stack_order() {
        let mut plan = Plan::new();
        let root = plan.push(None, &name("www.example.com"), RClass::In, RType::A).unwrap();
        let child = plan
            .push(Some(root), &name("ns1.example.com"), RClass::In, RType::A)
            .unwrap();

        // The child is on top and must resolve first.
        assert_eq!(plan.current(), Some(child));
        plan.pop(child);
        assert_eq!(plan.current(), Some(root));
        assert_eq!(plan.last_resolved(), Some(child));
        plan.pop(root);
        assert!(plan.is_empty());
    }

    #[test]
    fn names_are_lowercased() {
        let mut plan = Plan::new();
        let id = plan.push(None, &name("WWW.Example.COM"), RClass::In, RType::A).unwrap();
        assert_eq!(plan.query(id).sname.as_wire(), name("www.example.com").as_wire());
    }

    #[test]
    fn loop_push_is_refused() {
        let mut plan = Plan::new();
        let root = plan.push(None, &name("a.example"), RClass::In, RType::A).unwrap();
        let child = plan
            .push(Some(root), &name("b.example"), RClass::In, RType::Aaaa)
            .unwrap();

        // Same triple as the grandparent: refused.
        let err = plan.push(Some(child), &name("a.example"), RClass::In, RType::A);
        assert!(matches!(err, Err(ResolveError::Loop { .. })));

        // Different type is fine.
        assert!(plan
            .push(Some(child), &name("a.example"), RClass::In, RType::Aaaa)
            .is_ok());
    }

    #[test]
    fn satisfies_walks_whole_chain() {
        let mut plan = Plan::new();
        let a = plan.push(None, &name("a."), RClass::In, RType::A).unwrap();
        let b = plan.push(Some(a), &name("b."), RClass::In, RType::Ns).unwrap();
        let c = plan.push(Some(b), &name("c."), RClass::In, RType::Aaaa).unwrap();

        assert!(plan.satisfies(Some(c), &name("a."), RClass::In, RType::A));
        assert!(plan.satisfies(Some(c), &name("C."), RClass::In, RType::Aaaa));
        assert!(!plan.satisfies(Some(c), &name("a."), RClass::In, RType::Ns));
        assert!(!plan.satisfies(None, &name("a."), RClass::In, RType::A));
    }

    #[test]
    fn loop_invariant_holds_after_pushes() {
        let mut plan = Plan::new();
        let root = plan.push(None, &name("x.example"), RClass::In, RType::A).unwrap();
        let kid = plan
            .push(Some(root), &name("ns.other"), RClass::In, RType::A)
            .unwrap();
        // For every pending query, its parent chain never provides its own triple.
        for id in [root, kid] {
            let q = plan.query(id);
            assert!(!plan.satisfies(q.parent, &q.sname, q.sclass, q.stype));
        }
    }
}
