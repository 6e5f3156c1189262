//! The cache layer: first on produce, first on consume.
//!
//! On produce it answers the current query straight from the cache when a
//! fresh entry of usable rank exists, short-circuiting the iteration. On
//! consume it writes back everything a response taught us, with ranks
//! derived from the section and the AA bit. Cache trouble is never fatal:
//! every error path degrades to a miss.

use crate::layer::{Layer, State};
use crate::resolve::{Context, Request};
use burrow_cache::{materialize, Rank};
use burrow_proto::message::section_rrsets;
use burrow_proto::{Message, RType, RrSet};
use std::net::SocketAddr;
use tracing::trace;

/// Longest alias chain the cache walk follows in one pass.
const MAX_ALIAS_HOPS: u8 = 8;

/// See the module docs.
#[derive(Debug, Default)]
pub struct CacheLayer;

impl CacheLayer {
    /// Serves the current query from cache. Returns `Done` on a hit.
    fn lookup(&self, ctx: &Context, req: &mut Request) -> State {
        let Some(id) = req.plan.current() else {
            return State::Produce;
        };
        if req.plan.query(id).flags.no_cache {
            return State::Produce;
        }
        let Ok(txn) = ctx.cache.begin(false) else {
            return State::Produce;
        };
        let now = ctx.now();
        let (sname, stype) = {
            let qry = req.plan.query(id);
            (qry.sname.clone(), qry.stype)
        };

        // Walk the alias chain as far as the cache carries it. Every hop
        // mutates the query, so a partial walk still saves iterations.
        let mut cursor = sname;
        let mut hops = 0u8;
        loop {
            // Direct hit on the sought type.
            if let Ok((set, drift, rank, _)) = txn.peek_rr(&cursor, stype, now) {
                if rank > Rank::BAD {
                    let fresh = materialize(&set, drift);
                    if !fresh.is_empty() {
                        trace!(name = %cursor, %stype, drift, "cache hit");
                        let qry = req.plan.query_mut(id);
                        qry.result.extend(fresh.to_records());
                        qry.flags.resolved = true;
                        return State::Done;
                    }
                }
            }

            if stype == RType::Cname || hops >= MAX_ALIAS_HOPS {
                return State::Produce;
            }
            let alias = match txn.peek_rr(&cursor, RType::Cname, now) {
                Ok((set, drift, rank, _)) if rank > Rank::BAD => {
                    materialize(&set, drift).to_records().into_iter().next()
                }
                _ => None,
            };
            let Some(rec) = alias else {
                return State::Produce;
            };
            let Some(target) = rec.name_target() else {
                return State::Produce;
            };
            let sclass = req.plan.query(id).sclass;
            if req.plan.satisfies(Some(id), &target, sclass, stype) {
                // Following it would cycle; leave it to the network path
                // to fail cleanly.
                return State::Produce;
            }
            trace!(name = %cursor, target = %target, "cached alias followed");
            let qry = req.plan.query_mut(id);
            qry.result.push(rec);
            qry.sname = target.to_lowercase();
            qry.flags.await_cut = true;
            cursor = qry.sname.clone();
            hops += 1;
        }
    }

    /// Writes back a response's sections.
    fn stash(&self, ctx: &Context, req: &mut Request, pkt: &Message) {
        let Some(id) = req.plan.current() else {
            return;
        };
        let Ok(mut txn) = ctx.cache.begin(true) else {
            return;
        };
        let now = ctx.now();
        let (cut_name, dnssec_want) = {
            let qry = req.plan.query(id);
            (qry.zone_cut.name.clone(), qry.flags.dnssec_want)
        };

        let aa = pkt.header.aa();
        let sections = [
            (pkt.answers(), if aa { Rank::AUTH } else { Rank::NONAUTH }),
            (pkt.authorities(), Rank::NONAUTH),
            (pkt.additionals(), Rank::NONAUTH),
        ];
        for (records, base_rank) in sections {
            for (owner, rtype, _rclass) in section_rrsets(records) {
                // Off-bailiwick data cannot be trusted from this server.
                if !owner.is_subdomain_of(&cut_name) {
                    trace!(%owner, cut = %cut_name, "off-bailiwick rrset not cached");
                    continue;
                }
                let rank = if dnssec_want {
                    base_rank | Rank::INSECURE
                } else {
                    base_rank
                };
                let set = RrSet::gather(records.iter(), &owner, rtype);
                let _ = txn.insert_rr(&set, rank, 0, now);
            }
        }
        let _ = txn.commit();
    }
}

impl Layer for CacheLayer {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn produce(&mut self, ctx: &Context, req: &mut Request, _pkt: &mut Message, state: State) -> State {
        match state {
            State::Produce => self.lookup(ctx, req),
            other => other,
        }
    }

    fn consume(
        &mut self,
        ctx: &Context,
        req: &mut Request,
        _source: Option<SocketAddr>,
        pkt: &Message,
        state: State,
    ) -> State {
        self.stash(ctx, req, pkt);
        state
    }
}
