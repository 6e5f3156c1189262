//! The iterator layer: query minting and response interpretation.
//!
//! Produce mints the next iterative sub-query for the current plan entry,
//! re-anchoring its zone cut from cache (or the root hints) when needed.
//! Consume classifies the response: answer, alias chain, downward
//! referral, NXDOMAIN/NODATA, truncation, or a server failure that costs
//! the elected nameserver its place in the cut.

use crate::layer::{Layer, State};
use crate::resolve::{Context, Request};
use crate::plan::QueryId;
use crate::zonecut::ZoneCut;
use burrow_proto::{Edns, Message, Name, Question, RType, Rcode, Record};
use std::net::SocketAddr;
use tracing::{debug, trace};

/// See the module docs.
#[derive(Debug, Default)]
pub struct IterateLayer;

impl Layer for IterateLayer {
    fn name(&self) -> &'static str {
        "iterate"
    }

    fn produce(&mut self, ctx: &Context, req: &mut Request, pkt: &mut Message, state: State) -> State {
        if state != State::Produce {
            return state;
        }
        let Some(id) = req.plan.current() else {
            return State::Done;
        };

        self.anchor_cut(ctx, req, id);

        let qry = req.plan.query_mut(id);
        if qry.secret == 0 {
            qry.secret = burrow_proto::random_secret();
        }
        qry.msgid = burrow_proto::random_msgid();

        pkt.header = Default::default();
        pkt.header.id = qry.msgid;
        pkt.set_question(Question::new(
            qry.sname.with_0x20(qry.secret),
            qry.stype,
            qry.sclass,
        ));
        let mut edns = Edns::with_payload(
            ctx.opts.edns_payload.max(burrow_proto::DEFAULT_EDNS_PAYLOAD),
        );
        edns.do_bit = qry.flags.dnssec_want;
        pkt.set_edns(edns);

        trace!(query = %qry.sname, qtype = %qry.stype, cut = %qry.zone_cut.name, "sub-query minted");
        State::Consume
    }

    fn consume(
        &mut self,
        _ctx: &Context,
        req: &mut Request,
        _source: Option<SocketAddr>,
        pkt: &Message,
        state: State,
    ) -> State {
        if matches!(state, State::Noop | State::Fail) {
            return state;
        }
        let Some(id) = req.plan.current() else {
            return state;
        };

        // A truncated UDP answer is retried over TCP against the same
        // server before anything else is concluded from it.
        if pkt.is_truncated() && !req.plan.query(id).flags.tcp {
            debug!("response truncated, retrying over TCP");
            req.plan.query_mut(id).flags.tcp = true;
            return State::Produce;
        }

        match pkt.header.rcode() {
            Rcode::NoError | Rcode::NxDomain => {}
            rcode => {
                debug!(%rcode, "server-side failure, invalidating nameserver");
                invalidate_ns(req, id);
                return State::Produce;
            }
        }

        if !pkt.answers().is_empty() {
            return self.process_answer(req, id, pkt);
        }
        if pkt.is_nxdomain() {
            return finalize_negative(req, id, pkt, true);
        }
        if pkt.is_referral() {
            return self.process_referral(req, id, pkt);
        }
        if pkt.is_nodata() {
            return finalize_negative(req, id, pkt, false);
        }

        // Authoritative but neither answer nor delegation: lame server.
        invalidate_ns(req, id);
        State::Produce
    }
}

impl IterateLayer {
    /// Anchors the query's cut from cache, falling back to root hints.
    fn anchor_cut(&self, ctx: &Context, req: &mut Request, id: QueryId) {
        let (needed, sname) = {
            let qry = req.plan.query(id);
            (
                qry.zone_cut.is_empty() || qry.flags.await_cut,
                qry.sname.clone(),
            )
        };
        if !needed {
            return;
        }
        let now = ctx.now();
        let cut = ctx
            .cache
            .begin(false)
            .ok()
            .and_then(|txn| ZoneCut::find_cached(&txn, &sname, now))
            .unwrap_or_else(|| ctx.hints.to_cut());
        trace!(query = %sname, cut = %cut.name, "zone cut anchored");
        let qry = req.plan.query_mut(id);
        qry.zone_cut = cut;
        qry.flags.await_cut = false;
        qry.ns = None;
    }

    /// Interprets a response with a non-empty answer section.
    fn process_answer(&self, req: &mut Request, id: QueryId, pkt: &Message) -> State {
        let (sname, stype, sclass) = {
            let qry = req.plan.query(id);
            (qry.sname.clone(), qry.stype, qry.sclass)
        };
        let answers = pkt.answers();

        let mut chain: Vec<Record> = Vec::new();
        let mut cursor = sname;
        // The chain walk is bounded by the packet's own record count.
        for _ in 0..=answers.len() {
            let direct: Vec<Record> = answers
                .iter()
                .filter(|r| (r.rtype == stype || stype == RType::Any) && r.owner == cursor)
                .cloned()
                .collect();
            if !direct.is_empty() {
                let qry = req.plan.query_mut(id);
                qry.result.extend(chain);
                qry.result.extend(direct);
                qry.flags.resolved = true;
                return State::Produce;
            }
            let alias = answers
                .iter()
                .find(|r| r.rtype == RType::Cname && r.owner == cursor)
                .and_then(|r| r.name_target().map(|t| (r.clone(), t)));
            match alias {
                Some((rec, target)) if stype != RType::Cname => {
                    chain.push(rec);
                    cursor = target;
                }
                _ => break,
            }
        }

        if pkt.is_nxdomain() {
            req.plan.query_mut(id).result.extend(chain);
            return finalize_negative(req, id, pkt, true);
        }

        if chain.is_empty() {
            // The answer section held nothing for us: a lame or bogus
            // reply. Try the next candidate.
            invalidate_ns(req, id);
            return State::Produce;
        }

        // The chain ran off the packet: restart at its tail.
        if req.plan.satisfies(Some(id), &cursor, sclass, stype) {
            debug!(target = %cursor, "alias chain loops, failing query");
            req.plan.query_mut(id).flags.failed = true;
            return State::Fail;
        }
        trace!(target = %cursor, "alias chain restart");
        let qry = req.plan.query_mut(id);
        qry.result.extend(chain);
        qry.sname = cursor.to_lowercase();
        qry.flags.await_cut = true;
        qry.ns = None;
        State::Produce
    }

    /// Re-anchors the cut one delegation deeper from a referral.
    fn process_referral(&self, req: &mut Request, id: QueryId, pkt: &Message) -> State {
        let (sname, cut_name) = {
            let qry = req.plan.query(id);
            (qry.sname.clone(), qry.zone_cut.name.clone())
        };

        // Deepest NS owner that actually encloses the sought name.
        let mut owner: Option<Name> = None;
        for rec in pkt.authorities() {
            if rec.rtype == RType::Ns && sname.is_subdomain_of(&rec.owner) {
                let deeper = owner
                    .as_ref()
                    .map(|o| rec.owner.label_count() > o.label_count())
                    .unwrap_or(true);
                if deeper {
                    owner = Some(rec.owner.clone());
                }
            }
        }
        let Some(owner) = owner else {
            invalidate_ns(req, id);
            return State::Produce;
        };

        // The referral must descend below the current cut, or the server
        // is sending us in circles.
        if !owner.is_subdomain_of(&cut_name) || owner == cut_name {
            debug!(%owner, cut = %cut_name, "referral does not descend, invalidating");
            invalidate_ns(req, id);
            return State::Produce;
        }

        let mut cut = ZoneCut::new(owner.clone());
        for rec in pkt.authorities() {
            if rec.rtype == RType::Ns && rec.owner == owner {
                if let Some(target) = rec.name_target() {
                    cut.add(target, None);
                }
            }
        }
        for rec in pkt.additionals() {
            if let Some(ip) = rec.ip_addr() {
                // Glue is believed only for listed servers and only when
                // it lies within the responding server's own bailiwick;
                // anything else must be resolved independently.
                if cut.addrs_of(&rec.owner).is_some() && rec.owner.is_subdomain_of(&cut_name) {
                    cut.add(rec.owner.clone(), Some(ip));
                }
            }
        }

        trace!(cut = %owner, servers = cut.len(), "following referral");
        let qry = req.plan.query_mut(id);
        qry.zone_cut = cut;
        qry.ns = None;
        qry.flags.tcp = false;
        State::Produce
    }
}

/// Drops the elected nameserver from the cut and resets the transport.
fn invalidate_ns(req: &mut Request, id: QueryId) {
    let qry = req.plan.query_mut(id);
    if let Some(ns) = qry.ns.take() {
        qry.zone_cut.remove(&ns.name);
    }
    qry.flags.tcp = false;
}

/// Terminates the current query on NXDOMAIN or NODATA, carrying the SOA
/// (and for the root query the NXDOMAIN rcode) into the final answer.
fn finalize_negative(req: &mut Request, id: QueryId, pkt: &Message, nxdomain: bool) -> State {
    let soa: Vec<Record> = pkt
        .authorities()
        .iter()
        .filter(|r| r.rtype == RType::Soa)
        .cloned()
        .collect();
    let is_root = req.plan.query(id).parent.is_none();
    {
        let qry = req.plan.query_mut(id);
        qry.authority.extend(soa);
        qry.flags.resolved = true;
    }
    if nxdomain && is_root {
        req.answer.header.set_rcode(Rcode::NxDomain);
    }
    State::Produce
}
