//! The iterator core: drives a resolution plan to completion.
//!
//! A [`Request`] owns the plan and the answer under construction. The
//! worker calls [`Request::consume`] with upstream packets (or with
//! nothing, to signal an I/O failure) and then loops on
//! [`Request::produce`] until it either gets a packet to transmit or a
//! terminal state. The per-task iteration ceiling is enforced by the
//! worker; the produce loop here only guards against livelock within one
//! call.

use crate::error::Result;
use crate::layer::{Pipeline, State};
use crate::layers::{CacheLayer, IterateLayer, ValidateLayer};
use crate::nsrep::{elect, Election, Reputation};
use crate::plan::{ElectedNs, Plan, QueryFlags, QueryId};
use crate::hints::RootHints;
use burrow_cache::Cache;
use burrow_dnssec::TaStore;
use burrow_proto::{Message, RClass, RType, Rcode, RrSet};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Iteration ceiling per client request.
pub const ITER_LIMIT: u16 = 50;

/// Transport chosen for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    /// UDP datagram with retransmission.
    Dgram,
    /// TCP stream with a two-byte length prefix.
    Stream,
}

/// Tunables of the iterator core.
#[derive(Debug, Clone)]
pub struct Options {
    /// Iteration ceiling per request.
    pub iter_limit: u16,
    /// EDNS payload advertised on sub-queries.
    pub edns_payload: u16,
    /// Port upstream servers are queried on. 53 everywhere except test
    /// rigs pointing at mock servers on unprivileged ports.
    pub upstream_port: u16,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            iter_limit: ITER_LIMIT,
            edns_payload: burrow_proto::DEFAULT_EDNS_PAYLOAD,
            upstream_port: burrow_proto::DNS_PORT,
        }
    }
}

/// Shared resolver environment: cache, trust anchors, reputation and
/// hints. One context serves every concurrent request; it is handed into
/// each entry point rather than living in ambient state.
pub struct Context {
    /// The record cache.
    pub cache: Cache,
    /// Trust anchor store consumed by the validator layer.
    pub ta: TaStore,
    /// Nameserver RTT reputation.
    pub reputation: Reputation,
    /// Root servers used when no cached cut is deeper.
    pub hints: RootHints,
    /// Iterator tunables.
    pub opts: Options,
}

impl Context {
    /// A context with builtin hints and an in-memory cache.
    pub fn new() -> Self {
        Self {
            cache: Cache::in_memory(),
            ta: TaStore::new(),
            reputation: Reputation::new(),
            hints: RootHints::builtin(),
            opts: Options::default(),
        }
    }

    /// Wall-clock seconds used for cache freshness decisions.
    pub fn now(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// What a produce pass handed back.
#[derive(Debug)]
pub enum Produced {
    /// The plan is drained; the answer is complete.
    Done,
    /// The request failed; the answer carries SERVFAIL after finish.
    Fail,
    /// Transmit `packet` to one of `addrs` over `socktype`.
    Io {
        /// Candidate addresses, best first.
        addrs: Vec<SocketAddr>,
        /// Chosen transport.
        socktype: SockType,
        /// The minted sub-query.
        packet: Message,
    },
}

/// One in-flight client request.
pub struct Request {
    /// The resolution plan.
    pub plan: Plan,
    /// The answer under construction.
    pub answer: Message,
    /// Request-level default flags, copied onto pushed queries.
    pub flags: QueryFlags,
    pipeline: Pipeline,
    failed: bool,
}

impl Request {
    /// Starts a request from a parsed client query.
    ///
    /// Builds the answer skeleton (question echoed, TSIG preserved, EDNS
    /// negotiated) and pushes the root query onto the plan.
    pub fn begin(ctx: &Context, query: &Message, flags: QueryFlags) -> Result<Self> {
        let question = query.question().cloned().ok_or(burrow_proto::Error::Malformed {
            offset: 0,
            reason: "query without a question",
        })?;

        let mut answer = Message::response_to(query);
        answer.set_tsig(query.tsig().cloned());
        if query.edns().is_some() {
            answer.set_edns(burrow_proto::Edns::with_payload(ctx.opts.edns_payload));
        }

        let mut req = Self {
            plan: Plan::new(),
            answer,
            flags,
            pipeline: default_pipeline(),
            failed: false,
        };

        let id = req
            .plan
            .push(None, &question.qname, question.qclass, question.qtype)?;
        apply_request_flags(&mut req.plan, id, flags);

        let mut pipeline = std::mem::take(&mut req.pipeline);
        pipeline.begin(ctx, &mut req);
        req.pipeline = pipeline;
        Ok(req)
    }

    /// Feeds an upstream packet (or an I/O failure when `pkt` is `None`)
    /// into the state machine.
    ///
    /// Returns `Noop` when the packet was ignored (spoof or stray),
    /// otherwise the state to continue from — normally `Produce`.
    pub fn consume(&mut self, ctx: &Context, source: Option<SocketAddr>, pkt: Option<&Message>) -> State {
        let Some(id) = self.plan.current() else {
            return State::Done;
        };

        let Some(pkt) = pkt else {
            // I/O failed or timed out: drop the elected nameserver from
            // the cut and retry with the next candidate over UDP.
            self.invalidate_current_ns(id);
            return State::Produce;
        };

        if !self.sanity_check(id, pkt) {
            trace!("ignoring packet that failed sanity checks");
            return State::Noop;
        }

        let mut pipeline = std::mem::take(&mut self.pipeline);
        let state = pipeline.consume(ctx, self, source, pkt);
        self.pipeline = pipeline;

        if state == State::Noop {
            return state;
        }
        let qry = self.plan.query(id);
        if qry.flags.resolved || qry.flags.failed {
            self.pop_query(id);
        }
        state
    }

    /// Drives the plan until a packet is ready for I/O or the request
    /// terminates.
    pub fn produce(&mut self, ctx: &Context) -> Produced {
        // Livelock guard for a single call; the worker additionally
        // bounds produce passes per request.
        let mut guard = 0u32;
        loop {
            guard += 1;
            if guard > 4 * u32::from(ctx.opts.iter_limit) {
                debug!("produce loop guard tripped");
                return Produced::Fail;
            }

            let Some(id) = self.plan.current() else {
                return if self.failed { Produced::Fail } else { Produced::Done };
            };

            {
                let qry = self.plan.query(id);
                if qry.flags.resolved || qry.flags.failed {
                    self.pop_query(id);
                    continue;
                }
            }

            let mut pkt = Message::default();
            let mut pipeline = std::mem::take(&mut self.pipeline);
            let state = pipeline.produce(ctx, self, &mut pkt);
            self.pipeline = pipeline;

            match state {
                State::Done | State::Produce => {
                    // A layer satisfied (or advanced) the query without I/O.
                    let qry = self.plan.query(id);
                    if qry.flags.resolved || qry.flags.failed {
                        self.pop_query(id);
                    }
                    continue;
                }
                State::Fail => {
                    self.plan.query_mut(id).flags.failed = true;
                    self.pop_query(id);
                    continue;
                }
                State::Consume => {}
                State::Noop => continue,
            }

            // A packet was minted; pick who to send it to.
            match elect(
                &self.plan.query(id).zone_cut,
                &ctx.reputation,
                ctx.opts.upstream_port,
            ) {
                Election::Ready { name, addrs, score } => {
                    let socktype = if self.plan.query(id).flags.tcp {
                        SockType::Stream
                    } else {
                        SockType::Dgram
                    };
                    trace!(ns = %name, score, ?socktype, "nameserver elected");
                    self.plan.query_mut(id).ns = Some(ElectedNs { name, addrs: addrs.clone(), score });
                    return Produced::Io { addrs, socktype, packet: pkt };
                }
                Election::NeedAddress { name } => {
                    self.plant_address_queries(id, &name);
                    continue;
                }
                Election::Dead => {
                    debug!(query = %self.plan.query(id).sname, "no usable nameserver left");
                    self.plan.query_mut(id).flags.failed = true;
                    self.pop_query(id);
                    continue;
                }
            }
        }
    }

    /// Terminates the request: flag policy, RCODE policy, layer finish.
    pub fn finish(&mut self, ctx: &Context, state: State) {
        let failed = self.failed || state == State::Fail;
        let mut pipeline = std::mem::take(&mut self.pipeline);
        pipeline.finish(ctx, self, if failed { State::Fail } else { State::Done });
        self.pipeline = pipeline;

        self.answer.header.set_qr(true);
        self.answer.header.set_aa(false);
        self.answer.header.set_ra(true);
        if failed && self.answer.header.rcode() == Rcode::NoError {
            self.answer.header.set_rcode(Rcode::ServFail);
        }
    }

    /// The completed answer.
    pub fn answer(&self) -> &Message {
        &self.answer
    }

    /// True once a fatal failure was recorded.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Marks the whole request failed (used by the worker on ELIMIT).
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Switches the current query to TCP without consuming an iteration,
    /// the fallback for network errors distinct from protocol errors.
    pub fn enable_tcp(&mut self) {
        if let Some(id) = self.plan.current() {
            self.plan.query_mut(id).flags.tcp = true;
        }
    }

    /// True when the current iteration runs over TCP.
    pub fn current_is_tcp(&self) -> bool {
        self.plan
            .current()
            .map(|id| self.plan.query(id).flags.tcp)
            .unwrap_or(false)
    }

    /// Message id and 0x20 secret of the in-flight sub-query.
    pub fn subrequest_identity(&self) -> Option<(u16, u128)> {
        let id = self.plan.current()?;
        let qry = self.plan.query(id);
        Some((qry.msgid, qry.secret))
    }

    /// Primes the current query with a coalescing leader's identity so
    /// its response packet passes the sanity checks. A zero secret skips
    /// the case check entirely.
    pub fn prime_subrequest(&mut self, msgid: u16, secret: u128) {
        if let Some(id) = self.plan.current() {
            let qry = self.plan.query_mut(id);
            qry.msgid = msgid;
            qry.secret = secret;
        }
    }

    /// Addresses the current iteration probes, for RTT penalties.
    pub fn current_addrs(&self) -> Vec<SocketAddr> {
        self.plan
            .current()
            .and_then(|id| self.plan.query(id).ns.as_ref())
            .map(|ns| ns.addrs.clone())
            .unwrap_or_default()
    }

    fn sanity_check(&self, id: QueryId, pkt: &Message) -> bool {
        let qry = self.plan.query(id);
        if !pkt.is_response() {
            return false;
        }
        if pkt.header.id != qry.msgid {
            return false;
        }
        match pkt.question() {
            Some(q) => {
                q.qtype == qry.stype
                    && q.qclass == qry.sclass
                    && qry.sname.check_0x20(&q.qname, qry.secret)
            }
            // Some servers echo no question on failures; accept only
            // when nothing else distinguishes the exchange.
            None => pkt.header.rcode() != Rcode::NoError,
        }
    }

    fn invalidate_current_ns(&mut self, id: QueryId) {
        let qry = self.plan.query_mut(id);
        if let Some(ns) = qry.ns.take() {
            debug!(ns = %ns.name, "invalidating nameserver");
            qry.zone_cut.remove(&ns.name);
        }
        qry.flags.tcp = false;
    }

    /// Plants A and AAAA sub-queries for an addressless nameserver.
    /// Returns false when the dependency would loop and the query was
    /// failed instead.
    fn plant_address_queries(&mut self, id: QueryId, ns: &burrow_proto::Name) -> bool {
        let (await_addr, sclass) = {
            let qry = self.plan.query(id);
            (qry.flags.await_addr, qry.sclass)
        };

        // A second address round for the same query means the previous
        // children came back empty: drop the lame server and re-elect.
        if await_addr {
            let qry = self.plan.query_mut(id);
            qry.zone_cut.remove(ns);
            qry.flags.await_addr = false;
            return false;
        }

        if self.plan.satisfies(Some(id), ns, sclass, RType::A)
            || self.plan.satisfies(Some(id), ns, sclass, RType::Aaaa)
        {
            debug!(ns = %ns, "nameserver address dependency loop");
            self.plan.query_mut(id).flags.failed = true;
            self.pop_query(id);
            return false;
        }

        let flags = self.flags;
        if let Ok(child) = self.plan.push(Some(id), ns, sclass, RType::Aaaa) {
            apply_request_flags(&mut self.plan, child, flags);
        }
        if let Ok(child) = self.plan.push(Some(id), ns, sclass, RType::A) {
            apply_request_flags(&mut self.plan, child, flags);
        }
        self.plan.query_mut(id).flags.await_addr = true;
        true
    }

    /// Moves a terminal query to the resolved list and propagates its
    /// outcome to the parent (addresses into the cut, keys onto the cut,
    /// answer sections onto the client answer for the root query).
    fn pop_query(&mut self, id: QueryId) {
        self.plan.pop(id);

        let (parent, stype, sname, failed) = {
            let q = self.plan.query(id);
            (q.parent, q.stype, q.sname.clone(), q.flags.failed)
        };

        match parent {
            Some(pid) => {
                if stype.is_address() {
                    let result = std::mem::take(&mut self.plan.query_mut(id).result);
                    let parent_q = self.plan.query_mut(pid);
                    let added = parent_q.zone_cut.absorb_addresses(&sname, &result);
                    if added > 0 {
                        parent_q.flags.await_addr = false;
                    }
                } else if stype == RType::Dnskey {
                    let result = std::mem::take(&mut self.plan.query_mut(id).result);
                    let keys = RrSet::gather(result.iter(), &sname, RType::Dnskey);
                    // Stored even when empty: the fetch happened.
                    self.plan.query_mut(pid).zone_cut.keys = Some(keys);
                }
            }
            None => {
                if failed {
                    self.failed = true;
                } else {
                    let result = std::mem::take(&mut self.plan.query_mut(id).result);
                    let authority = std::mem::take(&mut self.plan.query_mut(id).authority);
                    for rec in result {
                        self.answer.add_answer(rec);
                    }
                    for rec in authority {
                        self.answer.add_authority(rec);
                    }
                }
            }
        }
    }
}

/// The conventional pipeline: cache first, then the iterator, then the
/// validator.
fn default_pipeline() -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.push(Box::new(CacheLayer::default()));
    pipeline.push(Box::new(IterateLayer::default()));
    pipeline.push(Box::new(ValidateLayer::default()));
    pipeline
}

fn apply_request_flags(plan: &mut Plan, id: QueryId, flags: QueryFlags) {
    let qry = plan.query_mut(id);
    qry.flags.no_cache = flags.no_cache;
    qry.flags.no_throttle = flags.no_throttle;
}

/// Convenience used by tests and the control surface: classifies the
/// sought class/type pair as supported.
pub fn supported_question(qclass: RClass, qtype: RType) -> bool {
    qclass == RClass::In && !matches!(qtype, RType::Opt | RType::Tsig)
}
