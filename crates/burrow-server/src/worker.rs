//! The worker: task creation, coalescing, and shared bookkeeping.

use crate::task;
use crate::{BUF_FREELIST_SIZE, MAX_PENDING, RETRY_MS, RTT_MAX_MS, THROTTLE_THRESHOLD};
use burrow_proto::{Message, Name, Question, RClass, RType};
use burrow_resolver::resolve::{Context, Request};
use burrow_resolver::QueryFlags;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace};

/// Counters the worker keeps while serving.
#[derive(Debug, Default)]
pub struct WorkerStats {
    /// Client queries accepted.
    pub queries: AtomicU64,
    /// Tasks currently alive.
    pub concurrent: AtomicU64,
    /// Outbound UDP sub-queries.
    pub udp: AtomicU64,
    /// Outbound TCP sub-queries.
    pub tcp: AtomicU64,
    /// Outbound packets to IPv4 servers.
    pub ipv4: AtomicU64,
    /// Outbound packets to IPv6 servers.
    pub ipv6: AtomicU64,
    /// Iterations that hit the I/O deadline.
    pub timeout: AtomicU64,
    /// Inbound packets dropped before task creation.
    pub dropped: AtomicU64,
}

impl WorkerStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Worker tunables; the defaults match the constants in the crate root.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Datagram retransmission period in milliseconds.
    pub retry_ms: u64,
    /// Per-iteration I/O deadline in milliseconds.
    pub rtt_max_ms: u64,
    /// In-flight datagram bound per task.
    pub max_pending: usize,
    /// Concurrency level above which tasks lose `NO_THROTTLE`.
    pub throttle_threshold: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_ms: RETRY_MS,
            rtt_max_ms: RTT_MAX_MS,
            max_pending: MAX_PENDING,
            throttle_threshold: THROTTLE_THRESHOLD,
        }
    }
}

/// Where a client query came from, bounding the answer size.
#[derive(Debug, Clone, Copy)]
pub enum Origin {
    /// A UDP datagram from `peer`.
    Udp {
        /// Client address.
        peer: SocketAddr,
    },
    /// A TCP stream from `peer`.
    Tcp {
        /// Client address.
        peer: SocketAddr,
    },
    /// An internal caller (control surface, tests).
    Internal,
}

impl Origin {
    /// Ceiling for the serialized answer.
    fn answer_max(&self, query: &Message) -> usize {
        match self {
            Origin::Udp { .. } => query
                .edns()
                .map(|e| usize::from(e.payload).max(burrow_proto::MIN_UDP_PAYLOAD))
                .unwrap_or(burrow_proto::MIN_UDP_PAYLOAD),
            Origin::Tcp { .. } | Origin::Internal => burrow_proto::MAX_MESSAGE_LEN,
        }
    }
}

/// Identity of an outstanding sub-query fan-out: the lowercased question
/// triple. Two tasks asking the same thing at the same time coalesce on
/// this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubreqKey {
    qname: Vec<u8>,
    qtype: u16,
    qclass: u16,
}

impl SubreqKey {
    pub(crate) fn of(question: &Question) -> Self {
        Self {
            qname: question.qname.to_lowercase().as_wire().to_vec(),
            qtype: question.qtype.to_u16(),
            qclass: question.qclass.to_u16(),
        }
    }
}

/// What a finalized leader hands to each suspended follower.
#[derive(Debug)]
pub(crate) struct FollowerResume {
    pub source: Option<SocketAddr>,
    pub packet: Option<Message>,
    pub msgid: u16,
    pub secret: u128,
}

/// The entry a leader publishes while its fan-out is outstanding.
#[derive(Default)]
pub(crate) struct Inflight {
    pub waiters: Mutex<Vec<oneshot::Sender<FollowerResume>>>,
}

/// Shared worker context: resolver environment, coalescing table,
/// buffer freelist and statistics.
pub struct Worker {
    /// The resolver environment tasks iterate against.
    pub ctx: Context,
    /// Worker tunables.
    pub config: WorkerConfig,
    stats: WorkerStats,
    pub(crate) outstanding: DashMap<SubreqKey, Arc<Inflight>>,
    bufs: Mutex<Vec<BytesMut>>,
}

impl Worker {
    /// Creates a worker over a resolver context.
    pub fn new(ctx: Context, config: WorkerConfig) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            config,
            stats: WorkerStats::default(),
            outstanding: DashMap::new(),
            bufs: Mutex::new(Vec::new()),
        })
    }

    /// Worker counters.
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Borrows a recycled packet buffer, or a fresh one.
    pub(crate) fn take_buf(&self) -> BytesMut {
        self.bufs
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(4096))
    }

    /// Returns a packet buffer to the bounded freelist.
    pub(crate) fn put_buf(&self, mut buf: BytesMut) {
        let mut bufs = self.bufs.lock();
        if bufs.len() < BUF_FREELIST_SIZE {
            buf.clear();
            bufs.push(buf);
        }
    }

    /// Handles one wire-format client query end to end.
    ///
    /// Returns the serialized answer, or `None` when the packet was
    /// dropped (malformed, a stray response, or missing a question) —
    /// the client sees no reply in that case.
    pub async fn handle_query(self: &Arc<Self>, wire: &[u8], origin: Origin) -> Option<Bytes> {
        let query = match Message::parse(wire) {
            Ok(msg) => msg,
            Err(err) => {
                trace!(%err, "dropping unparseable packet");
                WorkerStats::bump(&self.stats.dropped);
                return None;
            }
        };
        if query.is_response() || query.question().is_none() {
            trace!("dropping response-flagged or question-less packet");
            WorkerStats::bump(&self.stats.dropped);
            return None;
        }

        let answer_max = origin.answer_max(&query);
        let answer = self.run_request(&query).await;
        match answer.to_wire(answer_max) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!(%err, "failed to serialize answer");
                WorkerStats::bump(&self.stats.dropped);
                None
            }
        }
    }

    /// Resolves a question for an internal caller.
    pub async fn resolve(
        self: &Arc<Self>,
        name: Name,
        rtype: RType,
        rclass: RClass,
        flags: QueryFlags,
    ) -> crate::Result<Message> {
        let mut query = Message::query(Question::new(name, rtype, rclass));
        query.header.id = burrow_proto::random_msgid();
        Ok(self.run_flagged(&query, flags).await)
    }

    async fn run_request(self: &Arc<Self>, query: &Message) -> Message {
        self.run_flagged(query, QueryFlags::default()).await
    }

    async fn run_flagged(self: &Arc<Self>, query: &Message, mut flags: QueryFlags) -> Message {
        WorkerStats::bump(&self.stats.queries);
        let concurrent = self.stats.concurrent.fetch_add(1, Ordering::Relaxed) + 1;
        // Under pressure, tasks keep the default (throttled) retry
        // budget; below it they may retry freely.
        if concurrent < self.config.throttle_threshold {
            flags.no_throttle = true;
        }

        let answer = match Request::begin(&self.ctx, query, flags) {
            Ok(mut req) => {
                let state = task::drive(self, &mut req).await;
                req.finish(&self.ctx, state);
                req.answer.clone()
            }
            Err(err) => {
                debug!(%err, "request setup failed");
                let mut answer = Message::response_to(query);
                answer.header.set_qr(true);
                answer.header.set_ra(true);
                answer.header.set_rcode(burrow_proto::Rcode::ServFail);
                answer
            }
        };

        self.stats.concurrent.fetch_sub(1, Ordering::Relaxed);
        answer
    }
}
