//! Per-request task driving: the consume/produce step loop, datagram
//! fan-out with retransmission, and stream exchanges.
//!
//! A task is the worker-side life of one client request. Each pass
//! produces a sub-query, transmits it (or coalesces onto an identical
//! in-flight fan-out), feeds whatever came back into the iterator core,
//! and repeats until the core reports a terminal state or the iteration
//! ceiling is hit.

use crate::worker::{FollowerResume, Inflight, SubreqKey, Worker, WorkerStats};
use burrow_proto::Message;
use burrow_resolver::resolve::{Produced, Request, SockType};
use burrow_resolver::State;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, trace};

/// What one transmit attempt yielded.
enum Outcome {
    /// A response arrived from `source`.
    Reply(SocketAddr, Message),
    /// The I/O deadline passed with nothing usable.
    Timeout,
    /// The network rejected the exchange (send/connect failure).
    NetError,
}

/// Drives a request to a terminal state. Returns `Done` or `Fail`.
pub(crate) async fn drive(worker: &Arc<Worker>, req: &mut Request) -> State {
    let ctx = &worker.ctx;
    let mut iter_count: u16 = 0;
    let mut incoming: Option<(Option<SocketAddr>, Option<Message>)> = None;

    loop {
        if let Some((source, packet)) = incoming.take() {
            // A Noop verdict means the packet was a stray; the next
            // produce pass simply re-iterates.
            let _ = req.consume(ctx, source, packet.as_ref());
        }

        iter_count += 1;
        if iter_count > ctx.opts.iter_limit {
            debug!(limit = ctx.opts.iter_limit, "iteration limit reached");
            req.mark_failed();
            return State::Fail;
        }

        let (addrs, socktype, packet) = match req.produce(ctx) {
            Produced::Done => return State::Done,
            Produced::Fail => return State::Fail,
            Produced::Io { addrs, socktype, packet } => (addrs, socktype, packet),
        };
        if addrs.is_empty() {
            incoming = Some((None, None));
            continue;
        }

        match socktype {
            SockType::Dgram => {
                let Some(question) = packet.question().cloned() else {
                    incoming = Some((None, None));
                    continue;
                };
                let key = SubreqKey::of(&question);

                // Coalesce onto an existing leader for this fingerprint.
                if let Some(entry) = worker.outstanding.get(&key) {
                    trace!("identical sub-query in flight, suspending as follower");
                    let (tx, rx) = oneshot::channel();
                    entry.waiters.lock().push(tx);
                    drop(entry);
                    match rx.await {
                        Ok(resume) => {
                            req.prime_subrequest(resume.msgid, resume.secret);
                            incoming = Some((resume.source, resume.packet));
                        }
                        Err(_) => incoming = Some((None, None)),
                    }
                    continue;
                }

                // Publish leadership before the first datagram leaves.
                let inflight = Arc::new(Inflight::default());
                worker.outstanding.insert(key.clone(), inflight.clone());

                let (msgid, secret) = req.subrequest_identity().unwrap_or((packet.header.id, 0));
                let outcome = transmit_dgram(worker, &addrs, &packet, msgid).await;

                worker.outstanding.remove(&key);
                notify_followers(&inflight, &outcome, msgid, secret);

                match outcome {
                    Outcome::Reply(source, msg) => incoming = Some((Some(source), Some(msg))),
                    Outcome::Timeout => incoming = Some((None, None)),
                    Outcome::NetError => {
                        if !req.current_is_tcp() {
                            // Unreachable over UDP: fall back to TCP
                            // without spending an iteration.
                            debug!("network error, retrying over TCP");
                            req.enable_tcp();
                            iter_count = iter_count.saturating_sub(1);
                            incoming = None;
                        } else {
                            incoming = Some((None, None));
                        }
                    }
                }
            }
            SockType::Stream => {
                let outcome = transmit_stream(worker, addrs[0], &packet).await;
                match outcome {
                    Outcome::Reply(source, msg) => incoming = Some((Some(source), Some(msg))),
                    Outcome::Timeout | Outcome::NetError => incoming = Some((None, None)),
                }
            }
        }
    }
}

/// Hands the leader's result to every suspended follower exactly once.
/// The first follower inherits the leader's 0x20 secret; later ones get
/// a zero secret (case check skipped) and mint fresh secrets for their
/// own follow-up sub-queries.
fn notify_followers(inflight: &Inflight, outcome: &Outcome, msgid: u16, secret: u128) {
    let (source, packet) = match outcome {
        Outcome::Reply(source, msg) => (Some(*source), Some(msg.clone())),
        _ => (None, None),
    };
    let mut secret = secret;
    for tx in inflight.waiters.lock().drain(..) {
        let _ = tx.send(FollowerResume {
            source,
            packet: packet.clone(),
            msgid,
            secret,
        });
        secret = 0;
    }
}

enum ProbeEvent {
    Received(SocketAddr, Vec<u8>, Duration),
    SendFailed(SocketAddr),
}

/// Fans a datagram out over the candidate addresses.
///
/// The first address is probed immediately, then every `RETRY_MS` the
/// next one in round-robin order, until `MAX_PENDING` probes are in
/// flight — after which retransmission stops rather than fails. The
/// first response echoing our message id wins. On deadline every probed
/// address takes an RTT timeout penalty.
async fn transmit_dgram(
    worker: &Arc<Worker>,
    addrs: &[SocketAddr],
    packet: &Message,
    msgid: u16,
) -> Outcome {
    let wire = match packet.to_wire(burrow_proto::MAX_MESSAGE_LEN) {
        Ok(wire) => wire,
        Err(_) => return Outcome::NetError,
    };

    let (tx, mut rx) = mpsc::channel::<ProbeEvent>(worker.config.max_pending.max(1));
    let mut probes: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut probed: Vec<SocketAddr> = Vec::new();
    let mut turn = 0usize;
    let mut failures = 0usize;

    let mut retry = interval(Duration::from_millis(worker.config.retry_ms));
    let deadline = sleep(Duration::from_millis(worker.config.rtt_max_ms));
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            () = &mut deadline => {
                WorkerStats::bump(&worker.stats().timeout);
                for addr in &probed {
                    worker.ctx.reputation.penalize_timeout(addr.ip());
                }
                break Outcome::Timeout;
            }
            _ = retry.tick(), if probes.len() < worker.config.max_pending => {
                let addr = addrs[turn % addrs.len()];
                turn += 1;
                WorkerStats::bump(&worker.stats().udp);
                WorkerStats::bump(if addr.is_ipv6() {
                    &worker.stats().ipv6
                } else {
                    &worker.stats().ipv4
                });
                if !probed.contains(&addr) {
                    probed.push(addr);
                }
                probes.push(spawn_probe(addr, wire.clone(), tx.clone()));
            }
            Some(event) = rx.recv() => match event {
                ProbeEvent::Received(addr, bytes, rtt) => {
                    match Message::parse(&bytes) {
                        Ok(msg) if msg.is_response() && msg.header.id == msgid => {
                            worker.ctx.reputation.update(addr.ip(), rtt.as_millis() as u64);
                            break Outcome::Reply(addr, msg);
                        }
                        _ => trace!(%addr, "discarding mismatched datagram"),
                    }
                }
                ProbeEvent::SendFailed(_) => {
                    failures += 1;
                    if failures >= probes.len() {
                        break Outcome::NetError;
                    }
                }
            }
        }
    };

    for probe in probes {
        probe.abort();
    }
    outcome
}

/// One connected-UDP probe: send once, then report everything received.
fn spawn_probe(
    addr: SocketAddr,
    wire: Bytes,
    tx: mpsc::Sender<ProbeEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bind_to: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse().expect("static addr")
        } else {
            "0.0.0.0:0".parse().expect("static addr")
        };
        let started = Instant::now();
        let result = async {
            let socket = UdpSocket::bind(bind_to).await?;
            socket.connect(addr).await?;
            socket.send(&wire).await?;
            Ok::<UdpSocket, std::io::Error>(socket)
        }
        .await;

        let socket = match result {
            Ok(socket) => socket,
            Err(err) => {
                trace!(%addr, %err, "probe send failed");
                let _ = tx.send(ProbeEvent::SendFailed(addr)).await;
                return;
            }
        };

        let mut buf = vec![0u8; burrow_proto::MAX_MESSAGE_LEN];
        loop {
            match socket.recv(&mut buf).await {
                Ok(n) => {
                    let event = ProbeEvent::Received(addr, buf[..n].to_vec(), started.elapsed());
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    })
}

/// One TCP exchange: connect, write the length-prefixed query, read the
/// length-prefixed answer, all under the iteration deadline.
async fn transmit_stream(worker: &Arc<Worker>, addr: SocketAddr, packet: &Message) -> Outcome {
    let wire = match packet.to_wire(burrow_proto::MAX_MESSAGE_LEN) {
        Ok(wire) => wire,
        Err(_) => return Outcome::NetError,
    };

    WorkerStats::bump(&worker.stats().tcp);
    WorkerStats::bump(if addr.is_ipv6() {
        &worker.stats().ipv6
    } else {
        &worker.stats().ipv4
    });

    let deadline = Duration::from_millis(worker.config.rtt_max_ms);
    let started = Instant::now();
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
        stream.write_all(&wire).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await?;
        Ok::<Vec<u8>, std::io::Error>(body)
    };

    match timeout(deadline, exchange).await {
        Ok(Ok(body)) => match Message::parse(&body) {
            Ok(msg) => {
                worker
                    .ctx
                    .reputation
                    .update(addr.ip(), started.elapsed().as_millis() as u64);
                Outcome::Reply(addr, msg)
            }
            Err(err) => {
                debug!(%addr, %err, "unparseable stream answer");
                Outcome::NetError
            }
        },
        Ok(Err(err)) => {
            debug!(%addr, %err, "stream exchange failed");
            Outcome::NetError
        }
        Err(_) => {
            WorkerStats::bump(&worker.stats().timeout);
            worker.ctx.reputation.penalize_timeout(addr.ip());
            Outcome::Timeout
        }
    }
}
