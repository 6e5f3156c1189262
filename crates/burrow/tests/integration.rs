//! End-to-end scenarios against in-process mock authoritative servers.
//!
//! Every test stands up the real worker (and where relevant the real
//! listening endpoints) and scripts the upstream side on loopback
//! sockets; the resolver cannot tell the difference.

use burrow_proto::{Message, Name, Question, RClass, RType, Rcode, Record, RrSet};
use burrow_cache::Rank;
use burrow_resolver::resolve::{Context, Options};
use burrow_resolver::{QueryFlags, RootHints};
use burrow_server::{NetFlags, Network, Origin, Worker, WorkerConfig};
use bytes::Bytes;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

fn name(s: &str) -> Name {
    s.parse().unwrap()
}

/// Starts a scripted UDP authoritative server. The handler sees each
/// parsed query with its hit index; `delay` is applied before every
/// response goes out.
async fn mock_udp<F>(handler: F, delay: Duration) -> (SocketAddr, Arc<AtomicUsize>)
where
    F: Fn(&Message, usize) -> Option<Message> + Send + Sync + 'static,
{
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&hits);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(query) = Message::parse(&buf[..n]) else {
                continue;
            };
            let hit = seen.fetch_add(1, Ordering::SeqCst);
            if let Some(response) = handler(&query, hit) {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let wire = response.to_wire(65535).unwrap();
                let _ = socket.send_to(&wire, peer).await;
            }
        }
    });
    (addr, hits)
}

/// A worker whose root hints point at the given upstream addresses, all
/// reached on `upstream_port`.
fn worker_for(upstreams: &[SocketAddr], upstream_port: u16, config: WorkerConfig) -> Arc<Worker> {
    let ctx = Context {
        hints: RootHints::from_addrs(upstreams.iter().copied()),
        opts: Options {
            upstream_port,
            ..Options::default()
        },
        ..Context::new()
    };
    Worker::new(ctx, config)
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        retry_ms: 1000,
        rtt_max_ms: 2000,
        ..WorkerConfig::default()
    }
}

fn answer_a(query: &Message, owner: &Name, addr: Ipv4Addr, ttl: u32) -> Message {
    let mut resp = Message::response_to(query);
    resp.header.set_aa(true);
    resp.add_answer(Record::a(owner.clone(), ttl, addr));
    resp
}

/// S1: a fresh cache entry answers without any outbound I/O.
#[tokio::test]
async fn cached_hit_answers_without_network() {
    let (upstream, hits) = mock_udp(|_, _| None, Duration::ZERO).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let now = worker.ctx.now();
    let mut set = RrSet::new(name("example.com"), RType::A, RClass::In);
    set.push(300, Bytes::from_static(&[10, 0, 0, 1]));
    let mut txn = worker.ctx.cache.begin(true).unwrap();
    txn.insert_rr(&set, Rank::AUTH, 0, now - 100).unwrap();
    txn.commit().unwrap();

    let answer = worker
        .resolve(name("example.com"), RType::A, RClass::In, QueryFlags::default())
        .await
        .unwrap();

    assert_eq!(answer.header.rcode(), Rcode::NoError);
    assert!(answer.header.ra());
    assert!(!answer.header.aa());
    assert_eq!(answer.answers().len(), 1);
    assert_eq!(answer.answers()[0].ttl, 200);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(worker.stats().udp.load(Ordering::Relaxed), 0);
}

/// S2, over real listening sockets: empty cache, a two-step referral
/// chain, and a client on a UDP endpoint.
#[tokio::test]
async fn iterative_resolution_over_udp_endpoint() {
    let qname = name("host.example.");
    let target = Ipv4Addr::new(198, 51, 100, 7);
    let script = move |query: &Message, hit: usize| -> Option<Message> {
        let owner = query.qname().unwrap().to_lowercase();
        match hit {
            // Acting as the root: delegate example. with glue to ourselves.
            0 => {
                let mut resp = Message::response_to(query);
                resp.add_authority(Record::ns(name("example."), 86400, &name("ns.example.")));
                resp.add_additional(Record::a(
                    name("ns.example."),
                    86400,
                    Ipv4Addr::new(127, 0, 0, 1),
                ));
                Some(resp)
            }
            // Acting as ns.example.: answer authoritatively.
            _ => Some(answer_a(query, &owner, target, 300)),
        }
    };
    let (upstream, hits) = mock_udp(script, Duration::ZERO).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let network = Network::new(Arc::clone(&worker));
    let port = network
        .listen("127.0.0.1", 0, NetFlags { udp: true, tcp: false })
        .unwrap();

    // A plain stub client.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(("127.0.0.1", port)).await.unwrap();
    let mut query = Message::query(Question::a(qname.clone()));
    query.header.id = 0x0B0B;
    query.header.set_rd(true);
    client.send(&query.to_wire(512).unwrap()).await.unwrap();

    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
        .await
        .expect("answer within deadline")
        .unwrap();
    let answer = Message::parse(&buf[..n]).unwrap();

    assert_eq!(answer.header.id, 0x0B0B);
    assert!(answer.header.qr());
    assert!(answer.header.ra());
    assert_eq!(answer.header.rcode(), Rcode::NoError);
    assert_eq!(answer.answers().len(), 1);
    assert_eq!(answer.answers()[0].ip_addr().unwrap(), target);
    assert!(hits.load(Ordering::SeqCst) <= 6, "at most six outbound datagrams");

    // The referral and the answer are cached now.
    let txn = worker.ctx.cache.begin(false).unwrap();
    let now = worker.ctx.now();
    assert!(txn.peek_rr(&name("example."), RType::Ns, now).is_ok());
    assert!(txn.peek_rr(&qname, RType::A, now).is_ok());
}

/// The same resolver answers over a TCP endpoint, length-prefixed.
#[tokio::test]
async fn tcp_endpoint_round_trip() {
    let script = |query: &Message, _hit: usize| {
        let owner = query.qname().unwrap().to_lowercase();
        Some(answer_a(query, &owner, Ipv4Addr::new(192, 0, 2, 44), 60))
    };
    let (upstream, _) = mock_udp(script, Duration::ZERO).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let network = Network::new(Arc::clone(&worker));
    let port = network
        .listen("127.0.0.1", 0, NetFlags { udp: false, tcp: true })
        .unwrap();

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let mut query = Message::query(Question::a(name("tcp.example.")));
    query.header.id = 0x0C0C;
    let wire = query.to_wire(512).unwrap();
    stream.write_all(&(wire.len() as u16).to_be_bytes()).await.unwrap();
    stream.write_all(&wire).await.unwrap();

    let mut len_buf = [0u8; 2];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut len_buf))
        .await
        .expect("answer within deadline")
        .unwrap();
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    let answer = Message::parse(&body).unwrap();

    assert_eq!(answer.header.id, 0x0C0C);
    assert_eq!(answer.answers().len(), 1);
}

/// S4: two concurrent clients asking the same question produce exactly
/// one outbound sub-query; the follower rides on the leader's exchange.
#[tokio::test]
async fn identical_queries_coalesce_onto_one_fanout() {
    let script = |query: &Message, _hit: usize| {
        let owner = query.qname().unwrap().to_lowercase();
        Some(answer_a(query, &owner, Ipv4Addr::new(203, 0, 113, 5), 120))
    };
    // The answer is held back long enough for the second task to attach.
    let (upstream, hits) = mock_udp(script, Duration::from_millis(300)).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let w1 = Arc::clone(&worker);
    let w2 = Arc::clone(&worker);
    let (a, b) = tokio::join!(
        w1.resolve(name("slow.example."), RType::A, RClass::In, QueryFlags::default()),
        w2.resolve(name("slow.example."), RType::A, RClass::In, QueryFlags::default()),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(hits.load(Ordering::SeqCst), 1, "exactly one outbound sub-query");
    assert_eq!(a.answers().len(), 1);
    assert_eq!(b.answers().len(), 1);
    assert_eq!(a.answers()[0].rdata, b.answers()[0].rdata);
}

/// S5: a dead first server is penalized after the deadline and the next
/// candidate answers.
#[tokio::test]
async fn timeout_penalizes_and_fails_over() {
    let script = |query: &Message, _hit: usize| {
        let owner = query.qname().unwrap().to_lowercase();
        Some(answer_a(query, &owner, Ipv4Addr::new(192, 0, 2, 99), 60))
    };
    let (live, _) = mock_udp(script, Duration::ZERO).await;
    let port = live.port();

    // A bound but mute socket on a second loopback address, same port.
    let dead_socket = UdpSocket::bind(("127.0.0.2", port)).await.unwrap();
    let dead = dead_socket.local_addr().unwrap();
    let _keep_alive = dead_socket;

    let config = WorkerConfig {
        retry_ms: 1000,
        rtt_max_ms: 300,
        ..WorkerConfig::default()
    };
    // hint-0 (the dead server) sorts first and is elected first.
    let worker = worker_for(&[dead, live], port, config);

    let started = Instant::now();
    let answer = worker
        .resolve(name("failover.example."), RType::A, RClass::In, QueryFlags::default())
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(answer.header.rcode(), Rcode::NoError);
    assert_eq!(answer.answers().len(), 1);
    assert!(worker.stats().timeout.load(Ordering::Relaxed) >= 1);
    // One deadline spent on the dead server, then the live exchange.
    assert!(elapsed < Duration::from_millis(2 * 300 + 500), "took {elapsed:?}");
    // The dead address took the timeout penalty.
    assert!(worker.ctx.reputation.score(&dead.ip()) >= burrow_resolver::nsrep::TIMEOUT_PENALTY_MS);
}

/// S6: a truncated UDP answer makes the resolver re-ask the same server
/// over TCP and take the full answer from there.
#[tokio::test]
async fn truncation_falls_back_to_tcp() {
    let target = Ipv4Addr::new(198, 51, 100, 80);

    // UDP side: always truncated.
    let (upstream, udp_hits) = mock_udp(
        |query, _| {
            let mut resp = Message::response_to(query);
            resp.header.set_tc(true);
            Some(resp)
        },
        Duration::ZERO,
    )
    .await;

    // TCP side on the same address and port: the full answer.
    let listener = TcpListener::bind(upstream).await.unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut len_buf = [0u8; 2];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let len = u16::from_be_bytes(len_buf) as usize;
                let mut body = vec![0u8; len];
                if stream.read_exact(&mut body).await.is_err() {
                    return;
                }
                let Ok(query) = Message::parse(&body) else {
                    return;
                };
                let owner = query.qname().unwrap().to_lowercase();
                let resp = answer_a(&query, &owner, Ipv4Addr::new(198, 51, 100, 80), 60);
                let wire = resp.to_wire(65535).unwrap();
                let _ = stream.write_all(&(wire.len() as u16).to_be_bytes()).await;
                let _ = stream.write_all(&wire).await;
            });
        }
    });

    let worker = worker_for(&[upstream], upstream.port(), fast_config());
    let answer = worker
        .resolve(name("big.example."), RType::A, RClass::In, QueryFlags::default())
        .await
        .unwrap();

    assert_eq!(answer.header.rcode(), Rcode::NoError);
    assert_eq!(answer.answers().len(), 1);
    assert_eq!(answer.answers()[0].ip_addr(), Some(target.into()));
    assert_eq!(udp_hits.load(Ordering::SeqCst), 1);
    assert!(worker.stats().tcp.load(Ordering::Relaxed) >= 1);
}

/// An endless alias chase runs into the iteration ceiling and the client
/// sees SERVFAIL rather than a hung request.
#[tokio::test]
async fn endless_alias_chain_hits_iteration_limit() {
    let script = |query: &Message, hit: usize| {
        let owner = query.qname().unwrap().to_lowercase();
        let target: Name = format!("x{}.example.", hit + 1).parse().unwrap();
        let mut resp = Message::response_to(query);
        resp.header.set_aa(true);
        resp.add_answer(Record::cname(owner, 60, &target));
        Some(resp)
    };
    let (upstream, hits) = mock_udp(script, Duration::ZERO).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let answer = worker
        .resolve(name("x0.example."), RType::A, RClass::In, QueryFlags::default())
        .await
        .unwrap();

    assert_eq!(answer.header.rcode(), Rcode::ServFail);
    assert!(hits.load(Ordering::SeqCst) <= 50, "bounded by the iteration ceiling");
}

/// Retransmission walks the elected nameserver's addresses round-robin:
/// with three (dead) addresses, every one is probed before the deadline.
#[tokio::test]
async fn retransmit_round_robins_addresses() {
    let port = {
        // Reserve a port number all three mute sockets can share.
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        probe.local_addr().unwrap().port()
    };

    let mut receivers = Vec::new();
    let mut counters = Vec::new();
    for host in ["127.0.0.3", "127.0.0.4", "127.0.0.5"] {
        let socket = UdpSocket::bind((host, port)).await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        receivers.push(tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                if socket.recv_from(&mut buf).await.is_err() {
                    break;
                }
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));
        counters.push(count);
    }

    let config = WorkerConfig {
        retry_ms: 50,
        rtt_max_ms: 280,
        ..WorkerConfig::default()
    };
    let worker = worker_for(&[], port, config);

    // One nameserver with all three addresses, seeded through the cache
    // so the retransmit loop fans out over a single address list.
    let now = worker.ctx.now();
    let mut ns_set = RrSet::new(name("example."), RType::Ns, RClass::In);
    ns_set.push(3600, Bytes::copy_from_slice(name("ns1.example.").as_wire()));
    let mut glue = RrSet::new(name("ns1.example."), RType::A, RClass::In);
    for host in [[127, 0, 0, 3], [127, 0, 0, 4], [127, 0, 0, 5]] {
        glue.push(3600, Bytes::copy_from_slice(&host));
    }
    let mut txn = worker.ctx.cache.begin(true).unwrap();
    txn.insert_rr(&ns_set, Rank::NONAUTH, 0, now).unwrap();
    txn.insert_rr(&glue, Rank::NONAUTH, 0, now).unwrap();
    txn.commit().unwrap();

    let answer = worker
        .resolve(name("x.example."), RType::A, RClass::In, QueryFlags::default())
        .await
        .unwrap();

    // Nobody answered, so the request fails, but every address was
    // probed before any repeats exhausted the pending budget.
    assert_eq!(answer.header.rcode(), Rcode::ServFail);
    for (i, count) in counters.iter().enumerate() {
        assert!(
            count.load(Ordering::SeqCst) >= 1,
            "address {i} was never probed"
        );
    }
    let total: usize = counters.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert!(total <= 6, "fan-out exceeded the pending budget: {total}");
    for receiver in receivers {
        receiver.abort();
    }
}

/// Malformed datagrams and stray responses at an endpoint are dropped
/// without a reply.
#[tokio::test]
async fn garbage_at_endpoint_is_dropped() {
    let (upstream, _) = mock_udp(|_, _| None, Duration::ZERO).await;
    let worker = worker_for(&[upstream], upstream.port(), fast_config());

    let before = worker.stats().dropped.load(Ordering::Relaxed);
    assert!(worker.handle_query(&[1, 2, 3], Origin::Internal).await.is_none());
    let mut response = Message::query(Question::a(name("x.example.")));
    response.header.set_qr(true);
    let wire = response.to_wire(512).unwrap();
    assert!(worker.handle_query(&wire, Origin::Internal).await.is_none());
    assert_eq!(worker.stats().dropped.load(Ordering::Relaxed), before + 2);
}
