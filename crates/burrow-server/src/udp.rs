//! UDP listening sockets.

use crate::worker::{Origin, Worker};
use crate::RECV_BATCH;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace};

/// Socket buffer size: enough for a full receive batch both ways.
pub(crate) const SOCKET_BUF: usize = RECV_BATCH * burrow_proto::MAX_MESSAGE_LEN * 2;

/// Binds a UDP socket with the options a resolver endpoint needs:
/// address reuse, v6-only on IPv6 (v4 gets its own endpoint), and
/// batch-sized kernel buffers.
pub(crate) fn bind_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    // The kernel may clamp (or on Linux double) these; best effort.
    let _ = socket.set_recv_buffer_size(SOCKET_BUF);
    let _ = socket.set_send_buffer_size(SOCKET_BUF);
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Receive loop of one UDP endpoint. Each datagram is copied out of the
/// shared receive buffer before the task handling it can yield; the
/// buffer itself is only valid for the synchronous dispatch.
pub(crate) async fn serve_udp(socket: Arc<UdpSocket>, worker: Arc<Worker>) {
    let mut buf = vec![0u8; burrow_proto::MAX_MESSAGE_LEN];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(recv) => recv,
            Err(err) => {
                debug!(%err, "udp receive error");
                continue;
            }
        };
        trace!(%peer, len, "datagram received");
        let wire = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            if let Some(answer) = worker.handle_query(&wire, Origin::Udp { peer }).await {
                if let Err(err) = socket.send_to(&answer, peer).await {
                    debug!(%peer, %err, "failed to send answer");
                }
            }
        });
    }
}
