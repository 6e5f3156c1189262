//! TCP listening sockets and stream message assembly.

use crate::worker::{Origin, Worker};
use bytes::{Bytes, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

/// Listen backlog for resolver endpoints.
pub(crate) const TCP_BACKLOG: i32 = 16;

/// Binds a TCP listener with address reuse, v6-only on IPv6, and the
/// resolver's short backlog.
pub(crate) fn bind_tcp(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(TCP_BACKLOG)?;
    TcpListener::from_std(socket.into())
}

/// Accept loop of one TCP endpoint.
pub(crate) async fn serve_tcp(listener: TcpListener, worker: Arc<Worker>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(err) => {
                debug!(%err, "tcp accept error");
                continue;
            }
        };
        trace!(%peer, "tcp connection accepted");
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            if let Err(err) = handle_conn(stream, peer, worker).await {
                trace!(%peer, %err, "tcp connection closed");
            }
        });
    }
}

/// Serves one client connection.
///
/// Messages are handled strictly in order and one at a time; while a
/// query resolves, no further reads happen — the natural backpressure
/// for a busy origin.
async fn handle_conn(
    mut stream: TcpStream,
    peer: SocketAddr,
    worker: Arc<Worker>,
) -> std::io::Result<()> {
    let mut assembler = StreamAssembler::new();
    let mut chunk = worker.take_buf();
    chunk.resize(4096, 0);

    let result = 'conn: loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        for wire in assembler.push(&chunk[..n]) {
            if let Some(answer) = worker.handle_query(&wire, Origin::Tcp { peer }).await {
                let prefix = (answer.len() as u16).to_be_bytes();
                if let Err(err) = stream.write_all(&prefix).await {
                    break 'conn Err(err);
                }
                if let Err(err) = stream.write_all(&answer).await {
                    break 'conn Err(err);
                }
            }
        }
    };

    worker.put_buf(chunk);
    result
}

/// Reassembles two-byte length-prefixed DNS messages out of an arbitrary
/// sequence of stream chunks.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    pending: BytesMut,
}

impl StreamAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk; returns every message completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        let mut complete = Vec::new();
        loop {
            if self.pending.len() < 2 {
                break;
            }
            let want = u16::from_be_bytes([self.pending[0], self.pending[1]]) as usize;
            if want == 0 {
                // An empty frame carries nothing; skip its prefix.
                let _ = self.pending.split_to(2);
                continue;
            }
            if self.pending.len() < 2 + want {
                break;
            }
            let _ = self.pending.split_to(2);
            complete.push(self.pending.split_to(want).freeze());
        }
        complete
    }

    /// Bytes still missing from the message being assembled, zero when
    /// waiting for a fresh length prefix.
    pub fn bytes_remaining(&self) -> usize {
        if self.pending.len() < 2 {
            return 0;
        }
        let want = u16::from_be_bytes([self.pending[0], self.pending[1]]) as usize;
        (2 + want).saturating_sub(self.pending.len())
    }
}
