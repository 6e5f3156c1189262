//! Listening endpoint registry.
//!
//! Endpoints are grouped into per-address buckets: `addr -> [endpoint]`,
//! each endpoint owning the UDP and/or TCP socket bound at its port.
//! Closing an endpoint aborts its serving tasks (which drops the bound
//! sockets); an emptied bucket is removed from the map.

use crate::worker::Worker;
use crate::{tcp, udp, Result, ServerError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Which protocols an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetFlags {
    /// Serve UDP.
    pub udp: bool,
    /// Serve TCP.
    pub tcp: bool,
}

impl Default for NetFlags {
    fn default() -> Self {
        Self { udp: true, tcp: true }
    }
}

/// Public description of one bound endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Listen address text.
    pub addr: String,
    /// Bound port.
    pub port: u16,
    /// UDP is served.
    pub udp: bool,
    /// TCP is served.
    pub tcp: bool,
}

/// One local network interface, for the control surface.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name.
    pub name: String,
    /// Addresses assigned to it.
    pub addrs: Vec<IpAddr>,
    /// Hardware address, where one exists.
    pub mac: Option<String>,
}

struct Endpoint {
    port: u16,
    flags: NetFlags,
    handles: Vec<JoinHandle<()>>,
}

impl Endpoint {
    fn close(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// The endpoint registry.
pub struct Network {
    worker: Arc<Worker>,
    endpoints: Mutex<HashMap<String, Vec<Endpoint>>>,
}

impl Network {
    /// Creates an empty registry serving queries through `worker`.
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Binds an endpoint at `addr:port` and starts serving.
    ///
    /// IPv6 is recognized by a `:` in the address text. With port 0 the
    /// kernel picks; the chosen port (shared between UDP and TCP) is
    /// returned.
    pub fn listen(&self, addr: &str, port: u16, flags: NetFlags) -> Result<u16> {
        if !flags.udp && !flags.tcp {
            return Err(ServerError::BadAddress {
                addr: addr.to_string(),
                reason: "no protocol requested".to_string(),
            });
        }
        let ip: IpAddr = if addr.contains(':') {
            addr.parse::<std::net::Ipv6Addr>()
                .map(IpAddr::V6)
                .map_err(|e| ServerError::BadAddress {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })?
        } else {
            addr.parse::<std::net::Ipv4Addr>()
                .map(IpAddr::V4)
                .map_err(|e| ServerError::BadAddress {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })?
        };

        let mut handles = Vec::new();
        let mut bound_port = port;

        if flags.udp {
            let socket = udp::bind_udp(SocketAddr::new(ip, bound_port))?;
            bound_port = socket.local_addr()?.port();
            let socket = Arc::new(socket);
            handles.push(tokio::spawn(udp::serve_udp(socket, Arc::clone(&self.worker))));
        }
        if flags.tcp {
            let listener = tcp::bind_tcp(SocketAddr::new(ip, bound_port))?;
            bound_port = listener.local_addr()?.port();
            handles.push(tokio::spawn(tcp::serve_tcp(listener, Arc::clone(&self.worker))));
        }

        info!(%addr, port = bound_port, udp = flags.udp, tcp = flags.tcp, "endpoint listening");
        self.endpoints
            .lock()
            .entry(addr.to_string())
            .or_default()
            .push(Endpoint {
                port: bound_port,
                flags,
                handles,
            });
        Ok(bound_port)
    }

    /// Closes the endpoint bound at `addr:port`.
    pub fn close(&self, addr: &str, port: u16) -> Result<()> {
        let mut endpoints = self.endpoints.lock();
        let bucket = endpoints.get_mut(addr).ok_or_else(|| ServerError::NoEndpoint {
            addr: addr.to_string(),
            port,
        })?;
        let at = bucket
            .iter()
            .position(|ep| ep.port == port)
            .ok_or_else(|| ServerError::NoEndpoint {
                addr: addr.to_string(),
                port,
            })?;
        bucket.remove(at).close();
        debug!(%addr, port, "endpoint closed");
        if bucket.is_empty() {
            endpoints.remove(addr);
        }
        Ok(())
    }

    /// Lists every bound endpoint.
    pub fn list(&self) -> Vec<EndpointInfo> {
        let endpoints = self.endpoints.lock();
        let mut out = Vec::new();
        for (addr, bucket) in endpoints.iter() {
            for ep in bucket {
                out.push(EndpointInfo {
                    addr: addr.clone(),
                    port: ep.port,
                    udp: ep.flags.udp,
                    tcp: ep.flags.tcp,
                });
            }
        }
        out.sort_by(|a, b| (&a.addr, a.port).cmp(&(&b.addr, b.port)));
        out
    }

    /// Closes every endpoint and empties the registry.
    pub fn deinit(&self) {
        let mut endpoints = self.endpoints.lock();
        for (_, bucket) in endpoints.drain() {
            for ep in bucket {
                ep.close();
            }
        }
    }

    /// Enumerates local interfaces with their addresses and MACs.
    #[cfg(unix)]
    pub fn interfaces() -> std::io::Result<Vec<InterfaceInfo>> {
        interfaces_unix()
    }

    /// Interface enumeration is only wired up on unix.
    #[cfg(not(unix))]
    pub fn interfaces() -> std::io::Result<Vec<InterfaceInfo>> {
        Ok(Vec::new())
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.deinit();
    }
}

/// getifaddrs(3) walk: collects per-interface IP addresses and, on
/// Linux, the hardware address from the AF_PACKET entry.
#[cfg(unix)]
fn interfaces_unix() -> std::io::Result<Vec<InterfaceInfo>> {
    use std::ffi::CStr;

    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut by_name: HashMap<String, InterfaceInfo> = HashMap::new();
    let mut cursor = ifap;
    while !cursor.is_null() {
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        let info = by_name.entry(name.clone()).or_insert_with(|| InterfaceInfo {
            name,
            addrs: Vec::new(),
            mac: None,
        });

        if entry.ifa_addr.is_null() {
            continue;
        }
        let family = unsafe { (*entry.ifa_addr).sa_family };
        match i32::from(family) {
            libc::AF_INET => {
                let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                let octets = sa.sin_addr.s_addr.to_ne_bytes();
                info.addrs.push(IpAddr::from(octets));
            }
            libc::AF_INET6 => {
                let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
                info.addrs.push(IpAddr::from(sa.sin6_addr.s6_addr));
            }
            #[cfg(target_os = "linux")]
            libc::AF_PACKET => {
                let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_ll) };
                let len = usize::from(sa.sll_halen).min(sa.sll_addr.len());
                if len > 0 {
                    let mac = sa.sll_addr[..len]
                        .iter()
                        .map(|b| format!("{b:02x}"))
                        .collect::<Vec<_>>()
                        .join(":");
                    info.mac = Some(mac);
                }
            }
            _ => {}
        }
    }

    unsafe { libc::freeifaddrs(ifap) };
    let mut out: Vec<InterfaceInfo> = by_name.into_values().collect();
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerConfig;
    use burrow_resolver::resolve::Context;

    fn test_network() -> Network {
        Network::new(Worker::new(Context::new(), WorkerConfig::default()))
    }

    #[tokio::test]
    async fn listen_then_close_removes_endpoint() {
        let net = test_network();
        let port = net
            .listen("127.0.0.1", 0, NetFlags { udp: true, tcp: false })
            .unwrap();
        assert!(port > 0);

        let listed = net.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].addr, "127.0.0.1");
        assert_eq!(listed[0].port, port);
        assert!(listed[0].udp);
        assert!(!listed[0].tcp);

        net.close("127.0.0.1", port).unwrap();
        assert!(net.list().is_empty());

        // Closing again reports the missing endpoint.
        assert!(matches!(
            net.close("127.0.0.1", port),
            Err(ServerError::NoEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn bucket_holds_multiple_ports() {
        let net = test_network();
        let p1 = net
            .listen("127.0.0.1", 0, NetFlags { udp: true, tcp: false })
            .unwrap();
        let p2 = net
            .listen("127.0.0.1", 0, NetFlags { udp: true, tcp: false })
            .unwrap();
        assert_ne!(p1, p2);
        assert_eq!(net.list().len(), 2);

        net.close("127.0.0.1", p1).unwrap();
        let listed = net.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].port, p2);
    }

    #[tokio::test]
    async fn deinit_closes_everything() {
        let net = test_network();
        net.listen("127.0.0.1", 0, NetFlags { udp: true, tcp: false }).unwrap();
        net.listen("127.0.0.1", 0, NetFlags { udp: false, tcp: true }).unwrap();
        net.deinit();
        assert!(net.list().is_empty());
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let net = test_network();
        assert!(matches!(
            net.listen("not-an-address", 53, NetFlags::default()),
            Err(ServerError::BadAddress { .. })
        ));
        assert!(matches!(
            net.listen("127.0.0.1", 53, NetFlags { udp: false, tcp: false }),
            Err(ServerError::BadAddress { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn interfaces_enumerate() {
        let ifaces = Network::interfaces().unwrap();
        // Every environment has at least a loopback.
        assert!(ifaces.iter().any(|i| i.addrs.iter().any(|a| a.is_loopback())));
    }
}
