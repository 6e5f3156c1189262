//! Root server hints.
//!
//! The built-in table carries the IANA root servers; deployments can
//! override it (tests point it at a mock authoritative) through
//! configuration.

use crate::zonecut::ZoneCut;
use burrow_proto::Name;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// One root server hint.
#[derive(Debug, Clone)]
pub struct RootHint {
    /// Hostname of the server.
    pub name: &'static str,
    /// IPv4 address.
    pub ipv4: &'static str,
    /// IPv6 address, where published.
    pub ipv6: Option<&'static str>,
}

/// IANA root servers.
pub static ROOT_HINTS: &[RootHint] = &[
    RootHint { name: "a.root-servers.net", ipv4: "198.41.0.4", ipv6: Some("2001:503:ba3e::2:30") },
    RootHint { name: "b.root-servers.net", ipv4: "199.9.14.201", ipv6: Some("2001:500:200::b") },
    RootHint { name: "c.root-servers.net", ipv4: "192.33.4.12", ipv6: Some("2001:500:2::c") },
    RootHint { name: "d.root-servers.net", ipv4: "199.7.91.13", ipv6: Some("2001:500:2d::d") },
    RootHint { name: "e.root-servers.net", ipv4: "192.203.230.10", ipv6: Some("2001:500:a8::e") },
    RootHint { name: "f.root-servers.net", ipv4: "192.5.5.241", ipv6: Some("2001:500:2f::f") },
    RootHint { name: "g.root-servers.net", ipv4: "192.112.36.4", ipv6: Some("2001:500:12::d0d") },
    RootHint { name: "h.root-servers.net", ipv4: "198.97.190.53", ipv6: Some("2001:500:1::53") },
    RootHint { name: "i.root-servers.net", ipv4: "192.36.148.17", ipv6: Some("2001:7fe::53") },
    RootHint { name: "j.root-servers.net", ipv4: "192.58.128.30", ipv6: Some("2001:503:c27::2:30") },
    RootHint { name: "k.root-servers.net", ipv4: "193.0.14.129", ipv6: Some("2001:7fd::1") },
    RootHint { name: "l.root-servers.net", ipv4: "199.7.83.42", ipv6: Some("2001:500:9f::42") },
    RootHint { name: "m.root-servers.net", ipv4: "202.12.27.33", ipv6: Some("2001:dc3::35") },
];

/// A configured set of root servers.
#[derive(Debug, Clone)]
pub struct RootHints {
    servers: Vec<(Name, Vec<IpAddr>)>,
}

impl RootHints {
    /// Root hints from the built-in IANA table.
    pub fn builtin() -> Self {
        let servers = ROOT_HINTS
            .iter()
            .map(|hint| {
                let name = Name::from_str(hint.name).unwrap_or_else(|_| Name::root());
                let mut addrs = Vec::with_capacity(2);
                if let Ok(v4) = hint.ipv4.parse() {
                    addrs.push(IpAddr::V4(v4));
                }
                if let Some(v6) = hint.ipv6 {
                    if let Ok(v6) = v6.parse() {
                        addrs.push(IpAddr::V6(v6));
                    }
                }
                (name, addrs)
            })
            .collect();
        Self { servers }
    }

    /// Root hints from explicit socket addresses, e.g. a test harness or
    /// a private root. Ports other than 53 are not representable in a
    /// zone cut and are ignored here.
    pub fn from_addrs(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        let servers = addrs
            .into_iter()
            .enumerate()
            .map(|(i, sa)| {
                let name = Name::from_str(&format!("hint-{i}.root-servers.invalid"))
                    .unwrap_or_else(|_| Name::root());
                (name, vec![sa.ip()])
            })
            .collect();
        Self { servers }
    }

    /// Builds the root zone cut these hints describe.
    pub fn to_cut(&self) -> ZoneCut {
        let mut cut = ZoneCut::new(Name::root());
        for (name, addrs) in &self.servers {
            if addrs.is_empty() {
                cut.add(name.clone(), None);
            }
            for addr in addrs {
                cut.add(name.clone(), Some(*addr));
            }
        }
        cut
    }

    /// Number of configured servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// True when no servers are configured.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Default for RootHints {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_thirteen_roots() {
        let hints = RootHints::builtin();
        assert_eq!(hints.len(), 13);
        let cut = hints.to_cut();
        assert!(cut.name.is_root());
        assert_eq!(cut.len(), 13);
        let a = cut
            .addrs_of(&"a.root-servers.net".parse().unwrap())
            .unwrap();
        assert!(a.contains(&"198.41.0.4".parse().unwrap()));
    }

    #[test]
    fn custom_hints() {
        let hints = RootHints::from_addrs(["127.0.0.1:5300".parse().unwrap()]);
        let cut = hints.to_cut();
        assert_eq!(cut.len(), 1);
    }
}
