//! Nameserver reputation and election.
//!
//! Every upstream address has a smoothed RTT estimate. Timeouts write a
//! large penalty so the address sinks in the next election; a successful
//! exchange pulls the estimate back down. Election picks the nameserver
//! whose best address scores lowest and hands back up to
//! [`MAX_NS_ADDRESSES`] candidates for the fan-out.

use crate::zonecut::ZoneCut;
use burrow_proto::Name;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::trace;

/// Upper bound of candidate addresses per elected nameserver.
pub const MAX_NS_ADDRESSES: usize = 4;

/// Starting RTT estimate for an address we know nothing about.
pub const UNKNOWN_RTT_MS: u64 = 50;

/// Penalty written for an address that timed out.
pub const TIMEOUT_PENALTY_MS: u64 = 8000;

/// Scores above this are considered dead for the current iteration.
pub const SCORE_DEAD: u64 = TIMEOUT_PENALTY_MS;

/// Outcome of a nameserver election.
#[derive(Debug)]
pub enum Election {
    /// A nameserver with addresses was elected.
    Ready {
        /// Its name.
        name: Name,
        /// Candidate addresses, best first, capped.
        addrs: Vec<SocketAddr>,
        /// Score of the best address.
        score: u64,
    },
    /// The best nameserver has no known address yet.
    NeedAddress {
        /// The addressless nameserver to resolve.
        name: Name,
    },
    /// The cut has no electable nameserver at all.
    Dead,
}

/// Shared RTT reputation across all requests.
#[derive(Debug, Default)]
pub struct Reputation {
    rtt: DashMap<IpAddr, u64>,
}

impl Reputation {
    /// Creates an empty reputation map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score of an address; lower is better.
    pub fn score(&self, addr: &IpAddr) -> u64 {
        self.rtt.get(addr).map(|v| *v).unwrap_or(UNKNOWN_RTT_MS)
    }

    /// Folds a measured round-trip into the estimate (7/8 smoothing).
    pub fn update(&self, addr: IpAddr, sample_ms: u64) {
        let mut entry = self.rtt.entry(addr).or_insert(sample_ms);
        *entry = (*entry * 7 + sample_ms) / 8;
    }

    /// Records a timeout: the address drops to the penalty score and has
    /// to earn its way back.
    pub fn penalize_timeout(&self, addr: IpAddr) {
        trace!(%addr, "nameserver flagged bad after timeout");
        self.rtt.insert(addr, TIMEOUT_PENALTY_MS);
    }

    /// Number of addresses with a recorded estimate.
    pub fn len(&self) -> usize {
        self.rtt.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.rtt.is_empty()
    }
}

/// Elects the best nameserver for the cut, with candidates on `port`
/// (53 outside of test rigs).
///
/// Addressless nameservers are only proposed when no candidate with an
/// address scores under the dead threshold; the caller then plants A/AAAA
/// sub-queries for it.
pub fn elect(cut: &ZoneCut, reputation: &Reputation, port: u16) -> Election {
    let mut best: Option<(Name, Vec<(u64, SocketAddr)>)> = None;
    let mut addressless: Option<Name> = None;

    for (ns, addrs) in cut.servers() {
        if addrs.is_empty() {
            if addressless.is_none() {
                addressless = Some(ns.clone());
            }
            continue;
        }
        let mut scored: Vec<(u64, SocketAddr)> = addrs
            .iter()
            .map(|ip| (reputation.score(ip), SocketAddr::new(*ip, port)))
            .collect();
        scored.sort_by_key(|(score, _)| *score);
        let lead = scored[0].0;
        if lead >= SCORE_DEAD {
            continue;
        }
        match &best {
            Some((_, current)) if current[0].0 <= lead => {}
            _ => best = Some((ns.clone(), scored)),
        }
    }

    match (best, addressless) {
        (Some((name, scored)), _) => {
            let score = scored[0].0;
            let addrs = scored
                .into_iter()
                .take(MAX_NS_ADDRESSES)
                .map(|(_, addr)| addr)
                .collect();
            Election::Ready { name, addrs, score }
        }
        (None, Some(name)) => Election::NeedAddress { name },
        (None, None) => Election::Dead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    #[test]
    fn rtt_smoothing() {
        let rep = Reputation::new();
        rep.update(ip(1), 100);
        assert_eq!(rep.score(&ip(1)), 100);
        rep.update(ip(1), 20);
        assert_eq!(rep.score(&ip(1)), 90); // (100*7 + 20) / 8
        assert_eq!(rep.score(&ip(9)), UNKNOWN_RTT_MS);
    }

    #[test]
    fn timeout_penalty_sinks_address() {
        let rep = Reputation::new();
        rep.update(ip(1), 10);
        rep.penalize_timeout(ip(1));
        assert_eq!(rep.score(&ip(1)), TIMEOUT_PENALTY_MS);

        // A good sample starts pulling it back.
        rep.update(ip(1), 40);
        assert!(rep.score(&ip(1)) < TIMEOUT_PENALTY_MS);
    }

    #[test]
    fn elects_fastest_server() {
        let rep = Reputation::new();
        rep.update(ip(1), 200);
        rep.update(ip(2), 10);

        let mut cut = ZoneCut::new(name("example."));
        cut.add(name("slow.ns."), Some(ip(1)));
        cut.add(name("fast.ns."), Some(ip(2)));

        match elect(&cut, &rep, 53) {
            Election::Ready { name: ns, addrs, score } => {
                assert_eq!(ns, name("fast.ns."));
                assert_eq!(score, 10);
                assert_eq!(addrs[0].ip(), ip(2));
            }
            other => panic!("unexpected election: {other:?}"),
        }
    }

    #[test]
    fn caps_candidate_addresses() {
        let rep = Reputation::new();
        let mut cut = ZoneCut::new(name("example."));
        for i in 1..=6 {
            cut.add(name("big.ns."), Some(ip(i)));
        }
        match elect(&cut, &rep, 53) {
            Election::Ready { addrs, .. } => assert_eq!(addrs.len(), MAX_NS_ADDRESSES),
            other => panic!("unexpected election: {other:?}"),
        }
    }

    #[test]
    fn addressless_ns_requested_when_no_other_choice() {
        let rep = Reputation::new();
        let mut cut = ZoneCut::new(name("example."));
        cut.add(name("lame.ns."), None);
        match elect(&cut, &rep, 53) {
            Election::NeedAddress { name: ns } => assert_eq!(ns, name("lame.ns.")),
            other => panic!("unexpected election: {other:?}"),
        }
    }

    #[test]
    fn penalized_out_cut_is_dead() {
        let rep = Reputation::new();
        rep.penalize_timeout(ip(1));
        let mut cut = ZoneCut::new(name("example."));
        cut.add(name("only.ns."), Some(ip(1)));
        assert!(matches!(elect(&cut, &rep, 53), Election::Dead));
    }

    #[test]
    fn empty_cut_is_dead() {
        let cut = ZoneCut::new(name("example."));
        assert!(matches!(elect(&cut, &Reputation::new(), 53), Election::Dead));
    }
}
