//! # burrow-metrics
//!
//! Observability for the burrow resolver: structured-logging setup and a
//! `metrics`-facade surface the daemon feeds from the worker and cache
//! counters. The decision-making counters themselves live with their
//! components; this crate only exports them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, parse_level, LogFormat};

use metrics::{counter, gauge};
use once_cell::sync::OnceCell;
use std::time::Instant;

static METRICS: OnceCell<ResolverMetrics> = OnceCell::new();

/// The global metrics handle.
pub fn metrics() -> &'static ResolverMetrics {
    METRICS.get_or_init(ResolverMetrics::new)
}

/// Metric recorders for the resolver daemon.
pub struct ResolverMetrics {
    started: Instant,
}

impl ResolverMetrics {
    /// Creates a recorder; normally reached through [`metrics`].
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Uptime since the recorder was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// One client query accepted, by transport.
    pub fn record_query(&self, transport: &'static str) {
        counter!("dns_queries_total", "transport" => transport).increment(1);
    }

    /// One answer delivered, by rcode.
    pub fn record_response(&self, rcode: String) {
        counter!("dns_responses_total", "rcode" => rcode).increment(1);
    }

    /// One inbound packet dropped before task creation.
    pub fn record_dropped(&self) {
        counter!("dns_dropped_total").increment(1);
    }

    /// One iteration deadline expired.
    pub fn record_timeout(&self) {
        counter!("dns_upstream_timeouts_total").increment(1);
    }

    /// Cache peek outcome.
    pub fn record_cache(&self, hit: bool) {
        if hit {
            counter!("dns_cache_hits_total").increment(1);
        } else {
            counter!("dns_cache_misses_total").increment(1);
        }
    }

    /// Current number of live tasks.
    pub fn set_concurrent(&self, concurrent: u64) {
        gauge!("dns_tasks_concurrent").set(concurrent as f64);
    }

    /// Current number of cached entries.
    pub fn set_cache_entries(&self, entries: usize) {
        gauge!("dns_cache_entries").set(entries as f64);
    }
}

impl Default for ResolverMetrics {
    fn default() -> Self {
        Self::new()
    }
}
