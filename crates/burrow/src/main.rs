//! burrow — a caching iterative DNS resolver.
//!
//! Accepts queries over UDP and TCP, walks the delegation chain from the
//! root, coalesces duplicate in-flight work and caches what it learns.
//! Runs on a single-threaded cooperative event loop.

use anyhow::{Context as _, Result};
use burrow_cache::{Cache, MemStore};
use burrow_config::Config;
use burrow_metrics::tracing_setup::{init_tracing, parse_level, LogFormat};
use burrow_dnssec::TaStore;
use burrow_resolver::resolve::{Context, Options};
use burrow_resolver::{Reputation, RootHints};
use burrow_server::{NetFlags, Network, Worker, WorkerConfig};
use clap::{Parser, Subcommand};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// burrow — caching iterative DNS resolution.
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Minimal output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the resolver (default).
    Run,
    /// Check a configuration file and exit.
    Validate,
    /// Print version information and exit.
    Version,
}

fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }
    ["./burrow.yaml", "./burrow.yml", "/etc/burrow/burrow.yaml"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match find_config(path) {
        Some(path) => {
            let config = Config::from_file(&path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.validate().context("validating configuration")?;
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

fn print_banner(config: &Config, quiet: bool) {
    if quiet {
        return;
    }
    println!();
    println!(
        "  {} {}",
        style("burrow").cyan().bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim()
    );
    println!("  {}", style("caching iterative DNS resolution").dim());
    println!(
        "  {} {}",
        style("instance:").dim(),
        style(&config.server.name).green()
    );
    println!();
}

fn build_worker(config: &Config) -> Result<Arc<Worker>> {
    let cache = Cache::open_with_limit(Arc::new(MemStore::new()), config.cache.max_entries)
        .context("opening cache")?;

    let ta = TaStore::new();
    for anchor in &config.trust_anchors {
        let (name, rtype, ttl, rdata) = anchor.decode()?;
        ta.add(&name, rtype, ttl, rdata.into())
            .with_context(|| format!("installing trust anchor for {name}"))?;
    }
    if !ta.is_empty() {
        info!(anchors = ta.len(), "trust anchors installed");
    }

    let hints = if config.hints.is_empty() {
        RootHints::builtin()
    } else {
        RootHints::from_addrs(config.hints.iter().copied())
    };

    let ctx = Context {
        cache,
        ta,
        reputation: Reputation::new(),
        hints,
        opts: Options {
            iter_limit: config.resolver.iter_limit,
            edns_payload: config.resolver.edns_payload,
            ..Options::default()
        },
    };

    Ok(Worker::new(
        ctx,
        WorkerConfig {
            retry_ms: config.resolver.retry_ms,
            rtt_max_ms: config.resolver.rtt_max_ms,
            ..WorkerConfig::default()
        },
    ))
}

async fn run(config: Config) -> Result<()> {
    let worker = build_worker(&config)?;
    let network = Network::new(Arc::clone(&worker));

    let listeners = if config.listen.is_empty() {
        vec![burrow_config::ListenSpec::default()]
    } else {
        config.listen.clone()
    };
    for spec in &listeners {
        let flags = NetFlags {
            udp: spec.udp,
            tcp: spec.tcp,
        };
        match network.listen(&spec.addr, spec.port, flags) {
            Ok(port) => info!(addr = %spec.addr, port, "listening"),
            Err(err) => warn!(addr = %spec.addr, port = spec.port, %err, "listen failed"),
        }
    }
    if network.list().is_empty() {
        anyhow::bail!("no endpoint could be bound");
    }

    // Periodic export of the worker and cache counters.
    let reporter = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tick.tick().await;
                let m = burrow_metrics::metrics();
                m.set_concurrent(
                    worker
                        .stats()
                        .concurrent
                        .load(std::sync::atomic::Ordering::Relaxed),
                );
                m.set_cache_entries(worker.ctx.cache.count());
            }
        })
    };

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    reporter.abort();
    info!("shutting down");
    network.deinit();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;

    let level = parse_level(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    init_tracing(level, LogFormat::parse(&config.logging.format));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Version => {
            println!("burrow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Validate => {
            config.validate()?;
            if !cli.quiet {
                println!("{} configuration is valid", style("ok:").green().bold());
            }
            Ok(())
        }
        Commands::Run => {
            print_banner(&config, cli.quiet);
            // One cooperative event loop; no worker threads.
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("building runtime")?;
            runtime.block_on(run(config))
        }
    }
}
