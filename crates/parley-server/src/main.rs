mod fabric;
mod handler;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parley_cluster::{CoordinationConfig, PeerId, PeerRegistry};

#[derive(Parser)]
#[command(name = "parley-server", about = "parley chat cluster coordination node")]
struct Args {
    /// this node's id in the peer table
    #[arg(short, long, env = "PARLEY_NODE_ID")]
    id: u32,

    /// path to the tab-separated peer table
    /// (id, address, client port, coordination port)
    #[arg(short, long, env = "PARLEY_PEERS", default_value = "peers.tsv")]
    peers: PathBuf,

    /// heartbeat period in milliseconds
    #[arg(long, env = "PARLEY_HEARTBEAT_MS")]
    heartbeat_ms: Option<u64>,

    /// peers silent longer than this many milliseconds are failed
    #[arg(long, env = "PARLEY_FAILURE_THRESHOLD_MS")]
    failure_threshold_ms: Option<u64>,

    /// per-peer connect-and-reply timeout in milliseconds
    #[arg(long, env = "PARLEY_CONN_TIMEOUT_MS")]
    conn_timeout_ms: Option<u64>,

    /// number of peers each gossip emission targets
    #[arg(long, env = "PARLEY_GOSSIP_FANOUT")]
    gossip_fanout: Option<usize>,
}

/// Applies CLI overrides to the default protocol timings. Only `Some`
/// values take effect.
fn apply_args(cfg: &mut CoordinationConfig, args: &Args) {
    if let Some(ms) = args.heartbeat_ms {
        cfg.heartbeat_period = Duration::from_millis(ms);
        cfg.failure_check_period = Duration::from_millis(ms * 2);
    }
    if let Some(ms) = args.failure_threshold_ms {
        cfg.failure_threshold = Duration::from_millis(ms);
    }
    if let Some(ms) = args.conn_timeout_ms {
        cfg.conn_timeout = Duration::from_millis(ms);
    }
    if let Some(n) = args.gossip_fanout {
        cfg.gossip_fanout = n;
    }
}

/// Prints `msg` to stderr and exits with code 1.
fn exit_err(msg: impl std::fmt::Display) -> ! {
    eprintln!("{msg}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_server=info,parley_cluster=info".into()),
        )
        .init();

    let args = Args::parse();

    let registry = match PeerRegistry::from_file(&args.peers, PeerId(args.id)) {
        Ok(registry) => Arc::new(registry),
        Err(e) => exit_err(format!("error: {e}")),
    };

    let mut config = CoordinationConfig::default();
    apply_args(&mut config, &args);

    if let Err(e) = server::run(registry, config).await {
        exit_err(format!("server error: {e}"));
    }
}
