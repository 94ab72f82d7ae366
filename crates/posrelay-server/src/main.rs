use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use posrelay_server::config::ServerConfig;
use posrelay_server::registry::{self, Registry};
use posrelay_server::{server, snapshot};

/// Position relay server - authenticates players and relays their positions
#[derive(Parser, Debug)]
#[command(name = "posrelay-server", version, about)]
struct Args {
    /// Address to bind the server to
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = 11000)]
    port: u16,

    /// Maximum simultaneous connections; further clients wait for a free slot
    #[arg(short, long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..))]
    max_connections: u32,

    /// Per-read timeout in milliseconds
    #[arg(long, default_value_t = 15_000)]
    read_timeout_ms: u64,

    /// Per-write timeout in milliseconds
    #[arg(long, default_value_t = 15_000)]
    write_timeout_ms: u64,

    /// JSON roster to seed players from (defaults to the built-in roster)
    #[arg(long)]
    roster: Option<PathBuf>,

    /// Where registry snapshots are written
    #[arg(long, default_value = "players.json")]
    snapshot: PathBuf,

    /// Seconds between snapshots, 0 to only snapshot at startup
    #[arg(long, default_value_t = 60)]
    snapshot_interval_secs: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            bind: args.bind,
            port: args.port,
            max_connections: args.max_connections as usize,
            read_timeout: Duration::from_millis(args.read_timeout_ms),
            write_timeout: Duration::from_millis(args.write_timeout_ms),
            roster: args.roster,
            snapshot_path: args.snapshot,
            snapshot_interval: (args.snapshot_interval_secs > 0)
                .then(|| Duration::from_secs(args.snapshot_interval_secs)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posrelay_server=debug,posrelay_common=debug".into()),
        )
        .init();

    let config = ServerConfig::from(Args::parse());

    let players = match &config.roster {
        Some(path) => snapshot::load(path).await?,
        None => registry::default_roster(),
    };
    let registry = Arc::new(Registry::with_players(players));
    tracing::info!("Registry seeded with {} players", registry.len());

    let written = snapshot::save(&registry, &config.snapshot_path).await?;
    tracing::info!("Snapshot of {} players written to {}", written, config.snapshot_path.display());
    if let Some(every) = config.snapshot_interval {
        snapshot::spawn_periodic(registry.clone(), config.snapshot_path.clone(), every);
    }

    tracing::info!(
        "Starting posrelay server on {} (max {} connections)",
        config.addr(),
        config.max_connections
    );
    server::run(config, registry).await
}
