//! gameq - query game servers from the command line
//!
//! Prints the status of every requested server as JSON.

use clap::Parser;
use gameq_core::{Config, Engine, ServerSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gameq")]
#[command(about = "Query game servers over their native protocols")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "GAMEQ_CONFIG")]
    config: Option<PathBuf>,

    /// Fail on the first server error instead of marking the server offline
    #[arg(short, long)]
    debug: bool,

    /// Query timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// List the supported protocol identifiers and exit
    #[arg(long)]
    list: bool,

    /// Servers to query, as KIND@HOST:PORT
    #[arg(required_unless_present = "list")]
    servers: Vec<ServerSpec>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => {
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    if cli.debug {
        config.debug = true;
    }
    if let Some(secs) = cli.timeout {
        config.query.timeout_secs = secs;
    }

    let mut engine = Engine::new(config)?;

    if cli.list {
        for kind in engine.registry().kinds() {
            println!("{}", kind);
        }
        return Ok(());
    }

    for (spec, e) in engine.add_servers_partial(cli.servers) {
        tracing::warn!("Skipping {}@{}: {}", spec.kind, spec.host, e);
    }
    let results: BTreeMap<_, _> = engine.process().await?.into_iter().collect();
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
