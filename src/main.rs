use anyhow::Result;
use clap::Parser;
use mystbin_limiter::config::{Backend, Config};
use mystbin_limiter::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flags override the matching environment variables.
#[derive(Debug, Parser)]
#[command(name = "mystbin-limiter", version, about)]
struct Args {
    /// Address to listen on (BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// TOML file with zones, users and bans (LIMITS_FILE)
    #[arg(long)]
    limits_file: Option<PathBuf>,

    /// Bucket backend: memory or external (RATELIMIT_BACKEND)
    #[arg(long)]
    backend: Option<Backend>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(path) = args.limits_file {
        config.limits_file = Some(path);
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("mystbin_limiter={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MystBin limiter");
    tracing::info!(
        "Configuration: bind_addr={}, backend={}, limits_file={:?}",
        config.bind_addr,
        config.backend,
        config.limits_file
    );

    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server.run().await?;

    Ok(())
}
