use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use veil_relay::{router, RelayConfig, RelayState};

/// End-to-end-encrypted realtime collaboration relay.
#[derive(Debug, Parser)]
#[command(name = "veil-relay", version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listen address from the config.
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = args
        .config
        .as_deref()
        .map_or_else(|| Ok(RelayConfig::default()), RelayConfig::load)?;

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(listen_addr = %config.listen_addr, "relay listening");

    let state = RelayState::new(config);
    let app = router(state);

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();

    drop(tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        signal_shutdown.cancel();
    }));

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("relay stopped");

    Ok(())
}
