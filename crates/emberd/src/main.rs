//! emberd — the ember scaler daemon.
//!
//! One process serving the Assign/Idle API for every application it sees,
//! one scaler (warm pool + GC loop) per application key.
//!
//! # Usage
//!
//! ```text
//! emberd --listen 0.0.0.0:9000 --config /etc/ember/ember.toml
//! emberd --platform-addr http://10.0.0.1:50051
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ember_core::ScalerConfig;
use ember_platform::HttpPlatformClient;
use ember_scaler::ScalerManager;

#[derive(Parser)]
#[command(name = "emberd", about = "ember instance scaler daemon")]
struct Cli {
    /// Path to an ember.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file).
    #[arg(long)]
    listen: Option<String>,

    /// Platform endpoint (overrides the config file).
    #[arg(long)]
    platform_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,emberd=debug,ember=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ScalerConfig::from_file(path)?,
        None => ScalerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(addr) = cli.platform_addr {
        config.client_addr = addr;
    }
    let config = Arc::new(config);

    info!(
        platform = %config.client_addr,
        gc_interval = ?config.gc_interval,
        idle_ttl = ?config.idle_duration_before_gc,
        "emberd starting"
    );

    let platform = Arc::new(HttpPlatformClient::new(&config.client_addr)?);
    let manager = Arc::new(ScalerManager::new(Arc::clone(&config), platform));

    let router = ember_api::build_router(Arc::clone(&manager), &config);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(listen = %config.listen_addr, "api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            manager.shutdown_all().await;
        })
        .await?;

    Ok(())
}
