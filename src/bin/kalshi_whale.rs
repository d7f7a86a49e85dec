use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use kalshi_whale::config::{AppConfig, CONFIG_PATH};
use kalshi_whale::detector::RandomDepth;
use kalshi_whale::engine::{self, CycleOutcome};
use kalshi_whale::query;
use kalshi_whale::reporter;
use kalshi_whale::server::{self, AppState};
use kalshi_whale::source::{KalshiClient, MarketSource};
use kalshi_whale::state::Tracker;

#[derive(Parser)]
#[command(name = "kalshi-whale", about = "Kalshi crypto market whale tracker")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// HTTP listen host
    #[arg(long)]
    host: Option<String>,

    /// HTTP API port
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket stream port
    #[arg(long)]
    ws_port: Option<u16>,

    /// Seconds between update cycles
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Run a single update cycle, print the results as JSON lines and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load_or_default(&args.config)?;
    config.apply_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(port) = args.ws_port {
        config.server.ws_port = port;
    }
    if let Some(secs) = args.poll_interval {
        config.settings.poll_interval_secs = secs;
    }
    config.validate()?;
    info!("Loaded config from {}", args.config.display());

    let source: Arc<dyn MarketSource> = Arc::new(KalshiClient::new(&config.settings)?);
    let tracker = Arc::new(Tracker::new(Box::new(RandomDepth::from_os_rng())));

    if args.once {
        return run_once(&tracker, source.as_ref()).await;
    }

    info!(
        "Starting KalshiWhale (upstream={} poll={}s http={} ws={})",
        config.settings.upstream_base_url,
        config.settings.poll_interval_secs,
        config.server.http_addr(),
        config.server.ws_addr(),
    );

    let http_listener = TcpListener::bind(config.server.http_addr())
        .await
        .with_context(|| format!("failed to bind HTTP API on {}", config.server.http_addr()))?;
    let ws_listener = TcpListener::bind(config.server.ws_addr())
        .await
        .with_context(|| format!("failed to bind WebSocket on {}", config.server.ws_addr()))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pump = tokio::spawn(engine::run_update_loop(
        Arc::clone(&tracker),
        Arc::clone(&source),
        config.settings.clone(),
        shutdown_rx.clone(),
    ));
    let http = tokio::spawn(server::serve_http(
        http_listener,
        AppState {
            tracker: Arc::clone(&tracker),
            source: Arc::clone(&source),
            api_key: config.server.api_key.clone(),
        },
        shutdown_rx.clone(),
    ));
    let ws = tokio::spawn(server::serve_websocket(
        ws_listener,
        Arc::clone(&tracker),
        config.settings.heartbeat(),
        shutdown_rx,
    ));

    info!("Running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    tracker.broadcaster().close_all();

    if let Err(e) = pump.await {
        warn!("Update loop task failed: {e}");
    }
    match http.await {
        Ok(Err(e)) => warn!("HTTP API error: {e}"),
        Err(e) => warn!("HTTP API task failed: {e}"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = ws.await {
        warn!("WebSocket task failed: {e}");
    }

    info!("KalshiWhale stopped");
    Ok(())
}

/// One fetch/detect cycle with results on stdout.
async fn run_once(tracker: &Tracker, source: &dyn MarketSource) -> Result<()> {
    // never flips; the single cycle runs to completion
    let (_tx, mut rx) = watch::channel(false);
    match engine::run_cycle(tracker, source, &mut rx).await {
        CycleOutcome::Applied(report) => {
            reporter::report_snapshot(&query::snapshot(tracker));
            reporter::report_signals(&report.signals);
            Ok(())
        }
        CycleOutcome::Empty | CycleOutcome::Cancelled => {
            anyhow::bail!("No crypto markets fetched from upstream")
        }
    }
}
