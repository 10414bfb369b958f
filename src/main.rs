use anyhow::Context;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use venue_gateway::config::Settings;
use venue_gateway::exchange::{build_venues, Exchange};
use venue_gateway::types::AssetPair;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // .env is optional; real deployments set the secrets directly.
    let _ = dotenvy::dotenv();

    let config_dir = parse_args(&std::env::args().collect::<Vec<_>>());

    if let Err(err) = run(config_dir).await {
        error!(error = format!("{:#}", err).as_str(), "fatal startup error");
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> PathBuf {
    let mut config_dir = PathBuf::from("config");
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if i + 1 < args.len() {
                    config_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                eprintln!("usage: venue-gateway [--config <dir>]");
                std::process::exit(0);
            }
            other => {
                eprintln!("unknown argument: {}", other);
                std::process::exit(1);
            }
        }
        i += 1;
    }
    config_dir
}

async fn run(config_dir: PathBuf) -> anyhow::Result<()> {
    let settings = Settings::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    info!(
        venues = settings.venues.len(),
        pairs = settings.pair_names.len(),
        "configuration loaded"
    );

    let shutdown = CancellationToken::new();
    let venues = build_venues(&settings, &shutdown).await?;
    let pairs: Vec<AssetPair> =
        (0..settings.pair_names.len() as u32).map(AssetPair).collect();

    info!("all venues connected");

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                shutdown.cancel();
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        for venue in &venues {
            match venue.get_latency().await {
                Ok(latency) => info!(venue = venue.name(), ?latency, "venue reachable"),
                Err(err) => {
                    warn!(venue = venue.name(), error = %err, "latency probe failed");
                    continue;
                }
            }
            for &pair in &pairs {
                match venue.get_current_spread(pair).await {
                    Ok(spread) => info!(
                        venue = venue.name(),
                        pair = settings.pair_names[pair.0 as usize].as_str(),
                        bid = %spread.bid,
                        ask = %spread.ask,
                        "spread"
                    ),
                    Err(err) => warn!(
                        venue = venue.name(),
                        pair = settings.pair_names[pair.0 as usize].as_str(),
                        error = %err,
                        "spread unavailable"
                    ),
                }
            }
        }
    }
}
