mod chart;
mod config;
mod error;
mod forecast;
mod pipeline;
mod quartz;
mod reference;
mod server;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::pipeline::Snapshot;
use crate::quartz::QuartzClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => server::start_server(config).await,
        Some("summary") => print_summary(&config).await,
        Some(other) => anyhow::bail!("Unknown command {:?} (expected `serve` or `summary`)", other),
    }
}

/// Run the pipeline once and print the global series as CSV
async fn print_summary(config: &Config) -> Result<()> {
    let provider = QuartzClient::new(config.provider_url.clone(), config.provider_timeout)?;
    let snapshot = Snapshot::build(config, &provider).await?;

    for (code, reason) in &snapshot.skipped {
        eprintln!("skipped {}: {}", code, reason);
    }

    let global = snapshot.global_series();
    if snapshot.table.is_empty() {
        println!("No forecast data available");
        return Ok(());
    }

    println!("Timestamp,Power (GW)");
    for point in &global.points {
        println!("{},{:.3}", point.timestamp.to_rfc3339(), point.power_gw);
    }

    if let Some(peak) = global.peak() {
        eprintln!(
            "Peak {:.2} GW at {} ({} countries, {:.2} GW installed)",
            peak.power_gw,
            peak.timestamp.format("%Y-%m-%d %H:%M UTC"),
            snapshot.table.country_count(),
            snapshot.capacities.total()
        );
    }

    Ok(())
}
