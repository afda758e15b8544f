use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use osm_client::{NominatimClient, OverpassClient};
use steward_common::{Config, Coordinate};
use steward_inference::cache::CacheBackend;
use steward_inference::fetcher::HttpPageFetcher;
use steward_inference::notify::{dispatch, LogNotifier, ReportContext};
use steward_inference::store::PgCacheBackend;
use steward_inference::{InferenceStatus, Steward, StewardDeps};

#[derive(Parser)]
#[command(name = "steward", about = "Infer point-of-contact emails for a reported location")]
#[command(version)]
struct Cli {
    /// Latitude in degrees (WGS84)
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude in degrees (WGS84)
    #[arg(long, allow_hyphen_values = true)]
    lng: f64,

    /// Free-text description of the reported issue
    #[arg(long, default_value = "")]
    report: String,

    /// Override STEWARD_MAX_RESULTS for this call
    #[arg(long)]
    max_results: Option<usize>,

    /// Dry-run delivery: log each recipient instead of sending
    #[arg(long)]
    notify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("steward=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let overpass = OverpassClient::new(&config.overpass_url, &config.user_agent, config.op_timeout)?;
    let nominatim = NominatimClient::new(&config.nominatim_url, &config.user_agent, config.op_timeout)?;
    let fetcher = HttpPageFetcher::new(&config.user_agent, config.op_timeout)?;

    let cache_backend: Option<Arc<dyn CacheBackend>> = match &config.database_url {
        Some(url) => {
            let backend = PgCacheBackend::connect(url).await?;
            backend.migrate().await?;
            let purged = backend.purge_expired(config.cache_ttl).await?;
            info!(purged, "Postgres evidence cache ready");
            Some(Arc::new(backend))
        }
        None => None,
    };

    let steward = Steward::new(
        StewardDeps::builder()
            .spatial(Arc::new(overpass))
            .places(Arc::new(nominatim))
            .fetcher(Arc::new(fetcher))
            .cache_backend(cache_backend)
            .config(config)
            .build(),
    )?;

    let at = Coordinate::new(cli.lat, cli.lng);
    let outcome = steward.infer(at, &cli.report, cli.max_results).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if cli.notify && outcome.status == InferenceStatus::Found {
        let context = ReportContext {
            coordinate: at,
            report_text: cli.report.clone(),
        };
        let report = dispatch(&LogNotifier, &outcome.result, &context).await;
        if let Err(e) = report.into_result() {
            warn!(error = %e, "Delivery incomplete");
        }
    }

    Ok(())
}
