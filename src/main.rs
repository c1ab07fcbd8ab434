use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_router::{
    config::Config,
    discovery::create_service_discovery,
    proxy::RouterContext,
    routing::RoutingPolicy,
    stats::{EngineStatsScraper, RequestStatsMonitor, StatsLogger},
    utils::raise_fd_limit,
    web::WebServer,
};

#[derive(Parser)]
#[command(name = "llm-router")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A model-aware reverse proxy for OpenAI-compatible LLM inference engines")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("llm_router={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting LLM Router v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config).context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    config.validate().context("invalid configuration")?;

    // Each proxied request holds sockets open for its lifetime
    raise_fd_limit();

    // One shared client for proxying, scraping and discovery probes.
    // No total timeout: streamed completions stay open indefinitely.
    let http_client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;

    let discovery = create_service_discovery(&config.discovery, http_client.clone())
        .await
        .context("failed to initialize service discovery")?;
    info!("Service discovery initialized ({:?} mode)", config.discovery.mode);

    let request_stats = Arc::new(RequestStatsMonitor::new(
        config.monitoring.request_stats_window.as_secs_f64(),
    ));
    let engine_stats = Arc::new(EngineStatsScraper::new(
        Arc::clone(&discovery),
        http_client.clone(),
        config.monitoring.engine_stats_interval,
    ));
    info!(
        "Engine stats scraper started (interval {})",
        humantime::format_duration(config.monitoring.engine_stats_interval)
    );

    let policy = RoutingPolicy::from_config(&config.routing)?;

    let stats_logger = StatsLogger::new(
        Arc::clone(&discovery),
        Arc::clone(&engine_stats),
        Arc::clone(&request_stats),
        std::time::Duration::from_secs(10),
    );

    let context = Arc::new(RouterContext {
        discovery: Arc::clone(&discovery),
        engine_stats: Arc::clone(&engine_stats),
        request_stats,
        policy,
        http_client,
    });

    let server = WebServer::new(&config, context)?;
    info!("Starting web server on {}:{}", server.host(), server.port());
    server.serve().await?;

    info!("Closing stats logger");
    stats_logger.close().await;
    info!("Closing engine stats scraper");
    engine_stats.close().await;
    info!("Closing service discovery module");
    discovery.close().await;

    Ok(())
}
