mod booking;
mod config;
mod error;
mod ical_bridge;
mod server;

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env()?;

    // Log to stderr; stdout is the MCP stdio transport
    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("Invalid {} filter '{}'", config::ENV_LOG, config.log_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting Slotkeeper MCP server v{}", env!("CARGO_PKG_VERSION"));

    let server = server::SlotkeeperServer::new(&config);
    if let Some(path) = &config.seed_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        let seed: server::SeedFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse seed file {}", path.display()))?;
        let (businesses, services) = server.load_seed(seed).await;
        tracing::info!("Seeded {businesses} business(es) and {services} service(s) from {}", path.display());
    }

    let router = server.into_router();
    let service = router.serve(rmcp::transport::io::stdio()).await?;

    tracing::info!("Slotkeeper is ready");
    service.waiting().await?;

    Ok(())
}
