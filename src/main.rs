use peercall::config::Config;
use peercall::interface::metrics::init_metrics;
use peercall::interface::SignalingRelay;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting peercall signaling relay");

    let config = Config::load()?;
    info!("Configuration loaded: {:?}", config.relay);

    let mut relay = SignalingRelay::new();
    match init_metrics() {
        Ok(handle) => {
            info!("Prometheus metrics exported on /metrics");
            relay = relay.with_metrics(handle);
        }
        Err(e) => warn!("Metrics disabled: {}", e),
    }

    let listener = SignalingRelay::bind(&config.relay).await?;
    relay
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
        })
        .await?;

    info!("Signaling relay stopped");
    Ok(())
}
