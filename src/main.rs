use cafe_flow::api::{self, AppContext};
use cafe_flow::config;
use cafe_flow::congestion::forecast::load_history;
use cafe_flow::polling::PollingOrchestrator;
use cafe_flow::upstream::http::{HttpCafeService, HttpDetectionService};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;

fn init_tracing(level: &str) {
    let max_level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(max_level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "cafe-flow starting"
    );

    let settings = config.polling_settings()?;
    tracing::info!(
        seat_interval_ms = settings.seat_interval.as_millis() as u64,
        viewer_interval_ms = settings.viewer_interval.as_millis() as u64,
        frame_interval_ms = settings.frame_interval.as_millis() as u64,
        live_video_cafes = settings.live_video_cafe_ids.len(),
        viewer_threshold = settings.viewer_threshold,
        "Polling configured"
    );

    let client = reqwest::Client::builder().build()?;
    let service = Arc::new(HttpCafeService::new(
        client.clone(),
        config.api_base_url(),
        config.credential().map(str::to_string),
    ));
    let detector = Arc::new(HttpDetectionService::new(
        client,
        config.detection_base_url(),
    ));
    tracing::info!(
        api = config.api_base_url(),
        detection = config.detection_base_url(),
        "Upstream services configured"
    );

    let history = match config.history_path() {
        Some(path) => load_history(path),
        None => {
            tracing::info!("No history path configured, forecasts will be empty");
            Vec::new()
        }
    };

    let orchestrator = Arc::new(PollingOrchestrator::new(service, detector, settings));
    let app = api::router(AppContext {
        orchestrator: Arc::clone(&orchestrator),
        history: Arc::new(history),
    });

    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down active views");
    orchestrator.shutdown().await?;

    Ok(())
}
