use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hbooking::config::{self, Config};
use hbooking::engine::Engine;
use hbooking::http::{self, AppState};
use hbooking::lifecycle::{CloseResult, Lifecycle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    hbooking::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::open(&config.wal_path())?);

    if let Some(path) = &config.schedules_file {
        let schedules = config::load_schedules(path)?;
        info!("seeding {} schedules from {}", schedules.len(), path.display());
        for schedule in schedules {
            engine.put_schedule(schedule).await?;
        }
    }

    let mut lifecycle = Lifecycle::new();
    lifecycle.listen_for_signals();

    let store_engine = engine.clone();
    lifecycle.register("booking store", move || close_store(store_engine));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("hbooking listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  handler_timeout: {:?}", config.handler_timeout);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let app = http::router(Arc::new(AppState {
        engine,
        handler_timeout: config.handler_timeout,
        shutdown: lifecycle.token(),
    }));
    let stop = lifecycle.token();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await
    });

    // Registered last, so in-flight requests drain before the store closes.
    let shutdown_timeout = config.shutdown_timeout;
    lifecycle.register("http server", move || drain_server(server, shutdown_timeout));

    lifecycle.wait().await;
    lifecycle.shutdown().await;
    info!("hbooking stopped");
    Ok(())
}

async fn close_store(engine: Arc<Engine>) -> CloseResult {
    engine.close().await?;
    Ok(())
}

async fn drain_server(server: JoinHandle<std::io::Result<()>>, timeout: Duration) -> CloseResult {
    match tokio::time::timeout(timeout, server).await {
        Ok(joined) => Ok(joined??),
        Err(_) => Err(format!("drain timeout after {timeout:?}").into()),
    }
}
