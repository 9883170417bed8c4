use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use virtwatch::backend::BackendGateway;
use virtwatch::backend::mock::MockBackend;
use virtwatch::error::{BackendError, BackendResult};
use virtwatch::*;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Resolves a backend driver for a connection URI. The mock scheme ships
/// with the crate; real hypervisor drivers plug in here.
fn open_backend(uri: &str) -> BackendResult<Arc<dyn BackendGateway>> {
    if uri.starts_with("mock://") {
        return Ok(Arc::new(MockBackend::with_demo_inventory()));
    }
    Err(BackendError::Unavailable(format!(
        "no backend driver for uri: {uri}"
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let (events_tx, _) = broadcast::channel::<models::EventEnvelope>(
        app_config.publishing.broadcast_capacity,
    );

    let scheduler = Arc::new(scheduler::ConnectionScheduler::new(
        scheduler::SchedulerConfig::from_app(&app_config),
        events_tx,
    ));
    for uri in &app_config.connections.uris {
        let target = uri.clone();
        scheduler
            .add_connection(uri, move || open_backend(&target))
            .await;
    }
    scheduler.schedule(app_config.monitoring.poll_interval_ms);

    let ws_event_connections = Arc::new(AtomicUsize::new(0));
    let app = routes::app(scheduler.clone(), ws_event_connections);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                scheduler.shutdown();
            }
        }
    }

    Ok(())
}
