//! HTTP health and metrics endpoint of a container.
//!
//! `/health` answers `ok` while the container is alive. `/metrics` renders
//! Prometheus text built from a snapshot of the pools and the mesh counters
//! taken at scrape time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use meshim_channel::Event;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::container::Container;
use crate::error::{MeshError, Result};

/// Running totals a container keeps for its monitor.
#[derive(Debug, Default)]
pub(crate) struct MeshStats {
    forwarded: AtomicU64,
    pushed: AtomicU64,
    push_failed: AtomicU64,
}

impl MeshStats {
    pub(crate) fn forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pushed(&self) {
        self.pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn push_failed(&self) {
        self.push_failed.fetch_add(1, Ordering::Relaxed);
    }
}

struct MonitorState {
    container: Weak<Container>,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MonitorState {
    fn record(&self, container: &Container) {
        metrics::with_local_recorder(&self.recorder, || {
            let stats = container.stats();
            metrics::counter!("meshim_forwarded_total")
                .absolute(stats.forwarded.load(Ordering::Relaxed));
            metrics::counter!("meshim_pushed_total").absolute(stats.pushed.load(Ordering::Relaxed));
            metrics::counter!("meshim_push_failed_total")
                .absolute(stats.push_failed.load(Ordering::Relaxed));
            for pool in container.pools() {
                let service = pool.name().to_string();
                metrics::gauge!("meshim_pool_clients", "service" => service.clone())
                    .set(pool.len() as f64);
                metrics::gauge!("meshim_pool_ready_clients", "service" => service)
                    .set(pool.adult_services().len() as f64);
            }
        });
    }
}

async fn health(State(state): State<Arc<MonitorState>>) -> (StatusCode, &'static str) {
    match state.container.upgrade() {
        Some(_) => (StatusCode::OK, "ok"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "gone"),
    }
}

async fn render(State(state): State<Arc<MonitorState>>) -> (StatusCode, String) {
    let Some(container) = state.container.upgrade() else {
        return (StatusCode::SERVICE_UNAVAILABLE, String::new());
    };
    state.record(&container);
    (StatusCode::OK, state.handle.render())
}

/// Bind `listen` and serve the monitor until `quit` fires.
pub(crate) async fn serve(
    container: Weak<Container>,
    listen: &str,
    quit: Event,
) -> Result<SocketAddr> {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let state = Arc::new(MonitorState {
        container,
        recorder,
        handle,
    });
    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render))
        .with_state(state);

    let listener = TcpListener::bind(listen).await.map_err(MeshError::Monitor)?;
    let local = listener.local_addr().map_err(MeshError::Monitor)?;
    info!(listen = %local, "monitor started");

    tokio::spawn(async move {
        let stopped = async move { quit.done().await };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(stopped)
            .await
        {
            warn!(error = %err, "monitor stopped");
        }
    });
    Ok(local)
}
