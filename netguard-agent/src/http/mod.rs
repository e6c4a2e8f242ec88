use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State as AxumState;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http::StatusCode;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Result;

#[derive(Clone)]
pub struct State {
    ready: CancellationToken,
    registry: Arc<Registry>,
}

impl State {
    pub fn new(ready: CancellationToken, registry: Arc<Registry>) -> Self {
        Self { ready, registry }
    }

    pub fn ready(&self) -> Readiness {
        if self.ready.is_cancelled() {
            Readiness::Ready
        } else {
            Readiness::NotReady
        }
    }

    pub fn metrics(&self) -> String {
        let mut buffer = String::new();
        match prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            Ok(_) => buffer,
            Err(e) => {
                error!(%e, "failed to encode metrics");
                String::new()
            }
        }
    }
}

/// Serves `/metrics` and `/readyz` until `cancel` fires. `ready` is
/// cancelled by the agent once it can answer requests.
pub async fn serve_metrics(
    addr: SocketAddr,
    registry: Arc<Registry>,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("metrics listening on {}", addr);

    let state = Arc::new(State::new(ready, registry));
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

pub fn router(state: Arc<State>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn metrics(AxumState(handler): AxumState<Arc<State>>) -> String {
    handler.metrics()
}

async fn readyz(AxumState(handler): AxumState<Arc<State>>) -> Readiness {
    handler.ready()
}

pub enum Readiness {
    Ready,
    NotReady,
}

impl IntoResponse for Readiness {
    fn into_response(self) -> Response {
        match self {
            Readiness::Ready => (StatusCode::OK, "Ok").into_response(),
            Readiness::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "NotReady").into_response(),
        }
    }
}
