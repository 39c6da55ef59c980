use crate::agent::engine::Engine;
use crate::agent::samplers::Sampler;
use crate::agent::Config;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, decompression::RequestDecompressionLayer};
use tracing::{error, info};

use std::sync::Arc;
use std::time::Instant;

mod prometheus;
mod snapshot;

use snapshot::SnapshotBuilder;

struct AppState {
    snapshot: Mutex<SnapshotBuilder>,
}

pub async fn serve(
    config: Arc<Config>,
    engine: Arc<Engine>,
    samplers: Arc<Box<[Box<dyn Sampler>]>>,
) -> anyhow::Result<()> {
    let listen = config.general().listen()?;

    let state = Arc::new(AppState {
        snapshot: Mutex::new(SnapshotBuilder::new(
            engine,
            samplers,
            config.general().ttl(),
        )),
    });

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to listen on {listen}"))?;

    info!("serving metrics on: {listen}");

    axum::serve(listener, app(state))
        .await
        .context("failed to run http server")
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/metrics", get(metrics))
        .route("/metrics/binary", get(msgpack))
        .route("/metrics/json", get(json))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(RequestDecompressionLayer::new())
                .layer(CompressionLayer::new()),
        )
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut builder = state.snapshot.lock().await;
    let snapshot = builder.build(Instant::now()).await;

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus::render(snapshot),
    )
}

async fn msgpack(State(state): State<Arc<AppState>>) -> Result<Vec<u8>, StatusCode> {
    let mut builder = state.snapshot.lock().await;
    let snapshot = builder.build(Instant::now()).await;

    rmp_serde::encode::to_vec(snapshot).map_err(|e| {
        error!("failed to serialize snapshot: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn json(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut builder = state.snapshot.lock().await;
    let snapshot = builder.build(Instant::now()).await;

    serde_json::to_string(snapshot).map_err(|e| {
        error!("failed to serialize snapshot: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn root() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("httpred {version} Agent\nConnection and HTTP response counters by process\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::engine::{ContextKey, Settings};

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use std::time::Duration;

    fn state(engine: Arc<Engine>) -> Arc<AppState> {
        let samplers: Arc<Box<[Box<dyn Sampler>]>> = Arc::new(Vec::new().into_boxed_slice());

        Arc::new(AppState {
            snapshot: Mutex::new(SnapshotBuilder::new(engine, samplers, Duration::ZERO)),
        })
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[tokio::test]
    async fn root_banner() {
        let engine = Arc::new(Engine::new(Settings::default()));

        let (status, body) = get_body(app(state(engine)), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("httpred "));
    }

    #[tokio::test]
    async fn prometheus_exposition() {
        let engine = Arc::new(Engine::new(Settings::default()));
        let ctx = ContextKey::new(314, 315);

        engine.on_accept_entry(ctx, Default::default());
        engine.on_accept_exit(ctx, 6);
        engine.on_write_entry(ctx, 6, b"HTTP/1.1 404 Not Found\r\n", 24);
        engine.on_close_entry(ctx, 6);

        let (status, body) = get_body(app(state(engine)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);

        assert!(body.contains("# TYPE requests_started_connections_total counter\n"));
        assert!(body
            .lines()
            .any(|l| l.starts_with("requests_started_connections_total{")
                && l.contains("pid=\"314\"")
                && l.contains("} 1 ")));
        assert!(body
            .lines()
            .any(|l| l.starts_with("requests_closed_connections_total{")
                && l.contains("pid=\"314\"")
                && l.contains("} 1 ")));
        assert!(body
            .lines()
            .any(|l| l.starts_with("http_requests_total{")
                && l.contains("code=\"4\"")
                && l.contains("pid=\"314\"")
                && l.contains("} 1 ")));
        assert!(!body.contains("code=\"unknown\""));
    }

    #[tokio::test]
    async fn json_exposition() {
        let engine = Arc::new(Engine::new(Settings::default()));
        let ctx = ContextKey::new(2718, 2718);

        engine.on_accept_entry(ctx, Default::default());
        engine.on_accept_exit(ctx, 3);

        let (status, body) = get_body(app(state(engine)), "/metrics/json").await;
        assert_eq!(status, StatusCode::OK);

        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(value.to_string().contains("requests_started_connections_total"));
        assert!(value.to_string().contains("2718"));
    }

    #[tokio::test]
    async fn binary_exposition() {
        let engine = Arc::new(Engine::new(Settings::default()));

        let response = app(state(engine))
            .oneshot(
                Request::builder()
                    .uri("/metrics/binary")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!body.is_empty());

        let value: serde_json::Value = rmp_serde::from_slice(&body).unwrap();
        assert!(value.to_string().contains(env!("CARGO_PKG_VERSION")));
    }
}
