//! Admin/inspection HTTP surface. Pairs the feature routes with
//! status/metrics routes the way this service's other HTTP surfaces
//! always do.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use ruler_api::TenantId;
use tower_http::trace::TraceLayer;

use crate::inspection;
use crate::metrics::REGISTRY;
use crate::registry::EvaluatorRegistry;
use crate::ring::Ring;
use crate::tenant_context::TENANT_HEADER_NAME;

pub struct AppState {
    pub registry: Arc<EvaluatorRegistry>,
    pub ring: Option<Arc<dyn Ring>>,
    pub client: reqwest::Client,
    pub enable_sharding: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ruler", get(ruler_status))
        .route("/ruler/rule_groups", get(rule_groups))
        .route("/ruler/rule_groups/local", get(rule_groups_local))
        .route("/metrics", get(metrics_handler))
        .route("/ready", get(|| async { StatusCode::OK }))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /ruler`: delegates to the ring's own status page when sharding is
/// enabled (the ring subsystem owns that page; it is external to this
/// crate), otherwise a static page reporting shards-disabled, HTTP 200
/// either way.
async fn ruler_status(State(state): State<Arc<AppState>>) -> Html<&'static str> {
    if state.enable_sharding {
        Html(
            "<html><body><h1>ruler</h1><p>Sharding enabled; \
             see the ring status page for membership.</p></body></html>",
        )
    } else {
        Html("<html><body><h1>ruler</h1><p>Shards disabled: this replica evaluates every rule group.</p></body></html>")
    }
}

fn tenant_from_headers(headers: &HeaderMap) -> Result<TenantId, Response> {
    headers
        .get(TENANT_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(TenantId::new)
        .ok_or_else(|| {
            (StatusCode::BAD_REQUEST, format!("missing {TENANT_HEADER_NAME} header")).into_response()
        })
}

/// `GET /ruler/rule_groups`: the caller-facing inspection RPC. Local-only
/// when sharding is disabled; unions every replica's local snapshot
/// otherwise.
async fn rule_groups(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(r) => return r,
    };

    let ring = if state.enable_sharding {
        state.ring.as_ref()
    } else {
        None
    };

    match inspection::rules_for(ring, &state.client, &state.registry, &tenant).await {
        Ok(groups) => Json(groups).into_response(),
        Err(e) => {
            tracing::warn!(tenant = %tenant.as_str(), error = %e, "rule inspection aggregation failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// `GET /ruler/rule_groups/local`: always this replica's own snapshot.
/// This is the route peers call on each other during sharded aggregation;
/// it never itself fans out.
async fn rule_groups_local(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(r) => return r,
    };
    Json(inspection::local_rules(&state.registry, &tenant).await).into_response()
}

async fn metrics_handler() -> Response {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response();
    }
    (
        StatusCode::OK,
        [("content-type", encoder.format_type())],
        buffer,
    )
        .into_response()
}

/// Binds and serves the admin HTTP surface until `cancel` fires.
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "admin HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::test_double::{NullQueryable, RecordingPusher, ScriptedEngine};
    use crate::mapper::FileMapper;
    use crate::notifier::NotifierPool;
    use axum::body::Body;
    use axum::http::Request;
    use ruler_api::NotifierConfig;
    use tower::ServiceExt;

    fn state() -> (camino_tempfile::Utf8TempDir, Arc<AppState>) {
        let dir = camino_tempfile::tempdir().unwrap();
        let mapper = Arc::new(FileMapper::new(dir.path().to_path_buf()));
        let notifiers = Arc::new(
            NotifierPool::new(NotifierConfig {
                alertmanager_url: vec!["http://alertmanager:9093".to_string()],
                ..Default::default()
            })
            .unwrap(),
        );
        let registry = Arc::new(EvaluatorRegistry::new(
            mapper,
            notifiers,
            Arc::new(ScriptedEngine::new()),
            Arc::new(NullQueryable),
            Arc::new(RecordingPusher::new()),
            Duration::from_secs(60),
        ));
        let state = Arc::new(AppState {
            registry,
            ring: None,
            client: reqwest::Client::new(),
            enable_sharding: false,
        });
        (dir, state)
    }

    #[tokio::test]
    async fn ruler_status_reports_disabled_when_sharding_off() {
        let (_dir, app_state) = state();
        let app = router(app_state);
        let response = app
            .oneshot(Request::get("/ruler").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rule_groups_requires_tenant_header() {
        let (_dir, app_state) = state();
        let app = router(app_state);
        let response = app
            .oneshot(Request::get("/ruler/rule_groups").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let (_dir, app_state) = state();
        let app = router(app_state);
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_and_healthz_report_ok() {
        for path in ["/ready", "/healthz"] {
            let (_dir, app_state) = state();
            let app = router(app_state);
            let response = app
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }
}
