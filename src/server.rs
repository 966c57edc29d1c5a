use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Extension, Json as AxumJson, Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::config::Config;
use crate::pipeline::tasks::{
    ingest_run, promote_run, train_run, IngestParams, PromoteParams, TrainParams,
};
use crate::registry::ModelRegistry;
use crate::serving::{error_response, PredictionService};

/// Shared state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ModelRegistry>,
    pub service: PredictionService,
}

impl AppState {
    pub fn new(config: Config, registry: Arc<ModelRegistry>) -> Self {
        let timeout = Duration::from_millis(config.server.predict_timeout_ms);
        let service = PredictionService::new(registry.clone(), timeout);
        Self {
            config,
            registry,
            service,
        }
    }
}

/// Health check endpoint
async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let champion = state.registry.champion();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "auction-pricer",
        "version": env!("CARGO_PKG_VERSION"),
        "champion_loaded": champion.is_some(),
        "schema_version": champion.map(|c| c.schema_version.clone()),
    }))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    match crate::observability::render() {
        Some(body) => (StatusCode::OK, body),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// POST /predict: validate and score one ad-hoc record through the champion
/// bundle's frozen transformation path.
async fn predict(
    Extension(state): Extension<Arc<AppState>>,
    AxumJson(payload): AxumJson<serde_json::Value>,
) -> impl IntoResponse {
    match state.service.predict(payload).await {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))).into_response(),
        Err(e) => {
            let (status, body) = error_response(&e);
            (
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                Json(serde_json::json!(body)),
            )
                .into_response()
        }
    }
}

/// Create the HTTP server with all routes.
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/predict", post(predict))
        // Admin/task endpoints
        .route(
            "/admin/ingest",
            post({
                let st = state.clone();
                move |AxumJson(p): AxumJson<IngestParams>| {
                    let st = st.clone();
                    async move {
                        match ingest_run(&st.config, p).await {
                            Ok(res) => Json(serde_json::json!(res)).into_response(),
                            Err(e) => {
                                error!("admin ingest failed: {e}");
                                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                            }
                        }
                    }
                }
            }),
        )
        .route(
            "/admin/train",
            post({
                let st = state.clone();
                move |AxumJson(p): AxumJson<TrainParams>| {
                    let st = st.clone();
                    async move {
                        match train_run(&st.config, p).await {
                            Ok(res) => Json(serde_json::json!(res)).into_response(),
                            Err(e) => {
                                error!("admin train failed: {e}");
                                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                            }
                        }
                    }
                }
            }),
        )
        .route(
            "/admin/promote",
            post({
                let st = state.clone();
                move |AxumJson(p): AxumJson<PromoteParams>| {
                    let st = st.clone();
                    async move {
                        match promote_run(&st.registry, &st.config, p).await {
                            Ok(res) => Json(serde_json::json!(res)).into_response(),
                            Err(e) => {
                                let (status, body) = error_response(&e);
                                (
                                    StatusCode::from_u16(status)
                                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                                    Json(serde_json::json!(body)),
                                )
                                    .into_response()
                            }
                        }
                    }
                }
            }),
        )
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("🎯 Predictions:  POST http://localhost:{port}/predict");
    println!("📈 Metrics:      http://localhost:{port}/metrics");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
