//! Thin HTTP adapter over [`StockService`].
//!
//! Decodes requests, calls the service, and maps [`Error`] to a status code.
//! No stock logic lives here.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    Error, Inventory, Product, StockDelta,
    adapters::{InventoryAdapter, PoolStats},
    config::{ApplicationConfig, ServerConfig},
    service::StockService,
};

/// Error returned by handlers; renders as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::BadRequest(rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::HealthCheckFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

/// Counters of an adjustment request; the sku comes from the path.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AdjustRequest {
    pub available: i64,
    pub pending: i64,
    pub reserved: i64,
    pub sold: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub application: ApplicationConfig,
    pub server: ServerConfig,
}

pub struct AppState<A: InventoryAdapter> {
    pub service: Arc<StockService<A>>,
    pub info: Arc<AppInfo>,
    pub metrics: PrometheusHandle,
}

impl<A: InventoryAdapter> Clone for AppState<A> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            info: Arc::clone(&self.info),
            metrics: self.metrics.clone(),
        }
    }
}

pub fn router<A: InventoryAdapter>(state: AppState<A>) -> Router {
    Router::new()
        .route("/health", get(health::<A>))
        .route("/live", get(live))
        .route("/info", get(info::<A>))
        .route("/stat", get(stat::<A>))
        .route("/metrics", get(render_metrics::<A>))
        .route("/product", axum::routing::post(add_product::<A>))
        .route("/product/:sku", get(get_product::<A>))
        .route("/productId/:id", get(get_product_by_id::<A>))
        .route(
            "/inventory/product/:sku",
            get(get_inventory::<A>).put(adjust_inventory::<A>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
) -> Result<Json<Message>, ApiError> {
    state.service.health_check().await?;
    Ok(Json(Message {
        message: "true".to_string(),
    }))
}

async fn live() -> Json<Message> {
    Json(Message {
        message: "true".to_string(),
    })
}

async fn info<A: InventoryAdapter>(State(state): State<AppState<A>>) -> Json<AppInfo> {
    Json(state.info.as_ref().clone())
}

async fn stat<A: InventoryAdapter>(State(state): State<AppState<A>>) -> Json<PoolStats> {
    Json(state.service.stat())
}

async fn render_metrics<A: InventoryAdapter>(State(state): State<AppState<A>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

async fn add_product<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
    payload: Result<Json<Product>, JsonRejection>,
) -> Result<Json<Inventory>, ApiError> {
    let Json(product) = payload?;
    let inventory = state.service.add_product(product).await?;
    Ok(Json(inventory))
}

async fn get_product<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
    Path(sku): Path<String>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.service.get_product(&sku).await?))
}

async fn get_product_by_id<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(state.service.get_product_by_id(id).await?))
}

async fn get_inventory<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
    Path(sku): Path<String>,
) -> Result<Json<Inventory>, ApiError> {
    Ok(Json(state.service.get_inventory(&sku).await?))
}

async fn adjust_inventory<A: InventoryAdapter>(
    State(state): State<AppState<A>>,
    Path(sku): Path<String>,
    payload: Result<Json<AdjustRequest>, JsonRejection>,
) -> Result<Json<Inventory>, ApiError> {
    let Json(request) = payload?;
    let delta = StockDelta {
        sku,
        available: request.available,
        pending: request.pending,
        reserved: request.reserved,
        sold: request.sold,
    };
    Ok(Json(state.service.adjust_inventory(delta).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{Fault, MemoryAdapter};
    use crate::config::StockConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
    use tower::util::ServiceExt;

    fn app() -> Router {
        app_with(MemoryAdapter::new())
    }

    fn app_with(adapter: MemoryAdapter) -> Router {
        app_with_recorder(adapter, &PrometheusBuilder::new().build_recorder())
    }

    fn app_with_recorder(adapter: MemoryAdapter, recorder: &PrometheusRecorder) -> Router {
        let service = StockService::new(adapter, &StockConfig::default());
        router(AppState {
            service: Arc::new(service),
            info: Arc::new(AppInfo {
                application: ApplicationConfig::default(),
                server: ServerConfig::default(),
            }),
            metrics: recorder.handle(),
        })
    }

    fn request(method: Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    const PRODUCT: &str = r#"{"sku":"SKU-1","type":"book","name":"Rust","status":"active"}"#;

    #[tokio::test]
    async fn add_product_returns_seeded_inventory() {
        let app = app();
        let (status, body) = send(&app, request(Method::POST, "/product", PRODUCT)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 1000);
        assert_eq!(body["product"]["sku"], "SKU-1");
    }

    #[tokio::test]
    async fn duplicate_sku_is_conflict() {
        let app = app();
        send(&app, request(Method::POST, "/product", PRODUCT)).await;
        let (status, body) = send(&app, request(Method::POST, "/product", PRODUCT)).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("SKU-1"));
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let app = app();
        let (status, _) = send(&app, request(Method::POST, "/product", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_sku_is_not_found() {
        let app = app();
        let (status, _) = send(&app, request(Method::GET, "/product/nope", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            request(Method::PUT, "/inventory/product/nope", r#"{"available":1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn adjust_returns_baseline_plus_delta() {
        let app = app();
        send(&app, request(Method::POST, "/product", PRODUCT)).await;

        let (status, body) = send(
            &app,
            request(
                Method::PUT,
                "/inventory/product/SKU-1",
                r#"{"available":5,"sold":2}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 1005);
        assert_eq!(body["sold"], 2);
        assert!(body["updated_at"].is_string());

        let (status, body) = send(&app, request(Method::GET, "/inventory/product/SKU-1", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], 1005);
    }

    #[tokio::test]
    async fn negative_delta_is_bad_request() {
        let app = app();
        send(&app, request(Method::POST, "/product", PRODUCT)).await;
        let (status, _) = send(
            &app,
            request(Method::PUT, "/inventory/product/SKU-1", r#"{"available":-1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn product_by_id_resolves_created_product() {
        let app = app();
        let (_, body) = send(&app, request(Method::POST, "/product", PRODUCT)).await;
        let id = body["product"]["id"].as_i64().unwrap();

        let (status, body) = send(&app, request(Method::GET, &format!("/productId/{id}"), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sku"], "SKU-1");
    }

    #[tokio::test]
    async fn failing_store_makes_health_unavailable() {
        let adapter = MemoryAdapter::new();
        adapter.inject_fault(Fault::Ping);
        let app = app_with(adapter);

        let (status, _) = send(&app, request(Method::GET, "/health", "")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) = send(&app, request(Method::GET, "/live", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "true");
    }

    #[tokio::test]
    async fn metrics_route_renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("inventory.recovery_insert.total").increment(2);
        });
        let app = app_with_recorder(MemoryAdapter::new(), &recorder);

        let response = app
            .oneshot(request(Method::GET, "/metrics", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("inventory_recovery_insert_total 2"));
    }
}
