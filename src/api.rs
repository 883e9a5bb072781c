//! REST API Server for the notification gatekeeper
//!
//! Thin HTTP adapter: the mobile client posts notifications here and reads
//! its briefing and alert feed back.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::agent::RoutingOrchestrator;
use crate::briefing::{BriefingService, DEFAULT_ALERT_LIMIT};
use crate::extractors::default_currency_for;
use crate::models::{Account, NotificationEvent};

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookRequest {
    /// UUID, or any stable client-side identifier
    pub user_id: String,
    pub source_app: String,
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterAccountRequest {
    pub user_id: String,
    pub institution_name: String,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Pipeline failure: `{status: "error", message}` in `data`.
    pub fn pipeline_error(message: String) -> Self {
        Self {
            success: false,
            data: Some(serde_json::json!({
                "status": "error",
                "message": message,
            })),
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<RoutingOrchestrator>,
    pub briefing: Arc<BriefingService>,
}

/// =============================
/// Helpers — user id parsing
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Clients may send integer or free-form ids; those map to a stable UUID.
pub fn parse_user_id(value: &str) -> Option<Uuid> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some(Uuid::parse_str(value).unwrap_or_else(|_| stable_uuid_from_string(value)))
}

fn bad_request(message: &str) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::error(message.to_string())),
    )
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Webhook Endpoint
/// =============================

async fn receive_notification(
    State(state): State<ApiState>,
    Json(req): Json<WebhookRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(user_id) = parse_user_id(&req.user_id) else {
        return bad_request("user_id is required");
    };
    if req.source_app.trim().is_empty() {
        return bad_request("source_app is required");
    }

    info!(%user_id, source_app = %req.source_app, "Received notification");

    let event = NotificationEvent {
        user_id,
        source_app: req.source_app,
        content: req.content,
        title: req.title,
        language: req.language,
        received_at: req.received_at.unwrap_or_else(Utc::now),
    };

    match state.orchestrator.process(event).await {
        Ok(run) => (StatusCode::OK, Json(ApiResponse::success(run.response))),
        Err(e) => {
            error!(%user_id, error = %e, "Notification processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::pipeline_error(e.to_string())),
            )
        }
    }
}

/// =============================
/// Account Registration
/// =============================

async fn register_account(
    State(state): State<ApiState>,
    Json(req): Json<RegisterAccountRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(user_id) = parse_user_id(&req.user_id) else {
        return bad_request("user_id is required");
    };
    let institution = req.institution_name.trim();
    if institution.is_empty() {
        return bad_request("institution_name is required");
    }

    let currency = req
        .currency
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| default_currency_for(state.orchestrator.default_language()))
        .to_string();

    let account = Account::new(user_id, institution, &currency);

    match state.orchestrator.store().register_account(account).await {
        Ok(account) => {
            info!(%user_id, institution = %account.institution_name, "Account registered");
            (StatusCode::OK, Json(ApiResponse::success(account)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Account registration failed: {}", e))),
        ),
    }
}

/// =============================
/// Mobile Endpoints
/// =============================

async fn fetch_briefing(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(user_id) = parse_user_id(&query.user_id) else {
        return bad_request("user_id is required");
    };

    match state.briefing.fetch_briefing(user_id).await {
        Ok(briefing) => (StatusCode::OK, Json(ApiResponse::success(briefing))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Briefing failed: {}", e))),
        ),
    }
}

async fn fetch_alerts(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(user_id) = parse_user_id(&query.user_id) else {
        return bad_request("user_id is required");
    };
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT);

    match state.briefing.recent_alerts(user_id, limit).await {
        Ok(alerts) => (StatusCode::OK, Json(ApiResponse::success(alerts))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Alert feed failed: {}", e))),
        ),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<RoutingOrchestrator>) -> Router {
    let briefing = Arc::new(BriefingService::new(orchestrator.store()));
    let state = ApiState {
        orchestrator,
        briefing,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/webhook", post(receive_notification))
        .route("/api/v1/accounts", post(register_account))
        .route("/api/v1/mobile/briefing", get(fetch_briefing))
        .route("/api/v1/mobile/alerts", get(fetch_alerts))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<RoutingOrchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::FallbackAppNameResolver;
    use crate::config::GatekeeperConfig;
    use crate::currency::CurrencyNormalizer;
    use crate::oracle::ScriptedModel;
    use crate::prompts::Prompts;
    use crate::state::{InMemoryStore, Store};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(store: Arc<InMemoryStore>, replies: &[&str]) -> Router {
        let orchestrator = RoutingOrchestrator::from_config(
            &GatekeeperConfig::default(),
            Arc::new(ScriptedModel::json(replies)),
            store,
            Arc::new(CurrencyNormalizer::offline()),
            Arc::new(FallbackAppNameResolver),
            Prompts::default(),
        );
        create_router(Arc::new(orchestrator))
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_parse_user_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&id.to_string()), Some(id));
        assert_eq!(parse_user_id("42"), parse_user_id(" 42 "));
        assert_ne!(parse_user_id("42"), parse_user_id("43"));
        assert_eq!(parse_user_id("  "), None);
    }

    #[tokio::test]
    async fn test_health() {
        let router = app(Arc::new(InMemoryStore::new()), &[]);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_webhook_returns_pipeline_response() {
        let store = Arc::new(InMemoryStore::new());
        let router = app(
            store.clone(),
            &[r#"{"classification": "OTHER", "is_spam": false, "priority": 2, "summary": "Hello"}"#],
        );

        let (status, body) = send(
            router,
            post_json(
                "/api/v1/webhook",
                serde_json::json!({
                    "user_id": "42",
                    "source_app": "Zalo",
                    "content": "Hello there"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["classification"], "OTHER");
        assert_eq!(body["data"]["priority"], 2);
        assert!(body["data"]["finance_data"].is_null());

        let user_id = parse_user_id("42").unwrap();
        assert_eq!(store.logs_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_webhook_commit_failure_is_500() {
        let store = Arc::new(InMemoryStore::new());
        store.simulate_commit_failure(true);
        let router = app(store, &[]);

        let (status, body) = send(
            router,
            post_json(
                "/api/v1/webhook",
                serde_json::json!({
                    "user_id": "42",
                    "source_app": "Zalo",
                    "content": "Hello"
                }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["status"], "error");
    }

    #[tokio::test]
    async fn test_webhook_rejects_missing_source() {
        let router = app(Arc::new(InMemoryStore::new()), &[]);
        let (status, body) = send(
            router,
            post_json(
                "/api/v1/webhook",
                serde_json::json!({"user_id": "42", "source_app": " ", "content": "x"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "source_app is required");
    }

    #[tokio::test]
    async fn test_register_account_defaults_currency() {
        let store = Arc::new(InMemoryStore::new());
        let router = app(store.clone(), &[]);

        let (status, body) = send(
            router,
            post_json(
                "/api/v1/accounts",
                serde_json::json!({"user_id": "7", "institution_name": "MBBank"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currency"], "VND");
        assert_eq!(body["data"]["balance"], 0.0);

        let accounts = store
            .accounts_for_user(parse_user_id("7").unwrap())
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
    }

    #[tokio::test]
    async fn test_briefing_and_alerts_endpoints() {
        let store = Arc::new(InMemoryStore::new());
        let finance = r#"{"classification": "FINANCE", "is_spam": false, "priority": 4, "summary": "Card payment"}"#;
        let router = app(store.clone(), &[finance]);

        // Untrusted finance source: becomes a RISK log
        let (status, _) = send(
            router.clone(),
            post_json(
                "/api/v1/webhook",
                serde_json::json!({"user_id": "9", "source_app": "FakeBank", "content": "Pay now"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let request = Request::builder()
            .uri("/api/v1/mobile/alerts?user_id=9")
            .body(Body::empty())
            .unwrap();
        let (_, alerts) = send(router.clone(), request).await;
        assert_eq!(alerts["data"][0]["category"], "RISK");
        assert_eq!(alerts["data"][0]["source"], "FakeBank");

        let request = Request::builder()
            .uri("/api/v1/mobile/briefing?user_id=9")
            .body(Body::empty())
            .unwrap();
        let (_, briefing) = send(router.clone(), request).await;
        assert_eq!(briefing["data"]["items"], 1);

        let request = Request::builder()
            .uri("/api/v1/mobile/briefing?user_id=9")
            .body(Body::empty())
            .unwrap();
        let (_, again) = send(router, request).await;
        assert_eq!(again["data"]["briefing"], "No new updates.");
    }
}
