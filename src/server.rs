//! Webhook HTTP surface.
//!
//! Routing and auth middleware are thin by design: tenant resolution
//! happens against a [`TenantResolver`] and the resolved tenant is handed
//! to the pipeline as-is. The responder returns success once the message
//! is durably normalized, even when media ingestion degraded — telling
//! the provider to redeliver would not fix storage and would duplicate
//! downstream events.

use crate::domain::Tenant;
use crate::error::PipelineError;
use crate::observability::metrics;
use crate::pipeline::{MessageOutcome, WebhookPipeline};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Maps a caller-presented token to a tenant. Real deployments back this
/// with the account service; tests and single-box installs use the static
/// variant below.
pub trait TenantResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Option<Tenant>;
}

pub struct StaticTenantResolver {
    by_token: HashMap<String, Tenant>,
}

impl StaticTenantResolver {
    pub fn new(entries: impl IntoIterator<Item = (String, Tenant)>) -> Self {
        Self {
            by_token: entries.into_iter().collect(),
        }
    }
}

impl TenantResolver for StaticTenantResolver {
    fn resolve(&self, token: &str) -> Option<Tenant> {
        self.by_token.get(token).cloned()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<WebhookPipeline>,
    pub tenants: Arc<dyn TenantResolver>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/message", get(verify_webhook).post(on_message))
        .route("/webhook/status", post(on_status))
        .route("/webhook/connection", post(on_connection_status))
        .with_state(state)
}

pub async fn serve(state: AppState, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("webhook server listening on {}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Meta webhook verification handshake: echo the challenge when the mode
/// is a subscribe request.
#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_webhook(Query(params): Query<VerifyParams>) -> Response {
    if params.mode.as_deref() == Some("subscribe") {
        info!("webhook verification succeeded");
        return (StatusCode::OK, params.challenge.unwrap_or_default()).into_response();
    }
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

fn resolve_tenant(state: &AppState, headers: &axum::http::HeaderMap) -> Option<Tenant> {
    let token = headers.get("x-tenant-token")?.to_str().ok()?;
    state.tenants.resolve(token)
}

async fn on_message(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let Some(tenant) = resolve_tenant(&state, &headers) else {
        metrics::webhook::rejected("no_tenant");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    match state.pipeline.handle_message(payload, &tenant).await {
        Ok(MessageOutcome::Message(message)) => {
            let media = message.content.media();
            Json(json!({
                "status": "OK",
                "messageId": message.message_id,
                "type": message.content.type_str(),
                "mediaProcessed": media.map(|m| m.processed).unwrap_or(false),
                "tenantBucket": tenant.uuid,
                "mediaUrl": media.and_then(|m| m.url.clone()),
                "urlExpiresAt": media.and_then(|m| m.url_expires_at.clone()),
            }))
            .into_response()
        }
        Ok(MessageOutcome::Status(status)) => Json(json!({
            "status": "OK",
            "messageId": status.message_id,
            "type": status.status,
            "tenantBucket": tenant.uuid,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn on_status(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let Some(tenant) = resolve_tenant(&state, &headers) else {
        metrics::webhook::rejected("no_tenant");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    match state.pipeline.handle_status(payload, &tenant).await {
        Ok(status) => Json(json!({
            "status": "OK",
            "messageId": status.message_id,
            "type": status.status,
            "tenantBucket": tenant.uuid,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn on_connection_status(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let Some(tenant) = resolve_tenant(&state, &headers) else {
        metrics::webhook::rejected("no_tenant");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };

    match state
        .pipeline
        .handle_connection_status(payload, &tenant)
        .await
    {
        Ok(status) => Json(serde_json::to_value(&status).unwrap_or(Value::Null)).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: PipelineError) -> Response {
    error!(error = %e, "webhook handling failed");
    metrics::webhook::rejected("pipeline_error");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "ERROR", "message": e.to_string()})),
    )
        .into_response()
}
