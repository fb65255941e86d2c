// Copyright (c) 2022, Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0
use axum::{
    extract::{
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dispatcher::{SubmitError, TxDispatcher};
use events::{EventsError, SubscriptionManager};
use prometheus::{Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use store::ReceiptStore;
use tower_http::trace::TraceLayer;
use types::{FromBlock, StreamDefinition, StreamUpdate, SubscriptionInfo, TxRequest};
use ws::WsServer;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    pub dispatcher: Arc<TxDispatcher>,
    pub receipts: ReceiptStore,
    pub ws: WsServer,
    pub registry: Registry,
}

/// Error surface of the REST API, mapped onto the status codes clients
/// depend on.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Backpressure(String),
    Upstream(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Backpressure(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Validation(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Backpressure(m)
            | ApiError::Upstream(m)
            | ApiError::Internal(m) => m.clone(),
        };
        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

impl From<EventsError> for ApiError {
    fn from(e: EventsError) -> Self {
        match e {
            EventsError::StreamNotFound(_) | EventsError::SubscriptionNotFound(_) => {
                ApiError::NotFound(e.to_string())
            }
            EventsError::StreamBusy(_) | EventsError::StreamNotSuspended(_) => {
                ApiError::Conflict(e.to_string())
            }
            EventsError::BadFilter(_) | EventsError::Validation(_) => {
                ApiError::Validation(e.to_string())
            }
            EventsError::Ledger(_) => ApiError::Upstream(e.to_string()),
            EventsError::Store(_) | EventsError::Webhook(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::QueueFull => ApiError::Backpressure(e.to_string()),
            SubmitError::Invalid(_) => ApiError::Validation(e.to_string()),
            SubmitError::ShuttingDown => ApiError::Internal(e.to_string()),
            SubmitError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ledger::LedgerError> for ApiError {
    fn from(e: ledger::LedgerError) -> Self {
        ApiError::Upstream(e.to_string())
    }
}

impl From<store::StoreError> for ApiError {
    fn from(e: store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/subscriptions", post(create_subscription).get(list_subscriptions))
        .route(
            "/subscriptions/:id",
            get(get_subscription).delete(delete_subscription),
        )
        .route("/subscriptions/:id/reset", post(reset_subscription))
        .route("/eventstreams", post(create_stream).get(list_streams))
        .route(
            "/eventstreams/:id",
            get(get_stream).patch(update_stream).delete(delete_stream),
        )
        .route("/eventstreams/:id/suspend", post(suspend_stream))
        .route("/eventstreams/:id/resume", post(resume_stream))
        .route("/transactions", post(send_transaction))
        .route("/query", post(query_chaincode))
        .route("/replies", get(list_replies))
        .route("/replies/:id", get(get_reply))
        .route("/ws", get(ws_upgrade))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<SubscriptionInfo>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let created = state.manager.create_subscription(request).await?;
    Ok(Json(created))
}

async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<SubscriptionInfo>> {
    Json(state.manager.list_subscriptions())
}

async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    Ok(Json(state.manager.get_subscription(&id)?))
}

async fn delete_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.delete_subscription(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest {
    from_block: FromBlock,
}

async fn reset_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .manager
        .reset_subscription(&id, request.from_block)
        .await?;
    Ok(Json(json!({ "id": id, "reset": true })))
}

async fn create_stream(
    State(state): State<AppState>,
    Json(request): Json<StreamDefinition>,
) -> Result<Json<StreamDefinition>, ApiError> {
    let created = state.manager.create_stream(request).await?;
    Ok(Json(created))
}

async fn list_streams(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.manager.list_streams()).unwrap_or_default())
}

async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stream = state.manager.get_stream(&id)?;
    Ok(Json(serde_json::to_value(stream).unwrap_or_default()))
}

async fn update_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StreamUpdate>,
) -> Result<Json<StreamDefinition>, ApiError> {
    Ok(Json(state.manager.update_stream(&id, update).await?))
}

async fn delete_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.delete_stream(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}

async fn suspend_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.suspend_stream(&id).await?;
    Ok(Json(json!({ "id": id, "suspended": true })))
}

async fn resume_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.manager.resume_stream(&id).await?;
    Ok(Json(json!({ "id": id, "resumed": true })))
}

#[derive(Deserialize)]
struct SendQuery {
    #[serde(default)]
    sync: bool,
}

async fn send_transaction(
    State(state): State<AppState>,
    Query(query): Query<SendQuery>,
    Json(request): Json<TxRequest>,
) -> Result<Response, ApiError> {
    if query.sync {
        let result = state.dispatcher.execute(request).await?;
        return Ok(Json(result.to_json()).into_response());
    }
    let id = state.dispatcher.submit(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "sent": true })),
    )
        .into_response())
}

async fn query_chaincode(
    State(state): State<AppState>,
    Json(request): Json<TxRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.dispatcher.query(request).await?;
    Ok(Json(json!({
        "result": String::from_utf8_lossy(&result)
    })))
}

#[derive(Deserialize)]
struct RepliesQuery {
    #[serde(default = "default_reply_limit")]
    limit: usize,
}

fn default_reply_limit() -> usize {
    100
}

async fn list_replies(
    State(state): State<AppState>,
    Query(query): Query<RepliesQuery>,
) -> Result<Json<Vec<types::Receipt>>, ApiError> {
    Ok(Json(state.receipts.list(query.limit)?))
}

async fn get_reply(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<types::Receipt>, ApiError> {
    state
        .receipts
        .get(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no reply for request {id}")))
}

async fn ws_upgrade(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move { state.ws.handle_socket(socket).await })
}

async fn metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    TextEncoder::new()
        .encode_to_string(&state.registry.gather())
        .map_err(|e| ApiError::Internal(e.to_string()))
}
