//! HTTP + WebSocket surface for the desk.

pub mod ws;

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channels::parse_raw;
use crate::desk::Desk;
use crate::error::{Error, StoreError, TransitionError, ValidationError};
use crate::orders::{NewOrder, OrderCommand, OrderState};
use crate::pipeline::routing::{RoutingRule, RoutingTable};
use crate::pipeline::types::NewMessage;

type ApiResponse = (StatusCode, Json<Value>);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub desk: Arc<Desk>,
}

/// Build the Axum router with REST routes and the escalation feed.
pub fn desk_routes(desk: Arc<Desk>) -> Router {
    let state = AppState { desk };

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/api/messages", post(ingest_message))
        .route("/api/messages/raw", post(ingest_raw))
        .route("/api/messages/{id}", get(get_message))
        .route("/api/messages/{id}/reply", post(dispatch_reply))
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/{id}", get(get_order))
        .route("/api/orders/{id}/transition", post(transition_order))
        .route("/api/routing", get(get_routing).put(reload_routing))
        .route("/api/escalations", get(list_escalations))
        .route("/api/escalations/scan", post(run_scan))
        .route("/api/escalations/{id}/resolve", post(resolve_escalation))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

fn error_response(err: &Error) -> ApiResponse {
    let (status, kind) = match err {
        Error::Validation(ValidationError::DuplicateMessage(_)) => (StatusCode::CONFLICT, "duplicate"),
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        Error::Transition(e @ TransitionError::NotFound { .. }) => (StatusCode::NOT_FOUND, e.kind()),
        Error::Transition(e @ TransitionError::Illegal { .. }) => (StatusCode::CONFLICT, e.kind()),
        Error::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Store(StoreError::Duplicate { .. }) => (StatusCode::CONFLICT, "duplicate"),
        Error::Config(_) => (StatusCode::BAD_REQUEST, "config_error"),
    };
    (status, Json(json!({ "error": kind, "message": err.to_string() })))
}

fn bad_request(message: impl Into<String>) -> ApiResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "validation_error", "message": message.into() })),
    )
}

fn not_found(entity: &str, id: Uuid) -> ApiResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found", "message": format!("{entity} {id} not found") })),
    )
}

fn parse_id(id: &str) -> Result<Uuid, ApiResponse> {
    Uuid::parse_str(id).map_err(|_| bad_request(format!("Invalid id: {id}")))
}

fn to_json<T: serde::Serialize>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_value(value) {
        Ok(v) => (status, Json(v)),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "serialization", "message": e.to_string() })),
        ),
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "order-desk"
    }))
}

// ── Messages ────────────────────────────────────────────────────────────

async fn ingest_message(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let new: NewMessage = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(e) => return bad_request(format!("Malformed message: {e}")),
    };
    process(&state, new).await
}

async fn ingest_raw(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match parse_raw(&body) {
        Ok(new) => process(&state, new).await,
        Err(e) => error_response(&Error::from(e)),
    }
}

async fn process(state: &AppState, new: NewMessage) -> ApiResponse {
    match state.desk.processor.process(new).await {
        Ok(outcome) => to_json(StatusCode::OK, &outcome),
        Err(e) => {
            warn!(error = %e, "Inbound message rejected");
            error_response(&e)
        }
    }
}

async fn get_message(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.desk.processor.get_message(id).await {
        Some(message) => to_json(StatusCode::OK, &message),
        None => not_found("message", id),
    }
}

async fn dispatch_reply(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.desk.processor.dispatch_reply(id).await {
        Ok(message) => to_json(StatusCode::OK, &message),
        Err(e) => error_response(&e),
    }
}

// ── Orders ──────────────────────────────────────────────────────────────

async fn list_orders(State(state): State<AppState>) -> impl IntoResponse {
    to_json(StatusCode::OK, &state.desk.orders.list().await)
}

async fn create_order(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let request: NewOrder = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("Malformed order: {e}")),
    };
    match state.desk.orders.execute(OrderCommand::Create(request)).await {
        Ok(order) => to_json(StatusCode::CREATED, &order),
        Err(e) => error_response(&e),
    }
}

async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.desk.orders.get(id).await {
        Some(order) => to_json(StatusCode::OK, &order),
        None => not_found("order", id),
    }
}

#[derive(Deserialize)]
struct TransitionRequest {
    target_state: String,
    #[serde(default)]
    actor: Option<String>,
}

async fn transition_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let order_id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let request: TransitionRequest = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("Malformed transition: {e}")),
    };
    let target_state: OrderState = match request.target_state.parse() {
        Ok(s) => s,
        Err(_) => return bad_request(format!("Unknown order state: {}", request.target_state)),
    };
    let actor = request.actor.unwrap_or_else(|| "api".to_string());

    let command = OrderCommand::Transition {
        order_id,
        target_state,
        actor,
    };
    match state.desk.orders.execute(command).await {
        Ok(order) => to_json(StatusCode::OK, &order),
        Err(e) => error_response(&e),
    }
}

// ── Routing ─────────────────────────────────────────────────────────────

async fn get_routing(State(state): State<AppState>) -> impl IntoResponse {
    to_json(StatusCode::OK, &*state.desk.router.snapshot())
}

/// Replace the routing table. Messages already in flight keep the old one.
async fn reload_routing(State(state): State<AppState>, Json(body): Json<Value>) -> impl IntoResponse {
    let rules: Vec<RoutingRule> = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("Malformed routing rules: {e}")),
    };
    match RoutingTable::new(rules) {
        Ok(table) => {
            state.desk.router.reload(table);
            to_json(StatusCode::OK, &*state.desk.router.snapshot())
        }
        Err(e) => error_response(&Error::from(e)),
    }
}

// ── Escalations ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EscalationQuery {
    resolved: Option<bool>,
}

async fn list_escalations(
    State(state): State<AppState>,
    Query(query): Query<EscalationQuery>,
) -> impl IntoResponse {
    let events = state.desk.escalations.list(query.resolved).await;
    to_json(StatusCode::OK, &events)
}

async fn run_scan(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.desk.monitor.scan().await;
    to_json(StatusCode::OK, &changed)
}

async fn resolve_escalation(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.desk.escalations.resolve_by_id(id).await {
        Some(event) => {
            info!(escalation_id = %id, "Escalation resolved via API");
            to_json(StatusCode::OK, &event)
        }
        None => not_found("open escalation", id),
    }
}
