// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public and carries counters
// only; everything else requires the `AuthBearer` extractor, including the
// drop diagnostics with their payload excerpts. Reads come straight from the
// live store. The only writes are local notes edits and snapshot refreshes, both
// routed through the entity merger.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::{ConsoleSession, SessionHealth};
use crate::live::dispatcher::Diagnostic;

pub fn router(session: Arc<ConsoleSession>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/live", get(live_snapshot))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/positions/:instrument/notes", put(edit_notes))
        .route("/api/v1/watchlist", get(watchlist))
        .route("/api/v1/connectivity", get(connectivity))
        .route("/api/v1/orders/latest", get(latest_order))
        .route("/api/v1/diagnostics", get(diagnostics))
        .route("/api/v1/refresh", post(refresh))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(session)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    session: SessionHealth,
    server_time: i64,
}

async fn health(State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    let health = session.health();
    let status = if session.store.is_disposed() {
        "ended"
    } else if health.connectivity.ticks_connected && health.connectivity.orders_connected {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        session: health,
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Live reads (authenticated)
// =============================================================================

async fn live_snapshot(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    Json(session.store.snapshot())
}

async fn positions(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    Json(session.store.positions())
}

async fn watchlist(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    Json(session.store.watchlist())
}

async fn connectivity(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    Json(session.store.connectivity())
}

/// Recent dropped frames, with payload excerpts.
async fn diagnostics(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    let drops: Vec<Diagnostic> = session.dispatcher.recent_diagnostics();
    Json(drops)
}

async fn latest_order(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    Json(session.store.latest_order_update())
}

// =============================================================================
// Local writes (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct NotesBody {
    notes: String,
}

async fn edit_notes(
    _auth: AuthBearer,
    State(session): State<Arc<ConsoleSession>>,
    Path(instrument): Path<String>,
    Json(body): Json<NotesBody>,
) -> impl IntoResponse {
    if !session.merger.edit_notes(&instrument, &body.notes) {
        let body = serde_json::json!({ "error": format!("no position for {instrument}") });
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    info!(instrument = %instrument, "position notes updated");
    Json(session.store.position(&instrument)).into_response()
}

async fn refresh(_auth: AuthBearer, State(session): State<Arc<ConsoleSession>>) -> impl IntoResponse {
    let report = session.refresh_snapshots().await;
    let status = if report.errors.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, Json(report))
}
