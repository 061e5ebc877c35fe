//! ==============================================================================
//! server.rs - web dashboard and json api
//! ==============================================================================
//!
//! purpose:
//!     serves the latest DashboardView published by the driver task.
//!     handlers never touch presenter state directly: reads go through the
//!     watch channel, actions are sent as commands.
//!
//! routes:
//!     - GET  /             html dashboard (render.rs)
//!     - GET  /api          current view as json
//!     - POST /api/refresh  manual refresh; replies with the outcome
//!     - POST /api/logout   end the session and stop the dashboard
//!
//! ==============================================================================

use crate::dashboard::{DashboardHandle, DashboardView};
use crate::error::DashboardError;
use crate::render::{render_page, DisplayZone};

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
struct ServerState {
    dashboard: DashboardHandle,
    zone: DisplayZone,
}

pub fn router(dashboard: DashboardHandle, zone: DisplayZone) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/logout", post(logout_handler))
        .layer(CorsLayer::permissive())
        .with_state(ServerState { dashboard, zone })
}

pub async fn run_server(bind: &str, dashboard: DashboardHandle, zone: DisplayZone) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "dashboard listening");
    axum::serve(listener, router(dashboard, zone)).await?;
    Ok(())
}

async fn dashboard_handler(State(state): State<ServerState>) -> Html<String> {
    Html(render_page(&state.dashboard.current(), &state.zone))
}

/// json api endpoint for programmatic access
async fn api_handler(State(state): State<ServerState>) -> Json<DashboardView> {
    Json(state.dashboard.current())
}

async fn refresh_handler(State(state): State<ServerState>) -> Response {
    match state.dashboard.refresh().await {
        Ok(outcome) => Json(serde_json::json!({"status": "ok", "outcome": outcome})).into_response(),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

/// signing out twice is fine
async fn logout_handler(State(state): State<ServerState>) -> Json<serde_json::Value> {
    match state.dashboard.sign_out().await {
        Ok(()) | Err(DashboardError::Stopped) => Json(serde_json::json!({"status": "ok"})),
        Err(e) => Json(serde_json::json!({"status": "error", "message": e.to_string()})),
    }
}
