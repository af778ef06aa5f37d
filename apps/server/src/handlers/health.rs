use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub db_ok: bool,
    pub pending_outbox: i64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();

    // A growing backlog means the worker is stuck or deliveries keep failing.
    let pending_outbox: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notification_outbox WHERE status = 'pending'")
            .fetch_one(&state.db)
            .await
            .unwrap_or(-1);

    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        db_ok,
        pending_outbox,
    })
}
