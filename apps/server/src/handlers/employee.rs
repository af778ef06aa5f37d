//! Employee API: each employee sees and annotates only their own
//! appointments, authenticated by their personal API key.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::handlers::admin::set_appointment_status;
use crate::models::*;
use crate::{auth, db, AppState};

async fn owned_appointment(
    state: &AppState,
    employee_id: i64,
    appointment_id: i64,
) -> Result<(), ApiError> {
    let owner: Option<i64> =
        sqlx::query_scalar("SELECT employee_id FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(&state.db)
            .await?;
    match owner {
        Some(id) if id == employee_id => Ok(()),
        // A foreign appointment looks like a missing one
        _ => Err(ApiError::NotFound("Запис не знайдено".into())),
    }
}

/// GET /api/employee/appointments — own schedule, optionally filtered by
/// date or range.
pub async fn my_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<ApiResponse<Vec<AppointmentDetail>>>, ApiError> {
    let employee = auth::require_employee(&headers, &state.db).await?;
    let appointments = db::list_appointments(
        &state.db,
        Some(employee.id),
        query.date.as_deref(),
        query.from.as_deref(),
        query.to.as_deref(),
    )
    .await?;
    Ok(Json(ApiResponse::success(appointments)))
}

/// PATCH /api/employee/appointments/{id}/notes — the employee's private
/// notes on a visit. Admin notes are not touchable from here.
pub async fn update_my_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(appointment_id): Path<i64>,
    Json(req): Json<UpdateNotesRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let employee = auth::require_employee(&headers, &state.db).await?;
    owned_appointment(&state, employee.id, appointment_id).await?;

    sqlx::query("UPDATE appointments SET employee_notes = ? WHERE id = ?")
        .bind(req.employee_notes.as_deref())
        .bind(appointment_id)
        .execute(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

/// POST /api/employee/appointments/{id}/complete — mark a visit done,
/// which queues the post-visit thank-you.
pub async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(appointment_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let employee = auth::require_employee(&headers, &state.db).await?;
    owned_appointment(&state, employee.id, appointment_id).await?;

    set_appointment_status(&state, appointment_id, "completed").await?;
    Ok(Json(ApiResponse::success(())))
}
