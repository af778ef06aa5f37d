//! Public booking API: browse employees and their offerings, check
//! availability, create an appointment. No authentication; these routes
//! sit behind the public and booking rate-limit tiers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::*;
use crate::notify::{outbox, EventType};
use crate::{db, kyiv, phone, slots, AppState};

/// GET /api/employees — active employees, for the booking picker.
pub async fn list_employees(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Vec<Employee>>>, ApiError> {
    let employees = sqlx::query_as::<_, Employee>(
        "SELECT id, display_name, bio, is_active, created_at
         FROM employees WHERE is_active = 1 ORDER BY display_name ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(employees)))
}

/// GET /api/employees/{id}/services — what this employee offers, with
/// their price and duration.
pub async fn list_employee_services(
    State(state): State<Arc<AppState>>,
    Path(employee_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<EmployeeService>>>, ApiError> {
    let offerings = sqlx::query_as::<_, EmployeeService>(
        "SELECT es.id, es.employee_id, es.service_id, s.name AS service_name,
                es.price, es.duration_minutes, es.is_active
         FROM employee_services es
         JOIN services s ON s.id = es.service_id
         WHERE es.employee_id = ? AND es.is_active = 1
         ORDER BY s.name ASC",
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(offerings)))
}

pub(crate) async fn active_offering(
    state: &AppState,
    employee_id: i64,
    employee_service_id: i64,
) -> Result<EmployeeService, ApiError> {
    sqlx::query_as::<_, EmployeeService>(
        "SELECT es.id, es.employee_id, es.service_id, s.name AS service_name,
                es.price, es.duration_minutes, es.is_active
         FROM employee_services es
         JOIN services s ON s.id = es.service_id
         WHERE es.id = ? AND es.employee_id = ? AND es.is_active = 1",
    )
    .bind(employee_service_id)
    .bind(employee_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound("Послугу не знайдено".into()))
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation("Невірний формат дати, очікується РРРР-ММ-ДД".into()))
}

/// The filtered start times for one employee, service and date. Errors
/// here are infrastructure failures, except NotFound for a bad offering.
async fn open_starts(
    state: &AppState,
    query: &AvailableTimesQuery,
    date: NaiveDate,
) -> Result<Vec<chrono::NaiveTime>, ApiError> {
    let offering = active_offering(state, query.employee_id, query.employee_service_id).await?;

    if db::is_day_off(&state.db, query.employee_id, &query.date).await? {
        return Ok(Vec::new());
    }

    let intervals = db::employee_busy_slots(&state.db, query.employee_id, &query.date).await?;
    let busy: Vec<_> = intervals
        .iter()
        .filter_map(|b| Some((slots::parse_local(&b.start_at)?, slots::parse_local(&b.end_at)?)))
        .collect();
    Ok(slots::available_starts(date, offering.duration_minutes, &busy, false))
}

/// GET /api/available-times — bookable start times for one employee,
/// service and date.
///
/// A read failure anywhere on this path degrades to the full slot grid
/// with `degraded: true` instead of blocking the booking flow; the
/// database triggers still reject any real conflict at write time.
pub async fn available_times(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AvailableTimesQuery>,
) -> Result<Json<ApiResponse<AvailableTimesResponse>>, ApiError> {
    let date = parse_date(&query.date)?;

    let (starts, degraded) = match open_starts(&state, &query, date).await {
        Ok(starts) => (starts, false),
        Err(e @ ApiError::NotFound(_)) => return Err(e),
        Err(e) => {
            tracing::error!("availability lookup failed, degrading: {}", e);
            (slots::generate_time_slots(), true)
        }
    };

    let times = starts
        .iter()
        .map(|t| t.format("%H:%M").to_string())
        .collect();
    Ok(Json(ApiResponse::success(AvailableTimesResponse {
        times,
        degraded,
    })))
}

/// POST /api/appointments — the public booking endpoint.
///
/// The appointment insert and its outbox event commit in one transaction;
/// an overlap aborts the whole thing with a 409.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<ApiResponse<CreateAppointmentResponse>>, ApiError> {
    let name = req.client_name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Вкажіть ім'я".into()));
    }
    let phone = phone::normalize_phone(&req.client_phone)
        .ok_or_else(|| ApiError::Validation("Невірний номер телефону".into()))?;
    let email = req
        .client_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());
    if let Some(e) = email {
        if !e.contains('@') {
            return Err(ApiError::Validation("Невірна email-адреса".into()));
        }
    }

    let date = parse_date(&req.date)?;
    let time = chrono::NaiveTime::parse_from_str(&req.time, "%H:%M")
        .map_err(|_| ApiError::Validation("Невірний формат часу, очікується ГГ:ХХ".into()))?;
    if !slots::generate_time_slots().contains(&time) {
        return Err(ApiError::Validation("Час поза робочою сіткою".into()));
    }
    let scheduled = date.and_time(time);
    if scheduled <= kyiv::kyiv_now().naive_local() {
        return Err(ApiError::Validation("Оберіть час у майбутньому".into()));
    }
    if db::is_day_off(&state.db, req.employee_id, &req.date).await? {
        return Err(ApiError::Validation("Майстер не працює цього дня".into()));
    }

    let offering = active_offering(&state, req.employee_id, req.employee_service_id).await?;

    let mut tx = state.db.begin().await?;

    // Find-or-create the client by normalized phone. A returning client
    // gets their name refreshed and email filled in if it was missing.
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM clients WHERE phone = ?")
        .bind(&phone)
        .fetch_optional(&mut *tx)
        .await?;
    let client_id = match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE clients SET full_name = ?, email = COALESCE(?, email) WHERE id = ?",
            )
            .bind(name)
            .bind(email)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            id
        }
        None => {
            sqlx::query("INSERT INTO clients (full_name, phone, email) VALUES (?, ?, ?)")
                .bind(name)
                .bind(&phone)
                .bind(email)
                .execute(&mut *tx)
                .await?
                .last_insert_rowid()
        }
    };

    // Price and duration are copied onto the appointment so later offering
    // edits do not rewrite history.
    let appointment_id = sqlx::query(
        "INSERT INTO appointments (client_id, employee_id, service_id, scheduled_at,
                                   duration_minutes, price, status)
         VALUES (?, ?, ?, ?, ?, ?, 'pending')",
    )
    .bind(client_id)
    .bind(req.employee_id)
    .bind(offering.service_id)
    .bind(scheduled.format(slots::DATETIME_FMT).to_string())
    .bind(offering.duration_minutes)
    .bind(offering.price)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    outbox::enqueue_event(&mut *tx, appointment_id, EventType::Insert, None, "pending").await?;
    tx.commit().await?;

    tracing::info!(
        "appointment {} booked: employee {} at {}",
        appointment_id,
        req.employee_id,
        scheduled
    );
    Ok(Json(ApiResponse::success(CreateAppointmentResponse {
        appointment_id,
        status: "pending".into(),
    })))
}

// ── Tests ──
