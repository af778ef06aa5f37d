//! Admin API: catalog management, schedule control, templates, clients
//! and the appointment board. Every route checks the admin API key.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::*;
use crate::notify::channel::record_sent_message;
use crate::notify::{outbox, Channel, EventType, TriggerCondition};
use crate::{auth, db, kyiv, AppState};

const STATUSES: [&str; 4] = ["pending", "confirmed", "completed", "cancelled"];

// ── Services ──

pub async fn list_services(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Service>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let services =
        sqlx::query_as::<_, Service>("SELECT * FROM services ORDER BY name ASC")
            .fetch_all(&state.db)
            .await?;
    Ok(Json(ApiResponse::success(services)))
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateServiceRequest>,
) -> Result<Json<ApiResponse<Service>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Вкажіть назву послуги".into()));
    }
    let id = sqlx::query("INSERT INTO services (name, description) VALUES (?, ?)")
        .bind(name)
        .bind(req.description.as_deref().unwrap_or(""))
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    let service = sqlx::query_as::<_, Service>("SELECT * FROM services WHERE id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(ApiResponse::success(service)))
}

// ── Employees ──

pub async fn list_employees(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<Employee>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let employees = sqlx::query_as::<_, Employee>(
        "SELECT id, display_name, bio, is_active, created_at
         FROM employees ORDER BY display_name ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(employees)))
}

pub async fn create_employee(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateEmployeeRequest>,
) -> Result<Json<ApiResponse<Employee>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let name = req.display_name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("Вкажіть ім'я майстра".into()));
    }
    let id = sqlx::query("INSERT INTO employees (display_name, bio, api_key) VALUES (?, ?, ?)")
        .bind(name)
        .bind(req.bio.as_deref().unwrap_or(""))
        .bind(req.api_key.as_deref())
        .execute(&state.db)
        .await?
        .last_insert_rowid();
    let employee = sqlx::query_as::<_, Employee>(
        "SELECT id, display_name, bio, is_active, created_at FROM employees WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(employee)))
}

pub async fn update_employee(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(employee_id): Path<i64>,
    Json(req): Json<UpdateEmployeeRequest>,
) -> Result<Json<ApiResponse<Employee>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let updated = sqlx::query(
        "UPDATE employees
         SET display_name = COALESCE(?, display_name),
             bio = COALESCE(?, bio),
             is_active = COALESCE(?, is_active)
         WHERE id = ?",
    )
    .bind(req.display_name.as_deref().map(str::trim))
    .bind(req.bio.as_deref())
    .bind(req.is_active)
    .bind(employee_id)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Майстра не знайдено".into()));
    }
    let employee = sqlx::query_as::<_, Employee>(
        "SELECT id, display_name, bio, is_active, created_at FROM employees WHERE id = ?",
    )
    .bind(employee_id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(employee)))
}

// ── Offerings ──

pub async fn list_offerings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(employee_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<EmployeeService>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let offerings = sqlx::query_as::<_, EmployeeService>(
        "SELECT es.id, es.employee_id, es.service_id, s.name AS service_name,
                es.price, es.duration_minutes, es.is_active
         FROM employee_services es
         JOIN services s ON s.id = es.service_id
         WHERE es.employee_id = ?
         ORDER BY s.name ASC",
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(offerings)))
}

/// PUT /api/admin/employees/{id}/services — create or update one
/// employee's price and duration for a service. Existing appointments
/// keep their copied values.
pub async fn upsert_offering(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(employee_id): Path<i64>,
    Json(req): Json<UpsertOfferingRequest>,
) -> Result<Json<ApiResponse<EmployeeService>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    if req.price < 0 {
        return Err(ApiError::Validation("Ціна не може бути від'ємною".into()));
    }
    if req.duration_minutes <= 0 {
        return Err(ApiError::Validation("Тривалість має бути більше нуля".into()));
    }

    sqlx::query(
        "INSERT INTO employee_services (employee_id, service_id, price, duration_minutes, is_active)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (employee_id, service_id) DO UPDATE SET
             price = excluded.price,
             duration_minutes = excluded.duration_minutes,
             is_active = excluded.is_active",
    )
    .bind(employee_id)
    .bind(req.service_id)
    .bind(req.price)
    .bind(req.duration_minutes)
    .bind(req.is_active)
    .execute(&state.db)
    .await?;

    let offering = sqlx::query_as::<_, EmployeeService>(
        "SELECT es.id, es.employee_id, es.service_id, s.name AS service_name,
                es.price, es.duration_minutes, es.is_active
         FROM employee_services es
         JOIN services s ON s.id = es.service_id
         WHERE es.employee_id = ? AND es.service_id = ?",
    )
    .bind(employee_id)
    .bind(req.service_id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(offering)))
}

// ── Days off ──

pub async fn list_days_off(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(employee_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<DayOff>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let days = sqlx::query_as::<_, DayOff>(
        "SELECT id, employee_id, date_off, reason FROM employee_days_off
         WHERE employee_id = ? ORDER BY date_off ASC",
    )
    .bind(employee_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(days)))
}

pub async fn create_day_off(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateDayOffRequest>,
) -> Result<Json<ApiResponse<DayOff>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let date = chrono::NaiveDate::parse_from_str(&req.date_off, "%Y-%m-%d")
        .map_err(|_| ApiError::Validation("Невірний формат дати, очікується РРРР-ММ-ДД".into()))?;
    if date < kyiv::kyiv_today() {
        return Err(ApiError::Validation("Вихідний можна додати лише на сьогодні або пізніше".into()));
    }

    // Re-adding an existing day off returns the existing row.
    sqlx::query(
        "INSERT OR IGNORE INTO employee_days_off (employee_id, date_off, reason) VALUES (?, ?, ?)",
    )
    .bind(req.employee_id)
    .bind(&req.date_off)
    .bind(req.reason.as_deref())
    .execute(&state.db)
    .await?;

    let day = sqlx::query_as::<_, DayOff>(
        "SELECT id, employee_id, date_off, reason FROM employee_days_off
         WHERE employee_id = ? AND date_off = ?",
    )
    .bind(req.employee_id)
    .bind(&req.date_off)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(day)))
}

pub async fn delete_day_off(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(day_off_id): Path<i64>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let deleted = sqlx::query("DELETE FROM employee_days_off WHERE id = ?")
        .bind(day_off_id)
        .execute(&state.db)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(ApiError::NotFound("Вихідний не знайдено".into()));
    }
    Ok(Json(ApiResponse::success(())))
}

// ── Message templates ──

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<MessageTemplate>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let templates = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, name, trigger_condition, channel, subject, body, is_active
         FROM message_templates ORDER BY trigger_condition ASC, id ASC",
    )
    .fetch_all(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(templates)))
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateTemplateRequest>,
) -> Result<Json<ApiResponse<MessageTemplate>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let known_trigger = req.trigger_condition == "custom"
        || [
            TriggerCondition::BookingConfirmation,
            TriggerCondition::BookingReminder,
            TriggerCondition::PostVisitThanks,
            TriggerCondition::BookingCancelled,
        ]
        .iter()
        .any(|t| t.as_str() == req.trigger_condition);
    if !known_trigger {
        return Err(ApiError::Validation("Невідомий тригер шаблону".into()));
    }
    if Channel::parse(&req.channel).is_none() {
        return Err(ApiError::Validation("Канал має бути email або telegram".into()));
    }
    if req.body.trim().is_empty() {
        return Err(ApiError::Validation("Текст шаблону порожній".into()));
    }

    let id = sqlx::query(
        "INSERT INTO message_templates (name, trigger_condition, channel, subject, body)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(req.name.trim())
    .bind(&req.trigger_condition)
    .bind(&req.channel)
    .bind(req.subject.as_deref())
    .bind(&req.body)
    .execute(&state.db)
    .await?
    .last_insert_rowid();

    let template = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, name, trigger_condition, channel, subject, body, is_active
         FROM message_templates WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(template)))
}

pub async fn update_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(template_id): Path<i64>,
    Json(req): Json<UpdateTemplateRequest>,
) -> Result<Json<ApiResponse<MessageTemplate>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let updated = sqlx::query(
        "UPDATE message_templates
         SET name = COALESCE(?, name),
             subject = COALESCE(?, subject),
             body = COALESCE(?, body),
             is_active = COALESCE(?, is_active)
         WHERE id = ?",
    )
    .bind(req.name.as_deref())
    .bind(req.subject.as_deref())
    .bind(req.body.as_deref())
    .bind(req.is_active)
    .bind(template_id)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Шаблон не знайдено".into()));
    }
    let template = sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, name, trigger_condition, channel, subject, body, is_active
         FROM message_templates WHERE id = ?",
    )
    .bind(template_id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ApiResponse::success(template)))
}

// ── Clients ──

pub async fn list_clients(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ClientsQuery>,
) -> Result<Json<ApiResponse<Vec<Client>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let clients = match query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => {
            let pattern = format!("%{}%", q);
            sqlx::query_as::<_, Client>(
                "SELECT * FROM clients WHERE full_name LIKE ? OR phone LIKE ?
                 ORDER BY full_name ASC",
            )
            .bind(&pattern)
            .bind(&pattern)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as::<_, Client>("SELECT * FROM clients ORDER BY full_name ASC")
                .fetch_all(&state.db)
                .await?
        }
    };
    Ok(Json(ApiResponse::success(clients)))
}

pub async fn update_client_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(client_id): Path<i64>,
    Json(req): Json<UpdateClientNotesRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let updated = sqlx::query("UPDATE clients SET notes = ? WHERE id = ?")
        .bind(req.notes.as_deref())
        .bind(client_id)
        .execute(&state.db)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Клієнта не знайдено".into()));
    }
    Ok(Json(ApiResponse::success(())))
}

// ── Appointments ──

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<ApiResponse<Vec<AppointmentDetail>>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let appointments = db::list_appointments(
        &state.db,
        None,
        query.date.as_deref(),
        query.from.as_deref(),
        query.to.as_deref(),
    )
    .await?;
    Ok(Json(ApiResponse::success(appointments)))
}

/// POST /api/admin/appointments — book on a client's behalf (walk-ins,
/// phone bookings). Starts confirmed; the insert event is still queued but
/// the router sends nothing for a confirmed insert.
pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateStaffAppointmentRequest>,
) -> Result<Json<ApiResponse<CreateAppointmentResponse>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;

    let date = crate::handlers::booking::parse_date(&req.date)?;
    let time = chrono::NaiveTime::parse_from_str(&req.time, "%H:%M")
        .map_err(|_| ApiError::Validation("Невірний формат часу, очікується ГГ:ХХ".into()))?;
    let scheduled = date.and_time(time);
    if scheduled <= kyiv::kyiv_now().naive_local() {
        return Err(ApiError::Validation("Оберіть час у майбутньому".into()));
    }
    if db::is_day_off(&state.db, req.employee_id, &req.date).await? {
        return Err(ApiError::Validation("Майстер не працює цього дня".into()));
    }

    db::client_by_id(&state.db, req.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Клієнта не знайдено".into()))?;
    let offering = crate::handlers::booking::active_offering(
        &state,
        req.employee_id,
        req.employee_service_id,
    )
    .await?;

    let mut tx = state.db.begin().await?;
    let appointment_id = sqlx::query(
        "INSERT INTO appointments (client_id, employee_id, service_id, scheduled_at,
                                   duration_minutes, price, status)
         VALUES (?, ?, ?, ?, ?, ?, 'confirmed')",
    )
    .bind(req.client_id)
    .bind(req.employee_id)
    .bind(offering.service_id)
    .bind(scheduled.format(crate::slots::DATETIME_FMT).to_string())
    .bind(offering.duration_minutes)
    .bind(offering.price)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    outbox::enqueue_event(&mut *tx, appointment_id, EventType::Insert, None, "confirmed").await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::success(CreateAppointmentResponse {
        appointment_id,
        status: "confirmed".into(),
    })))
}

/// Shared by the admin status endpoint and the employee "complete" action.
/// The status write and its outbox event commit together; un-cancelling
/// back into an occupied slot aborts with a conflict.
pub(crate) async fn set_appointment_status(
    state: &AppState,
    appointment_id: i64,
    new_status: &str,
) -> Result<(), ApiError> {
    if !STATUSES.contains(&new_status) {
        return Err(ApiError::Validation("Невідомий статус".into()));
    }

    let mut tx = state.db.begin().await?;
    let old_status: Option<String> =
        sqlx::query_scalar("SELECT status FROM appointments WHERE id = ?")
            .bind(appointment_id)
            .fetch_optional(&mut *tx)
            .await?;
    let old_status = old_status.ok_or_else(|| ApiError::NotFound("Запис не знайдено".into()))?;
    if old_status == new_status {
        return Ok(());
    }

    sqlx::query(
        "UPDATE appointments
         SET status = ?,
             cancelled_at = CASE WHEN ? = 'cancelled' THEN datetime('now') ELSE cancelled_at END,
             completed_at = CASE WHEN ? = 'completed' THEN datetime('now') ELSE completed_at END
         WHERE id = ?",
    )
    .bind(new_status)
    .bind(new_status)
    .bind(new_status)
    .bind(appointment_id)
    .execute(&mut *tx)
    .await?;

    outbox::enqueue_event(
        &mut *tx,
        appointment_id,
        EventType::Update,
        Some(&old_status),
        new_status,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        "appointment {} status: {} -> {}",
        appointment_id,
        old_status,
        new_status
    );
    Ok(())
}

pub async fn update_appointment_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(appointment_id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    set_appointment_status(&state, appointment_id, &req.status).await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn update_appointment_notes(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(appointment_id): Path<i64>,
    Json(req): Json<UpdateNotesRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    let updated = sqlx::query(
        "UPDATE appointments
         SET admin_notes = COALESCE(?, admin_notes),
             employee_notes = COALESCE(?, employee_notes)
         WHERE id = ?",
    )
    .bind(req.admin_notes.as_deref())
    .bind(req.employee_notes.as_deref())
    .bind(appointment_id)
    .execute(&state.db)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::NotFound("Запис не знайдено".into()));
    }
    Ok(Json(ApiResponse::success(())))
}

// ── Ad-hoc notifications ──

/// POST /api/admin/notifications — send a one-off message to a client,
/// outside the template pipeline. Still leaves a sent_messages row.
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SendNotificationRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_admin(&headers, &state.admin_api_key)?;
    if req.message.trim().is_empty() {
        return Err(ApiError::Validation("Порожнє повідомлення".into()));
    }
    let force = match req.force_channel.as_deref() {
        None => None,
        Some(raw) => Some(
            Channel::parse(raw)
                .ok_or_else(|| ApiError::Validation("Канал має бути email або telegram".into()))?,
        ),
    };
    let client = db::client_by_id(&state.db, req.client_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Клієнта не знайдено".into()))?;

    let delivery = state
        .dispatcher
        .dispatch(&client, None, &req.message, force)
        .await;
    record_sent_message(&state.db, client.id, None, &delivery, &req.message).await;

    if delivery.sent {
        Ok(Json(ApiResponse::success(())))
    } else {
        Err(ApiError::Validation(
            "Не вдалося доставити повідомлення жодним каналом".into(),
        ))
    }
}

// ── Tests ──
