use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::SqlitePool;
use std::str::FromStr;

use crate::models::{AppointmentDetail, BusyInterval, Client};

/// Options applied to every pooled connection. Foreign-key enforcement is
/// per-connection in SQLite, so it has to be set here — a one-off PRAGMA
/// after connect would only cover the connection that ran it.
pub fn connect_options(database_url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal))
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    // Create migrations tracking table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .execute(pool)
    .await?;

    // Run 001_init only if not already applied. The file is executed as one
    // batch: it contains triggers, so splitting on ';' would mangle it.
    let applied: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = '001_init'")
            .fetch_one(pool)
            .await?;

    if !applied {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(pool)
            .await?;
        sqlx::query("INSERT INTO _migrations (name) VALUES ('001_init')")
            .execute(pool)
            .await?;
        tracing::info!("Applied migration: 001_init");
    }

    tracing::info!("Database migrations up to date");
    Ok(())
}

/// Busy intervals for an employee on one day: every non-cancelled appointment
/// as a [start, end) pair of 'YYYY-MM-DD HH:MM:SS' local-time strings.
pub async fn employee_busy_slots(
    pool: &SqlitePool,
    employee_id: i64,
    day: &str,
) -> Result<Vec<BusyInterval>, sqlx::Error> {
    sqlx::query_as::<_, BusyInterval>(
        "SELECT scheduled_at AS start_at,
                datetime(scheduled_at, '+' || duration_minutes || ' minutes') AS end_at
         FROM appointments
         WHERE employee_id = ? AND date(scheduled_at) = ? AND status != 'cancelled'
         ORDER BY scheduled_at ASC",
    )
    .bind(employee_id)
    .bind(day)
    .fetch_all(pool)
    .await
}

/// One appointment with client, employee and service resolved by name.
pub async fn appointment_detail(
    pool: &SqlitePool,
    appointment_id: i64,
) -> Result<Option<AppointmentDetail>, sqlx::Error> {
    sqlx::query_as::<_, AppointmentDetail>(
        "SELECT a.id, a.client_id, c.full_name AS client_name,
                e.display_name AS employee_name, s.name AS service_name,
                a.scheduled_at, a.duration_minutes, a.price, a.status,
                a.admin_notes, a.employee_notes
         FROM appointments a
         JOIN clients c ON c.id = a.client_id
         JOIN employees e ON e.id = a.employee_id
         JOIN services s ON s.id = a.service_id
         WHERE a.id = ?",
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
}

/// Appointments joined with names, optionally narrowed to one employee
/// and a single date or an inclusive date range.
pub async fn list_appointments(
    pool: &SqlitePool,
    employee_id: Option<i64>,
    date: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<AppointmentDetail>, sqlx::Error> {
    let mut sql = String::from(
        "SELECT a.id, a.client_id, c.full_name AS client_name,
                e.display_name AS employee_name, s.name AS service_name,
                a.scheduled_at, a.duration_minutes, a.price, a.status,
                a.admin_notes, a.employee_notes
         FROM appointments a
         JOIN clients c ON c.id = a.client_id
         JOIN employees e ON e.id = a.employee_id
         JOIN services s ON s.id = a.service_id
         WHERE 1=1",
    );
    if employee_id.is_some() {
        sql.push_str(" AND a.employee_id = ?");
    }
    if date.is_some() {
        sql.push_str(" AND date(a.scheduled_at) = ?");
    }
    if from.is_some() {
        sql.push_str(" AND date(a.scheduled_at) >= ?");
    }
    if to.is_some() {
        sql.push_str(" AND date(a.scheduled_at) <= ?");
    }
    sql.push_str(" ORDER BY a.scheduled_at ASC");

    let mut query = sqlx::query_as::<_, AppointmentDetail>(&sql);
    if let Some(id) = employee_id {
        query = query.bind(id);
    }
    if let Some(d) = date {
        query = query.bind(d.to_owned());
    }
    if let Some(f) = from {
        query = query.bind(f.to_owned());
    }
    if let Some(t) = to {
        query = query.bind(t.to_owned());
    }
    query.fetch_all(pool).await
}

pub async fn client_by_id(
    pool: &SqlitePool,
    client_id: i64,
) -> Result<Option<Client>, sqlx::Error> {
    sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
        .bind(client_id)
        .fetch_optional(pool)
        .await
}

/// Whether the employee has marked this date as a day off.
pub async fn is_day_off(
    pool: &SqlitePool,
    employee_id: i64,
    day: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM employee_days_off WHERE employee_id = ? AND date_off = ?",
    )
    .bind(employee_id)
    .bind(day)
    .fetch_one(pool)
    .await
}

// ── Tests ──
