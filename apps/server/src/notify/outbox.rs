use sqlx::{Sqlite, SqlitePool};
use std::time::Duration;

use crate::db;
use crate::kyiv;
use crate::notify::channel::{record_sent_message, Channel, Dispatcher};
use crate::notify::template;
use crate::notify::trigger::{route_event, EventType};

/// Events that keep failing are parked as 'failed' after this many tries.
const MAX_ATTEMPTS: i64 = 3;

#[derive(Debug, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: i64,
    pub appointment_id: i64,
    pub event_type: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub attempts: i64,
}

/// Queue an appointment change for the notification worker. Meant to run
/// on the same transaction as the appointment write, so the event exists
/// iff the change committed. Redelivery of the same (appointment, event,
/// status) within a day is a no-op via the unique key; the day component
/// lets a real re-transition (cancel, restore, cancel again tomorrow)
/// notify again.
pub async fn enqueue_event<'e, E>(
    executor: E,
    appointment_id: i64,
    event_type: EventType,
    old_status: Option<&str>,
    new_status: &str,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let today = kyiv::kyiv_today().format("%Y-%m-%d").to_string();
    enqueue_event_for_day(executor, appointment_id, event_type, old_status, new_status, &today)
        .await
}

async fn enqueue_event_for_day<'e, E>(
    executor: E,
    appointment_id: i64,
    event_type: EventType,
    old_status: Option<&str>,
    new_status: &str,
    event_day: &str,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT OR IGNORE INTO notification_outbox
             (appointment_id, event_type, old_status, new_status, event_day)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(appointment_id)
    .bind(event_type.as_str())
    .bind(old_status)
    .bind(new_status)
    .bind(event_day)
    .execute(executor)
    .await?;
    Ok(())
}

/// One worker pass: drain pending events oldest first.
pub async fn process_pending(pool: &SqlitePool, dispatcher: &Dispatcher) -> Result<(), sqlx::Error> {
    let events = sqlx::query_as::<_, OutboxEvent>(
        "SELECT id, appointment_id, event_type, old_status, new_status, attempts
         FROM notification_outbox
         WHERE status = 'pending'
         ORDER BY id ASC
         LIMIT 50",
    )
    .fetch_all(pool)
    .await?;

    for event in events {
        if let Err(e) = process_event(pool, dispatcher, &event).await {
            tracing::error!("outbox event {} failed: {}", event.id, e);
            bump_attempts(pool, &event).await?;
        }
    }
    Ok(())
}

async fn process_event(
    pool: &SqlitePool,
    dispatcher: &Dispatcher,
    event: &OutboxEvent,
) -> Result<(), sqlx::Error> {
    let Some(event_type) = EventType::parse(&event.event_type) else {
        tracing::warn!("outbox event {}: unknown event type {}", event.id, event.event_type);
        return mark(pool, event.id, "failed").await;
    };

    // Most status changes do not notify anyone. That is still a processed
    // event, not a failure.
    let Some(trigger) = route_event(event_type, event.old_status.as_deref(), &event.new_status)
    else {
        return mark(pool, event.id, "processed").await;
    };

    let Some(detail) = db::appointment_detail(pool, event.appointment_id).await? else {
        tracing::warn!("outbox event {}: appointment {} not found", event.id, event.appointment_id);
        return mark(pool, event.id, "failed").await;
    };
    let Some(client) = db::client_by_id(pool, detail.client_id).await? else {
        tracing::warn!("outbox event {}: client {} not found", event.id, detail.client_id);
        return mark(pool, event.id, "failed").await;
    };

    let templates = template::active_templates(pool, trigger).await?;
    if templates.is_empty() {
        tracing::debug!("no active template for {}, skipping", trigger);
        return mark(pool, event.id, "processed").await;
    }

    let vars = template::appointment_vars(&detail);
    for tpl in &templates {
        let body = template::render(&tpl.body, &vars);
        let subject = tpl.subject.as_deref().map(|s| template::render(s, &vars));
        let force = Channel::parse(&tpl.channel);

        let delivery = dispatcher
            .dispatch(&client, subject.as_deref(), &body, force)
            .await;
        record_sent_message(pool, client.id, Some(detail.id), &delivery, &body).await;
    }

    mark(pool, event.id, "processed").await
}

async fn mark(pool: &SqlitePool, event_id: i64, status: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE notification_outbox
         SET status = ?, processed_at = datetime('now')
         WHERE id = ?",
    )
    .bind(status)
    .bind(event_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn bump_attempts(pool: &SqlitePool, event: &OutboxEvent) -> Result<(), sqlx::Error> {
    let status = if event.attempts + 1 >= MAX_ATTEMPTS {
        "failed"
    } else {
        "pending"
    };
    sqlx::query("UPDATE notification_outbox SET attempts = attempts + 1, status = ? WHERE id = ?")
        .bind(status)
        .bind(event.id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Queue reminder events for tomorrow's confirmed appointments. Each
/// appointment is swept at most once via the reminder_sent flag.
pub async fn enqueue_due_reminders(pool: &SqlitePool) -> Result<u32, sqlx::Error> {
    let tomorrow = kyiv::kyiv_tomorrow().format("%Y-%m-%d").to_string();
    let due: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM appointments
         WHERE date(scheduled_at) = ? AND status = 'confirmed' AND reminder_sent = 0",
    )
    .bind(&tomorrow)
    .fetch_all(pool)
    .await?;

    let mut queued = 0;
    for appointment_id in due {
        enqueue_event(pool, appointment_id, EventType::Reminder, None, "confirmed").await?;
        sqlx::query("UPDATE appointments SET reminder_sent = 1 WHERE id = ?")
            .bind(appointment_id)
            .execute(pool)
            .await?;
        queued += 1;
    }
    if queued > 0 {
        tracing::info!("queued {} reminder(s) for {}", queued, tomorrow);
    }
    Ok(queued)
}

/// Background loop: drain the outbox on a fixed cadence.
pub async fn run_worker(pool: SqlitePool, dispatcher: std::sync::Arc<Dispatcher>, poll: Duration) {
    let mut interval = tokio::time::interval(poll);
    loop {
        interval.tick().await;
        if let Err(e) = process_pending(&pool, &dispatcher).await {
            tracing::error!("outbox worker pass failed: {}", e);
        }
    }
}

/// Background loop: hourly sweep for tomorrow's reminders.
pub async fn run_reminder_sweep(pool: SqlitePool) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        if let Err(e) = enqueue_due_reminders(&pool).await {
            tracing::error!("reminder sweep failed: {}", e);
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Client;
    use crate::notify::channel::ChannelSender;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    // In-memory SQLite gives each connection its own database, so tests
    // must pin the pool to a single connection.
    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(crate::db::connect_options("sqlite::memory:").unwrap())
            .await
            .unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &SqlitePool) -> i64 {
        sqlx::query("INSERT INTO employees (display_name) VALUES ('Марія')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO services (name) VALUES ('Манікюр')")
            .execute(pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO clients (full_name, phone, email) VALUES ('Олена', '+380501234567', 'olena@example.com')",
        )
        .execute(pool)
        .await
        .unwrap();
        let res = sqlx::query(
            "INSERT INTO appointments (client_id, employee_id, service_id, scheduled_at,
                                       duration_minutes, price, status)
             VALUES (1, 1, 1, '2026-09-01 14:00:00', 60, 650, 'pending')",
        )
        .execute(pool)
        .await
        .unwrap();
        res.last_insert_rowid()
    }

    struct AlwaysSends;

    #[async_trait]
    impl ChannelSender for AlwaysSends {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        fn can_reach(&self, client: &Client) -> bool {
            client.email.is_some()
        }

        async fn attempt(
            &self,
            _client: &Client,
            _subject: Option<&str>,
            _body: &str,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let pool = test_pool().await;
        let appt = seed(&pool).await;

        enqueue_event(&pool, appt, EventType::Insert, None, "pending")
            .await
            .unwrap();
        enqueue_event(&pool, appt, EventType::Insert, None, "pending")
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_outbox")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_retransition_on_later_day_notifies_again() {
        let pool = test_pool().await;
        let appt = seed(&pool).await;

        enqueue_event_for_day(&pool, appt, EventType::Update, Some("confirmed"), "cancelled", "2026-08-30")
            .await
            .unwrap();
        // same-day redelivery of the same transition is swallowed
        enqueue_event_for_day(&pool, appt, EventType::Update, Some("confirmed"), "cancelled", "2026-08-30")
            .await
            .unwrap();
        // restored and cancelled again the next day: a fresh event
        enqueue_event_for_day(&pool, appt, EventType::Update, Some("confirmed"), "cancelled", "2026-08-31")
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notification_outbox")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_no_template_marks_processed_without_message() {
        let pool = test_pool().await;
        let appt = seed(&pool).await;
        enqueue_event(&pool, appt, EventType::Insert, None, "pending")
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(vec![Box::new(AlwaysSends)]);
        process_pending(&pool, &dispatcher).await.unwrap();

        let status: String =
            sqlx::query_scalar("SELECT status FROM notification_outbox WHERE appointment_id = ?")
                .bind(appt)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "processed");

        let sent: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sent_messages")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_confirmation_event_sends_and_records() {
        let pool = test_pool().await;
        let appt = seed(&pool).await;
        sqlx::query(
            "INSERT INTO message_templates (name, trigger_condition, channel, subject, body)
             VALUES ('Підтвердження', 'booking_confirmation', 'email',
                     'Ваш запис', 'Вітаємо, {client_name}! {service} о {time}')",
        )
        .execute(&pool)
        .await
        .unwrap();
        enqueue_event(&pool, appt, EventType::Insert, None, "pending")
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(vec![Box::new(AlwaysSends)]);
        process_pending(&pool, &dispatcher).await.unwrap();

        let (text, status): (String, String) = sqlx::query_as(
            "SELECT message_text, delivery_status FROM sent_messages WHERE appointment_id = ?",
        )
        .bind(appt)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(text, "Вітаємо, Олена! Манікюр о 14:00");
        assert_eq!(status, "sent");
    }

    #[tokio::test]
    async fn test_silent_transition_marks_processed() {
        let pool = test_pool().await;
        let appt = seed(&pool).await;
        // pending -> confirmed notifies no one
        enqueue_event(&pool, appt, EventType::Update, Some("pending"), "confirmed")
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(vec![Box::new(AlwaysSends)]);
        process_pending(&pool, &dispatcher).await.unwrap();

        let status: String =
            sqlx::query_scalar("SELECT status FROM notification_outbox WHERE appointment_id = ?")
                .bind(appt)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "processed");
    }

    #[tokio::test]
    async fn test_reminder_sweep_flags_and_queues_once() {
        let pool = test_pool().await;
        seed(&pool).await;
        let tomorrow = kyiv::kyiv_tomorrow().format("%Y-%m-%d").to_string();
        sqlx::query(
            "INSERT INTO appointments (client_id, employee_id, service_id, scheduled_at,
                                       duration_minutes, price, status)
             VALUES (1, 1, 1, ? || ' 11:00:00', 60, 650, 'confirmed')",
        )
        .bind(&tomorrow)
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(enqueue_due_reminders(&pool).await.unwrap(), 1);
        // second sweep finds nothing: reminder_sent is set
        assert_eq!(enqueue_due_reminders(&pool).await.unwrap(), 0);

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notification_outbox WHERE event_type = 'reminder'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }
}
