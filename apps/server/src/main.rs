mod alert_layer;
mod auth;
mod db;
mod error;
mod handlers;
mod kyiv;
mod models;
mod notify;
mod phone;
mod rate_limit;
mod slots;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post, put},
    Router,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use notify::{Dispatcher, EmailSender, TelegramSender};
use rate_limit::{rate_limit_booking, rate_limit_public, rate_limit_staff, RateLimiter};

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub http: reqwest::Client,
    pub dispatcher: Arc<Dispatcher>,
    pub bot_token: String,
    pub admin_api_key: String,
    pub webhook_secret: String,
    pub started_at: Instant,
}

/// How often the worker drains the notification outbox (seconds).
const OUTBOX_POLL_SECS: u64 = 15;
/// Rate limit cleanup interval (seconds).
const RATE_LIMIT_CLEANUP_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // ── Required env vars (read before tracing so AlertLayer can use them) ──
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:velour.db?mode=rwc".into());
    let bot_token = std::env::var("BOT_TOKEN").expect("BOT_TOKEN must be set");
    let bot_username = std::env::var("BOT_USERNAME").expect("BOT_USERNAME must be set");
    let admin_api_key = std::env::var("ADMIN_API_KEY").expect("ADMIN_API_KEY must be set");
    let owner_tg_id: i64 = std::env::var("OWNER_TG_ID")
        .unwrap_or_else(|_| "0".into())
        .parse()
        .expect("OWNER_TG_ID must be a number");

    // ── Tracing: console + optional Telegram error alerts ──
    let env_filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    let fmt_layer = tracing_subscriber::fmt::layer();
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if !bot_token.is_empty() && owner_tg_id != 0 {
        let alerts = alert_layer::AlertLayer::new(bot_token.clone(), owner_tg_id);
        registry.with(alerts).init();
    } else {
        registry.init();
    }

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());

    // ── Optional env vars ──
    let webhook_secret = std::env::var("TELEGRAM_WEBHOOK_SECRET").unwrap_or_default();
    let resend_api_key = std::env::var("RESEND_API_KEY").unwrap_or_default();
    let email_from = std::env::var("EMAIL_FROM")
        .unwrap_or_else(|_| "Velour Studio <no-reply@velour.example>".into());
    let webapp_url = std::env::var("WEBAPP_URL").unwrap_or_default();

    if webhook_secret.is_empty() {
        tracing::warn!("TELEGRAM_WEBHOOK_SECRET not set — webhook will reject all updates");
    }
    if resend_api_key.is_empty() {
        tracing::warn!("RESEND_API_KEY not set — email delivery will fail");
    }

    // ── Database ──
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(db::connect_options(&database_url)?)
        .await?;

    db::run_migrations(&pool).await?;

    // ── Notification dispatcher, shared by the worker and ad-hoc sends ──
    let dispatcher = Arc::new(Dispatcher::new(vec![
        Box::new(TelegramSender::new(bot_token.clone())),
        Box::new(EmailSender::new(
            resend_api_key,
            email_from,
            bot_username,
        )),
    ]));

    let state = Arc::new(AppState {
        db: pool,
        http: reqwest::Client::new(),
        dispatcher: dispatcher.clone(),
        bot_token,
        admin_api_key,
        webhook_secret,
        started_at: Instant::now(),
    });

    // ── Background task: drain the notification outbox ──
    tokio::spawn(notify::outbox::run_worker(
        state.db.clone(),
        dispatcher,
        Duration::from_secs(OUTBOX_POLL_SECS),
    ));

    // ── Background task: queue tomorrow's reminders ──
    tokio::spawn(notify::outbox::run_reminder_sweep(state.db.clone()));

    // ── Rate limiter + its cleanup task ──
    let rate_limiter = RateLimiter::new();
    let cleanup_limiter = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(RATE_LIMIT_CLEANUP_SECS));
        loop {
            interval.tick().await;
            cleanup_limiter.cleanup();
        }
    });

    // ── CORS: whitelist WEBAPP_URL when configured, otherwise allow any ──
    let cors = if !webapp_url.is_empty() {
        let origins: Vec<axum::http::HeaderValue> = vec![
            webapp_url.parse().expect("WEBAPP_URL must be a valid URL"),
            "http://localhost:5173".parse().unwrap(), // Vite dev server
        ];
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // ── Router (4 groups with per-group rate limits) ──

    // 1. No-limit: health + Telegram webhook (it has its own secret check)
    let no_limit_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .route(
            "/api/telegram/webhook",
            post(handlers::webhook::telegram_webhook),
        );

    // 2. Public: read-only booking-flow endpoints (60 req/min)
    let public_routes = Router::new()
        .route("/api/employees", get(handlers::booking::list_employees))
        .route(
            "/api/employees/{id}/services",
            get(handlers::booking::list_employee_services),
        )
        .route(
            "/api/available-times",
            get(handlers::booking::available_times),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_public));

    // 3. Booking creation: strictest limit (5 req/5min)
    let booking_routes = Router::new()
        .route("/api/appointments", post(handlers::booking::create_appointment))
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_booking));

    // 4. Staff: admin + employee endpoints (120 req/min)
    let staff_routes = Router::new()
        .route("/api/admin/services", get(handlers::admin::list_services))
        .route("/api/admin/services", post(handlers::admin::create_service))
        .route("/api/admin/employees", get(handlers::admin::list_employees))
        .route("/api/admin/employees", post(handlers::admin::create_employee))
        .route(
            "/api/admin/employees/{id}",
            patch(handlers::admin::update_employee),
        )
        .route(
            "/api/admin/employees/{id}/services",
            get(handlers::admin::list_offerings),
        )
        .route(
            "/api/admin/employees/{id}/services",
            put(handlers::admin::upsert_offering),
        )
        .route(
            "/api/admin/employees/{id}/days-off",
            get(handlers::admin::list_days_off),
        )
        .route("/api/admin/days-off", post(handlers::admin::create_day_off))
        .route(
            "/api/admin/days-off/{id}",
            delete(handlers::admin::delete_day_off),
        )
        .route("/api/admin/templates", get(handlers::admin::list_templates))
        .route("/api/admin/templates", post(handlers::admin::create_template))
        .route(
            "/api/admin/templates/{id}",
            patch(handlers::admin::update_template),
        )
        .route("/api/admin/clients", get(handlers::admin::list_clients))
        .route(
            "/api/admin/clients/{id}/notes",
            patch(handlers::admin::update_client_notes),
        )
        .route(
            "/api/admin/appointments",
            get(handlers::admin::list_appointments),
        )
        .route(
            "/api/admin/appointments",
            post(handlers::admin::create_appointment),
        )
        .route(
            "/api/admin/appointments/{id}/status",
            patch(handlers::admin::update_appointment_status),
        )
        .route(
            "/api/admin/appointments/{id}/notes",
            patch(handlers::admin::update_appointment_notes),
        )
        .route(
            "/api/admin/notifications",
            post(handlers::admin::send_notification),
        )
        .route(
            "/api/employee/appointments",
            get(handlers::employee::my_appointments),
        )
        .route(
            "/api/employee/appointments/{id}/notes",
            patch(handlers::employee::update_my_notes),
        )
        .route(
            "/api/employee/appointments/{id}/complete",
            post(handlers::employee::complete_appointment),
        )
        .layer(from_fn_with_state(rate_limiter.clone(), rate_limit_staff));

    let app = Router::new()
        .merge(no_limit_routes)
        .merge(public_routes)
        .merge(booking_routes)
        .merge(staff_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Velour Studio server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
