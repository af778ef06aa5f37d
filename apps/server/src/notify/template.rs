use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::models::{AppointmentDetail, MessageTemplate};
use crate::notify::TriggerCondition;
use crate::slots;

/// Placeholder substitution variables, keyed by the literal token including
/// braces. BTreeMap keeps replacement order deterministic.
pub type Vars = BTreeMap<&'static str, String>;

/// All active templates for a trigger condition, most recent first.
/// An empty result is a normal outcome — the trigger simply sends nothing.
pub async fn active_templates(
    pool: &SqlitePool,
    trigger: TriggerCondition,
) -> Result<Vec<MessageTemplate>, sqlx::Error> {
    sqlx::query_as::<_, MessageTemplate>(
        "SELECT id, name, trigger_condition, channel, subject, body, is_active
         FROM message_templates
         WHERE trigger_condition = ? AND is_active = 1
         ORDER BY created_at DESC, id DESC",
    )
    .bind(trigger.as_str())
    .fetch_all(pool)
    .await
}

/// Literal global token replacement. Not a templating language: unknown
/// tokens are left verbatim, no escaping, no evaluation.
pub fn render(text: &str, vars: &Vars) -> String {
    let mut out = text.to_string();
    for (token, value) in vars {
        out = out.replace(token, value);
    }
    out
}

/// The fixed token set filled from an appointment.
pub fn appointment_vars(detail: &AppointmentDetail) -> Vars {
    let (date, time) = match slots::parse_local(&detail.scheduled_at) {
        Some(dt) => (
            dt.format("%d.%m.%Y").to_string(),
            dt.format("%H:%M").to_string(),
        ),
        None => (detail.scheduled_at.clone(), String::new()),
    };

    let mut vars = Vars::new();
    vars.insert("{client_name}", detail.client_name.clone());
    vars.insert("{employee}", detail.employee_name.clone());
    vars.insert("{service}", detail.service_name.clone());
    vars.insert("{date}", date);
    vars.insert("{time}", time);
    vars.insert("{price}", format!("{} ₴", detail.price));
    vars
}

// ── Tests ──
