//! Telegram webhook: links a client's chat to their CRM record via the
//! deep-link payload `/start phone_<digits>` that booking emails carry.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::{auth, phone, AppState};

#[derive(Debug, Deserialize)]
pub struct TgUpdate {
    pub message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TgMessage {
    pub chat: TgChat,
    pub from: Option<TgUser>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TgUser {
    pub username: Option<String>,
}

/// POST /api/telegram/webhook
///
/// Always replies 200 to Telegram; a non-2xx would make it redeliver the
/// same update indefinitely.
pub async fn telegram_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<TgUpdate>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    auth::require_webhook_secret(&headers, &state.webhook_secret)?;

    let Some(message) = update.message else {
        return Ok(Json(ApiResponse::success(())));
    };
    let chat_id = message.chat.id;
    let username = message.from.and_then(|u| u.username);
    let text = message.text.unwrap_or_default();

    if let Some(payload) = text.strip_prefix("/start phone_") {
        match link_client(&state, payload, chat_id, username.as_deref()).await {
            Ok(Some(name)) => {
                let reply = format!(
                    "Вітаємо, {}! 🎉 Telegram підключено — тепер нагадування про записи приходитимуть сюди.",
                    name
                );
                send_reply(&state, chat_id, &reply).await;
            }
            Ok(None) => {
                send_reply(
                    &state,
                    chat_id,
                    "Ми не знайшли вас у базі. Спершу зробіть запис на сайті, а потім поверніться за посиланням з листа.",
                )
                .await;
            }
            Err(e) => {
                tracing::error!("telegram link failed for chat {}: {}", chat_id, e);
            }
        }
    } else if text.starts_with("/start") {
        send_reply(
            &state,
            chat_id,
            "Привіт! Щоб підключити сповіщення, скористайтеся посиланням «Підключити Telegram» з листа про ваш запис.",
        )
        .await;
    }

    Ok(Json(ApiResponse::success(())))
}

/// Match the deep-link digits to a client and attach the chat. Returns the
/// client's name, or None when the phone is unknown.
async fn link_client(
    state: &AppState,
    digits: &str,
    chat_id: i64,
    username: Option<&str>,
) -> Result<Option<String>, sqlx::Error> {
    let Some(normalized) = phone::normalize_phone(digits) else {
        return Ok(None);
    };

    let client: Option<(i64, String)> =
        sqlx::query_as("SELECT id, full_name FROM clients WHERE phone = ?")
            .bind(&normalized)
            .fetch_optional(&state.db)
            .await?;
    let Some((client_id, full_name)) = client else {
        return Ok(None);
    };

    sqlx::query(
        "UPDATE clients
         SET telegram_chat_id = ?, telegram_username = ?, preferred_channel = 'telegram'
         WHERE id = ?",
    )
    .bind(chat_id)
    .bind(username)
    .bind(client_id)
    .execute(&state.db)
    .await?;

    tracing::info!("client {} linked telegram chat {}", client_id, chat_id);
    Ok(Some(full_name))
}

async fn send_reply(state: &AppState, chat_id: i64, text: &str) {
    let url = format!(
        "https://api.telegram.org/bot{}/sendMessage",
        state.bot_token
    );
    let result = state
        .http
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": text
        }))
        .send()
        .await;
    if let Err(e) = result {
        tracing::warn!("webhook reply to chat {} failed: {}", chat_id, e);
    }
}

// ── Tests ──
