use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::SqlitePool;

use crate::error::ApiError;
use crate::models::Employee;

type HmacSha256 = Hmac<Sha256>;

const API_KEY_HEADER: &str = "x-api-key";
/// Header Telegram attaches when the webhook was registered with a secret.
const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Constant-time string comparison: compare HMAC digests of both values
/// under a throwaway key instead of the raw bytes.
fn keys_match(presented: &str, expected: &str) -> bool {
    let mut a = HmacSha256::new_from_slice(b"velour-key-check")
        .expect("HMAC can take key of any size");
    a.update(presented.as_bytes());
    let mut b = HmacSha256::new_from_slice(b"velour-key-check")
        .expect("HMAC can take key of any size");
    b.update(expected.as_bytes());
    // verify_slice is the constant-time step
    b.verify_slice(&a.finalize().into_bytes()).is_ok()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Admin routes: X-Api-Key must equal the configured admin key.
pub fn require_admin(headers: &HeaderMap, admin_api_key: &str) -> Result<(), ApiError> {
    let presented = header_value(headers, API_KEY_HEADER).ok_or(ApiError::Forbidden)?;
    if admin_api_key.is_empty() || !keys_match(presented, admin_api_key) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

/// Employee routes: X-Api-Key must match one employee's stored key; the
/// caller only ever sees that employee's data.
pub async fn require_employee(headers: &HeaderMap, db: &SqlitePool) -> Result<Employee, ApiError> {
    let presented = header_value(headers, API_KEY_HEADER).ok_or(ApiError::Forbidden)?;

    let employees = sqlx::query_as::<_, (i64, String)>(
        "SELECT id, api_key FROM employees WHERE api_key IS NOT NULL AND is_active = 1",
    )
    .fetch_all(db)
    .await?;

    for (id, key) in employees {
        if keys_match(presented, &key) {
            let employee = sqlx::query_as::<_, Employee>(
                "SELECT id, display_name, bio, is_active, created_at FROM employees WHERE id = ?",
            )
            .bind(id)
            .fetch_one(db)
            .await?;
            return Ok(employee);
        }
    }
    Err(ApiError::Forbidden)
}

/// Telegram webhook: the secret token set at setWebhook time must match.
pub fn require_webhook_secret(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let presented = header_value(headers, TELEGRAM_SECRET_HEADER).ok_or(ApiError::Forbidden)?;
    if secret.is_empty() || !keys_match(presented, secret) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(name, HeaderValue::from_str(value).unwrap());
        h
    }

    #[test]
    fn test_keys_match_equal() {
        assert!(keys_match("secret-123", "secret-123"));
    }

    #[test]
    fn test_keys_match_differ() {
        assert!(!keys_match("secret-123", "secret-124"));
    }

    #[test]
    fn test_admin_accepts_correct_key() {
        let h = headers_with("x-api-key", "adminkey");
        assert!(require_admin(&h, "adminkey").is_ok());
    }

    #[test]
    fn test_admin_rejects_wrong_key() {
        let h = headers_with("x-api-key", "nope");
        assert!(require_admin(&h, "adminkey").is_err());
    }

    #[test]
    fn test_admin_rejects_missing_header() {
        assert!(require_admin(&HeaderMap::new(), "adminkey").is_err());
    }

    #[test]
    fn test_admin_rejects_empty_configured_key() {
        // Unset admin key must not mean "open admin"
        let h = headers_with("x-api-key", "");
        assert!(require_admin(&h, "").is_err());
    }

    #[test]
    fn test_webhook_secret_check() {
        let h = headers_with("x-telegram-bot-api-secret-token", "hook-secret");
        assert!(require_webhook_secret(&h, "hook-secret").is_ok());
        assert!(require_webhook_secret(&h, "other").is_err());
    }
}
