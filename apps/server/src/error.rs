use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::models::ApiResponse;

/// Marker raised by the no-overlap triggers in 001_init.sql.
pub const CONFLICT_MARKER: &str = "APPOINTMENT_TIME_CONFLICT";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    /// The data layer rejected an overlapping appointment. Always surfaced
    /// as "slot taken, pick another time" — never as a generic failure.
    #[error("Цей час уже зайнятий. Оберіть інший слот.")]
    SlotConflict,

    #[error("{0}")]
    NotFound(String),

    #[error("Доступ заборонено")]
    Forbidden,

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        if is_slot_conflict(&e) {
            ApiError::SlotConflict
        } else {
            ApiError::Database(e)
        }
    }
}

/// A write rejected by the exclusion trigger surfaces as a database error
/// whose message carries the marker token.
pub fn is_slot_conflict(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.message().contains(CONFLICT_MARKER),
        _ => false,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::SlotConflict => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Database(e) => {
                tracing::error!("database error: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ApiResponse::<()>::error("Помилка сервера. Спробуйте пізніше.")),
                )
                    .into_response();
            }
        };
        (status, Json(ApiResponse::<()>::error(self.to_string()))).into_response()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_is_not_conflict() {
        assert!(!is_slot_conflict(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let resp = ApiError::SlotConflict.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_validation_maps_to_400() {
        let resp = ApiError::Validation("missing field".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_forbidden_maps_to_403() {
        let resp = ApiError::Forbidden.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
