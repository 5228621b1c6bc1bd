//! Talespin: API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use talespin_core::error::DomainError;
use thiserror::Error;

/// Startup errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// An environment variable or configuration file is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage, content or tuning could not be initialised.
    #[error("startup error: {0}")]
    Startup(#[from] DomainError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer error that implements `IntoResponse`.
#[derive(Debug)]
pub enum ApiError {
    /// A failed turn or query.
    Domain(DomainError),
    /// A resource that is not tracked by the domain, such as a turn number
    /// past the end of the log.
    NotFound(String),
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Domain(err) => {
                let (status, code) = match &err {
                    DomainError::CampaignNotFound(_) => {
                        (StatusCode::NOT_FOUND, "campaign_not_found")
                    }
                    DomainError::CharacterNotFound(_) => {
                        (StatusCode::NOT_FOUND, "character_not_found")
                    }
                    DomainError::TurnOrderViolation { .. } => {
                        (StatusCode::CONFLICT, "turn_order_violation")
                    }
                    DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    DomainError::InvalidAction(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "invalid_action")
                    }
                    DomainError::Infrastructure(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
                    }
                };
                (status, code, err.to_string())
            }
        };

        let body = ErrorBody {
            error: error_code,
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use uuid::Uuid;

    fn status_of(err: DomainError) -> StatusCode {
        let response = ApiError::from(err).into_response();
        response.status()
    }

    #[test]
    fn test_campaign_not_found_maps_to_404() {
        assert_eq!(
            status_of(DomainError::CampaignNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_turn_order_violation_maps_to_409() {
        assert_eq!(
            status_of(DomainError::TurnOrderViolation {
                campaign_id: Uuid::new_v4(),
                expected: 3,
                actual: 2,
            }),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_validation_maps_to_400() {
        assert_eq!(
            status_of(DomainError::Validation("bad input".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_invalid_action_maps_to_500() {
        assert_eq!(
            status_of(DomainError::InvalidAction("no descriptor".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_missing_turn_maps_to_404() {
        let response = ApiError::NotFound("turn 9".into()).into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
