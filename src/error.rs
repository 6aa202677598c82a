use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("agent is not assigned to this order")]
    NotAssigned,

    #[error("already processed: {0}")]
    AlreadyProcessed(String),

    #[error("already completed: {0}")]
    AlreadyCompleted(String),

    /// Never carries the expected value (order number or code).
    #[error("verification failed: {0}")]
    VerificationMismatch(String),

    #[error("otp challenge expired")]
    Expired,

    #[error("otp attempts exhausted")]
    AttemptsExhausted,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("code delivery failed: {0}")]
    DeliveryChannel(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidState(_) => "invalid_state",
            AppError::NotAssigned => "not_assigned",
            AppError::AlreadyProcessed(_) => "already_processed",
            AppError::AlreadyCompleted(_) => "already_completed",
            AppError::VerificationMismatch(_) => "verification_mismatch",
            AppError::Expired => "expired",
            AppError::AttemptsExhausted => "attempts_exhausted",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::RateLimited(_) => "rate_limited",
            AppError::DeliveryChannel(_) => "delivery_channel",
            AppError::Notification(_) => "notification",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidState(_)
            | AppError::AlreadyProcessed(_)
            | AppError::AlreadyCompleted(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotAssigned => StatusCode::FORBIDDEN,
            AppError::VerificationMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Expired | AppError::AttemptsExhausted => StatusCode::GONE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::DeliveryChannel(_) | AppError::Notification(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::AppError;

    #[test]
    fn verification_errors_map_to_unprocessable() {
        let response =
            AppError::VerificationMismatch("order number does not match".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn ownership_errors_map_to_forbidden() {
        assert_eq!(AppError::NotAssigned.into_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotAssigned.kind(), "not_assigned");
    }

    #[test]
    fn otp_terminal_errors_map_to_gone() {
        assert_eq!(AppError::Expired.into_response().status(), StatusCode::GONE);
        assert_eq!(
            AppError::AttemptsExhausted.into_response().status(),
            StatusCode::GONE
        );
    }
}
