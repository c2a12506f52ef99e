//! Maps [`AuthError`] onto HTTP status codes and JSON bodies.
//!
//! The sole place in this crate that knows about status codes, per the
//! doc comment on [`crate::error::AuthError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::AuthError;

/// HTTP-facing wrapper around [`AuthError`].
#[derive(Debug)]
pub struct AppError(pub AuthError);

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        Self(error)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "internal error");
        }
        let message = if self.0.is_security_sensitive() {
            "authentication failed".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidRequest(_)
        | AuthError::InvalidData(_)
        | AuthError::AllowlistViolation(_)
        | AuthError::InvalidCode
        | AuthError::CodeExpired
        | AuthError::AttemptsExceeded => StatusCode::BAD_REQUEST,
        AuthError::AuthenticationFailed | AuthError::InvalidGrant => StatusCode::FORBIDDEN,
        AuthError::Conflict(_) => StatusCode::CONFLICT,
        AuthError::ProviderError { .. } | AuthError::OriginMismatch => StatusCode::BAD_REQUEST,
        AuthError::UniqueViolation(_) => StatusCode::CONFLICT,
        AuthError::AssertionFailed(_) => StatusCode::FORBIDDEN,
        AuthError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failed_message_never_leaks() {
        let response = AppError(AuthError::AuthenticationFailed).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_request_keeps_its_message() {
        let response = AppError(AuthError::InvalidRequest("missing field".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
