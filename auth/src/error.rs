//! Error taxonomy for the authentication subsystem.
//!
//! Reducers and providers only ever return `Result<_, AuthError>`; nothing
//! below the flow controller ([`crate::flows`]) knows about HTTP status
//! codes. The conversion to a status + JSON body lives in `crate::handlers`
//! as `impl IntoResponse for AppError` behind the `axum` feature, so there is
//! exactly one place that maps error kinds onto the wire.

use thiserror::Error;

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error kinds produced by the authentication subsystem.
///
/// Named by kind, not by internal type: each variant below maps to exactly
/// one HTTP status class.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// Syntactically bad input: missing fields, malformed bodies, an
    /// out-of-range PKCE verifier length. Maps to 400.
    #[error("{0}")]
    InvalidRequest(String),

    /// A signed token failed verification (bad signature, wrong audience,
    /// expired, malformed, wrong `kind`). Maps to 400 with this exact message
    /// shape for the state-token case (`message: "Invalid state token"`).
    #[error("{0}")]
    InvalidData(String),

    /// A redirect/reset/link URL was not present in the configured
    /// allow-list. Maps to 400, or a redirect-to-error when possible.
    #[error("redirect url not allowed: {0}")]
    AllowlistViolation(String),

    /// Credentials did not match. Message is deliberately generic so account
    /// existence is never disclosed. Maps to 403.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The presented one-time code does not match any live code for the
    /// factor. Maps to 400.
    #[error("invalid code")]
    InvalidCode,

    /// A matching one-time code existed but has expired. Maps to 400.
    #[error("code expired")]
    CodeExpired,

    /// Too many failed one-time-code attempts within the rate-limit window.
    /// Maps to 400 and short-circuits further verification.
    #[error("attempts exceeded")]
    AttemptsExceeded,

    /// The PKCE challenge exists but carries no bound identity (never
    /// completed its callback), or has already been claimed. Maps to 403.
    #[error("invalid grant")]
    InvalidGrant,

    /// The resource already exists (e.g. re-registering an email). Maps to
    /// 409 for JSON clients, or a redirect-with-error for redirect flows.
    #[error("{0}")]
    Conflict(String),

    /// The upstream OAuth/OIDC provider reported an error. Carries the
    /// provider's own `error`/`error_description` verbatim.
    #[error("provider error: {error}")]
    ProviderError {
        /// The upstream `error` code.
        error: String,
        /// The upstream `error_description`, if provided.
        error_description: Option<String>,
    },

    /// The configured WebAuthn relying-party origin does not match the
    /// inbound request's `Origin` header.
    #[error("relying party origin mismatch")]
    OriginMismatch,

    /// Store-level uniqueness constraint violated (natural key collision).
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A store-level invariant check failed (e.g. a differing `user_handle`
    /// for factors sharing an email).
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// Anything else: sanitized before reaching the client. Maps to 500.
    #[error("internal error")]
    Internal,
}

impl AuthError {
    /// `true` for error kinds that are the caller's fault (4xx), as opposed
    /// to subsystem failures.
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(self, Self::Internal)
    }

    /// `true` for error kinds that should never leak internal detail to the
    /// client response body.
    #[must_use]
    pub const fn is_security_sensitive(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed | Self::InvalidGrant | Self::Internal
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failed_message_is_generic() {
        let err = AuthError::AuthenticationFailed;
        assert_eq!(err.to_string(), "authentication failed");
        assert!(err.is_security_sensitive());
    }

    #[test]
    fn invalid_code_and_attempts_exceeded_are_distinct() {
        assert_ne!(AuthError::InvalidCode, AuthError::AttemptsExceeded);
        assert!(AuthError::InvalidCode.to_string().contains("invalid code"));
        assert!(AuthError::AttemptsExceeded
            .to_string()
            .contains("attempts exceeded"));
    }
}
