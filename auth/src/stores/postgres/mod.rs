//! PostgreSQL-backed implementations of the identity/factor, PKCE, and
//! one-time-code stores, gated behind the `postgres` feature.

mod identity;
mod otc;
mod pkce;
mod webauthn;

pub use identity::PostgresIdentityStore;
pub use otc::PostgresOtcStore;
pub use pkce::PostgresPkceStore;
pub use webauthn::PostgresWebAuthnChallengeStore;

use crate::error::AuthError;

/// Map a raw `sqlx::Error` onto the subsystem's error taxonomy, surfacing
/// unique-constraint violations distinctly from every other database failure.
pub(crate) fn map_db_error(err: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AuthError::UniqueViolation(db_err.message().to_string());
        }
    }
    AuthError::Internal
}
