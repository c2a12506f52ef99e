//! PostgreSQL WebAuthn ceremony-state repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::state::{RecordHeader, WebAuthnAuthenticationChallenge, WebAuthnRegistrationChallenge};
use crate::stores::WebAuthnChallengeStore;

use super::map_db_error;

/// PostgreSQL-backed [`WebAuthnChallengeStore`].
#[derive(Clone)]
pub struct PostgresWebAuthnChallengeStore {
    pool: PgPool,
}

impl PostgresWebAuthnChallengeStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WebAuthnChallengeStore for PostgresWebAuthnChallengeStore {
    async fn put_registration_challenge(
        &self,
        email: &str,
        user_handle: Vec<u8>,
        ceremony_state: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<WebAuthnRegistrationChallenge> {
        sqlx::query!(
            r#"
            INSERT INTO webauthn_registration_challenges (email, user_handle, ceremony_state, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $4)
            ON CONFLICT (email) DO UPDATE SET
                user_handle = EXCLUDED.user_handle,
                ceremony_state = EXCLUDED.ceremony_state,
                modified_at = EXCLUDED.modified_at
            "#,
            email,
            user_handle,
            ceremony_state,
            now,
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(WebAuthnRegistrationChallenge {
            header: RecordHeader::new(now),
            email: email.to_string(),
            user_handle,
            ceremony_state,
        })
    }

    async fn take_registration_challenge(&self, email: &str) -> Result<Option<WebAuthnRegistrationChallenge>> {
        let row = sqlx::query!(
            r#"
            DELETE FROM webauthn_registration_challenges
            WHERE email = $1
            RETURNING email, user_handle, ceremony_state, created_at, modified_at
            "#,
            email,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(|row| WebAuthnRegistrationChallenge {
            header: RecordHeader {
                id: Uuid::nil(),
                created_at: row.created_at,
                modified_at: row.modified_at,
            },
            email: row.email,
            user_handle: row.user_handle,
            ceremony_state: row.ceremony_state,
        }))
    }

    async fn put_authentication_challenge(&self, email: &str, ceremony_state: Vec<u8>, now: DateTime<Utc>) -> Result<WebAuthnAuthenticationChallenge> {
        sqlx::query!(
            r#"
            INSERT INTO webauthn_authentication_challenges (email, ceremony_state, created_at, modified_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (email) DO UPDATE SET
                ceremony_state = EXCLUDED.ceremony_state,
                modified_at = EXCLUDED.modified_at
            "#,
            email,
            ceremony_state,
            now,
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(WebAuthnAuthenticationChallenge {
            header: RecordHeader::new(now),
            email: email.to_string(),
            ceremony_state,
        })
    }

    async fn take_authentication_challenge(&self, email: &str) -> Result<Option<WebAuthnAuthenticationChallenge>> {
        let row = sqlx::query!(
            r#"
            DELETE FROM webauthn_authentication_challenges
            WHERE email = $1
            RETURNING email, ceremony_state, created_at, modified_at
            "#,
            email,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(|row| WebAuthnAuthenticationChallenge {
            header: RecordHeader {
                id: Uuid::nil(),
                created_at: row.created_at,
                modified_at: row.modified_at,
            },
            email: row.email,
            ceremony_state: row.ceremony_state,
        }))
    }
}
