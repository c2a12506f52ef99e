//! PostgreSQL one-time-code repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::otc::OtcStore;
use crate::state::{AttemptType, AuthenticationAttempt, OneTimeCode, RecordHeader};

/// PostgreSQL-backed [`OtcStore`].
#[derive(Clone)]
pub struct PostgresOtcStore {
    pool: PgPool,
}

impl PostgresOtcStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct OtcRow {
    id: Uuid,
    factor_id: Uuid,
    code_hash: Vec<u8>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl TryFrom<OtcRow> for OneTimeCode {
    type Error = crate::error::AuthError;

    fn try_from(row: OtcRow) -> Result<Self> {
        let code_hash: [u8; 32] = row
            .code_hash
            .try_into()
            .map_err(|_| crate::error::AuthError::Internal)?;
        Ok(Self {
            header: RecordHeader {
                id: row.id,
                created_at: row.created_at,
                modified_at: row.modified_at,
            },
            factor_id: row.factor_id,
            code_hash,
            expires_at: row.expires_at,
        })
    }
}

#[async_trait::async_trait]
impl OtcStore for PostgresOtcStore {
    async fn insert(&self, factor_id: Uuid, code_hash: [u8; 32], expires_at: DateTime<Utc>) -> Result<OneTimeCode> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = sqlx::query_as!(
            OtcRow,
            r#"
            INSERT INTO one_time_codes (id, factor_id, code_hash, expires_at, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, factor_id, code_hash, expires_at, created_at, modified_at
            "#,
            id,
            factor_id,
            code_hash.to_vec(),
            expires_at,
            now,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        row.try_into()
    }

    async fn list_for_factor(&self, factor_id: Uuid) -> Result<Vec<OneTimeCode>> {
        let rows = sqlx::query_as!(
            OtcRow,
            r#"
            SELECT id, factor_id, code_hash, expires_at, created_at, modified_at
            FROM one_time_codes
            WHERE factor_id = $1
            "#,
            factor_id
        )
        .fetch_all(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query!("DELETE FROM one_time_codes WHERE id = $1", id)
            .execute(&self.pool)
            .await
            .map_err(super::map_db_error)?;
        Ok(())
    }

    async fn failed_attempt_count(&self, factor_id: Uuid, since: DateTime<Utc>) -> Result<u32> {
        let row = sqlx::query!(
            r#"
            SELECT COUNT(*) AS "count!"
            FROM authentication_attempts
            WHERE factor_id = $1 AND attempt_type = 'one_time_code' AND successful = FALSE AND created_at >= $2
            "#,
            factor_id,
            since,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(u32::try_from(row.count).unwrap_or(u32::MAX))
    }

    async fn record_attempt(&self, attempt: AuthenticationAttempt) -> Result<()> {
        let attempt_type = match attempt.attempt_type {
            AttemptType::OneTimeCode => "one_time_code",
            AttemptType::Password => "password",
            AttemptType::WebAuthn => "webauthn",
        };
        sqlx::query!(
            r#"
            INSERT INTO authentication_attempts (id, factor_id, attempt_type, successful, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            "#,
            attempt.header.id,
            attempt.factor_id,
            attempt_type,
            attempt.successful,
            attempt.header.created_at,
        )
        .execute(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(())
    }
}
