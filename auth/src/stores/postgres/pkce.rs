//! PostgreSQL PKCE challenge repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::pkce::PkceStore;
use crate::state::{PkceChallenge, ProviderTokens, RecordHeader};

/// PostgreSQL-backed [`PkceStore`].
#[derive(Clone)]
pub struct PostgresPkceStore {
    pool: PgPool,
}

impl PostgresPkceStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PkceRow {
    id: Uuid,
    challenge: String,
    identity_id: Option<Uuid>,
    auth_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

impl From<PkceRow> for PkceChallenge {
    fn from(row: PkceRow) -> Self {
        Self {
            header: RecordHeader {
                id: row.id,
                created_at: row.created_at,
                modified_at: row.modified_at,
            },
            challenge: row.challenge,
            identity_id: row.identity_id,
            tokens: ProviderTokens {
                auth_token: row.auth_token,
                refresh_token: row.refresh_token,
                id_token: row.id_token,
            },
        }
    }
}

#[async_trait::async_trait]
impl PkceStore for PostgresPkceStore {
    async fn record(&self, challenge: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<PkceChallenge> {
        let row = sqlx::query_as!(
            PkceRow,
            r#"
            INSERT INTO pkce_challenges (id, challenge, identity_id, auth_token, refresh_token, id_token,
                                          created_at, modified_at, expires_at)
            VALUES ($1, $2, NULL, NULL, NULL, NULL, $3, $3, $4)
            ON CONFLICT (challenge) DO UPDATE SET challenge = EXCLUDED.challenge
            RETURNING id, challenge, identity_id, auth_token, refresh_token, id_token, created_at, modified_at
            "#,
            Uuid::new_v4(),
            challenge,
            now,
            expires_at,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(row.into())
    }

    async fn find_by_code(&self, code: Uuid) -> Result<Option<PkceChallenge>> {
        let row = sqlx::query_as!(
            PkceRow,
            r#"
            SELECT id, challenge, identity_id, auth_token, refresh_token, id_token, created_at, modified_at
            FROM pkce_challenges
            WHERE id = $1
            "#,
            code
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(row.map(Into::into))
    }

    async fn bind(&self, code: Uuid, identity_id: Uuid, tokens: ProviderTokens, now: DateTime<Utc>) -> Result<()> {
        sqlx::query!(
            r#"
            UPDATE pkce_challenges
            SET identity_id = $2, auth_token = $3, refresh_token = $4, id_token = $5, modified_at = $6
            WHERE id = $1
            "#,
            code,
            identity_id,
            tokens.auth_token,
            tokens.refresh_token,
            tokens.id_token,
            now,
        )
        .execute(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(())
    }

    async fn claim(&self, challenge: &str, now: DateTime<Utc>) -> Result<Option<PkceChallenge>> {
        let row = sqlx::query_as!(
            PkceRow,
            r#"
            DELETE FROM pkce_challenges
            WHERE challenge = $1 AND expires_at > $2
            RETURNING id, challenge, identity_id, auth_token, refresh_token, id_token, created_at, modified_at
            "#,
            challenge,
            now,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(super::map_db_error)?;
        Ok(row.map(Into::into))
    }
}
