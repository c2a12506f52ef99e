//! PostgreSQL identity/factor repository.
//!
//! Identities and factors are each one polymorphic table (`identities`,
//! `factors`) discriminated by a `kind` column, mirroring the tagged-variant
//! enums in [`crate::state`] rather than one table per variant.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::state::{Factor, Identity, RecordHeader};
use crate::stores::{FactorStore, IdentityStore};

use super::map_db_error;

/// PostgreSQL-backed [`IdentityStore`]/[`FactorStore`].
#[derive(Clone)]
pub struct PostgresIdentityStore {
    pool: PgPool,
}

impl PostgresIdentityStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run this crate's migrations against the pool.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|_| AuthError::Internal)?;
        Ok(())
    }

    fn row_to_identity(row: IdentityRow) -> Identity {
        let header = RecordHeader {
            id: row.id,
            created_at: row.created_at,
            modified_at: row.modified_at,
        };
        if row.kind == "remote" {
            Identity::Remote {
                header,
                issuer: row.issuer.unwrap_or_default(),
                subject: row.subject,
            }
        } else {
            Identity::Local {
                header,
                subject: row.subject,
            }
        }
    }

    fn row_to_factor(row: FactorRow) -> Result<Factor> {
        let header = RecordHeader {
            id: row.id,
            created_at: row.created_at,
            modified_at: row.modified_at,
        };
        match row.kind.as_str() {
            "email_password" => Ok(Factor::EmailPassword {
                header,
                identity_id: row.identity_id,
                email: row.email,
                password_hash: row.password_hash.unwrap_or_default(),
                verified_at: row.verified_at,
            }),
            "magic_link" => Ok(Factor::MagicLink {
                header,
                identity_id: row.identity_id,
                email: row.email,
                verified_at: row.verified_at,
            }),
            "webauthn" => Ok(Factor::WebAuthn {
                header,
                identity_id: row.identity_id,
                email: row.email,
                user_handle: row.user_handle.unwrap_or_default(),
                credential_id: row.credential_id.unwrap_or_default(),
                public_key: row.public_key.unwrap_or_default(),
            }),
            other => {
                tracing::error!(kind = other, "unknown factor kind in database row");
                Err(AuthError::Internal)
            }
        }
    }
}

struct IdentityRow {
    id: Uuid,
    kind: String,
    issuer: Option<String>,
    subject: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

struct FactorRow {
    id: Uuid,
    kind: String,
    identity_id: Uuid,
    email: String,
    password_hash: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    user_handle: Option<Vec<u8>>,
    credential_id: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl IdentityStore for PostgresIdentityStore {
    async fn insert(&self, identity: Identity) -> Result<Identity> {
        let header = *identity.header();
        let (kind, issuer, subject) = match &identity {
            Identity::Remote { issuer, subject, .. } => ("remote", Some(issuer.as_str()), subject.as_str()),
            Identity::Local { subject, .. } => ("local", None, subject.as_str()),
        };
        sqlx::query!(
            r#"
            INSERT INTO identities (id, kind, issuer, subject, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            header.id,
            kind,
            issuer,
            subject,
            header.created_at,
            header.modified_at,
        )
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(identity)
    }

    async fn find_by_issuer_subject(&self, issuer: &str, subject: &str) -> Result<Option<Identity>> {
        let row = sqlx::query_as!(
            IdentityRow,
            r#"
            SELECT id, kind, issuer, subject, created_at, modified_at
            FROM identities
            WHERE issuer = $1 AND subject = $2
            "#,
            issuer,
            subject
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(Self::row_to_identity))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let row = sqlx::query_as!(
            IdentityRow,
            r#"
            SELECT id, kind, issuer, subject, created_at, modified_at
            FROM identities
            WHERE id = $1
            "#,
            id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        Ok(row.map(Self::row_to_identity))
    }

    async fn upsert_remote(&self, issuer: &str, subject: &str, now: DateTime<Utc>) -> Result<Identity> {
        if let Some(existing) = self.find_by_issuer_subject(issuer, subject).await? {
            return Ok(existing);
        }
        let identity = Identity::Remote {
            header: RecordHeader::new(now),
            issuer: issuer.to_string(),
            subject: subject.to_string(),
        };
        self.insert(identity).await
    }

    async fn delete_cascade(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        sqlx::query!(
            "DELETE FROM authentication_attempts WHERE factor_id IN (SELECT id FROM factors WHERE identity_id = $1)",
            id
        )
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
        sqlx::query!(
            "DELETE FROM one_time_codes WHERE factor_id IN (SELECT id FROM factors WHERE identity_id = $1)",
            id
        )
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;
        sqlx::query!("DELETE FROM factors WHERE identity_id = $1", id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        sqlx::query!("DELETE FROM pkce_challenges WHERE identity_id = $1", id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        sqlx::query!("DELETE FROM identities WHERE id = $1", id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl FactorStore for PostgresIdentityStore {
    async fn insert(&self, factor: Factor) -> Result<Factor> {
        let header = *factor.header();
        insert_or_replace_factor(&self.pool, &factor, header).await?;
        Ok(factor)
    }

    async fn update(&self, factor: Factor) -> Result<Factor> {
        let header = *factor.header();
        insert_or_replace_factor(&self.pool, &factor, header).await?;
        Ok(factor)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Factor>> {
        let row = sqlx::query_as!(
            FactorRow,
            r#"
            SELECT id, kind, identity_id, email, password_hash, verified_at,
                   user_handle, credential_id, public_key, created_at, modified_at
            FROM factors
            WHERE id = $1
            "#,
            id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.map(Self::row_to_factor).transpose()
    }

    async fn find_by_identity_id(&self, identity_id: Uuid) -> Result<Vec<Factor>> {
        let rows = sqlx::query_as!(
            FactorRow,
            r#"
            SELECT id, kind, identity_id, email, password_hash, verified_at,
                   user_handle, credential_id, public_key, created_at, modified_at
            FROM factors
            WHERE identity_id = $1
            "#,
            identity_id
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;
        rows.into_iter().map(Self::row_to_factor).collect()
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Factor>> {
        let rows = fetch_factor_rows_by_email(&self.pool, email).await?;
        rows.into_iter().map(Self::row_to_factor).collect()
    }

    async fn find_email_password(&self, email: &str) -> Result<Option<Factor>> {
        Ok(self
            .find_by_email(email)
            .await?
            .into_iter()
            .find(|f| matches!(f, Factor::EmailPassword { .. })))
    }

    async fn find_magic_link(&self, email: &str) -> Result<Option<Factor>> {
        Ok(self
            .find_by_email(email)
            .await?
            .into_iter()
            .find(|f| matches!(f, Factor::MagicLink { .. })))
    }

    async fn find_webauthn_by_email(&self, email: &str) -> Result<Vec<Factor>> {
        Ok(self
            .find_by_email(email)
            .await?
            .into_iter()
            .filter(Factor::is_webauthn)
            .collect())
    }

    async fn find_webauthn_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<Factor>> {
        let row = sqlx::query_as!(
            FactorRow,
            r#"
            SELECT id, kind, identity_id, email, password_hash, verified_at,
                   user_handle, credential_id, public_key, created_at, modified_at
            FROM factors
            WHERE credential_id = $1
            "#,
            credential_id
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;
        row.map(Self::row_to_factor).transpose()
    }
}

async fn fetch_factor_rows_by_email(pool: &PgPool, email: &str) -> Result<Vec<FactorRow>> {
    sqlx::query_as!(
        FactorRow,
        r#"
        SELECT id, kind, identity_id, email, password_hash, verified_at,
               user_handle, credential_id, public_key, created_at, modified_at
        FROM factors
        WHERE email = $1
        "#,
        email
    )
    .fetch_all(pool)
    .await
    .map_err(map_db_error)
}

async fn insert_or_replace_factor(pool: &PgPool, factor: &Factor, header: RecordHeader) -> Result<()> {
    let (kind, identity_id, email, password_hash, verified_at, user_handle, credential_id, public_key) = match factor {
        Factor::EmailPassword {
            identity_id,
            email,
            password_hash,
            verified_at,
            ..
        } => (
            "email_password",
            *identity_id,
            email.as_str(),
            Some(password_hash.as_str()),
            *verified_at,
            None,
            None,
            None,
        ),
        Factor::MagicLink {
            identity_id,
            email,
            verified_at,
            ..
        } => ("magic_link", *identity_id, email.as_str(), None, *verified_at, None, None, None),
        Factor::WebAuthn {
            identity_id,
            email,
            user_handle,
            credential_id,
            public_key,
            ..
        } => (
            "webauthn",
            *identity_id,
            email.as_str(),
            None,
            None,
            Some(user_handle.as_slice()),
            Some(credential_id.as_slice()),
            Some(public_key.as_slice()),
        ),
    };

    sqlx::query!(
        r#"
        INSERT INTO factors (id, kind, identity_id, email, password_hash, verified_at,
                              user_handle, credential_id, public_key, created_at, modified_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE SET
            password_hash = EXCLUDED.password_hash,
            verified_at = EXCLUDED.verified_at,
            modified_at = EXCLUDED.modified_at
        "#,
        header.id,
        kind,
        identity_id,
        email,
        password_hash,
        verified_at,
        user_handle,
        credential_id,
        public_key,
        header.created_at,
        header.modified_at,
    )
    .execute(pool)
    .await
    .map_err(map_db_error)?;
    Ok(())
}
