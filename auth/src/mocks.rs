//! In-memory stores and a fixture-backed [`OAuthClient`], for deterministic,
//! DB-free tests of `crate::flows` and `crate::handlers`.
//!
//! Mirrors the `MemoryPkceStore`/`MemoryOtcStore` fixtures already proven out
//! in `pkce.rs`/`otc.rs`'s own unit tests, generalized to every store trait so
//! a full [`crate::flows::AuthEnvironment`] can be built without Postgres.

#![allow(clippy::unwrap_used)] // Mutex locks over in-memory fixtures only; never used outside test-utils.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::providers::email::{EmailMessage, EmailSender};
use crate::providers::oauth::{OAuthClient, ResolvedAccount};
use crate::config::OAuthProviderConfig;
use crate::otc::OtcStore;
use crate::pkce::PkceStore;
use crate::state::{
    AuthenticationAttempt, Factor, Identity, OneTimeCode, PkceChallenge, ProviderTokens,
    RecordHeader, WebAuthnAuthenticationChallenge, WebAuthnRegistrationChallenge,
};
use crate::stores::{FactorStore, IdentityStore, WebAuthnChallengeStore};

/// In-memory [`IdentityStore`].
#[derive(Default)]
pub struct MemoryIdentityStore {
    rows: Mutex<Vec<Identity>>,
}

#[async_trait::async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn insert(&self, identity: Identity) -> Result<Identity> {
        self.rows.lock().unwrap().push(identity.clone());
        Ok(identity)
    }

    async fn find_by_issuer_subject(&self, issuer: &str, subject: &str) -> Result<Option<Identity>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.natural_key() == (issuer, subject))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.rows.lock().unwrap().iter().find(|i| i.id() == id).cloned())
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
        self.rows.lock().unwrap().retain(|i| i.id() != id);
        Ok(())
    }
}

/// In-memory [`FactorStore`].
#[derive(Default)]
pub struct MemoryFactorStore {
    rows: Mutex<Vec<Factor>>,
}

#[async_trait::async_trait]
impl FactorStore for MemoryFactorStore {
    async fn insert(&self, factor: Factor) -> Result<Factor> {
        self.rows.lock().unwrap().push(factor.clone());
        Ok(factor)
    }

    async fn update(&self, factor: Factor) -> Result<Factor> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(slot) = rows.iter_mut().find(|f| f.id() == factor.id()) {
            *slot = factor.clone();
        }
        Ok(factor)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Factor>> {
        Ok(self.rows.lock().unwrap().iter().find(|f| f.id() == id).cloned())
    }

    async fn find_by_identity_id(&self, identity_id: Uuid) -> Result<Vec<Factor>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.identity_id() == identity_id)
            .cloned()
            .collect())
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<Factor>> {
        Ok(self.rows.lock().unwrap().iter().filter(|f| f.email() == email).cloned().collect())
    }

    async fn find_email_password(&self, email: &str) -> Result<Option<Factor>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.email() == email && matches!(f, Factor::EmailPassword { .. }))
            .cloned())
    }

    async fn find_magic_link(&self, email: &str) -> Result<Option<Factor>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.email() == email && matches!(f, Factor::MagicLink { .. }))
            .cloned())
    }

    async fn find_webauthn_by_email(&self, email: &str) -> Result<Vec<Factor>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.email() == email && f.is_webauthn())
            .cloned()
            .collect())
    }

    async fn find_webauthn_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<Factor>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|f| matches!(f, Factor::WebAuthn { credential_id: id, .. } if id == credential_id))
            .cloned())
    }
}

/// In-memory [`PkceStore`], identical in behavior to the private fixture
/// `pkce.rs`'s own tests prototype.
#[derive(Default)]
pub struct MemoryPkceStore {
    rows: Mutex<Vec<PkceChallenge>>,
}

#[async_trait::async_trait]
impl PkceStore for MemoryPkceStore {
    async fn record(&self, challenge: &str, now: DateTime<Utc>, _expires_at: DateTime<Utc>) -> Result<PkceChallenge> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter().find(|r| r.challenge == challenge) {
            return Ok(existing.clone());
        }
        let row = PkceChallenge {
            header: RecordHeader::new(now),
            challenge: challenge.to_string(),
            identity_id: None,
            tokens: ProviderTokens::default(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn find_by_code(&self, code: Uuid) -> Result<Option<PkceChallenge>> {
        Ok(self.rows.lock().unwrap().iter().find(|r| r.header.id == code).cloned())
    }

    async fn bind(&self, code: Uuid, identity_id: Uuid, tokens: ProviderTokens, now: DateTime<Utc>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.header.id == code) {
            row.identity_id = Some(identity_id);
            row.tokens = tokens;
            row.header.modified_at = now;
        }
        Ok(())
    }

    async fn claim(&self, challenge: &str, _now: DateTime<Utc>) -> Result<Option<PkceChallenge>> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(pos) = rows.iter().position(|r| r.challenge == challenge) {
            Ok(Some(rows.remove(pos)))
        } else {
            Ok(None)
        }
    }
}

/// In-memory [`OtcStore`], identical in behavior to the private fixture
/// `otc.rs`'s own tests prototype.
#[derive(Default)]
pub struct MemoryOtcStore {
    codes: Mutex<Vec<OneTimeCode>>,
    attempts: Mutex<Vec<AuthenticationAttempt>>,
}

#[async_trait::async_trait]
impl OtcStore for MemoryOtcStore {
    async fn insert(&self, factor_id: Uuid, code_hash: [u8; 32], expires_at: DateTime<Utc>) -> Result<OneTimeCode> {
        let record = OneTimeCode {
            header: RecordHeader::new(Utc::now()),
            factor_id,
            code_hash,
            expires_at,
        };
        self.codes.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn list_for_factor(&self, factor_id: Uuid) -> Result<Vec<OneTimeCode>> {
        Ok(self.codes.lock().unwrap().iter().filter(|c| c.factor_id == factor_id).cloned().collect())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.codes.lock().unwrap().retain(|c| c.header.id != id);
        Ok(())
    }

    async fn failed_attempt_count(&self, factor_id: Uuid, since: DateTime<Utc>) -> Result<u32> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.factor_id == factor_id && !a.successful && a.header.created_at >= since)
            .count() as u32)
    }

    async fn record_attempt(&self, attempt: AuthenticationAttempt) -> Result<()> {
        self.attempts.lock().unwrap().push(attempt);
        Ok(())
    }
}

/// In-memory [`WebAuthnChallengeStore`], at most one ceremony of each kind
/// per email, matching the real stores' "replace any prior one" semantics.
#[derive(Default)]
pub struct MemoryWebAuthnChallengeStore {
    registrations: Mutex<Vec<WebAuthnRegistrationChallenge>>,
    authentications: Mutex<Vec<WebAuthnAuthenticationChallenge>>,
}

#[async_trait::async_trait]
impl WebAuthnChallengeStore for MemoryWebAuthnChallengeStore {
    async fn put_registration_challenge(
        &self,
        email: &str,
        user_handle: Vec<u8>,
        ceremony_state: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<WebAuthnRegistrationChallenge> {
        let mut rows = self.registrations.lock().unwrap();
        rows.retain(|r| r.email != email);
        let row = WebAuthnRegistrationChallenge {
            header: RecordHeader::new(now),
            email: email.to_string(),
            user_handle,
            ceremony_state,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn take_registration_challenge(&self, email: &str) -> Result<Option<WebAuthnRegistrationChallenge>> {
        let mut rows = self.registrations.lock().unwrap();
        if let Some(pos) = rows.iter().position(|r| r.email == email) {
            Ok(Some(rows.remove(pos)))
        } else {
            Ok(None)
        }
    }

    async fn put_authentication_challenge(&self, email: &str, ceremony_state: Vec<u8>, now: DateTime<Utc>) -> Result<WebAuthnAuthenticationChallenge> {
        let mut rows = self.authentications.lock().unwrap();
        rows.retain(|r| r.email != email);
        let row = WebAuthnAuthenticationChallenge {
            header: RecordHeader::new(now),
            email: email.to_string(),
            ceremony_state,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn take_authentication_challenge(&self, email: &str) -> Result<Option<WebAuthnAuthenticationChallenge>> {
        let mut rows = self.authentications.lock().unwrap();
        if let Some(pos) = rows.iter().position(|r| r.email == email) {
            Ok(Some(rows.remove(pos)))
        } else {
            Ok(None)
        }
    }
}

/// [`EmailSender`] that captures every message instead of delivering it, so
/// tests can assert on subject/body/recipient.
#[derive(Default)]
pub struct CapturingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl CapturingEmailSender {
    /// Every message captured so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// The most recently captured message, if any.
    #[must_use]
    pub fn last(&self) -> Option<EmailMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl EmailSender for CapturingEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// A single scripted upstream account, keyed by the `code` a test exchanges
/// at `/callback`.
#[derive(Debug, Clone)]
pub struct FixtureAccount {
    /// Authorization code the test's callback request presents.
    pub code: String,
    /// The account `exchange_and_resolve` resolves to for that code.
    pub account: ResolvedAccount,
}

/// [`OAuthClient`] backed by a fixed table of authorization codes, standing
/// in for a real upstream provider in tests (S1's "GitHub callback happy
/// path" and friends).
#[derive(Default)]
pub struct FixtureOAuthClient {
    accounts: Mutex<Vec<FixtureAccount>>,
}

impl FixtureOAuthClient {
    /// Build a client with no scripted accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `code` to resolve to `account` at exchange time.
    pub fn push(&self, code: impl Into<String>, account: ResolvedAccount) {
        self.accounts.lock().unwrap().push(FixtureAccount {
            code: code.into(),
            account,
        });
    }
}

#[async_trait::async_trait]
impl OAuthClient for FixtureOAuthClient {
    async fn authorize_url(&self, provider: &OAuthProviderConfig, redirect_uri: &str, csrf_state: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("https://upstream.example.com/{}/authorize", provider.name)).map_err(|_| AuthError::Internal)?;
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", csrf_state);
        Ok(url)
    }

    async fn exchange_and_resolve(&self, _provider: &OAuthProviderConfig, _redirect_uri: &str, code: &str) -> Result<ResolvedAccount> {
        self.accounts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.code == code)
            .map(|a| a.account.clone())
            .ok_or(AuthError::ProviderError {
                error: "invalid_grant".to_string(),
                error_description: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_upsert_remote_is_idempotent() {
        let store = MemoryIdentityStore::default();
        let now = Utc::now();
        let first = store.upsert_remote("https://github.com", "1", now).await.unwrap();
        let second = store.upsert_remote("https://github.com", "1", now).await.unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn fixture_oauth_client_resolves_scripted_code() {
        let client = FixtureOAuthClient::new();
        client.push(
            "abc123",
            ResolvedAccount {
                subject: "42".to_string(),
                issuer: "https://github.com".to_string(),
                email: Some("octocat@example.com".to_string()),
                tokens: ProviderTokens::default(),
            },
        );
        let provider = OAuthProviderConfig::new("github", crate::config::ProviderKind::GitHub, "id", "secret");
        let account = client.exchange_and_resolve(&provider, "https://app.example.com/callback", "abc123").await.unwrap();
        assert_eq!(account.subject, "42");
    }

    #[tokio::test]
    async fn capturing_email_sender_records_messages() {
        let sender = CapturingEmailSender::default();
        sender
            .send(EmailMessage {
                to: "a@example.com".to_string(),
                subject: "hi".to_string(),
                body: "body".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(sender.last().unwrap().to, "a@example.com");
    }
}
