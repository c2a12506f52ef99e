//! Flow Controller.
//!
//! Per-endpoint orchestration as plain async functions over an injected
//! [`AuthEnvironment`] — no request-scoped shared mutable state, so a
//! flow is just a sequence of calls into `crate::token`, `crate::pkce`,
//! `crate::otc`, `crate::providers::*`, and `crate::stores::*`, finishing
//! with a webhook dispatch. HTTP status/Accept-header shaping is not this
//! module's job — it returns an [`AuthOutcome`] the `handlers` layer (the
//! true outermost HTTP boundary, gated behind the `axum` feature) renders.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::allowlist::UrlAllowList;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::events::WebhookEvent;
use crate::otc::OtcStore;
use crate::pkce::{self, PkceStore};
use crate::providers::email::EmailSender;
use crate::providers::oauth::{OAuthClient, ResolvedAccount};
use crate::providers::{magic_link, password, webauthn as webauthn_provider};
use crate::state::{Factor, Identity, ProviderTokens};
use crate::stores::{FactorStore, IdentityStore, WebAuthnChallengeStore};
use crate::token::{self, TokenClaims, TokenKind};
use crate::webhook::{self, WebhookEnvironment};

/// Everything a flow needs, injected rather than reached for globally.
///
/// Cloning is cheap: every field is an `Arc` (or already `Clone`-cheap), so
/// the same environment is shared across every request in a worker.
#[derive(Clone)]
pub struct AuthEnvironment {
    /// Read-only provider/TTL/webhook registry.
    pub config: Arc<AuthConfig>,
    /// Allow-list derived from `config.allowed_redirect_urls()`.
    pub allowlist: Arc<UrlAllowList>,
    /// Identity store.
    pub identities: Arc<dyn IdentityStore>,
    /// Factor store.
    pub factors: Arc<dyn FactorStore>,
    /// PKCE store.
    pub pkce: Arc<dyn PkceStore>,
    /// One-time-code store.
    pub otc: Arc<dyn OtcStore>,
    /// WebAuthn ceremony challenge store.
    pub webauthn_challenges: Arc<dyn WebAuthnChallengeStore>,
    /// Outbound email sender.
    pub email: Arc<dyn EmailSender>,
    /// OAuth2/OIDC client (discovery, token exchange, ID-token validation).
    pub oauth: Arc<dyn OAuthClient>,
    /// `webauthn-rs` client, built from `config.webauthn()` at startup.
    /// `None` if no WebAuthn provider is configured.
    pub webauthn: Option<Arc<webauthn_rs::Webauthn>>,
    /// Webhook delivery dependencies (HTTP client, retry policy).
    pub webhook: Arc<WebhookEnvironment>,
}

impl AuthEnvironment {
    /// Fire the webhook dispatch for `event` to every subscription
    /// interested in its [`crate::events::EventType`], without blocking the
    /// caller for the HTTP response that triggered it.
    fn emit(&self, event: WebhookEvent, now: DateTime<Utc>) {
        let subscriptions = self.config.webhook_subscriptions_for(event.event_type());
        if subscriptions.is_empty() {
            return;
        }
        let envelope = webhook::envelope_for(event, now);
        let effects = webhook::dispatch(&self.webhook, &subscriptions, &envelope);
        for effect in effects {
            if let composable_rust_core::effect::Effect::Future(future) = effect {
                let _handle = tokio::spawn(future);
            }
        }
    }

    fn oauth_provider(&self, name: &str) -> Result<&crate::config::OAuthProviderConfig> {
        self.config
            .oauth_provider(name)
            .ok_or_else(|| AuthError::InvalidRequest(format!("unknown provider: {name}")))
    }

    fn require_webauthn(&self) -> Result<(Arc<webauthn_rs::Webauthn>, &crate::config::WebAuthnConfig)> {
        let config = self.config.webauthn().ok_or(AuthError::Internal)?;
        let client = self.webauthn.clone().ok_or(AuthError::Internal)?;
        Ok((client, config))
    }
}

/// What a flow produced, independent of how the HTTP layer renders it.
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// Redirect the client to `url` (a 302 in the HTTP layer).
    Redirect(Url),
    /// The flow completed with no further client-visible payload (the HTTP
    /// layer renders this as 200/201/204 depending on the endpoint).
    Completed,
    /// An opaque PKCE `code` was produced (register/authenticate success);
    /// the HTTP layer either redirects with `?code=...` or returns it as JSON.
    Code {
        /// The PKCE row's id, exchanged for an identity/tokens at `/token`.
        code: Uuid,
        /// The provider name, echoed back to JSON callers.
        provider: String,
    },
}

/// `{auth_token, identity_id, provider_token, provider_refresh_token, provider_id_token}`
/// returned by `/token`.
#[derive(Debug, Clone)]
pub struct ExchangedToken {
    /// A signed session token bound to `identity_id`.
    pub auth_token: String,
    /// The identity the PKCE row was bound to.
    pub identity_id: Uuid,
    /// The upstream provider's own access token, if any.
    pub provider_token: Option<String>,
    /// The upstream provider's own refresh token, if any.
    pub provider_refresh_token: Option<String>,
    /// The upstream provider's own `id_token`, if any.
    pub provider_id_token: Option<String>,
}

/// Resolve a redirect/reset/link URL against the allow-list, propagating
/// [`AuthError::AllowlistViolation`] as-is. Endpoints that can redirect to an
/// error page instead use [`recover_with_redirect`], which calls this
/// internally once a `redirect_on_failure` target is known to be valid.
fn validate_redirect(env: &AuthEnvironment, url: &str) -> Result<Url> {
    env.allowlist.validate(url)
}

/// Turn a successful [`AuthOutcome::Code`] into a redirect to `redirect_to`
/// with `?code=...` appended, when the caller supplied one. Any other
/// outcome, or no `redirect_to`, passes through unchanged.
fn finish_with_redirect(env: &AuthEnvironment, outcome: AuthOutcome, redirect_to: Option<&str>) -> Result<AuthOutcome> {
    match (outcome, redirect_to) {
        (AuthOutcome::Code { code, .. }, Some(url)) => {
            let mut redirect = validate_redirect(env, url)?;
            redirect.query_pairs_mut().append_pair("code", &code.to_string());
            Ok(AuthOutcome::Redirect(redirect))
        }
        (other, _) => Ok(other),
    }
}

/// On a provider-level failure, redirect to `redirect_on_failure` with
/// `?error=...` appended when the caller supplied one; otherwise propagate
/// `err` as-is for the HTTP layer to render as a JSON error.
fn recover_with_redirect(env: &AuthEnvironment, err: AuthError, redirect_on_failure: Option<&str>) -> Result<AuthOutcome> {
    let Some(url) = redirect_on_failure else {
        return Err(err);
    };
    let mut redirect = validate_redirect(env, url)?;
    let message = if err.is_security_sensitive() { "authentication failed".to_string() } else { err.to_string() };
    redirect.query_pairs_mut().append_pair("error", &message);
    Ok(AuthOutcome::Redirect(redirect))
}

// ---------------------------------------------------------------------
// OAuth2/OIDC
// ---------------------------------------------------------------------

/// `GET /authorize`.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] for an unknown provider,
/// [`AuthError::AllowlistViolation`] if `redirect_to` is not allow-listed, or
/// whatever the [`OAuthClient`] returns for discovery/URL-construction failures.
#[allow(clippy::too_many_arguments)]
pub async fn authorize(
    env: &AuthEnvironment,
    provider_name: &str,
    redirect_to: &str,
    redirect_to_on_signup: Option<&str>,
    challenge: &str,
    callback_redirect_uri: &str,
    now: DateTime<Utc>,
) -> Result<Url> {
    let provider = env.oauth_provider(provider_name)?;
    validate_redirect(env, redirect_to)?;
    if let Some(signup_url) = redirect_to_on_signup {
        validate_redirect(env, signup_url)?;
    }

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    env.pkce.record(challenge, now, now + pkce_ttl).await?;

    let claims = TokenClaims::OAuthState {
        provider: provider_name.to_string(),
        redirect_to: redirect_to.to_string(),
        redirect_to_on_signup: redirect_to_on_signup.map(ToString::to_string),
        challenge: challenge.to_string(),
        redirect_uri: callback_redirect_uri.to_string(),
    };
    let ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::OAuthState)).unwrap_or_default();
    let state = token::sign(env.config.signing_key(), env.config.base_url.as_str(), claims, now, ttl)?;

    env.oauth.authorize_url(provider, callback_redirect_uri, &state).await
}

/// Parameters round-tripped through `GET/POST /callback`.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    /// The signed `state` token minted by [`authorize`].
    pub state: String,
    /// The authorization code, present on provider success.
    pub code: Option<String>,
    /// The provider's `error` code, present on provider failure.
    pub error: Option<String>,
    /// The provider's `error_description`, if any.
    pub error_description: Option<String>,
}

/// `GET/POST /callback`.
///
/// # Errors
/// Returns [`AuthError::InvalidData`] if `state` fails verification, or
/// whatever the upstream token exchange / ID-token validation returns.
pub async fn callback(env: &AuthEnvironment, request: CallbackRequest, now: DateTime<Utc>) -> Result<AuthOutcome> {
    let claims = token::verify(env.config.signing_key(), env.config.base_url.as_str(), TokenKind::OAuthState, &request.state, now)?;
    let TokenClaims::OAuthState {
        provider: provider_name,
        redirect_to,
        redirect_to_on_signup,
        challenge,
        redirect_uri,
    } = claims
    else {
        return Err(AuthError::InvalidData("Invalid state token".to_string()));
    };

    let provider = env.oauth_provider(&provider_name)?;

    if let Some(error) = request.error {
        let mut redirect = validate_redirect(env, &redirect_to)?;
        redirect.query_pairs_mut().append_pair("error", &error);
        if let Some(description) = request.error_description {
            redirect.query_pairs_mut().append_pair("error_description", &description);
        }
        return Ok(AuthOutcome::Redirect(redirect));
    }

    let code = request.code.ok_or_else(|| AuthError::InvalidRequest("missing code".to_string()))?;
    let ResolvedAccount { subject, issuer, tokens, .. } = env.oauth.exchange_and_resolve(provider, &redirect_uri, &code).await?;

    let existing = env.identities.find_by_issuer_subject(&issuer, &subject).await?;
    let is_new = existing.is_none();
    let identity = env.identities.upsert_remote(&issuer, &subject, now).await?;

    // `authorize` already recorded this row; `record` is idempotent on
    // `challenge`, so this fetches the same row rather than creating a new
    // one. Binding (not claiming) keeps the row alive for the client's
    // subsequent `/token` call, which claims it by re-deriving the challenge
    // from its own copy of the verifier.
    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let bound_row = env.pkce.record(&challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(bound_row.header.id, identity.id(), tokens, now).await?;

    if is_new {
        env.emit(WebhookEvent::IdentityCreated { identity_id: identity.id() }, now);
    }
    env.emit(WebhookEvent::IdentityAuthenticated { identity_id: identity.id() }, now);

    let target = if is_new {
        redirect_to_on_signup.as_deref().unwrap_or(&redirect_to)
    } else {
        redirect_to.as_str()
    };
    let mut redirect = validate_redirect(env, target)?;
    redirect.query_pairs_mut().append_pair("code", &bound_row.header.id.to_string());
    Ok(AuthOutcome::Redirect(redirect))
}

// ---------------------------------------------------------------------
// Token exchange (shared by every provider)
// ---------------------------------------------------------------------

/// `GET /token`: claim a PKCE row and mint a session token.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if `verifier` fails length
/// validation, or [`AuthError::InvalidGrant`] if the challenge it derives
/// is unbound, expired, or already claimed.
pub async fn exchange_token(env: &AuthEnvironment, verifier: &str, now: DateTime<Utc>) -> Result<ExchangedToken> {
    let (identity_id, tokens) = pkce::claim_and_exchange(env.pkce.as_ref(), verifier, now).await?;
    let ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::Session)).unwrap_or_default();
    let auth_token = token::sign(
        env.config.signing_key(),
        env.config.base_url.as_str(),
        TokenClaims::Session { identity_id },
        now,
        ttl,
    )?;
    Ok(ExchangedToken {
        auth_token,
        identity_id,
        provider_token: tokens.auth_token,
        provider_refresh_token: tokens.refresh_token,
        provider_id_token: tokens.id_token,
    })
}

// ---------------------------------------------------------------------
// Local Password
// ---------------------------------------------------------------------

/// `POST /register` for `builtin::local_emailpassword`.
///
/// `redirect_to`/`redirect_on_failure` let a form-submitting client get a 302
/// back instead of a JSON body; a JSON client simply omits both and always
/// gets `AuthOutcome::Code`/the propagated error.
///
/// # Errors
/// Returns [`AuthError::Conflict`] if `email` is already registered, unless
/// `redirect_on_failure` recovers it into a redirect.
#[allow(clippy::too_many_arguments)]
pub async fn password_register(
    env: &AuthEnvironment,
    email: &str,
    password_plain: &str,
    challenge: &str,
    redirect_to: Option<&str>,
    redirect_on_failure: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    if let Some(url) = redirect_to {
        validate_redirect(env, url)?;
    }
    if let Some(url) = redirect_on_failure {
        validate_redirect(env, url)?;
    }
    match password_register_inner(env, email, password_plain, challenge, now).await {
        Ok(outcome) => finish_with_redirect(env, outcome, redirect_to),
        Err(err) => recover_with_redirect(env, err, redirect_on_failure),
    }
}

async fn password_register_inner(env: &AuthEnvironment, email: &str, password_plain: &str, challenge: &str, now: DateTime<Utc>) -> Result<AuthOutcome> {
    let config = env.config.email_password().ok_or(AuthError::Internal)?;
    let (identity, factor) = password::register(env.identities.as_ref(), env.factors.as_ref(), email, password_plain, now).await?;
    env.emit(WebhookEvent::IdentityCreated { identity_id: identity.id() }, now);

    if config.require_verification {
        send_verification(env, &identity, &factor, config.verification_method, challenge, now).await?;
    }

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, identity.id(), ProviderTokens::default(), now).await?;
    Ok(AuthOutcome::Code {
        code: row.header.id,
        provider: config.name.clone(),
    })
}

async fn send_verification(
    env: &AuthEnvironment,
    identity: &Identity,
    factor: &Factor,
    method: crate::config::VerificationMethod,
    challenge: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::Verification)).unwrap_or_default();
    match method {
        crate::config::VerificationMethod::Link => {
            let claims = TokenClaims::Verification {
                identity_id: identity.id(),
                factor_id: factor.id(),
                challenge: Some(challenge.to_string()),
            };
            let signed = token::sign(env.config.signing_key(), env.config.base_url.as_str(), claims, now, ttl)?;
            env.email
                .send(crate::providers::email::EmailMessage {
                    to: factor.email().to_string(),
                    subject: "Verify your email".to_string(),
                    body: format!("{}/verify?verification_token={signed}", env.config.base_url),
                })
                .await?;
        }
        crate::config::VerificationMethod::Code => {
            let otc_ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::Verification)).unwrap_or_default();
            let record = magic_link::send_code(env.otc.as_ref(), env.email.as_ref(), factor.id(), factor.email(), now, otc_ttl).await?;
            env.emit(
                WebhookEvent::OneTimeCodeRequested {
                    email_factor_id: factor.id(),
                    otc_id: record.header.id,
                },
                now,
            );
        }
    }
    Ok(())
}

/// `POST /authenticate` for `builtin::local_emailpassword`.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if the credentials don't
/// match, unless `redirect_on_failure` recovers it into a redirect.
pub async fn password_authenticate(
    env: &AuthEnvironment,
    email: &str,
    password_plain: &str,
    challenge: &str,
    redirect_to: Option<&str>,
    redirect_on_failure: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    if let Some(url) = redirect_to {
        validate_redirect(env, url)?;
    }
    if let Some(url) = redirect_on_failure {
        validate_redirect(env, url)?;
    }
    match password_authenticate_inner(env, email, password_plain, challenge, now).await {
        Ok(outcome) => finish_with_redirect(env, outcome, redirect_to),
        Err(err) => recover_with_redirect(env, err, redirect_on_failure),
    }
}

async fn password_authenticate_inner(env: &AuthEnvironment, email: &str, password_plain: &str, challenge: &str, now: DateTime<Utc>) -> Result<AuthOutcome> {
    let config = env.config.email_password().ok_or(AuthError::Internal)?;
    let identity = password::authenticate(env.identities.as_ref(), env.factors.as_ref(), email, password_plain).await?;
    env.emit(WebhookEvent::IdentityAuthenticated { identity_id: identity.id() }, now);

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, identity.id(), ProviderTokens::default(), now).await?;
    Ok(AuthOutcome::Code {
        code: row.header.id,
        provider: config.name.clone(),
    })
}

/// `POST /send-reset-email`. Always succeeds externally, regardless of
/// whether `email` has a registered factor, so a caller can't use the
/// response to probe which emails are registered. `challenge` is recorded as
/// a PKCE row up front (recording is idempotent and carries no identity, so
/// it discloses nothing) and embedded in the minted reset token, so a
/// completed [`reset_password`] can bind it without the client supplying a
/// second challenge.
///
/// # Errors
/// Returns whatever the backing [`FactorStore`]/[`EmailSender`] return for
/// transport-level failures; never [`AuthError::AuthenticationFailed`] or
/// any error that would disclose account existence.
pub async fn send_reset_email(env: &AuthEnvironment, email: &str, reset_url: &str, challenge: &str, now: DateTime<Utc>) -> Result<()> {
    validate_redirect(env, reset_url)?;
    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    env.pkce.record(challenge, now, now + pkce_ttl).await?;

    let ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::Reset)).unwrap_or_default();
    let token = password::send_reset(env.factors.as_ref(), env.config.signing_key(), env.config.base_url.as_str(), email, challenge, now, ttl).await?;
    if let Some(reset_token) = token {
        env.email
            .send(crate::providers::email::EmailMessage {
                to: email.to_string(),
                subject: "Reset your password".to_string(),
                body: format!("{reset_url}?reset_token={reset_token}"),
            })
            .await?;
    }
    Ok(())
}

/// `POST /reset-password`. On success, binds the PKCE row recorded by the
/// matching [`send_reset_email`] call to the identity and returns its code,
/// so the client can exchange it at `/token` immediately.
///
/// # Errors
/// Returns [`AuthError::InvalidData`] if the token is invalid, expired, or
/// was minted against a password hash that has since changed.
pub async fn reset_password(env: &AuthEnvironment, reset_token: &str, new_password: &str, now: DateTime<Utc>) -> Result<AuthOutcome> {
    let (identity_id, challenge) = password::reset(env.factors.as_ref(), env.config.signing_key(), env.config.base_url.as_str(), reset_token, new_password, now).await?;
    env.emit(WebhookEvent::PasswordReset { identity_id }, now);

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(&challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, identity_id, ProviderTokens::default(), now).await?;

    let provider = env.config.email_password().map(|c| c.name.clone()).unwrap_or_default();
    Ok(AuthOutcome::Code { code: row.header.id, provider })
}

// ---------------------------------------------------------------------
// Verification (shared by the password and magic-link Code mode)
// ---------------------------------------------------------------------

/// `POST /verify`: redeem a one-time code minted by [`send_verification`] or
/// a magic-link registration, marking the factor's email verified.
///
/// # Errors
/// Returns [`AuthError::InvalidCode`] or [`AuthError::AttemptsExceeded`] per
/// [`crate::otc::verify`].
pub async fn verify_otc(env: &AuthEnvironment, email: &str, code: &str, now: DateTime<Utc>) -> Result<()> {
    let factor = find_email_bearing_factor(env, email).await?;
    crate::otc::verify(env.otc.as_ref(), factor.id(), code, now).await?;
    mark_verified(env, factor, now).await
}

async fn find_email_bearing_factor(env: &AuthEnvironment, email: &str) -> Result<Factor> {
    if let Some(factor) = env.factors.find_email_password(email).await? {
        return Ok(factor);
    }
    if let Some(factor) = env.factors.find_magic_link(email).await? {
        return Ok(factor);
    }
    Err(AuthError::InvalidRequest(format!("no email-bearing factor for {email}")))
}

async fn mark_verified(env: &AuthEnvironment, factor: Factor, now: DateTime<Utc>) -> Result<()> {
    let identity_id = factor.identity_id();
    let factor_id = factor.id();
    let updated = match factor {
        Factor::EmailPassword {
            header,
            identity_id,
            email,
            password_hash,
            ..
        } => Factor::EmailPassword {
            header: crate::state::RecordHeader { modified_at: now, ..header },
            identity_id,
            email,
            password_hash,
            verified_at: Some(now),
        },
        Factor::MagicLink { header, identity_id, email, .. } => Factor::MagicLink {
            header: crate::state::RecordHeader { modified_at: now, ..header },
            identity_id,
            email,
            verified_at: Some(now),
        },
        other @ Factor::WebAuthn { .. } => other,
    };
    env.factors.update(updated).await?;
    env.emit(
        WebhookEvent::EmailVerified {
            identity_id,
            email_factor_id: factor_id,
        },
        now,
    );
    Ok(())
}

/// `POST /resend-verification-email`.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if no email-bearing factor matches.
pub async fn resend_verification_email(env: &AuthEnvironment, email: &str, challenge: &str, now: DateTime<Utc>) -> Result<()> {
    let factor = find_email_bearing_factor(env, email).await?;
    let identity = env
        .identities
        .find_by_id(factor.identity_id())
        .await?
        .ok_or(AuthError::Internal)?;
    let method = env
        .config
        .email_password()
        .map(|c| c.verification_method)
        .unwrap_or_default();
    send_verification(env, &identity, &factor, method, challenge, now).await
}

// ---------------------------------------------------------------------
// Magic Link
// ---------------------------------------------------------------------

/// `POST /magic-link/register`.
///
/// # Errors
/// Returns [`AuthError::Conflict`] if `email` already has a magic-link
/// factor, unless `redirect_on_failure` recovers it into a redirect.
#[allow(clippy::too_many_arguments)]
pub async fn magic_link_register(
    env: &AuthEnvironment,
    email: &str,
    challenge: &str,
    callback_url: &str,
    link_url: Option<&str>,
    redirect_on_failure: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    if let Some(url) = redirect_on_failure {
        validate_redirect(env, url)?;
    }
    match magic_link_register_inner(env, email, challenge, callback_url, link_url, now).await {
        Ok(()) => Ok(AuthOutcome::Completed),
        Err(err) => recover_with_redirect(env, err, redirect_on_failure),
    }
}

async fn magic_link_register_inner(env: &AuthEnvironment, email: &str, challenge: &str, callback_url: &str, link_url: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    validate_redirect(env, callback_url)?;
    let config = env.config.magic_link().ok_or(AuthError::Internal)?;
    let (_identity, factor) = magic_link::register(env.identities.as_ref(), env.factors.as_ref(), email, now).await?;
    env.emit(
        WebhookEvent::IdentityCreated {
            identity_id: factor.identity_id(),
        },
        now,
    );
    deliver_magic_link(env, config, &factor, challenge, callback_url, link_url, now).await
}

/// `POST /magic-link/email`: sign-in send for an existing magic-link factor.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if `email` has no magic-link
/// factor (kept generic so account existence is never disclosed), unless
/// `redirect_on_failure` recovers it into a redirect.
pub async fn magic_link_send(
    env: &AuthEnvironment,
    email: &str,
    challenge: &str,
    callback_url: &str,
    link_url: Option<&str>,
    redirect_on_failure: Option<&str>,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    if let Some(url) = redirect_on_failure {
        validate_redirect(env, url)?;
    }
    match magic_link_send_inner(env, email, challenge, callback_url, link_url, now).await {
        Ok(()) => Ok(AuthOutcome::Completed),
        Err(err) => recover_with_redirect(env, err, redirect_on_failure),
    }
}

async fn magic_link_send_inner(env: &AuthEnvironment, email: &str, challenge: &str, callback_url: &str, link_url: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    validate_redirect(env, callback_url)?;
    let config = env.config.magic_link().ok_or(AuthError::Internal)?;
    let factor = env
        .factors
        .find_magic_link(email)
        .await?
        .ok_or(AuthError::AuthenticationFailed)?;
    deliver_magic_link(env, config, &factor, challenge, callback_url, link_url, now).await
}

async fn deliver_magic_link(
    env: &AuthEnvironment,
    config: &crate::config::MagicLinkConfig,
    factor: &Factor,
    challenge: &str,
    callback_url: &str,
    link_url: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    match config.verification_method {
        crate::config::VerificationMethod::Link => {
            let ttl = chrono::Duration::from_std(env.config.token_time_to_live(TokenKind::MagicLink)).unwrap_or_default();
            let default_link_url = format!("{}/magic-link/authenticate", env.config.base_url);
            magic_link::send_link(
                env.email.as_ref(),
                env.config.signing_key(),
                env.config.base_url.as_str(),
                link_url.unwrap_or(&default_link_url),
                factor.id(),
                challenge,
                callback_url,
                factor.email(),
                now,
                ttl,
            )
            .await
        }
        crate::config::VerificationMethod::Code => {
            let otc_ttl = chrono::Duration::from_std(config.otc_ttl).unwrap_or_default();
            let record = magic_link::send_code(env.otc.as_ref(), env.email.as_ref(), factor.id(), factor.email(), now, otc_ttl).await?;
            env.emit(
                WebhookEvent::OneTimeCodeRequested {
                    email_factor_id: factor.id(),
                    otc_id: record.header.id,
                },
                now,
            );
            Ok(())
        }
    }
}

/// Parameters for `GET/POST /magic-link/authenticate`, covering both delivery modes.
#[derive(Debug, Clone, Default)]
pub struct MagicLinkAuthenticateRequest {
    /// Link-mode token, from the emailed URL's `token` query param.
    pub token: Option<String>,
    /// Code-mode email.
    pub email: Option<String>,
    /// Code-mode 6-digit code.
    pub code: Option<String>,
    /// Code-mode PKCE challenge.
    pub challenge: Option<String>,
    /// Code-mode callback URL to redirect to on success.
    pub callback_url: Option<String>,
}

/// `GET/POST /magic-link/authenticate`.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if neither a link token nor a
/// code-mode tuple is present, or whatever the underlying validation returns.
pub async fn magic_link_authenticate(env: &AuthEnvironment, request: MagicLinkAuthenticateRequest, now: DateTime<Utc>) -> Result<AuthOutcome> {
    let (factor_id, challenge, callback_url) = if let Some(token) = request.token {
        magic_link::authenticate_via_link(env.config.signing_key(), env.config.base_url.as_str(), &token, now)?
    } else {
        let email = request.email.ok_or_else(|| AuthError::InvalidRequest("missing email".to_string()))?;
        let code = request.code.ok_or_else(|| AuthError::InvalidRequest("missing code".to_string()))?;
        let challenge = request.challenge.ok_or_else(|| AuthError::InvalidRequest("missing challenge".to_string()))?;
        let callback_url = request.callback_url.ok_or_else(|| AuthError::InvalidRequest("missing callback_url".to_string()))?;
        let factor_id = magic_link::authenticate_via_code(env.otc.as_ref(), env.factors.as_ref(), &email, &code, now).await?;
        env.emit(WebhookEvent::OneTimeCodeVerified { email_factor_id: factor_id }, now);
        (factor_id, challenge, callback_url)
    };

    let factor = env.factors.find_by_id(factor_id).await?.ok_or(AuthError::Internal)?;
    env.emit(WebhookEvent::IdentityAuthenticated { identity_id: factor.identity_id() }, now);

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(&challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, factor.identity_id(), ProviderTokens::default(), now).await?;

    let mut redirect = validate_redirect(env, &callback_url)?;
    redirect.query_pairs_mut().append_pair("code", &row.header.id.to_string());
    Ok(AuthOutcome::Redirect(redirect))
}

// ---------------------------------------------------------------------
// WebAuthn
// ---------------------------------------------------------------------

/// `GET /webauthn/register/options`.
///
/// # Errors
/// Returns [`AuthError::Internal`] if no WebAuthn provider is configured.
pub async fn webauthn_register_options(
    env: &AuthEnvironment,
    email: &str,
    origin_header: &str,
    now: DateTime<Utc>,
) -> Result<(webauthn_rs_proto::CreationChallengeResponse, Vec<u8>)> {
    let (client, config) = env.require_webauthn()?;
    webauthn_provider::validate_origin(config, origin_header)?;
    webauthn_provider::register_options(&client, env.factors.as_ref(), env.webauthn_challenges.as_ref(), email, now).await
}

/// `POST /webauthn/register`.
///
/// `expected_user_handle` is the `user_handle` the client echoes back from
/// its `register/options` response; it must match the ceremony's own
/// `user_handle` (already checked against any existing factors for `email`
/// inside `crate::providers::webauthn`) or the request is rejected outright
/// rather than silently trusting whatever the client sent. `verify_url` is
/// validated against the allow-list the same way every other redirect/link
/// target is. On success, a PKCE row is bound under `challenge` so the
/// client can exchange a code at `/token` exactly like every other provider.
///
/// # Errors
/// Returns [`AuthError::AssertionFailed`] if attestation verification fails,
/// the email's factors disagree on `user_handle`, or `expected_user_handle`
/// does not match the ceremony's own `user_handle`.
#[allow(clippy::too_many_arguments)]
pub async fn webauthn_register(
    env: &AuthEnvironment,
    provider_name: &str,
    email: &str,
    expected_user_handle: &[u8],
    response: &webauthn_rs_proto::RegisterPublicKeyCredential,
    verify_url: &str,
    challenge: &str,
    origin_header: &str,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    if !env.config.webauthn().is_some_and(|c| c.name == provider_name) {
        return Err(AuthError::InvalidRequest(format!("unknown provider: {provider_name}")));
    }
    validate_redirect(env, verify_url)?;
    let (client, webauthn_config) = env.require_webauthn()?;
    webauthn_provider::validate_origin(webauthn_config, origin_header)?;
    let factor = webauthn_provider::register(
        &client,
        env.identities.as_ref(),
        env.factors.as_ref(),
        env.webauthn_challenges.as_ref(),
        email,
        expected_user_handle,
        response,
        now,
    )
    .await?;
    env.emit(WebhookEvent::IdentityCreated { identity_id: factor.identity_id() }, now);

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, factor.identity_id(), ProviderTokens::default(), now).await?;
    Ok(AuthOutcome::Code {
        code: row.header.id,
        provider: provider_name.to_string(),
    })
}

/// `GET /webauthn/authenticate/options`.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if `email` has no registered
/// credentials.
pub async fn webauthn_authenticate_options(env: &AuthEnvironment, email: &str, now: DateTime<Utc>) -> Result<webauthn_rs_proto::RequestChallengeResponse> {
    let (client, _config) = env.require_webauthn()?;
    webauthn_provider::authenticate_options(&client, env.factors.as_ref(), env.webauthn_challenges.as_ref(), email, now).await
}

/// `POST /webauthn/authenticate`.
///
/// # Errors
/// Returns [`AuthError::AssertionFailed`] if assertion verification fails.
pub async fn webauthn_authenticate(
    env: &AuthEnvironment,
    email: &str,
    response: &webauthn_rs_proto::PublicKeyCredential,
    challenge: &str,
    now: DateTime<Utc>,
) -> Result<AuthOutcome> {
    let (client, _config) = env.require_webauthn()?;
    let identity_id = webauthn_provider::authenticate(&client, env.factors.as_ref(), env.webauthn_challenges.as_ref(), email, response, now).await?;
    env.emit(WebhookEvent::IdentityAuthenticated { identity_id }, now);

    let pkce_ttl = chrono::Duration::from_std(env.config.pkce_ttl()).unwrap_or_default();
    let row = env.pkce.record(challenge, now, now + pkce_ttl).await?;
    env.pkce.bind(row.header.id, identity_id, ProviderTokens::default(), now).await?;
    Ok(AuthOutcome::Code {
        code: row.header.id,
        provider: env.config.webauthn().map(|c| c.name.clone()).unwrap_or_default(),
    })
}
