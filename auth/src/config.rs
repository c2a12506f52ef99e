//! Config/Provider Registry.
//!
//! A read-through, process-wide, immutable-after-load view assembled at
//! server start (by the out-of-scope configuration loader) into the
//! builder-pattern config structs below, following the `new(required) ->
//! Self` + chainable `with_*()` pattern this codebase already uses for its
//! per-provider config types.
//!
//! Rotation of the signing key or provider set requires a full registry
//! reload (a new `Arc` swap), never in-place mutation.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::constants::{DEFAULT_OTC_TTL, DEFAULT_PKCE_TTL, DEFAULT_SESSION_TTL, DEFAULT_SHORT_TOKEN_TTL};
use crate::token::{SigningKey, TokenKind};

/// How a passwordless/email factor is verified: a clickable link, or a
/// 6-digit code typed back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMethod {
    /// Email a clickable link carrying a signed token.
    Link,
    /// Email a 6-digit one-time code.
    #[default]
    Code,
}

/// Kind of OAuth2/OIDC provider, distinguishing built-in quirks (GitHub's
/// JSON token-exchange body, fixed issuer) from generic OIDC discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// `builtin::oauth_github`: JSON token exchange, no OIDC discovery, fixed
    /// issuer `https://github.com`, user info via `GET api.github.com/user`.
    GitHub,
    /// Any provider implementing standard OIDC discovery (Google, Microsoft,
    /// Discord, Apple, Slack, or an operator-defined issuer).
    Oidc,
}

/// Configuration for one OAuth2/OIDC provider.
#[derive(Debug, Clone)]
pub struct OAuthProviderConfig {
    /// Provider name as it appears in `state.provider` and route params.
    pub name: String,
    /// Provider kind (built-in quirks vs. generic OIDC discovery).
    pub kind: ProviderKind,
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Extra scopes requested in addition to the provider's defaults.
    pub additional_scope: Vec<String>,
    /// OIDC discovery issuer URL. `None` for `ProviderKind::GitHub`.
    pub issuer_url: Option<Url>,
}

impl OAuthProviderConfig {
    /// Create a new provider config with no additional scopes.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ProviderKind, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            additional_scope: Vec::new(),
            issuer_url: None,
        }
    }

    /// Add scopes beyond the provider's defaults.
    #[must_use]
    pub fn with_additional_scope(mut self, scopes: Vec<String>) -> Self {
        self.additional_scope = scopes;
        self
    }

    /// Set the OIDC discovery issuer (required for [`ProviderKind::Oidc`]).
    #[must_use]
    pub fn with_issuer_url(mut self, issuer_url: Url) -> Self {
        self.issuer_url = Some(issuer_url);
        self
    }
}

/// Configuration for the local email+password provider.
#[derive(Debug, Clone)]
pub struct EmailPasswordConfig {
    /// Provider name, conventionally `builtin::local_emailpassword`.
    pub name: String,
    /// Whether registration requires email verification before first use.
    pub require_verification: bool,
    /// How verification/sign-in codes are delivered.
    pub verification_method: VerificationMethod,
}

impl EmailPasswordConfig {
    /// Create a new config requiring verification via emailed link.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            require_verification: true,
            verification_method: VerificationMethod::Link,
        }
    }

    /// Override whether verification is required.
    #[must_use]
    pub const fn with_require_verification(mut self, require: bool) -> Self {
        self.require_verification = require;
        self
    }

    /// Override the verification delivery method.
    #[must_use]
    pub const fn with_verification_method(mut self, method: VerificationMethod) -> Self {
        self.verification_method = method;
        self
    }
}

/// Configuration for the magic-link provider.
#[derive(Debug, Clone)]
pub struct MagicLinkConfig {
    /// Provider name, conventionally `builtin::magic_link`.
    pub name: String,
    /// How the sign-in proof is delivered.
    pub verification_method: VerificationMethod,
    /// Time-to-live for a one-time code issued in `Code` mode.
    pub otc_ttl: Duration,
}

impl MagicLinkConfig {
    /// Create a new config using the code delivery method by default.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verification_method: VerificationMethod::Code,
            otc_ttl: DEFAULT_OTC_TTL,
        }
    }

    /// Override the verification delivery method.
    #[must_use]
    pub const fn with_verification_method(mut self, method: VerificationMethod) -> Self {
        self.verification_method = method;
        self
    }
}

/// Configuration for the WebAuthn provider.
#[derive(Debug, Clone)]
pub struct WebAuthnConfig {
    /// Provider name, conventionally `builtin::webauthn`.
    pub name: String,
    /// Origin WebAuthn ceremonies are scoped to; its host becomes `rp.id`.
    pub relying_party_origin: Url,
    /// Human-readable relying party name shown by authenticators.
    pub relying_party_name: String,
}

impl WebAuthnConfig {
    /// Create a new config.
    #[must_use]
    pub fn new(name: impl Into<String>, relying_party_origin: Url, relying_party_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relying_party_origin,
            relying_party_name: relying_party_name.into(),
        }
    }
}

/// One webhook subscription: where to deliver, which events, and how to sign.
#[derive(Debug, Clone)]
pub struct WebhookSubscription {
    /// Delivery URL.
    pub url: Url,
    /// Event types this subscription receives.
    pub events: Vec<crate::events::EventType>,
    /// HMAC-SHA256 signing secret, if the subscriber wants signed payloads.
    pub signing_secret_key: Option<Vec<u8>>,
}

/// Top-level, read-only configuration and provider registry.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// The server's external base URL (`iss`/`aud` for every signed token).
    pub base_url: Url,
    signing_key: SigningKey,
    allowed_redirect_urls: Vec<Url>,
    oauth_providers: HashMap<String, OAuthProviderConfig>,
    email_password: Option<EmailPasswordConfig>,
    magic_link: Option<MagicLinkConfig>,
    webauthn: Option<WebAuthnConfig>,
    webhook_subscriptions: Vec<WebhookSubscription>,
    token_ttls: HashMap<TokenKind, Duration>,
}

impl AuthConfig {
    /// Start building a registry for `base_url`, signed with `signing_key`.
    #[must_use]
    pub fn new(base_url: Url, signing_key: SigningKey) -> Self {
        let mut token_ttls = HashMap::new();
        token_ttls.insert(TokenKind::OAuthState, DEFAULT_SHORT_TOKEN_TTL);
        token_ttls.insert(TokenKind::Reset, DEFAULT_SHORT_TOKEN_TTL);
        token_ttls.insert(TokenKind::Verification, DEFAULT_SHORT_TOKEN_TTL);
        token_ttls.insert(TokenKind::MagicLink, DEFAULT_SHORT_TOKEN_TTL);
        token_ttls.insert(TokenKind::Session, DEFAULT_SESSION_TTL);
        Self {
            base_url,
            signing_key,
            allowed_redirect_urls: Vec::new(),
            oauth_providers: HashMap::new(),
            email_password: None,
            magic_link: None,
            webauthn: None,
            webhook_subscriptions: Vec::new(),
            token_ttls,
        }
    }

    /// Add an allowed redirect URL prefix.
    #[must_use]
    pub fn with_allowed_redirect_url(mut self, url: Url) -> Self {
        self.allowed_redirect_urls.push(url);
        self
    }

    /// Register an OAuth2/OIDC provider.
    #[must_use]
    pub fn with_oauth_provider(mut self, config: OAuthProviderConfig) -> Self {
        self.oauth_providers.insert(config.name.clone(), config);
        self
    }

    /// Configure the local email+password provider.
    #[must_use]
    pub fn with_email_password(mut self, config: EmailPasswordConfig) -> Self {
        self.email_password = Some(config);
        self
    }

    /// Configure the magic-link provider.
    #[must_use]
    pub fn with_magic_link(mut self, config: MagicLinkConfig) -> Self {
        self.magic_link = Some(config);
        self
    }

    /// Configure the WebAuthn provider.
    #[must_use]
    pub fn with_webauthn(mut self, config: WebAuthnConfig) -> Self {
        self.webauthn = Some(config);
        self
    }

    /// Add a webhook subscription.
    #[must_use]
    pub fn with_webhook_subscription(mut self, subscription: WebhookSubscription) -> Self {
        self.webhook_subscriptions.push(subscription);
        self
    }

    /// Override a token kind's time-to-live.
    #[must_use]
    pub fn with_token_ttl(mut self, kind: TokenKind, ttl: Duration) -> Self {
        self.token_ttls.insert(kind, ttl);
        self
    }

    /// The signing key used for every [`crate::token`] operation.
    #[must_use]
    pub const fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Configured allow-list entries, consulted by [`crate::allowlist`].
    #[must_use]
    pub fn allowed_redirect_urls(&self) -> &[Url] {
        &self.allowed_redirect_urls
    }

    /// Look up an OAuth provider by name.
    #[must_use]
    pub fn oauth_provider(&self, name: &str) -> Option<&OAuthProviderConfig> {
        self.oauth_providers.get(name)
    }

    /// The configured email+password provider, if any.
    #[must_use]
    pub const fn email_password(&self) -> Option<&EmailPasswordConfig> {
        self.email_password.as_ref()
    }

    /// The configured magic-link provider, if any.
    #[must_use]
    pub const fn magic_link(&self) -> Option<&MagicLinkConfig> {
        self.magic_link.as_ref()
    }

    /// The configured WebAuthn provider, if any.
    #[must_use]
    pub const fn webauthn(&self) -> Option<&WebAuthnConfig> {
        self.webauthn.as_ref()
    }

    /// Subscriptions interested in `event_type`.
    #[must_use]
    pub fn webhook_subscriptions_for(&self, event_type: crate::events::EventType) -> Vec<&WebhookSubscription> {
        self.webhook_subscriptions
            .iter()
            .filter(|s| s.events.contains(&event_type))
            .collect()
    }

    /// Time-to-live for `kind`, falling back to `crate::constants`' defaults
    /// when unconfigured.
    #[must_use]
    pub fn token_time_to_live(&self, kind: TokenKind) -> Duration {
        self.token_ttls
            .get(&kind)
            .copied()
            .unwrap_or(DEFAULT_SHORT_TOKEN_TTL)
    }

    /// Default PKCE challenge lifetime before an expiry sweep reclaims it.
    #[must_use]
    pub const fn pkce_ttl(&self) -> Duration {
        DEFAULT_PKCE_TTL
    }
}
