//! OIDC/OAuth Client.
//!
//! Two provider shapes: [`ProviderKind::GitHub`], which has no OIDC
//! discovery and exchanges tokens over a JSON body, and
//! [`ProviderKind::Oidc`], which discovers its endpoints from
//! `{issuer}/.well-known/openid-configuration` and validates the returned
//! `id_token` against the issuer's JWKS. Discovery documents are cached per
//! issuer for [`crate::constants::DEFAULT_DISCOVERY_CACHE_TTL`]; a single
//! in-flight fetch per issuer is enforced by `fetch_lock` so a burst of
//! concurrent first-requests doesn't stampede the issuer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, AuthorizationCode, ClientId, ClientSecret, RedirectUrl, Scope, TokenResponse, TokenUrl};
use openidconnect::core::{CoreClient, CoreProviderMetadata};
use openidconnect::{IssuerUrl, Nonce};
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::config::{OAuthProviderConfig, ProviderKind};
use crate::constants::DEFAULT_DISCOVERY_CACHE_TTL;
use crate::error::{AuthError, Result};

/// The resolved upstream account, before it is mapped to a local [`crate::state::Identity`].
#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    /// Provider-scoped subject, unique within `issuer`.
    pub subject: String,
    /// Issuer URL this subject is scoped to.
    pub issuer: String,
    /// Email address, if the provider disclosed one.
    pub email: Option<String>,
    /// Opaque tokens captured at exchange time.
    pub tokens: crate::state::ProviderTokens,
}

struct CachedMetadata {
    metadata: CoreProviderMetadata,
    fetched_at: Instant,
}

/// Caches OIDC discovery documents per issuer, avoiding a round trip on
/// every authorize/callback.
#[derive(Default)]
pub struct DiscoveryCache {
    entries: RwLock<HashMap<String, CachedMetadata>>,
    fetch_lock: Mutex<()>,
}

impl DiscoveryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn get_or_fetch(&self, issuer_url: &Url) -> Result<CoreProviderMetadata> {
        if let Some(cached) = self.entries.read().await.get(issuer_url.as_str()) {
            if cached.fetched_at.elapsed() < DEFAULT_DISCOVERY_CACHE_TTL {
                return Ok(cached.metadata.clone());
            }
        }

        let _fetch_guard = self.fetch_lock.lock().await;
        if let Some(cached) = self.entries.read().await.get(issuer_url.as_str()) {
            if cached.fetched_at.elapsed() < DEFAULT_DISCOVERY_CACHE_TTL {
                return Ok(cached.metadata.clone());
            }
        }

        let issuer = IssuerUrl::new(issuer_url.to_string()).map_err(|_| AuthError::Internal)?;
        let metadata = CoreProviderMetadata::discover_async(issuer, openidconnect::reqwest::async_http_client)
            .await
            .map_err(|e| {
                tracing::warn!(issuer = %issuer_url, error = %e, "oidc discovery failed");
                AuthError::ProviderError {
                    error: "discovery_failed".to_string(),
                    error_description: Some(e.to_string()),
                }
            })?;

        self.entries.write().await.insert(
            issuer_url.to_string(),
            CachedMetadata {
                metadata: metadata.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(metadata)
    }
}

/// Build the upstream authorize URL for `provider`, requesting its default
/// scope plus any `additional_scope`.
///
/// # Errors
/// Returns [`AuthError::Internal`] if the provider's URLs are malformed, or
/// [`AuthError::ProviderError`] if OIDC discovery fails.
pub async fn authorize_url(
    discovery: &DiscoveryCache,
    provider: &OAuthProviderConfig,
    redirect_uri: &str,
    csrf_state: &str,
) -> Result<Url> {
    match provider.kind {
        ProviderKind::GitHub => {
            let client = BasicClient::new(
                ClientId::new(provider.client_id.clone()),
                Some(ClientSecret::new(provider.client_secret.clone())),
                AuthUrl::new("https://github.com/login/oauth/authorize".to_string()).map_err(|_| AuthError::Internal)?,
                Some(TokenUrl::new("https://github.com/login/oauth/access_token".to_string()).map_err(|_| AuthError::Internal)?),
            )
            .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(|_| AuthError::Internal)?);

            let mut request = client
                .authorize_url(|| oauth2::CsrfToken::new(csrf_state.to_string()))
                .add_scope(Scope::new("read:user".to_string()))
                .add_scope(Scope::new("user:email".to_string()));
            for scope in &provider.additional_scope {
                request = request.add_scope(Scope::new(scope.clone()));
            }
            let (url, _csrf) = request.url();
            Ok(url)
        }
        ProviderKind::Oidc => {
            let issuer_url = provider.issuer_url.as_ref().ok_or(AuthError::Internal)?;
            let metadata = discovery.get_or_fetch(issuer_url).await?;
            let client = CoreClient::from_provider_metadata(
                metadata,
                openidconnect::ClientId::new(provider.client_id.clone()),
                Some(openidconnect::ClientSecret::new(provider.client_secret.clone())),
            )
            .set_redirect_uri(openidconnect::RedirectUrl::new(redirect_uri.to_string()).map_err(|_| AuthError::Internal)?);

            let mut request = client.authorize_url(
                openidconnect::AuthenticationFlow::<openidconnect::core::CoreResponseType>::AuthorizationCode,
                || oauth2::CsrfToken::new(csrf_state.to_string()),
                Nonce::new_random,
            );
            request = request.add_scope(Scope::new("email".to_string()));
            request = request.add_scope(Scope::new("profile".to_string()));
            for scope in &provider.additional_scope {
                request = request.add_scope(Scope::new(scope.clone()));
            }
            let (url, _csrf, _nonce) = request.url();
            Ok(url)
        }
    }
}

/// Exchange an authorization `code` for tokens, resolve the upstream
/// account, and validate the `id_token` when the provider is OIDC.
///
/// # Errors
/// Returns [`AuthError::ProviderError`] if the upstream token exchange or
/// user-info/ID-token validation fails.
pub async fn exchange_and_resolve(
    discovery: &DiscoveryCache,
    provider: &OAuthProviderConfig,
    redirect_uri: &str,
    code: &str,
) -> Result<ResolvedAccount> {
    match provider.kind {
        ProviderKind::GitHub => exchange_github(provider, redirect_uri, code).await,
        ProviderKind::Oidc => exchange_oidc(discovery, provider, redirect_uri, code).await,
    }
}

async fn exchange_github(provider: &OAuthProviderConfig, redirect_uri: &str, code: &str) -> Result<ResolvedAccount> {
    let client = BasicClient::new(
        ClientId::new(provider.client_id.clone()),
        Some(ClientSecret::new(provider.client_secret.clone())),
        AuthUrl::new("https://github.com/login/oauth/authorize".to_string()).map_err(|_| AuthError::Internal)?,
        Some(TokenUrl::new("https://github.com/login/oauth/access_token".to_string()).map_err(|_| AuthError::Internal)?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string()).map_err(|_| AuthError::Internal)?);

    let token = client
        .exchange_code(AuthorizationCode::new(code.to_string()))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .map_err(|e| AuthError::ProviderError {
            error: "token_exchange_failed".to_string(),
            error_description: Some(e.to_string()),
        })?;

    let access_token = token.access_token().secret().clone();

    let http = reqwest::Client::new();
    let user: GitHubUser = http
        .get("https://api.github.com/user")
        .bearer_auth(&access_token)
        .header("user-agent", "composable-rust-auth")
        .send()
        .await
        .map_err(|_| AuthError::ProviderError {
            error: "userinfo_failed".to_string(),
            error_description: None,
        })?
        .json()
        .await
        .map_err(|_| AuthError::ProviderError {
            error: "userinfo_failed".to_string(),
            error_description: None,
        })?;

    Ok(ResolvedAccount {
        subject: user.id.to_string(),
        issuer: "https://github.com".to_string(),
        email: user.email,
        tokens: crate::state::ProviderTokens {
            auth_token: Some(access_token),
            refresh_token: None,
            id_token: None,
        },
    })
}

#[derive(Debug, serde::Deserialize)]
struct GitHubUser {
    id: u64,
    email: Option<String>,
}

async fn exchange_oidc(
    discovery: &DiscoveryCache,
    provider: &OAuthProviderConfig,
    redirect_uri: &str,
    code: &str,
) -> Result<ResolvedAccount> {
    let issuer_url = provider.issuer_url.as_ref().ok_or(AuthError::Internal)?;
    let metadata = discovery.get_or_fetch(issuer_url).await?;
    let client = CoreClient::from_provider_metadata(
        metadata,
        openidconnect::ClientId::new(provider.client_id.clone()),
        Some(openidconnect::ClientSecret::new(provider.client_secret.clone())),
    )
    .set_redirect_uri(openidconnect::RedirectUrl::new(redirect_uri.to_string()).map_err(|_| AuthError::Internal)?);

    let token_response = client
        .exchange_code(openidconnect::AuthorizationCode::new(code.to_string()))
        .request_async(openidconnect::reqwest::async_http_client)
        .await
        .map_err(|e| AuthError::ProviderError {
            error: "token_exchange_failed".to_string(),
            error_description: Some(e.to_string()),
        })?;

    let id_token = token_response.extra_fields().id_token().ok_or(AuthError::ProviderError {
        error: "missing_id_token".to_string(),
        error_description: None,
    })?;

    let verifier = client.id_token_verifier().set_other_audience_verifier_fn(|_| true);
    let claims = id_token
        .claims(&verifier, |_: Option<&Nonce>| Ok(()))
        .map_err(|e| AuthError::ProviderError {
            error: "id_token_invalid".to_string(),
            error_description: Some(e.to_string()),
        })?;

    let now = Utc::now();
    let leeway = crate::constants::OIDC_CLOCK_SKEW_LEEWAY.as_secs() as i64;
    if claims.expiration().timestamp() + leeway < now.timestamp() {
        return Err(AuthError::ProviderError {
            error: "id_token_expired".to_string(),
            error_description: None,
        });
    }

    let subject = claims.subject().as_str().to_string();
    let email = claims.email().map(|e| e.as_str().to_string());

    Ok(ResolvedAccount {
        subject,
        issuer: issuer_url.to_string(),
        email,
        tokens: crate::state::ProviderTokens {
            auth_token: Some(token_response.access_token().secret().clone()),
            refresh_token: token_response.refresh_token().map(|t| t.secret().clone()),
            id_token: Some(id_token.to_string()),
        },
    })
}

/// Shared, process-wide discovery cache handle.
pub type SharedDiscoveryCache = Arc<DiscoveryCache>;

/// The seam the flow controller authenticates OAuth2/OIDC providers through.
///
/// Exists so `crate::flows` never calls `authorize_url`/`exchange_and_resolve`
/// directly: tests substitute a fixture-backed implementation (the "mock
/// `OAuth2Provider`" from the test-tooling mapping) instead of reaching a
/// real upstream over the network.
#[async_trait::async_trait]
pub trait OAuthClient: Send + Sync {
    /// Build the authorize URL for `provider`.
    ///
    /// # Errors
    /// See [`authorize_url`].
    async fn authorize_url(&self, provider: &OAuthProviderConfig, redirect_uri: &str, csrf_state: &str) -> Result<Url>;

    /// Exchange `code` for tokens and resolve the upstream account.
    ///
    /// # Errors
    /// See [`exchange_and_resolve`].
    async fn exchange_and_resolve(&self, provider: &OAuthProviderConfig, redirect_uri: &str, code: &str) -> Result<ResolvedAccount>;
}

/// [`OAuthClient`] backed by the real `oauth2`/`openidconnect` implementations
/// above, with discovery documents cached per issuer.
#[derive(Clone, Default)]
pub struct DiscoveryOAuthClient {
    discovery: SharedDiscoveryCache,
}

impl DiscoveryOAuthClient {
    /// Build a client around a fresh, empty discovery cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: Arc::new(DiscoveryCache::new()),
        }
    }

    /// Build a client sharing an existing discovery cache (e.g. across
    /// multiple `OAuthProviderConfig`s registered at server start).
    #[must_use]
    pub fn with_cache(discovery: SharedDiscoveryCache) -> Self {
        Self { discovery }
    }
}

#[async_trait::async_trait]
impl OAuthClient for DiscoveryOAuthClient {
    async fn authorize_url(&self, provider: &OAuthProviderConfig, redirect_uri: &str, csrf_state: &str) -> Result<Url> {
        authorize_url(&self.discovery, provider, redirect_uri, csrf_state).await
    }

    async fn exchange_and_resolve(&self, provider: &OAuthProviderConfig, redirect_uri: &str, code: &str) -> Result<ResolvedAccount> {
        exchange_and_resolve(&self.discovery, provider, redirect_uri, code).await
    }
}
