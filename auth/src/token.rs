//! Signed Token Codec.
//!
//! Short-lived signed envelopes carrying one of [`TokenKind`]'s claim sets.
//! The envelope is `base64url(json(claims)) || '.' || base64url(hmac_sha256(key, payload))` —
//! a compact two-part token in the style of a JWS with a fixed `HS256`-equivalent
//! algorithm. There is no algorithm negotiation: a negotiable `alg` field would
//! reopen the classic "alg:none" confusion attack class this design avoids by
//! construction. MAC comparison uses `constant_time_eq`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::{AuthError, Result};

type HmacSha256 = Hmac<Sha256>;

/// A 32-byte shared signing secret.
pub type SigningKey = [u8; 32];

/// Discriminates the kind-specific claims a token carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Round-tripped through a third-party authorize URL.
    OAuthState,
    /// Authorizes a password reset.
    Reset,
    /// Authorizes marking a factor's email verified.
    Verification,
    /// Authorizes a magic-link sign-in/registration.
    MagicLink,
    /// A session bound to the client.
    Session,
}

/// Kind-specific claims, one variant per [`TokenKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenClaims {
    /// CSRF-binding state round-tripped through an OAuth/OIDC provider.
    OAuthState {
        /// Provider name (`builtin::oauth_github`, an operator-defined OIDC name, ...).
        provider: String,
        /// Where to redirect the client on success.
        redirect_to: String,
        /// Where to redirect on success if this is the identity's first sign-in.
        redirect_to_on_signup: Option<String>,
        /// The PKCE challenge this flow is bound to.
        challenge: String,
        /// The callback `redirect_uri` presented to the provider.
        redirect_uri: String,
    },
    /// Authorizes a password reset, self-invalidating on password change.
    Reset {
        /// Identity id the reset applies to.
        identity_id: Uuid,
        /// `base64(SHA-256(password_hash))` at mint time.
        secret: String,
        /// PKCE challenge to bind once the password is actually changed, so
        /// the client can exchange a code at `/token` right after resetting.
        challenge: String,
    },
    /// Authorizes marking a factor's email verified.
    Verification {
        /// Identity id owning the factor.
        identity_id: Uuid,
        /// Factor id to mark verified.
        factor_id: Uuid,
        /// Optional PKCE challenge, bound on success.
        challenge: Option<String>,
    },
    /// Authorizes a magic-link sign-in/registration.
    MagicLink {
        /// Factor id being authenticated.
        factor_id: Uuid,
        /// PKCE challenge to bind on success.
        challenge: String,
        /// Where to redirect the client once bound.
        callback_url: String,
    },
    /// A bound, signed session reference.
    Session {
        /// Identity id the session authenticates.
        identity_id: Uuid,
    },
}

impl TokenClaims {
    const fn kind(&self) -> TokenKind {
        match self {
            Self::OAuthState { .. } => TokenKind::OAuthState,
            Self::Reset { .. } => TokenKind::Reset,
            Self::Verification { .. } => TokenKind::Verification,
            Self::MagicLink { .. } => TokenKind::MagicLink,
            Self::Session { .. } => TokenKind::Session,
        }
    }
}

/// The envelope signed and verified by [`sign`]/[`verify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    /// Issuer: the server's external base URL.
    iss: String,
    /// Audience: always equal to `iss`, since every token is scoped to this server.
    aud: String,
    /// Issued-at, Unix seconds.
    iat: i64,
    /// Expiry, Unix seconds.
    exp: i64,
    #[serde(flatten)]
    claims: TokenClaims,
}

/// Sign `claims` into a compact token, valid for `ttl` from `now`.
///
/// # Errors
/// Returns [`AuthError::Internal`] if claim serialization fails (cannot
/// happen for well-formed [`TokenClaims`], but the signature is fallible by
/// construction to keep this function total).
pub fn sign(
    key: &SigningKey,
    base_url: &str,
    claims: TokenClaims,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String> {
    let envelope = Envelope {
        iss: base_url.to_string(),
        aud: base_url.to_string(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
        claims,
    };
    let payload = serde_json::to_vec(&envelope).map_err(|_| AuthError::Internal)?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| AuthError::Internal)?;
    mac.update(payload_b64.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{payload_b64}.{signature}"))
}

/// Verify `token` against `key`, requiring audience `base_url` and kind `expected_kind`.
///
/// Fails closed with [`AuthError::InvalidData`] on any of: malformed shape,
/// signature mismatch, audience mismatch, expiry, or wrong `kind`.
///
/// # Errors
/// Returns [`AuthError::InvalidData`] for every failure mode described above.
pub fn verify(
    key: &SigningKey,
    base_url: &str,
    expected_kind: TokenKind,
    token: &str,
    now: DateTime<Utc>,
) -> Result<TokenClaims> {
    let invalid = || AuthError::InvalidData("Invalid state token".to_string());

    let (payload_b64, signature_b64) = token.split_once('.').ok_or_else(invalid)?;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| invalid())?;
    mac.update(payload_b64.as_bytes());
    let expected_signature = mac.finalize().into_bytes();
    let given_signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| invalid())?;
    if given_signature.len() != expected_signature.len()
        || !constant_time_eq::constant_time_eq(&given_signature, &expected_signature)
    {
        return Err(invalid());
    }

    let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| invalid())?;
    let envelope: Envelope = serde_json::from_slice(&payload).map_err(|_| invalid())?;

    if envelope.aud != base_url || envelope.iss != base_url {
        return Err(invalid());
    }
    if envelope.exp <= now.timestamp() {
        return Err(invalid());
    }
    if envelope.claims.kind() != expected_kind {
        return Err(invalid());
    }

    Ok(envelope.claims)
}
