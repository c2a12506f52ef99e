//! Magic Link provider.
//!
//! Two delivery modes share one validation path: `Link` mints a signed
//! [`TokenClaims::MagicLink`] token and emails a URL carrying it; `Code`
//! generates a 6-digit one-time code through [`crate::otc`] and emails the
//! digits. Registration and sign-in are distinct callers but both end up
//! here once the factor exists.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, Result};
use crate::otc::{self, OtcStore};
use crate::providers::email::{EmailMessage, EmailSender};
use crate::state::{Factor, Identity, RecordHeader};
use crate::stores::{FactorStore, IdentityStore};
use crate::token::{self, SigningKey, TokenClaims, TokenKind};

/// Register a new local identity with a magic-link factor for `email`.
///
/// # Errors
/// Returns [`AuthError::Conflict`] if `email` already has a magic-link
/// factor.
pub async fn register(identities: &dyn IdentityStore, factors: &dyn FactorStore, email: &str, now: DateTime<Utc>) -> Result<(Identity, Factor)> {
    if factors.find_magic_link(email).await?.is_some() {
        return Err(AuthError::Conflict(format!("{email} is already registered")));
    }

    let identity = identities
        .insert(Identity::Local {
            header: RecordHeader::new(now),
            subject: String::new(),
        })
        .await?;

    let factor = factors
        .insert(Factor::MagicLink {
            header: RecordHeader::new(now),
            identity_id: identity.id(),
            email: email.to_string(),
            verified_at: None,
        })
        .await?;

    Ok((identity, factor))
}

/// Mint and deliver a sign-in link carrying a signed [`TokenClaims::MagicLink`].
///
/// # Errors
/// Returns whatever [`token::sign`] or the [`EmailSender`] returns.
#[allow(clippy::too_many_arguments)]
pub async fn send_link(
    email_sender: &dyn EmailSender,
    signing_key: &SigningKey,
    base_url: &str,
    link_url: &str,
    factor_id: Uuid,
    challenge: &str,
    callback_url: &str,
    email: &str,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<()> {
    let claims = TokenClaims::MagicLink {
        factor_id,
        challenge: challenge.to_string(),
        callback_url: callback_url.to_string(),
    };
    let signed = token::sign(signing_key, base_url, claims, now, ttl)?;
    email_sender
        .send(EmailMessage {
            to: email.to_string(),
            subject: "Your sign-in link".to_string(),
            body: format!("{link_url}?token={signed}"),
        })
        .await
}

/// Generate and deliver a 6-digit one-time code, returning the persisted
/// code record so the caller can emit `OneTimeCodeRequested`.
///
/// # Errors
/// Returns whatever [`otc::generate`] or the [`EmailSender`] returns.
pub async fn send_code(
    otc_store: &dyn OtcStore,
    email_sender: &dyn EmailSender,
    factor_id: Uuid,
    email: &str,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<crate::state::OneTimeCode> {
    let (code, record) = otc::generate(otc_store, factor_id, now, ttl).await?;
    email_sender
        .send(EmailMessage {
            to: email.to_string(),
            subject: "Your sign-in code".to_string(),
            body: format!("Your code is {code}"),
        })
        .await?;
    Ok(record)
}

/// Verify a link-mode token, returning the claims to bind against PKCE.
///
/// # Errors
/// Returns [`AuthError::InvalidData`] if the token is invalid, expired, or
/// not a `MagicLink` token.
pub fn authenticate_via_link(signing_key: &SigningKey, base_url: &str, link_token: &str, now: DateTime<Utc>) -> Result<(Uuid, String, String)> {
    let claims = token::verify(signing_key, base_url, TokenKind::MagicLink, link_token, now)?;
    let TokenClaims::MagicLink {
        factor_id,
        challenge,
        callback_url,
    } = claims
    else {
        return Err(AuthError::InvalidData("Invalid state token".to_string()));
    };
    Ok((factor_id, challenge, callback_url))
}

/// Verify a code-mode sign-in: `email` must have a magic-link factor and
/// `code` must match a live, unexpired one-time code issued for it.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if no magic-link factor
/// exists for `email`, or whatever [`otc::verify`] returns for the code
/// itself (`InvalidCode`/`AttemptsExceeded`).
pub async fn authenticate_via_code(otc_store: &dyn OtcStore, factors: &dyn FactorStore, email: &str, code: &str, now: DateTime<Utc>) -> Result<Uuid> {
    let factor = factors
        .find_magic_link(email)
        .await?
        .ok_or(AuthError::AuthenticationFailed)?;
    let factor_id = factor.id();
    otc::verify(otc_store, factor_id, code, now).await?;
    Ok(factor_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn link_round_trips_claims() {
        let key = [3u8; 32];
        let factor_id = Uuid::new_v4();
        let now = Utc::now();
        let signed = token::sign(
            &key,
            "https://base",
            TokenClaims::MagicLink {
                factor_id,
                challenge: "chal".to_string(),
                callback_url: "https://app/cb".to_string(),
            },
            now,
            chrono::Duration::minutes(15),
        )
        .unwrap();
        let (id, challenge, callback_url) = authenticate_via_link(&key, "https://base", &signed, now).unwrap();
        assert_eq!(id, factor_id);
        assert_eq!(challenge, "chal");
        assert_eq!(callback_url, "https://app/cb");
    }
}
