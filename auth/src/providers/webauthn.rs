//! WebAuthn/FIDO2 provider, following W3C WebAuthn Level 2.
//!
//! Ceremony state (`PasskeyRegistration`/`PasskeyAuthentication`) is opaque
//! outside this module: it is `bincode`-serialized into the `ceremony_state`
//! bytes carried by [`crate::state::WebAuthnRegistrationChallenge`] and
//! [`crate::state::WebAuthnAuthenticationChallenge`] so the challenge store
//! never needs to know the shape of `webauthn-rs`'s types.

use chrono::{DateTime, Utc};
use uuid::Uuid;
use webauthn_rs::prelude::{
    CreationChallengeResponse, CredentialID, Passkey, PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential,
    RequestChallengeResponse, Url as WebauthnUrl,
};
use webauthn_rs::{Webauthn, WebauthnBuilder};

use crate::config::WebAuthnConfig;
use crate::constants::WEBAUTHN_USER_HANDLE_LEN;
use crate::error::{AuthError, Result};
use crate::state::{Factor, RecordHeader};
use crate::stores::{FactorStore, IdentityStore, WebAuthnChallengeStore};

/// Build the `webauthn-rs` client for `config`.
///
/// # Errors
/// Returns [`AuthError::Internal`] if `relying_party_origin` cannot be used
/// to derive a relying-party id, or the underlying builder rejects it.
pub fn build_client(config: &WebAuthnConfig) -> Result<Webauthn> {
    let rp_id = config.relying_party_origin.host_str().ok_or(AuthError::Internal)?;
    let rp_origin = WebauthnUrl::parse(config.relying_party_origin.as_str()).map_err(|_| AuthError::Internal)?;
    WebauthnBuilder::new(rp_id, &rp_origin)
        .map_err(|_| AuthError::Internal)?
        .rp_name(&config.relying_party_name)
        .build()
        .map_err(|_| AuthError::Internal)
}

/// Validate that `origin_header` matches the configured relying-party
/// origin exactly (no subdomain or scheme relaxation).
///
/// # Errors
/// Returns [`AuthError::OriginMismatch`] if the inbound `Origin` header does
/// not match the configured origin exactly.
pub fn validate_origin(config: &WebAuthnConfig, origin_header: &str) -> Result<()> {
    if config.relying_party_origin.as_str().trim_end_matches('/') == origin_header.trim_end_matches('/') {
        Ok(())
    } else {
        Err(AuthError::OriginMismatch)
    }
}

fn new_user_handle() -> Vec<u8> {
    let mut bytes = vec![0u8; WEBAUTHN_USER_HANDLE_LEN];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    bytes
}

/// Begin a registration ceremony for `email`, reusing the user_handle shared
/// by any factors the email already has.
///
/// # Errors
/// Returns [`AuthError::Internal`] if the ceremony cannot be started, or
/// whatever the backing stores return.
pub async fn register_options(
    webauthn: &Webauthn,
    factors: &dyn FactorStore,
    challenges: &dyn WebAuthnChallengeStore,
    email: &str,
    now: DateTime<Utc>,
) -> Result<(CreationChallengeResponse, Vec<u8>)> {
    let existing = factors.find_webauthn_by_email(email).await?;
    let user_handle = existing
        .first()
        .and_then(|f| match f {
            Factor::WebAuthn { user_handle, .. } => Some(user_handle.clone()),
            _ => None,
        })
        .unwrap_or_else(new_user_handle);

    let user_unique_id = Uuid::from_slice(&user_handle).unwrap_or_else(|_| Uuid::new_v4());
    let exclude: Vec<CredentialID> = existing
        .iter()
        .filter_map(|f| match f {
            Factor::WebAuthn { credential_id, .. } => Some(CredentialID::from(credential_id.clone())),
            _ => None,
        })
        .collect();

    let (ccr, reg_state) = webauthn
        .start_passkey_registration(user_unique_id, email, email, Some(exclude))
        .map_err(|_| AuthError::Internal)?;

    let ceremony_state = bincode::serialize(&reg_state).map_err(|_| AuthError::Internal)?;
    challenges
        .put_registration_challenge(email, user_handle.clone(), ceremony_state, now)
        .await?;

    Ok((ccr, user_handle))
}

/// Complete a registration ceremony, inserting a `Factor::WebAuthn` row.
///
/// `expected_user_handle` is the `user_handle` the client echoed back; it
/// must match the pending ceremony's own `user_handle` exactly, or the
/// response is rejected as a mismatched ceremony rather than silently
/// trusting the client's claim.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if no registration ceremony is
/// pending for `email`, [`AuthError::AssertionFailed`] if `expected_user_handle`
/// does not match the ceremony, attestation verification fails, or the
/// email's factors disagree on `user_handle`.
pub async fn register(
    webauthn: &Webauthn,
    identities: &dyn IdentityStore,
    factors: &dyn FactorStore,
    challenges: &dyn WebAuthnChallengeStore,
    email: &str,
    expected_user_handle: &[u8],
    response: &RegisterPublicKeyCredential,
    now: DateTime<Utc>,
) -> Result<Factor> {
    let pending = challenges
        .take_registration_challenge(email)
        .await?
        .ok_or_else(|| AuthError::InvalidRequest("no registration in progress".to_string()))?;
    if pending.user_handle != expected_user_handle {
        return Err(AuthError::AssertionFailed("user_handle does not match the pending ceremony".to_string()));
    }
    let reg_state: PasskeyRegistration = bincode::deserialize(&pending.ceremony_state).map_err(|_| AuthError::Internal)?;

    let passkey = webauthn
        .finish_passkey_registration(response, &reg_state)
        .map_err(|e| AuthError::AssertionFailed(e.to_string()))?;

    let existing = factors.find_webauthn_by_email(email).await?;
    for factor in &existing {
        if let Factor::WebAuthn { user_handle, .. } = factor {
            if *user_handle != pending.user_handle {
                return Err(AuthError::AssertionFailed(
                    "user_handle must be identical for every factor sharing an email".to_string(),
                ));
            }
        }
    }

    let identity_id = if let Some(factor) = existing.first() {
        factor.identity_id()
    } else {
        identities
            .insert(crate::state::Identity::Local {
                header: RecordHeader::new(now),
                subject: String::new(),
            })
            .await?
            .id()
    };

    let credential_id = passkey.cred_id().as_ref().to_vec();
    let public_key = bincode::serialize(&passkey).map_err(|_| AuthError::Internal)?;

    let factor = factors
        .insert(Factor::WebAuthn {
            header: RecordHeader::new(now),
            identity_id,
            email: email.to_string(),
            user_handle: pending.user_handle,
            credential_id,
            public_key,
        })
        .await?;
    Ok(factor)
}

/// Begin an authentication ceremony listing every credential registered for `email`.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if `email` has no registered
/// credentials (kept generic so account existence is never disclosed).
pub async fn authenticate_options(
    webauthn: &Webauthn,
    factors: &dyn FactorStore,
    challenges: &dyn WebAuthnChallengeStore,
    email: &str,
    now: DateTime<Utc>,
) -> Result<RequestChallengeResponse> {
    let existing = factors.find_webauthn_by_email(email).await?;
    let passkeys: Vec<Passkey> = existing
        .iter()
        .filter_map(|f| match f {
            Factor::WebAuthn { public_key, .. } => bincode::deserialize(public_key).ok(),
            _ => None,
        })
        .collect();
    if passkeys.is_empty() {
        return Err(AuthError::AuthenticationFailed);
    }

    let (rcr, auth_state) = webauthn
        .start_passkey_authentication(&passkeys)
        .map_err(|_| AuthError::Internal)?;
    let ceremony_state = bincode::serialize(&auth_state).map_err(|_| AuthError::Internal)?;
    challenges.put_authentication_challenge(email, ceremony_state, now).await?;
    Ok(rcr)
}

/// Complete an authentication ceremony, returning the authenticated identity id.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if no authentication ceremony is
/// pending, or [`AuthError::AssertionFailed`] if assertion verification
/// fails.
pub async fn authenticate(
    webauthn: &Webauthn,
    factors: &dyn FactorStore,
    challenges: &dyn WebAuthnChallengeStore,
    email: &str,
    response: &PublicKeyCredential,
    now: DateTime<Utc>,
) -> Result<Uuid> {
    let _ = now;
    let pending = challenges
        .take_authentication_challenge(email)
        .await?
        .ok_or_else(|| AuthError::InvalidRequest("no authentication in progress".to_string()))?;
    let auth_state: PasskeyAuthentication = bincode::deserialize(&pending.ceremony_state).map_err(|_| AuthError::Internal)?;

    let result = webauthn
        .finish_passkey_authentication(response, &auth_state)
        .map_err(|e| AuthError::AssertionFailed(e.to_string()))?;

    let credential_id = result.cred_id().as_ref().to_vec();
    let factor = factors
        .find_webauthn_by_credential_id(&credential_id)
        .await?
        .ok_or(AuthError::AuthenticationFailed)?;
    Ok(factor.identity_id())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use url::Url;

    #[test]
    fn origin_validation_requires_exact_match() {
        let config = WebAuthnConfig::new(
            "builtin::webauthn",
            Url::parse("https://app.example.com").unwrap(),
            "Example",
        );
        assert!(validate_origin(&config, "https://app.example.com").is_ok());
        assert!(validate_origin(&config, "https://evil.example.com").is_err());
    }
}
