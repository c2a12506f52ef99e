//! Default time-to-live, length, and rate-limit values for the providers in
//! this crate.

use std::time::Duration;

/// Default one-time-code time-to-live: 10 minutes.
pub const DEFAULT_OTC_TTL: Duration = Duration::from_secs(10 * 60);

/// Default PKCE challenge time-to-live before an expiry sweep reclaims it.
pub const DEFAULT_PKCE_TTL: Duration = Duration::from_secs(10 * 60);

/// Default session token time-to-live: 24 hours.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default OAuth state / verification / reset / magic-link token lifetime: 15 minutes.
pub const DEFAULT_SHORT_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Number of decimal digits in a generated one-time code.
pub const OTC_DIGITS: u32 = 6;

/// Inclusive upper bound for a 6-digit numeric code (`999_999`).
pub const OTC_MAX: u32 = 10u32.pow(OTC_DIGITS) - 1;

/// Default number of failed one-time-code attempts allowed within the rate
/// limit window before `AttemptsExceeded` short-circuits verification
/// without even checking the code (5 "invalid code" failures, 6th is
/// "attempts exceeded").
pub const DEFAULT_OTC_ATTEMPT_LIMIT: u32 = 5;

/// Default rate-limit window over which failed attempts are counted.
pub const DEFAULT_OTC_ATTEMPT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Minimum PKCE verifier length in base64url characters (32 random bytes).
pub const PKCE_VERIFIER_MIN_LEN: usize = 43;

/// Maximum PKCE verifier length in base64url characters (96 random bytes).
pub const PKCE_VERIFIER_MAX_LEN: usize = 128;

/// Minimum WebAuthn `user_handle` length in bytes.
pub const WEBAUTHN_USER_HANDLE_LEN: usize = 16;

/// Leeway applied to ID-token `nbf`/`exp` validation.
pub const OIDC_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(30);

/// Default discovery-document cache lifetime when the response carries no
/// `cache-control: max-age`.
pub const DEFAULT_DISCOVERY_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Header carrying the webhook payload's HMAC-SHA256 signature.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-ext-auth-signature-sha256";

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "edgedb-session";

/// WebAuthn registration-in-progress cookie name.
pub const WEBAUTHN_REGISTRATION_COOKIE_NAME: &str = "edgedb-webauthn-registration-user-handle";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otc_max_is_six_nines() {
        assert_eq!(OTC_MAX, 999_999);
    }

    #[test]
    fn pkce_verifier_bounds_match_32_to_96_bytes_base64url() {
        // base64url without padding: ceil(n * 4 / 3)
        assert_eq!(PKCE_VERIFIER_MIN_LEN, (32 * 4).div_ceil(3));
        assert_eq!(PKCE_VERIFIER_MAX_LEN, (96 * 4).div_ceil(3));
    }
}
