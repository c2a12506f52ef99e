//! HTTP surface, feature-gated behind `axum`.
//!
//! This is the one place in the crate that knows about status codes,
//! `Accept` headers, query/form/JSON bodies, and cookies — everything below
//! [`crate::flows`] only ever returns [`crate::error::AuthError`] or a
//! domain-level [`crate::flows::AuthOutcome`].

mod error;
mod magic_link;
mod oauth;
mod password;
mod token;
mod ui;
mod verification;
mod webauthn;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

pub use error::AppError;

use crate::flows::{AuthEnvironment, AuthOutcome};

/// Shared Axum state: one clone of the environment per worker, not per request.
pub type SharedAuthEnvironment = Arc<AuthEnvironment>;

/// Build the complete router for this subsystem, to be nested under whatever
/// path prefix the embedding application chooses (conventionally `/auth` or
/// `/ext-auth`).
#[must_use]
pub fn auth_router(env: AuthEnvironment) -> Router {
    Router::new()
        .route("/authorize", get(oauth::authorize))
        .route("/callback", get(oauth::callback).post(oauth::callback))
        .route("/token", get(token::exchange))
        .route("/register", post(password::register))
        .route("/authenticate", post(password::authenticate))
        .route("/verify", post(verification::verify))
        .route("/resend-verification-email", post(verification::resend))
        .route("/send-reset-email", post(password::send_reset_email))
        .route("/reset-password", post(password::reset_password))
        .route("/magic-link/register", post(magic_link::register))
        .route("/magic-link/email", post(magic_link::send))
        .route(
            "/magic-link/authenticate",
            get(magic_link::authenticate).post(magic_link::authenticate),
        )
        .route("/webauthn/register/options", get(webauthn::register_options))
        .route("/webauthn/register", post(webauthn::register))
        .route("/webauthn/authenticate/options", get(webauthn::authenticate_options))
        .route("/webauthn/authenticate", post(webauthn::authenticate))
        .route("/ui/signin", get(ui::signin_page))
        .route("/ui/_static/*path", get(ui::static_asset))
        .with_state(Arc::new(env))
}

type AppState = State<SharedAuthEnvironment>;

#[derive(Serialize)]
struct CodeBody {
    code: String,
    provider: String,
}

/// Render a flow's domain-level outcome as the matching HTTP response: a 302
/// for a redirect outcome, a JSON body carrying the opaque PKCE code for a
/// non-redirect provider flow, or a bare 200 once a flow has nothing further
/// to return (every endpoint that produces `Completed` documents 200, never
/// 204, as its success status).
///
/// `code_status` is the status used for the JSON-body case only (201 for
/// `/register`, 200 for every other endpoint that can return a `Code`).
pub(super) fn outcome_response_with_status(outcome: AuthOutcome, code_status: StatusCode) -> Response {
    match outcome {
        AuthOutcome::Redirect(url) => Redirect::to(url.as_str()).into_response(),
        AuthOutcome::Code { code, provider } => (
            code_status,
            Json(CodeBody {
                code: code.to_string(),
                provider,
            }),
        )
            .into_response(),
        AuthOutcome::Completed => StatusCode::OK.into_response(),
    }
}

/// [`outcome_response_with_status`] with the common-case 200 status for the
/// JSON-body branch.
pub(super) fn outcome_response(outcome: AuthOutcome) -> Response {
    outcome_response_with_status(outcome, StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    use crate::config::AuthConfig;
    use crate::providers::oauth::DiscoveryOAuthClient;
    use crate::webhook::WebhookEnvironment;
    use url::Url;

    fn env() -> AuthEnvironment {
        AuthEnvironment {
            config: StdArc::new(AuthConfig::new(Url::parse("https://base.example.com").unwrap(), [1u8; 32])),
            allowlist: StdArc::new(crate::allowlist::UrlAllowList::new(vec![])),
            identities: StdArc::new(crate::mocks::MemoryIdentityStore::default()),
            factors: StdArc::new(crate::mocks::MemoryFactorStore::default()),
            pkce: StdArc::new(crate::mocks::MemoryPkceStore::default()),
            otc: StdArc::new(crate::mocks::MemoryOtcStore::default()),
            webauthn_challenges: StdArc::new(crate::mocks::MemoryWebAuthnChallengeStore::default()),
            email: StdArc::new(crate::mocks::CapturingEmailSender::default()),
            oauth: StdArc::new(DiscoveryOAuthClient::new()),
            webauthn: None,
            webhook: StdArc::new(WebhookEnvironment::default()),
        }
    }

    #[test]
    fn router_builds_without_panicking() {
        let _router = auth_router(env());
    }
}
