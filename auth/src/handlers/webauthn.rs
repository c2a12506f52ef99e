//! `/webauthn/*` handlers.
//!
//! The registration-in-progress cookie is a convenience for clients that
//! want to display the pending `user_handle` without parsing the ceremony
//! response; the ceremony itself is looked up by email, not by cookie, so a
//! client that drops the cookie still completes registration normally.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use webauthn_rs_proto::{PublicKeyCredential, RegisterPublicKeyCredential};

use super::error::AppError;
use super::AppState;
use crate::constants::WEBAUTHN_REGISTRATION_COOKIE_NAME;
use crate::flows;

fn origin_header(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(axum::http::header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError(crate::error::AuthError::OriginMismatch))
}

#[derive(Debug, Deserialize)]
pub(super) struct EmailQuery {
    email: String,
}

pub(super) async fn register_options(
    State(env): AppState,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<EmailQuery>,
) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let origin = origin_header(&headers)?;
    let (challenge, user_handle) = flows::webauthn_register_options(&env, &query.email, origin, now).await?;
    let cookie = Cookie::build((WEBAUTHN_REGISTRATION_COOKIE_NAME, URL_SAFE_NO_PAD.encode(user_handle)))
        .path("/")
        .http_only(true)
        .secure(true)
        .build();
    Ok((jar.add(cookie), Json(challenge)).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct RegisterRequest {
    provider: String,
    email: String,
    /// Base64url (no padding) encoding of the `user_handle` the client
    /// received from `register/options`, echoed back for the server to
    /// check against the pending ceremony.
    user_handle: String,
    credentials: RegisterPublicKeyCredential,
    verify_url: String,
    /// Accepts either `challenge` or the PKCE-standard `code_challenge` name.
    #[serde(alias = "code_challenge")]
    challenge: String,
}

pub(super) async fn register(State(env): AppState, headers: HeaderMap, Json(body): Json<RegisterRequest>) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let origin = origin_header(&headers)?;
    let user_handle = URL_SAFE_NO_PAD
        .decode(&body.user_handle)
        .map_err(|_| AppError(crate::error::AuthError::InvalidRequest("malformed user_handle".to_string())))?;
    let outcome = flows::webauthn_register(
        &env,
        &body.provider,
        &body.email,
        &user_handle,
        &body.credentials,
        &body.verify_url,
        &body.challenge,
        origin,
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}

pub(super) async fn authenticate_options(State(env): AppState, Query(query): Query<EmailQuery>) -> Result<Json<webauthn_rs_proto::RequestChallengeResponse>, AppError> {
    let now = chrono::Utc::now();
    let challenge = flows::webauthn_authenticate_options(&env, &query.email, now).await?;
    Ok(Json(challenge))
}

#[derive(Debug, Deserialize)]
pub(super) struct AuthenticateQuery {
    email: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
}

pub(super) async fn authenticate(
    State(env): AppState,
    Query(query): Query<AuthenticateQuery>,
    Json(response): Json<PublicKeyCredential>,
) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let outcome = flows::webauthn_authenticate(&env, &query.email, &response, &query.challenge, now).await?;
    Ok(super::outcome_response(outcome))
}
