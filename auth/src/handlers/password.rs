//! `/register`, `/authenticate`, `/send-reset-email`, `/reset-password`
//! handlers for `builtin::local_emailpassword`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Form;
use composable_rust_web::{ClientIp, CorrelationId};
use serde::Deserialize;

use super::error::AppError;
use super::AppState;
use crate::flows;

#[derive(Debug, Deserialize)]
pub(super) struct RegisterForm {
    email: String,
    password: String,
    /// Accepts either `challenge` or the PKCE-standard `code_challenge` name.
    #[serde(alias = "code_challenge")]
    challenge: String,
    /// Present only for form submissions that want a 302 back on success.
    redirect_to: Option<String>,
    /// Present only for form submissions that want a 302 to an error page on
    /// a provider-level failure instead of a JSON error body.
    redirect_on_failure: Option<String>,
}

pub(super) async fn register(
    State(env): AppState,
    CorrelationId(correlation_id): CorrelationId,
    ClientIp(client_ip): ClientIp,
    Form(form): Form<RegisterForm>,
) -> Result<Response, AppError> {
    tracing::info!(%correlation_id, %client_ip, "password register");
    let now = chrono::Utc::now();
    let outcome = flows::password_register(
        &env,
        &form.email,
        &form.password,
        &form.challenge,
        form.redirect_to.as_deref(),
        form.redirect_on_failure.as_deref(),
        now,
    )
    .await?;
    Ok(super::outcome_response_with_status(outcome, axum::http::StatusCode::CREATED))
}

#[derive(Debug, Deserialize)]
pub(super) struct AuthenticateForm {
    email: String,
    password: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
    redirect_to: Option<String>,
    redirect_on_failure: Option<String>,
}

pub(super) async fn authenticate(
    State(env): AppState,
    CorrelationId(correlation_id): CorrelationId,
    ClientIp(client_ip): ClientIp,
    Form(form): Form<AuthenticateForm>,
) -> Result<Response, AppError> {
    tracing::info!(%correlation_id, %client_ip, "password authenticate");
    let now = chrono::Utc::now();
    let outcome = flows::password_authenticate(
        &env,
        &form.email,
        &form.password,
        &form.challenge,
        form.redirect_to.as_deref(),
        form.redirect_on_failure.as_deref(),
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendResetEmailForm {
    email: String,
    reset_url: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
}

pub(super) async fn send_reset_email(State(env): AppState, Form(form): Form<SendResetEmailForm>) -> Result<StatusCode, AppError> {
    let now = chrono::Utc::now();
    flows::send_reset_email(&env, &form.email, &form.reset_url, &form.challenge, now).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub(super) struct ResetPasswordForm {
    reset_token: String,
    password: String,
}

pub(super) async fn reset_password(State(env): AppState, Form(form): Form<ResetPasswordForm>) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let outcome = flows::reset_password(&env, &form.reset_token, &form.password, now).await?;
    Ok(super::outcome_response(outcome))
}
