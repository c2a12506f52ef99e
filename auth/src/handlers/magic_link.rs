//! `/magic-link/*` handlers.

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Form;
use serde::Deserialize;

use super::error::AppError;
use super::AppState;
use crate::flows::{self, MagicLinkAuthenticateRequest};

#[derive(Debug, Deserialize)]
pub(super) struct RegisterForm {
    email: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
    callback_url: String,
    redirect_on_failure: Option<String>,
    link_url: Option<String>,
}

pub(super) async fn register(State(env): AppState, Form(form): Form<RegisterForm>) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let outcome = flows::magic_link_register(
        &env,
        &form.email,
        &form.challenge,
        &form.callback_url,
        form.link_url.as_deref(),
        form.redirect_on_failure.as_deref(),
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub(super) struct SendForm {
    email: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
    callback_url: String,
    redirect_on_failure: Option<String>,
    link_url: Option<String>,
}

pub(super) async fn send(State(env): AppState, Form(form): Form<SendForm>) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let outcome = flows::magic_link_send(
        &env,
        &form.email,
        &form.challenge,
        &form.callback_url,
        form.link_url.as_deref(),
        form.redirect_on_failure.as_deref(),
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}

#[derive(Debug, Deserialize)]
pub(super) struct AuthenticateQuery {
    token: Option<String>,
    email: Option<String>,
    code: Option<String>,
    #[serde(alias = "code_challenge")]
    challenge: Option<String>,
    callback_url: Option<String>,
}

pub(super) async fn authenticate(State(env): AppState, Query(query): Query<AuthenticateQuery>) -> Result<Response, AppError> {
    let now = chrono::Utc::now();
    let outcome = flows::magic_link_authenticate(
        &env,
        MagicLinkAuthenticateRequest {
            token: query.token,
            email: query.email,
            code: query.code,
            challenge: query.challenge,
            callback_url: query.callback_url,
        },
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}
