//! `/authorize` and `/callback` handlers.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use composable_rust_web::{ClientIp, CorrelationId, UserAgent};
use serde::Deserialize;

use super::error::AppError;
use super::AppState;
use crate::flows::{self, CallbackRequest};

#[derive(Debug, Deserialize)]
pub(super) struct AuthorizeQuery {
    provider: String,
    redirect_to: String,
    redirect_to_on_signup: Option<String>,
    /// Accepts either `challenge` or the PKCE-standard `code_challenge` name.
    #[serde(alias = "code_challenge")]
    challenge: String,
    /// Defaults to `{base}/callback` when omitted.
    callback_url: Option<String>,
}

pub(super) async fn authorize(
    State(env): AppState,
    CorrelationId(correlation_id): CorrelationId,
    ClientIp(client_ip): ClientIp,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, AppError> {
    tracing::info!(%correlation_id, %client_ip, provider = %query.provider, "authorize request");
    let now = chrono::Utc::now();
    let default_callback_url = format!("{}/callback", env.config.base_url);
    let callback_url = query.callback_url.as_deref().unwrap_or(&default_callback_url);
    let url = flows::authorize(
        &env,
        &query.provider,
        &query.redirect_to,
        query.redirect_to_on_signup.as_deref(),
        &query.challenge,
        callback_url,
        now,
    )
    .await?;
    Ok(Redirect::to(url.as_str()).into_response())
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackQuery {
    state: String,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub(super) async fn callback(
    State(env): AppState,
    CorrelationId(correlation_id): CorrelationId,
    UserAgent(user_agent): UserAgent,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    tracing::info!(%correlation_id, %user_agent, has_error = query.error.is_some(), "oauth callback");
    let now = chrono::Utc::now();
    let outcome = flows::callback(
        &env,
        CallbackRequest {
            state: query.state,
            code: query.code,
            error: query.error,
            error_description: query.error_description,
        },
        now,
    )
    .await?;
    Ok(super::outcome_response(outcome))
}
