//! `/verify` and `/resend-verification-email` handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::AppError;
use super::AppState;
use crate::flows;

#[derive(Debug, Deserialize)]
pub(super) struct VerifyRequest {
    provider: String,
    email: String,
    code: String,
}

pub(super) async fn verify(State(env): AppState, Json(body): Json<VerifyRequest>) -> Result<Json<serde_json::Value>, AppError> {
    let known = env.config.email_password().is_some_and(|c| c.name == body.provider) || env.config.magic_link().is_some_and(|c| c.name == body.provider);
    if !known {
        return Err(AppError(crate::error::AuthError::InvalidRequest(format!("unknown provider: {}", body.provider))));
    }
    let now = chrono::Utc::now();
    flows::verify_otc(&env, &body.email, &body.code, now).await?;
    Ok(Json(json!({"status": "verified"})))
}

#[derive(Debug, Deserialize)]
pub(super) struct ResendForm {
    email: String,
    #[serde(alias = "code_challenge")]
    challenge: String,
}

#[derive(Serialize)]
struct ResendBody {
    status: &'static str,
}

pub(super) async fn resend(State(env): AppState, Form(form): Form<ResendForm>) -> Result<(StatusCode, Json<ResendBody>), AppError> {
    let now = chrono::Utc::now();
    flows::resend_verification_email(&env, &form.email, &form.challenge, now).await?;
    Ok((StatusCode::OK, Json(ResendBody { status: "sent" })))
}
