//! `/token` handler: claims a PKCE row for a signed session token.

use axum::extract::Query;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::AppError;
use super::AppState;
use crate::flows;

#[derive(Debug, Deserialize)]
pub(super) struct TokenQuery {
    verifier: String,
}

#[derive(Serialize)]
pub(super) struct TokenBody {
    auth_token: String,
    identity_id: uuid::Uuid,
    provider_token: Option<String>,
    provider_refresh_token: Option<String>,
    provider_id_token: Option<String>,
}

pub(super) async fn exchange(axum::extract::State(env): AppState, Query(query): Query<TokenQuery>) -> Result<Json<TokenBody>, AppError> {
    let now = chrono::Utc::now();
    let exchanged = flows::exchange_token(&env, &query.verifier, now).await?;
    Ok(Json(TokenBody {
        auth_token: exchanged.auth_token,
        identity_id: exchanged.identity_id,
        provider_token: exchanged.provider_token,
        provider_refresh_token: exchanged.provider_refresh_token,
        provider_id_token: exchanged.provider_id_token,
    }))
}
