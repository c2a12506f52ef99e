//! Webhook Dispatcher.
//!
//! The one piece of this subsystem that is a genuine background effect loop,
//! so it is the one piece expressed as a `composable-rust-core` [`Reducer`]
//! rather than a plain async function (see `AuthState`'s doc comment and
//! `DESIGN.md`). `reduce` only ever decides *that* a delivery should be
//! attempted; the actual HTTP call lives inside the `Effect::Future` closure,
//! spawned fire-and-forget so the request that enqueued the event never
//! waits on it.

use composable_rust_core::effect::Effect;
use composable_rust_core::reducer::Reducer;
use composable_rust_runtime::retry::{retry_with_backoff, RetryPolicy};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use smallvec::{smallvec, SmallVec};
use uuid::Uuid;

use crate::config::WebhookSubscription;
use crate::events::{WebhookEnvelope, WebhookEvent};
use crate::state::AuthState;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC-SHA256 signature of the delivered body, hex-encoded.
pub const SIGNATURE_HEADER: &str = "x-ext-auth-signature-sha256";

/// Actions the dispatcher reducer processes.
///
/// There is deliberately one variant: every event the flow controller enqueues
/// fans out to every interested subscription up front (`dispatch`), each
/// becoming its own retried, independent `Effect::Future`.
#[derive(Debug, Clone)]
pub enum WebhookAction {
    /// Deliver `envelope` to `subscription`, retrying per the environment's
    /// [`RetryPolicy`] before giving up.
    Deliver {
        /// Target subscription (URL, signing key).
        subscription: WebhookSubscription,
        /// The event envelope to POST as the request body.
        envelope: WebhookEnvelope,
    },
}

/// Dependencies the dispatcher needs, injected rather than reached for globally.
///
/// Held for the worker's lifetime (not rebuilt per request) so delivery
/// reuses one connection pool, per the "background tasks... owned by the
/// worker's task scope" concurrency note.
#[derive(Clone)]
pub struct WebhookEnvironment {
    http: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl WebhookEnvironment {
    /// Build an environment from its dependencies.
    #[must_use]
    pub fn new(http: reqwest::Client, retry_policy: RetryPolicy) -> Self {
        Self { http, retry_policy }
    }
}

impl Default for WebhookEnvironment {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), RetryPolicy::default())
    }
}

/// Stamp an event into the wire envelope the dispatcher delivers.
///
/// Takes `now` rather than a clock so the flow controller (which already
/// threads `now` through every call) can build an envelope without a second
/// time source.
#[must_use]
pub fn envelope_for(event: WebhookEvent, now: chrono::DateTime<chrono::Utc>) -> WebhookEnvelope {
    WebhookEnvelope {
        event_id: Uuid::new_v4(),
        timestamp: now,
        event,
    }
}

/// `Reducer` that turns a [`WebhookAction::Deliver`] into a fire-and-forget
/// delivery [`Effect::Future`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebhookReducer;

impl Reducer for WebhookReducer {
    type State = AuthState;
    type Action = WebhookAction;
    type Environment = WebhookEnvironment;

    fn reduce(&self, _state: &mut AuthState, action: WebhookAction, env: &WebhookEnvironment) -> SmallVec<[Effect<WebhookAction>; 4]> {
        match action {
            WebhookAction::Deliver { subscription, envelope } => {
                let http = env.http.clone();
                let policy = env.retry_policy.clone();
                let future = Box::pin(async move {
                    deliver_with_retry(&http, &policy, &subscription, &envelope).await;
                    None
                });
                smallvec![Effect::Future(future)]
            }
        }
    }
}

/// Build the dispatch effects for one event, one per interested subscription.
///
/// Called from the flow controller once a flow completes; the returned
/// effects are meant to be executed the same way any other reducer's effects
/// are, not awaited inline.
#[must_use]
pub fn dispatch(env: &WebhookEnvironment, subscriptions: &[&WebhookSubscription], envelope: &WebhookEnvelope) -> SmallVec<[Effect<WebhookAction>; 4]> {
    let reducer = WebhookReducer;
    subscriptions
        .iter()
        .flat_map(|subscription| {
            let mut state = AuthState;
            let action = WebhookAction::Deliver {
                subscription: (*subscription).clone(),
                envelope: envelope.clone(),
            };
            reducer.reduce(&mut state, action, env)
        })
        .collect()
}

async fn deliver_with_retry(http: &reqwest::Client, policy: &RetryPolicy, subscription: &WebhookSubscription, envelope: &WebhookEnvelope) {
    let body = match serde_json::to_vec(envelope) {
        Ok(body) => body,
        Err(error) => {
            tracing::error!(%error, url = %subscription.url, "failed to serialize webhook envelope");
            return;
        }
    };
    let signature = subscription.signing_secret_key.as_deref().map(|secret| sign_body(secret, &body));

    let result = retry_with_backoff(policy.clone(), || {
        let http = http.clone();
        let url = subscription.url.clone();
        let body = body.clone();
        let signature = signature.clone();
        async move {
            let mut request = http.post(url).header("content-type", "application/json").body(body);
            if let Some(signature) = signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }
            let response = request.send().await.map_err(|error| error.to_string())?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("webhook endpoint returned {}", response.status()))
            }
        }
    })
    .await;

    if let Err(error) = result {
        tracing::warn!(url = %subscription.url, event_id = %envelope.event_id, %error, "webhook delivery exhausted retries, dropping");
    }
}

fn sign_body(secret: &[u8], body: &[u8]) -> String {
    #[allow(clippy::expect_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let bytes = mac.finalize().into_bytes();
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
