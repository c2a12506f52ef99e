//! The same scenarios as `tests/scenarios.rs`, driven through the actual
//! HTTP surface (`handlers::auth_router`) via `tower::ServiceExt::oneshot`
//! instead of calling `crate::flows` directly — this is what actually
//! proves the request/response contracts (status codes, body shapes, field
//! names) rather than just the flow logic underneath them.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use composable_rust_auth::config::{AuthConfig, EmailPasswordConfig, OAuthProviderConfig, ProviderKind, VerificationMethod};
use composable_rust_auth::flows::AuthEnvironment;
use composable_rust_auth::handlers::auth_router;
use composable_rust_auth::mocks::{CapturingEmailSender, FixtureOAuthClient, MemoryFactorStore, MemoryIdentityStore, MemoryOtcStore, MemoryPkceStore, MemoryWebAuthnChallengeStore};
use composable_rust_auth::otc::OtcStore;
use composable_rust_auth::providers::oauth::ResolvedAccount;
use composable_rust_auth::state::ProviderTokens;
use composable_rust_auth::webhook::WebhookEnvironment;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;

fn base_url() -> Url {
    Url::parse("https://auth.example.com").unwrap()
}

fn app_callback() -> &'static str {
    "https://app.example.com/callback"
}

const SIGNING_KEY: [u8; 32] = [7u8; 32];

struct Harness {
    router: axum::Router,
    env: AuthEnvironment,
    email: Arc<CapturingEmailSender>,
    oauth: Arc<FixtureOAuthClient>,
}

fn harness(config: AuthConfig) -> Harness {
    let email = Arc::new(CapturingEmailSender::default());
    let oauth = Arc::new(FixtureOAuthClient::new());
    let env = AuthEnvironment {
        config: Arc::new(config.with_allowed_redirect_url(Url::parse(app_callback()).unwrap())),
        allowlist: Arc::new(composable_rust_auth::allowlist::UrlAllowList::new(vec![Url::parse(app_callback()).unwrap()])),
        identities: Arc::new(MemoryIdentityStore::default()),
        factors: Arc::new(MemoryFactorStore::default()),
        pkce: Arc::new(MemoryPkceStore::default()),
        otc: Arc::new(MemoryOtcStore::default()),
        webauthn_challenges: Arc::new(MemoryWebAuthnChallengeStore::default()),
        email: email.clone(),
        oauth: oauth.clone(),
        webauthn: None,
        webhook: Arc::new(WebhookEnvironment::default()),
    };
    let router = auth_router(env.clone());
    Harness { router, env, email, oauth }
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn form_request(method: &str, uri: &str, form: &[(&str, &str)]) -> Request<Body> {
    let encoded = serde_urlencoded::to_string(form).unwrap();
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(encoded))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Pull the one outstanding code for `factor_id` back out by brute-forcing
/// the 6-digit space against the store's hash, exactly as `scenarios.rs`
/// does for the non-HTTP flow tests.
async fn recover_code_from_store(env: &AuthEnvironment, factor_id: uuid::Uuid) -> String {
    use sha2::{Digest, Sha256};
    let outstanding = env.otc.list_for_factor(factor_id).await.unwrap();
    let record = outstanding.first().expect("a code was generated");
    for candidate in 0..=999_999u32 {
        let code = format!("{candidate:06}");
        let mut hasher = Sha256::new();
        hasher.update(code.as_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        if digest == record.code_hash {
            return code;
        }
    }
    panic!("no candidate matched the stored code hash");
}

/// S2 over HTTP: `/register` returns 201 with the opaque PKCE code, and
/// `/verify` accepts the JSON contract and returns 200, not 204.
#[tokio::test]
async fn http_register_then_verify_returns_200_json() {
    let config = AuthConfig::new(base_url(), SIGNING_KEY).with_email_password(
        EmailPasswordConfig::new("builtin::local_emailpassword")
            .with_require_verification(true)
            .with_verification_method(VerificationMethod::Code),
    );
    let harness = harness(config);

    let register_req = form_request(
        "POST",
        "/register",
        &[("email", "new@example.com"), ("password", "correct horse battery staple"), ("challenge", "challenge-1")],
    );
    let register_resp = harness.router.clone().oneshot(register_req).await.unwrap();
    assert_eq!(register_resp.status(), StatusCode::CREATED);
    let register_body = json_body(register_resp).await;
    assert!(register_body.get("code").is_some());
    assert_eq!(register_body["provider"], "builtin::local_emailpassword");

    let factor = harness.env.factors.find_email_password("new@example.com").await.unwrap().unwrap();
    let code = recover_code_from_store(&harness.env, factor.id()).await;

    let verify_req = json_request("POST", "/verify", json!({"provider": "builtin::local_emailpassword", "email": "new@example.com", "code": code}));
    let verify_resp = harness.router.clone().oneshot(verify_req).await.unwrap();
    assert_eq!(verify_resp.status(), StatusCode::OK);
    let verify_body = json_body(verify_resp).await;
    assert_eq!(verify_body, json!({"status": "verified"}));

    // An unknown provider is rejected before the code is even checked.
    let bad_req = json_request("POST", "/verify", json!({"provider": "not-a-provider", "email": "new@example.com", "code": code}));
    let bad_resp = harness.router.oneshot(bad_req).await.unwrap();
    assert!(bad_resp.status().is_client_error());
}

/// S1 over HTTP: `/authorize` redirects to the upstream provider with a
/// `state` the subsequent `/callback` redirect carries back to the caller.
#[tokio::test]
async fn http_authorize_then_callback_redirects_to_app() {
    let config = AuthConfig::new(base_url(), SIGNING_KEY).with_oauth_provider(OAuthProviderConfig::new(
        "builtin::oauth_github",
        ProviderKind::GitHub,
        "client-id",
        "client-secret",
    ));
    let harness = harness(config);
    harness.oauth.push(
        "a-code",
        ResolvedAccount {
            subject: "99".to_string(),
            issuer: "https://github.com".to_string(),
            email: Some("octocat@example.com".to_string()),
            tokens: ProviderTokens {
                auth_token: Some("gh-token".to_string()),
                refresh_token: None,
                id_token: None,
            },
        },
    );

    let authorize_uri = format!(
        "/authorize?provider=builtin::oauth_github&redirect_to={}&challenge=challenge-1",
        urlencoding::encode(app_callback())
    );
    let authorize_req = Request::builder().method("GET").uri(authorize_uri).body(Body::empty()).unwrap();
    let authorize_resp = harness.router.clone().oneshot(authorize_req).await.unwrap();
    assert!(authorize_resp.status().is_redirection());
    let location = authorize_resp.headers().get("location").unwrap().to_str().unwrap().to_string();
    let location_url = Url::parse(&location).unwrap();
    assert!(location_url.as_str().starts_with("https://upstream.example.com/builtin::oauth_github/authorize"));
    let state = location_url.query_pairs().find(|(k, _)| k == "state").unwrap().1.into_owned();

    let callback_uri = format!("/callback?state={state}&code=a-code");
    let callback_req = Request::builder().method("GET").uri(callback_uri).body(Body::empty()).unwrap();
    let callback_resp = harness.router.oneshot(callback_req).await.unwrap();
    assert!(callback_resp.status().is_redirection());
    let redirect_to = callback_resp.headers().get("location").unwrap().to_str().unwrap();
    assert!(redirect_to.starts_with(app_callback()));
}

/// `/send-reset-email` and `/reset-password` both answer 200, and
/// `/reset-password` carries the PKCE code bound at send time.
#[tokio::test]
async fn http_reset_password_binds_pkce_code() {
    let config = AuthConfig::new(base_url(), SIGNING_KEY).with_email_password(EmailPasswordConfig::new("builtin::local_emailpassword").with_require_verification(false));
    let harness = harness(config);

    let register_req = form_request(
        "POST",
        "/register",
        &[("email", "reset@example.com"), ("password", "original-password"), ("challenge", "register-challenge")],
    );
    harness.router.clone().oneshot(register_req).await.unwrap();

    let send_reset_req = form_request(
        "POST",
        "/send-reset-email",
        &[("email", "reset@example.com"), ("reset_url", app_callback()), ("challenge", "reset-challenge")],
    );
    let send_reset_resp = harness.router.clone().oneshot(send_reset_req).await.unwrap();
    assert_eq!(send_reset_resp.status(), StatusCode::OK);

    let sent = harness.email.last().unwrap();
    let reset_token = sent.body.rsplit_once("reset_token=").unwrap().1.to_string();

    let reset_req = form_request("POST", "/reset-password", &[("reset_token", &reset_token), ("password", "new-password")]);
    let reset_resp = harness.router.oneshot(reset_req).await.unwrap();
    assert_eq!(reset_resp.status(), StatusCode::OK);
    let reset_body = json_body(reset_resp).await;
    assert!(reset_body.get("code").is_some());
    assert_eq!(reset_body["provider"], "builtin::local_emailpassword");
}
