//! Minimal embedded sign-in UI (`/ui/signin`, `/ui/_static/*`).
//!
//! A zero-dependency static asset handler: the handful of files a bare-bones
//! hosted sign-in page needs, embedded at compile time rather than served
//! from a templating engine, since the subsystem otherwise has no views.

use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};

const SIGNIN_HTML: &str = include_str!("assets/signin.html");
const SIGNIN_CSS: &str = include_str!("assets/signin.css");

pub(super) async fn signin_page() -> Html<&'static str> {
    Html(SIGNIN_HTML)
}

pub(super) async fn static_asset(Path(path): Path<String>) -> Response {
    match path.as_str() {
        "signin.css" => ([(header::CONTENT_TYPE, "text/css")], SIGNIN_CSS).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
