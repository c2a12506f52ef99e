//! Extensible authentication subsystem: OAuth2/OIDC, local password, magic
//! link, and WebAuthn providers over a shared identity/factor data model,
//! with PKCE-bound session exchange and signed lifecycle webhooks.
//!
//! Flows (`crate::flows`) are plain async functions over injected stores and
//! providers — there is no request-scoped shared mutable state. The one
//! exception is the webhook dispatcher (`crate::webhook`), which is a
//! genuine background effect loop and is expressed as a
//! `composable-rust-core` `Reducer` over `AuthState`, exactly as this
//! codebase expresses every other long-lived effect loop. See `DESIGN.md`.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::todo, clippy::unimplemented)]

pub mod allowlist;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod flows;
#[cfg(feature = "axum")]
pub mod handlers;
#[cfg(feature = "test-utils")]
pub mod mocks;
pub mod otc;
pub mod pkce;
pub mod providers;
pub mod state;
pub mod stores;
pub mod token;
pub mod webhook;

pub use config::AuthConfig;
pub use error::{AuthError, Result};
pub use state::AuthState;
