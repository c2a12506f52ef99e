//! Provider implementations for each authentication method.
//!
//! `email` and `oauth` are the transport/client seams; `password`,
//! `magic_link`, and `webauthn` are the three first-class authentication
//! methods the flow controller (`crate::flows`) dispatches to.

pub mod email;
pub mod magic_link;
pub mod oauth;
pub mod password;
pub mod webauthn;
