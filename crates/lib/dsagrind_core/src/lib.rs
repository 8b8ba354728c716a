//! # dsagrind_core
//!
//! Authentication and session lifecycle for DSAGrind: credential checks,
//! access/refresh tokens, login throttling, email verification, password
//! reset, and OAuth sign-in, plus the collaborator ports they run against.

pub mod auth;
pub mod cache;
pub mod config;
pub mod email;
pub mod events;
pub mod migrate;
pub mod models;
pub mod oauth;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
