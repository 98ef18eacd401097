//! # tollgate_core
//!
//! Core token, key and identity logic for Tollgate.
//!
//! Everything here is transport-agnostic: the HTTP surface lives in
//! `tollgate_api` and only translates these types to and from the wire.

pub mod auth;
pub mod external;
pub mod keys;
pub mod migrate;
pub mod models;
pub mod redirect;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
