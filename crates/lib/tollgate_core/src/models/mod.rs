//! Domain models shared across core modules.

pub mod auth;
