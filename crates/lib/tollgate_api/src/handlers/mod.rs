//! Request handlers.

pub mod auth;
pub mod external;
pub mod health;
pub mod jwks;
pub mod user;
