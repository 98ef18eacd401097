//! Business flows behind the handlers.

pub mod auth;
pub mod cookies;
pub mod external;
