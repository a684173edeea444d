//! Custom Axum extractors.

pub mod auth;
pub mod path;

pub use auth::Principal;
pub use path::parse_id;
