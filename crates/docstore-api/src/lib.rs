//! # docstore-api
//!
//! HTTP API layer for DocStore built on Axum.
//!
//! Provides the REST endpoints for uploads, job status, version history,
//! revert, and downloads, plus extractors, DTOs, and error mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
pub mod state;
pub mod upload;

pub use app::{Components, build_app};
pub use error::ApiError;
pub use state::AppState;
