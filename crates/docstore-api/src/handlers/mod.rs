//! HTTP request handlers, one module per resource.

pub mod documents;
pub mod health;
pub mod jobs;
