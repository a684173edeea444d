//! Typed path parameter helpers.

use std::str::FromStr;

use docstore_core::error::AppError;

use crate::error::ApiError;

/// Parses an identifier from a path segment.
///
/// Unlike a typed `Path<T>`, a bad segment becomes a JSON validation error.
pub fn parse_id<T: FromStr>(s: &str, what: &str) -> Result<T, ApiError> {
    s.parse()
        .map_err(|_| ApiError(AppError::validation(format!("Invalid {what}: {s}"))))
}
