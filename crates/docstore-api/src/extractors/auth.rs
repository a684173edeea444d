//! `Principal` extractor: reads the acting principal supplied by the
//! identity layer in front of DocStore.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use docstore_core::error::AppError;
use docstore_core::types::id::PrincipalId;
use docstore_service::context::RequestContext;

use crate::error::ApiError;

/// Header carrying the acting principal's id.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Context of the acting principal, available in handlers.
#[derive(Debug, Clone)]
pub struct Principal(pub RequestContext);

impl std::ops::Deref for Principal {
    type Target = RequestContext;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::authentication("Missing X-Principal-Id header"))?;

        let principal_id: PrincipalId = raw
            .parse()
            .map_err(|_| AppError::authentication("Invalid X-Principal-Id header"))?;

        Ok(Principal(RequestContext::new(principal_id)))
    }
}
