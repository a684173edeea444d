//! Request context carrying the acting principal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docstore_core::types::id::PrincipalId;

/// Context for the current request.
///
/// The identity layer in front of DocStore is trusted; whatever principal
/// it supplies is recorded as the creator of any version the request
/// produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// The acting principal.
    pub principal_id: PrincipalId,
    /// When the request was received.
    pub request_time: DateTime<Utc>,
}

impl RequestContext {
    /// Creates a new request context.
    pub fn new(principal_id: PrincipalId) -> Self {
        Self {
            principal_id,
            request_time: Utc::now(),
        }
    }
}
