//! Build the request's security context from identity headers set by the authenticating proxy.

use crate::security::SecurityContext;
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying comma-separated group principals.
pub const PRINCIPALS_HEADER: &str = "X-Principals";

/// Extractor for the caller's [`SecurityContext`]. Missing headers yield an anonymous context.
#[derive(Clone, Debug)]
pub struct Principal(pub SecurityContext);

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let user_id = header(USER_ID_HEADER);
        let groups = header(PRINCIPALS_HEADER)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Principal(SecurityContext { user_id, groups }))
    }
}
