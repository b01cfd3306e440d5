//! Caller identity forwarded by the upstream session layer.

use crate::error::AppError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use crm_storage::Actor;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// Extracts the [`Actor`]. Requests without an actor id are rejected with 401.
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;
        let is_admin = header(ACTOR_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin"));

        Ok(RequestActor(Actor {
            id: id.to_string(),
            is_admin,
        }))
    }
}
