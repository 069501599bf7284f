use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::requests::UserId;

/// Header carrying the id of the calling user.
pub const ACTOR_HEADER: &str = "x-gopac-user";

/// Caller identity taken from [`ACTOR_HEADER`]. Missing or blank headers are 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match value {
            Some(id) => Ok(Actor(UserId(id.to_string()))),
            None => {
                let payload = json!({
                    "error": format!("en-tête {ACTOR_HEADER} manquant"),
                });
                Err((StatusCode::UNAUTHORIZED, Json(payload)).into_response())
            }
        }
    }
}
