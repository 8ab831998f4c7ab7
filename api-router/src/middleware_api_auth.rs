use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};

use crate::{api_state::ApiState, error::ApiError};

/// Opaque caller identity extracted from an upstream-authenticated request.
///
/// Authentication itself happens outside this crate; every entity and query here
/// filters by this id uniformly, without knowing how it was established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OwnerId>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("missing owner identity".to_string()))
    }
}

const OWNER_HEADER: &str = "X-Owner-Id";

pub async fn api_auth(
    State(_state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let owner_id = extract_owner_id(&request)
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    request.extensions_mut().insert(OwnerId(owner_id));

    Ok(next.run(request).await)
}

fn extract_owner_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}
