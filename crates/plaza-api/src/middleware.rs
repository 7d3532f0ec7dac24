use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use plaza_auth::AuthError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Header used by older clients instead of `Authorization: Bearer`.
const LEGACY_TOKEN_HEADER: &str = "x-auth-token";

/// Verify the presented token and attach the caller's `Identity` to the request.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = presented_token(req.headers()).ok_or(AuthError::MissingCredential)?;
    let identity = state.gate.verify(token)?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    bearer
        .or_else(|| {
            headers
                .get(LEGACY_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
