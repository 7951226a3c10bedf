use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::ApiConfig;

#[derive(Clone)]
pub struct AuthState {
    pub config: ApiConfig,
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response()
}

/// Bearer-token auth for the thin API boundary. CORS preflight requests
/// bypass auth since the browser never attaches credentials to an
/// OPTIONS request.
pub async fn auth_middleware(
    State(auth_state): State<Arc<AuthState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let path = request.uri().path().to_string();
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let provided = match provided {
        Some(token) => token,
        None => {
            warn!(%path, "missing or malformed authorization header");
            return Err(unauthorized());
        }
    };

    if provided.as_bytes().ct_eq(auth_state.config.bearer_token.as_bytes()).into() {
        Ok(next.run(request).await)
    } else {
        warn!(%path, "authentication failed: invalid token");
        Err(unauthorized())
    }
}

pub fn create_auth_state(config: ApiConfig) -> Arc<AuthState> {
    Arc::new(AuthState { config })
}
