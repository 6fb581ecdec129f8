//! API-key middleware. Every request must carry the shared key in the
//! `API-Key` header; the health endpoint is mounted outside this layer.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

pub const API_KEY_HEADER: &str = "API-Key";

#[derive(Clone)]
pub struct AuthState {
    api_key: SecretString,
}

impl AuthState {
    pub fn new(api_key: SecretString) -> Self {
        Self { api_key }
    }
}

pub async fn require_api_key(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        None => unauthorized("API key is required!"),
        Some(key) if key != state.api_key.expose_secret() => unauthorized("Invalid API key!"),
        Some(_) => next.run(request).await,
    }
}

fn unauthorized(message: &str) -> Response {
    let body = json!({ "isSuccess": false, "message": message });
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}
