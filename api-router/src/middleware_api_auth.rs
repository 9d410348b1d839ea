use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use common::error::AppError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::{api_state::ApiState, error::ApiError};

pub const CLIENT_ID_HEADER: &str = "X-Client-Id";
pub const API_KEY_HEADER: &str = "X-Api-Key";

type HmacSha256 = Hmac<Sha256>;

pub async fn api_auth(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_id = header_value(&request, CLIENT_ID_HEADER);
    let authorized = match (client_id, header_value(&request, API_KEY_HEADER)) {
        (Some(client_id), Some(api_key)) => {
            verify_api_key(&state.config.api_secret_key, client_id, api_key)
        }
        _ => false,
    };

    if !authorized {
        warn!(?client_id, path = %request.uri().path(), "Rejected unauthenticated request");
        return Err(AppError::Auth("missing or invalid API key".to_string()).into());
    }

    Ok(next.run(request).await)
}

/// The API key issued to `client_id`: padded url-safe base64 of its HMAC-SHA256.
pub fn derive_api_key(secret: &str, client_id: &str) -> Option<String> {
    let mac = client_mac(secret, client_id)?;
    Some(URL_SAFE.encode(mac.finalize().into_bytes()))
}

fn verify_api_key(secret: &str, client_id: &str, api_key: &str) -> bool {
    let Ok(tag) = URL_SAFE.decode(api_key) else {
        return false;
    };
    client_mac(secret, client_id).is_some_and(|mac| mac.verify_slice(&tag).is_ok())
}

fn client_mac(secret: &str, client_id: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(client_id.as_bytes());
    Some(mac)
}

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
