use axum::{
    extract::Request,
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use vigil_core::{VigilContext, VigilError};
use vigil_engine::AccountService;

use crate::error::ApiError;

/// JWT claims. `sub` is the user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Inserted into request extensions for authenticated routes.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
}

/// Routes reachable without a bearer token. Consent links and quick
/// check-in tokens are their own credential.
fn is_public(path: &str) -> bool {
    matches!(path, "/health" | "/api/v1/auth/register" | "/api/v1/checkin/quick")
        || path.starts_with("/api/v1/consent/")
}

pub fn generate_token(user_id: Uuid, secret: &str, expires_in_days: u64) -> Result<String, ApiError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ApiError::internal())?
        .as_secs() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        ApiError::internal()
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<Uuid, ApiError> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &Validation::default()) {
        Ok(data) => Uuid::parse_str(&data.claims.sub)
            .map_err(|_| ApiError::unauthorized("INVALID_TOKEN", "Invalid token")),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => Err(ApiError::unauthorized("TOKEN_EXPIRED", "Token has expired")),
                _ => Err(ApiError::unauthorized("INVALID_TOKEN", "Invalid token")),
            }
        }
    }
}

/// Resolves the bearer token to an active user.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    if is_public(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match extract_token(auth_header) {
        Some(t) => t,
        None => {
            tracing::debug!("Missing Authorization header");
            return Err(ApiError::unauthorized("INVALID_TOKEN", "Missing bearer token"));
        }
    };

    let ctx = req
        .extensions()
        .get::<VigilContext>()
        .cloned()
        .ok_or_else(ApiError::internal)?;

    let user_id = verify_token(&token, &ctx.config.server.jwt_secret)?;

    AccountService::new(ctx)
        .require_active(user_id)
        .await
        .map_err(|e| match e {
            VigilError::UserNotFound => ApiError::unauthorized("INVALID_TOKEN", "User not found"),
            other => ApiError::from(other),
        })?;

    req.extensions_mut().insert(AuthenticatedUser { user_id });
    tracing::debug!("Authenticated user: {}", user_id);

    Ok(next.run(req).await)
}
