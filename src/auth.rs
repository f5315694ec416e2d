use axum::extract::{FromRef, FromRequestParts};
use axum::http::{request::Parts, HeaderMap};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::response::AppError;
use crate::state::AppState;

pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Bearer token claims. Tokens are issued by the identity provider; only
/// `sub` (the user id) is consumed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Mint a user token. Used by tooling and tests; production tokens come from
/// the identity provider with the same secret.
pub fn sign_jwt_for_user(
    user_id: &str,
    secret: &str,
    expires_in_hours: u64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let exp = now + Duration::hours(expires_in_hours as i64);
    let claims = Claims {
        sub: user_id.to_string(),
        token_type: Some("user".to_string()),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::internal(&format!("jwt sign failed: {e}")))
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.algorithms = vec![Algorithm::HS256];

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::unauthorized("Invalid or expired token"))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth_header| auth_header.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Compare two secrets without short-circuiting on the first differing byte.
fn tokens_match(provided: &str, expected: &str) -> bool {
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("Missing bearer token"))?;
        let claims = verify_jwt(&token, &app_state.config().jwt_secret)?;

        if matches!(claims.token_type.as_deref(), Some(t) if t != "user") {
            return Err(AppError::unauthorized("Invalid token type"));
        }
        if claims.sub.is_empty() {
            return Err(AppError::unauthorized("Token has no subject"));
        }

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}

/// Caller of the batch/internal API, authenticated by the shared
/// `x-internal-token` secret.
#[derive(Debug, Clone, Copy)]
pub struct InternalAuth;

#[axum::async_trait]
impl<S> FromRequestParts<S> for InternalAuth
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let provided = parts
            .headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing internal token"))?;

        let expected = &app_state.config().internal_api_token;
        if expected.is_empty() || !tokens_match(provided, expected) {
            tracing::warn!("Rejected internal API call with invalid token");
            return Err(AppError::forbidden("Invalid internal token"));
        }
        Ok(InternalAuth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_sign_and_verify() {
        let secret = "secret";
        let token = sign_jwt_for_user("u1", secret, 1).unwrap();
        let claims = verify_jwt(&token, secret).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.token_type.as_deref(), Some("user"));
    }

    #[test]
    fn jwt_with_wrong_secret_is_rejected() {
        let token = sign_jwt_for_user("u1", "secret", 1).unwrap();
        let err = verify_jwt(&token, "other").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Token abc".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn internal_token_comparison() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("", "abc"));
    }
}
