use axum::http;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token presented")]
    MissingToken,
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("token carries no subject")]
    MissingSubject,
}

/// Claims we read from a bearer token
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The verified caller behind a connection or request
#[derive(Debug, Clone, PartialEq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
}

/// Verifies HS256 bearer tokens issued by the auth service
#[derive(Clone)]
pub struct AuthValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<CallerIdentity, AuthError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = token_data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        info!("JWT token validated successfully for user: {}", claims.sub);
        Ok(CallerIdentity {
            user_id: claims.sub,
            name: claims.name,
            roles: claims.roles,
        })
    }
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, AuthError> {
    get_auth_token_from_parts(req.headers(), req.uri())
}

pub fn get_auth_token_from_parts(headers: &http::HeaderMap, uri: &http::Uri) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidHeader("Authorization"))?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = headers.get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| AuthError::InvalidHeader("Cookie"))?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
    }

    // 3. Browsers cannot set headers on a WebSocket handshake, so accept ?token=
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                if !token.is_empty() {
                    return Ok(token.to_string());
                }
            }
        }
    }

    Err(AuthError::MissingToken)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    pub(crate) const SECRET: &str = "test-secret";

    pub(crate) fn mint(secret: &str, sub: &str, roles: &[&str], ttl_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + ttl_secs) as usize,
            name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let validator = AuthValidator::new(SECRET);
        let identity = validator
            .verify_token(&mint(SECRET, "user-1", &["editor"], 3600))
            .unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.roles, vec!["editor".to_string()]);
    }

    #[test]
    fn wrong_secret_expired_or_garbage_tokens_are_rejected() {
        let validator = AuthValidator::new(SECRET);
        assert!(validator.verify_token(&mint("other-secret", "user-1", &[], 3600)).is_err());
        assert!(validator.verify_token(&mint(SECRET, "user-1", &[], -3600)).is_err());
        assert!(validator.verify_token("not.a.jwt").is_err());
        assert!(matches!(
            validator.verify_token(&mint(SECRET, "", &[], 3600)),
            Err(AuthError::MissingSubject)
        ));
    }

    #[test]
    fn token_is_found_in_header_cookie_or_query() {
        let req = http::Request::builder()
            .uri("/ws")
            .header("Authorization", "Bearer abc")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "abc");

        let req = http::Request::builder()
            .uri("/ws")
            .header("Cookie", "theme=dark; auth_token=def")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "def");

        let req = http::Request::builder()
            .uri("/ws?room=1&token=ghi")
            .body(())
            .unwrap();
        assert_eq!(get_auth_token(&req).unwrap(), "ghi");

        let req = http::Request::builder().uri("/ws").body(()).unwrap();
        assert!(matches!(get_auth_token(&req), Err(AuthError::MissingToken)));
    }
}
