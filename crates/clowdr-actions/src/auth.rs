//! Request authentication
//!
//! Hasura forwards actions and event triggers with a shared secret in the
//! `x-hasura-event-secret` header. User-facing actions also carry the
//! caller's Auth0 bearer token, whose Hasura claims name the user.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use clowdr_core::{Clock, UserId};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;
use crate::error::ActionsError;
use crate::server::AppState;

pub const EVENT_SECRET_HEADER: &str = "x-hasura-event-secret";
pub const HASURA_CLAIMS_NAMESPACE: &str = "https://hasura.io/jwt/claims";

/// Role a caller must be allowed to assume
pub const REQUIRED_ROLE: &str = "user";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No authorization token was found")]
    MissingToken,

    #[error("Malformed token")]
    Malformed,

    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid token signature")]
    BadSignature,

    #[error("Token expired")]
    Expired,

    #[error("Unexpected token issuer")]
    WrongIssuer,

    #[error("Unexpected token audience")]
    WrongAudience,

    #[error("Token has no Hasura claims")]
    MissingClaims,

    #[error("Insufficient scope")]
    InsufficientScope,
}

impl From<AuthError> for ActionsError {
    fn from(e: AuthError) -> Self {
        ActionsError::Unauthorized(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

/// Hasura session claims carried in the token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasuraClaims {
    #[serde(rename = "x-hasura-user-id")]
    pub user_id: String,
    #[serde(rename = "x-hasura-allowed-roles", default)]
    pub allowed_roles: Vec<String>,
    #[serde(rename = "x-hasura-default-role", default, skip_serializing_if = "Option::is_none")]
    pub default_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(rename = "https://hasura.io/jwt/claims", default, skip_serializing_if = "Option::is_none")]
    pub hasura: Option<HasuraClaims>,
}

/// The caller, as established by the bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

/// HS256 bearer token verification
///
/// Signature, issuer and audience are checked by `jsonwebtoken`; expiry is
/// checked against the injected clock.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(config.signing_secret.as_bytes()),
            validation,
            clock,
        }
    }

    /// Verify a compact JWT and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| AuthError::Malformed)?;
        if header.alg != Algorithm::HS256 {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidSignature => AuthError::BadSignature,
                ErrorKind::InvalidIssuer => AuthError::WrongIssuer,
                ErrorKind::InvalidAudience => AuthError::WrongAudience,
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Malformed,
            },
        )?;

        if data.claims.exp.saturating_mul(1000) <= self.clock.now_millis() {
            return Err(AuthError::Expired);
        }
        Ok(data.claims)
    }

    /// Verify a token and extract the Hasura user, who must hold the `user` role
    pub fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let claims = self.verify(token)?;
        let hasura = claims.hasura.ok_or(AuthError::MissingClaims)?;
        if !hasura.allowed_roles.iter().any(|r| r == REQUIRED_ROLE) {
            return Err(AuthError::InsufficientScope);
        }
        UserId::new(hasura.user_id).map_err(|_| AuthError::MissingClaims)
    }
}

/// Sign claims as an HS256 compact JWT
pub fn encode_hs256(claims: &Claims, secret: &[u8]) -> Result<String, AuthError> {
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| AuthError::Malformed)
}

/// Reject requests without the shared event secret
pub async fn check_event_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ActionsError> {
    let presented = request
        .headers()
        .get(EVENT_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented != Some(state.config.event_secret.as_str()) {
        debug!(path = %request.uri().path(), "Rejected request without event secret");
        return Err(ActionsError::Forbidden);
    }
    Ok(next.run(request).await)
}

/// Require a valid bearer token and record the caller on the request
pub async fn check_jwt(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ActionsError> {
    let verifier = state
        .jwt
        .as_ref()
        .ok_or_else(|| ActionsError::Unauthorized("Authentication is not configured".into()))?;

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AuthError::MissingToken)?;

    let user_id = verifier.authenticate(token.trim())?;
    request.extensions_mut().insert(AuthenticatedUser(user_id));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use clowdr_core::ManualClock;

    const NOW_MS: i64 = 1_700_000_000_000;

    fn config() -> AuthConfig {
        AuthConfig {
            api_domain: "api.example.org".into(),
            audience: "hasura".into(),
            issuer_domain: "clowdr.auth0.com".into(),
            signing_secret: "top-secret".into(),
        }
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new(&config(), Arc::new(ManualClock::at_millis(NOW_MS)))
    }

    fn claims(roles: &[&str]) -> Claims {
        Claims {
            iss: "https://clowdr.auth0.com/".into(),
            aud: Audience::Many(vec!["hasura".into(), "other".into()]),
            exp: NOW_MS / 1000 + 60,
            sub: Some("auth0|ada".into()),
            hasura: Some(HasuraClaims {
                user_id: "auth0|ada".into(),
                allowed_roles: roles.iter().map(|r| r.to_string()).collect(),
                default_role: Some("user".into()),
            }),
        }
    }

    #[test]
    fn test_valid_token() {
        let token = encode_hs256(&claims(&["user"]), b"top-secret").unwrap();
        assert_eq!(verifier().authenticate(&token).unwrap().as_str(), "auth0|ada");
    }

    #[test]
    fn test_wrong_secret() {
        let token = encode_hs256(&claims(&["user"]), b"guess").unwrap();
        assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::BadSignature);
    }

    #[test]
    fn test_tampered_payload() {
        let token = encode_hs256(&claims(&["user"]), b"top-secret").unwrap();
        let mut forged = claims(&["user", "admin"]);
        forged.hasura.as_mut().unwrap().user_id = "auth0|eve".into();
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let parts: Vec<&str> = token.split('.').collect();
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert_eq!(verifier().verify(&tampered).unwrap_err(), AuthError::BadSignature);
    }

    #[test]
    fn test_claim_checks() {
        let mut expired = claims(&["user"]);
        expired.exp = NOW_MS / 1000 - 1;
        let token = encode_hs256(&expired, b"top-secret").unwrap();
        assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::Expired);

        let mut issuer = claims(&["user"]);
        issuer.iss = "https://evil.example/".into();
        let token = encode_hs256(&issuer, b"top-secret").unwrap();
        assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::WrongIssuer);

        let mut audience = claims(&["user"]);
        audience.aud = Audience::One("someone-else".into());
        let token = encode_hs256(&audience, b"top-secret").unwrap();
        assert_eq!(verifier().verify(&token).unwrap_err(), AuthError::WrongAudience);
    }

    #[test]
    fn test_role_required() {
        let token = encode_hs256(&claims(&["anonymous"]), b"top-secret").unwrap();
        assert_eq!(
            verifier().authenticate(&token).unwrap_err(),
            AuthError::InsufficientScope
        );

        let mut bare = claims(&["user"]);
        bare.hasura = None;
        let token = encode_hs256(&bare, b"top-secret").unwrap();
        assert_eq!(verifier().authenticate(&token).unwrap_err(), AuthError::MissingClaims);
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(verifier().verify("abc").unwrap_err(), AuthError::Malformed);
        assert_eq!(verifier().verify("a.b.c.d").unwrap_err(), AuthError::Malformed);

        let none_alg = format!(
            "{}.{}.",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#),
            URL_SAFE_NO_PAD.encode(b"{}")
        );
        assert_eq!(verifier().verify(&none_alg).unwrap_err(), AuthError::Malformed);

        let hs512 = jsonwebtoken::encode(
            &jsonwebtoken::Header::new(Algorithm::HS512),
            &claims(&["user"]),
            &EncodingKey::from_secret(b"top-secret"),
        )
        .unwrap();
        assert_eq!(
            verifier().verify(&hs512).unwrap_err(),
            AuthError::UnsupportedAlgorithm("HS512".into())
        );
    }
}
