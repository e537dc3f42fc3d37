use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod policy;

pub use policy::{AccessLevelPolicy, AuthContext, Policy};

/// Access level carried by an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Deny,
    Read,
    Edit,
    Full,
    Root,
}

/// Resolved caller identity attached to every authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject: String,
    /// Id of the `user` record acting, when the credential maps to one
    pub user_id: Option<String>,
    pub access: AccessLevel,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Authentication backend error: {0}")]
    Backend(String),
}

/// Credential verification collaborator
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` when the credential is not accepted
    async fn authenticate(&self, scheme: &str, token: &str) -> Result<Option<Identity>, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub access: AccessLevel,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(subject: String, user_id: Option<String>, access: AccessLevel, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: subject,
            user_id,
            access,
            exp,
            iat: now.timestamp(),
        }
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            user_id: claims.user_id,
            access: claims.access,
        }
    }
}

/// HS256 shared-secret JWT verification for the `token` and `bearer` schemes
#[derive(Clone)]
pub struct JwtAuthenticator {
    secret: String,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<String>) -> Result<Self, AuthError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AuthError::InvalidSecret);
        }
        Ok(Self { secret })
    }

    pub fn issue(&self, claims: &Claims) -> Result<String, AuthError> {
        generate_jwt(&self.secret, claims)
    }

    fn validate(&self, token: &str) -> Result<Claims, String> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let validation = Validation::default();

        let token_data = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| format!("Invalid JWT token: {}", e))?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, scheme: &str, token: &str) -> Result<Option<Identity>, AuthError> {
        if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
            tracing::debug!("Rejecting unsupported credential scheme '{}'", scheme);
            return Ok(None);
        }
        match self.validate(token) {
            Ok(claims) => Ok(Some(claims.into())),
            Err(msg) => {
                tracing::debug!("{}", msg);
                Ok(None)
            }
        }
    }
}

pub fn generate_jwt(secret: &str, claims: &Claims) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    let header = Header::default();

    encode(&header, claims, &encoding_key).map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issued_tokens_authenticate() {
        let auth = JwtAuthenticator::new("test-secret").unwrap();
        let token = auth
            .issue(&Claims::new("alice".into(), Some("u1".into()), AccessLevel::Edit, 1))
            .unwrap();

        let identity = auth.authenticate("token", &token).await.unwrap().unwrap();
        assert_eq!(identity.subject, "alice");
        assert_eq!(identity.user_id.as_deref(), Some("u1"));
        assert_eq!(identity.access, AccessLevel::Edit);

        assert!(auth.authenticate("Bearer", &token).await.unwrap().is_some());
        assert!(auth.authenticate("basic", &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_foreign_and_garbage_tokens() {
        let ours = JwtAuthenticator::new("secret-a").unwrap();
        let theirs = JwtAuthenticator::new("secret-b").unwrap();
        let token = theirs
            .issue(&Claims::new("mallory".into(), None, AccessLevel::Root, 1))
            .unwrap();

        assert!(ours.authenticate("token", &token).await.unwrap().is_none());
        assert!(ours.authenticate("token", "xxx").await.unwrap().is_none());
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(JwtAuthenticator::new(""), Err(AuthError::InvalidSecret)));
    }

    #[test]
    fn access_levels_are_ordered() {
        assert!(AccessLevel::Root > AccessLevel::Full);
        assert!(AccessLevel::Read < AccessLevel::Edit);
        assert!(AccessLevel::Deny < AccessLevel::Read);
    }
}
