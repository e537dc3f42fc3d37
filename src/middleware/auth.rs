use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

pub const ACCESS_TOKEN_PARAM: &str = "access_token";
const DEFAULT_SCHEME: &str = "token";

/// Credential as presented by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub scheme: String,
    pub token: String,
}

/// Authentication middleware: resolves the credential through the configured
/// authenticator and attaches the [`Identity`] to the request
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let credential = match extract_credential(request.uri().query(), request.headers()) {
        Ok(credential) => credential,
        Err(err) => return err.into_response(),
    };

    let identity = match state
        .authenticator
        .authenticate(&credential.scheme, &credential.token)
        .await
    {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            tracing::debug!("Credential with scheme '{}' was not accepted", credential.scheme);
            return ApiError::unauthorized("Invalid or expired credential").into_response();
        }
        Err(err) => {
            tracing::error!("Authenticator failed: {}", err);
            return ApiError::unauthorized("Credential could not be verified").into_response();
        }
    };

    request.extensions_mut().insert(identity);
    next.run(request).await
}

/// Query `access_token` first, then `Authorization: <scheme> <token>`
pub fn extract_credential(query: Option<&str>, headers: &HeaderMap) -> Result<Credential, ApiError> {
    let from_query = query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(key, _)| key == ACCESS_TOKEN_PARAM)
            .map(|(_, value)| value.into_owned())
    });
    if let Some(token) = from_query {
        if token.trim().is_empty() {
            return Err(ApiError::unauthorized("Empty access_token"));
        }
        return Ok(Credential {
            scheme: DEFAULT_SCHEME.to_string(),
            token,
        });
    }

    let raw = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Missing credential"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Invalid Authorization header format"))?;

    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(token), None, None) => Ok(Credential {
            scheme: DEFAULT_SCHEME.to_string(),
            token: token.to_string(),
        }),
        (Some(scheme), Some(token), None) => Ok(Credential {
            scheme: scheme.to_string(),
            token: token.to_string(),
        }),
        (None, _, _) => Err(ApiError::unauthorized("Empty Authorization header")),
        _ => Err(ApiError::unauthorized("Authorization header must be '<scheme> <token>'")),
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Request is not authenticated"))
    }
}
