use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode},
};
use serde::Deserialize;

use super::{Identity, TokenVerifier};
use crate::db::models::UserId;

/// Authenticated caller, resolved from `Authorization: Bearer <token>` or a
/// `?token=` query parameter. Implements axum's FromRequestParts for use as
/// an extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

/// Like [`AuthUser`], but keeps everything the token asserted.
#[derive(Debug, Clone)]
pub struct AuthIdentity(pub Identity);

/// Token verifier stored in request extensions for the AuthUser extractor.
#[derive(Clone)]
pub struct Verifier(pub Arc<dyn TokenVerifier>);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Bearer header first, then the query parameter.
pub fn extract_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

fn authenticate(parts: &Parts) -> Result<Identity, StatusCode> {
    let token = extract_token(parts).ok_or(StatusCode::UNAUTHORIZED)?;

    let verifier = parts
        .extensions
        .get::<Verifier>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    verifier.0.verify(&token).map_err(|e| {
        tracing::debug!(error = %e, "Token rejected");
        StatusCode::UNAUTHORIZED
    })
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts).map(|identity| AuthUser(identity.user_id))
    }
}

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authenticate(parts).map(AuthIdentity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn request_parts(uri: &str, authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_bearer_header_wins_over_query() {
        let parts = request_parts("/ws?token=from-query", Some("Bearer from-header"));
        assert_eq!(extract_token(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_non_bearer_header_falls_back_to_query() {
        let parts = request_parts("/ws?token=from-query", Some("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&parts).as_deref(), Some("from-query"));

        let parts = request_parts("/ws?token=from-query", Some("Bearer "));
        assert_eq!(extract_token(&parts).as_deref(), Some("from-query"));
    }

    #[test]
    fn test_no_credential() {
        assert_eq!(extract_token(&request_parts("/ws", None)), None);
        assert_eq!(extract_token(&request_parts("/ws?token=", Some("Basic x"))), None);
    }
}
