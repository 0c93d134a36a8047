//! Bearer-token extraction and principal checks

use super::errors::ApiError;
use crate::errors::AuthError;
use crate::sessions::SessionAuthority;
use crate::types::{PrincipalKind, Session};
use axum::http::{header, HeaderMap};

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn verify(
    authority: &SessionAuthority,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Session, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| {
        ApiError::from_core(request_id.to_string(), AuthError::SessionInvalid.into())
    })?;
    authority
        .verify_session(token)
        .map_err(|e| ApiError::from_core(request_id.to_string(), e))
}

/// Resolve a user session or fail with 401.
pub fn require_user(
    authority: &SessionAuthority,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Session, ApiError> {
    let session = verify(authority, headers, request_id)?;
    if session.kind != PrincipalKind::User {
        return Err(ApiError::from_core(
            request_id.to_string(),
            AuthError::WrongPrincipalKind("user").into(),
        ));
    }
    Ok(session)
}

/// Resolve an admin session or fail with 401. A valid user token is not
/// enough; the session kind is checked, not just its existence.
pub fn require_admin(
    authority: &SessionAuthority,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Session, ApiError> {
    let session = verify(authority, headers, request_id)?;
    if session.kind != PrincipalKind::Admin {
        return Err(ApiError::from_core(
            request_id.to_string(),
            AuthError::WrongPrincipalKind("admin").into(),
        ));
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
