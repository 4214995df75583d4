// =============================================================================
// Bearer Token Authentication — Axum extractor
// =============================================================================
//
// Guards every downstream endpoint except health. The expected token comes
// from `CONSOLE_ADMIN_TOKEN`, read per request so rotation needs no restart.
// An unset or empty variable rejects everything. Comparison is constant time.
//
//   async fn handler(_auth: AuthBearer, ...) { ... }
//
// The live WebSocket cannot carry headers from a browser, so it passes the
// token as `?token=` and checks it with `validate_token`.
// =============================================================================

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

pub const ADMIN_TOKEN_ENV: &str = "CONSOLE_ADMIN_TOKEN";

/// Compare two byte slices without exiting early on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn expected_token() -> String {
    std::env::var(ADMIN_TOKEN_ENV).unwrap_or_default()
}

/// Validated bearer token.
pub struct AuthBearer(pub String);

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, axum::Json(body)).into_response()
    }
}

/// Check an `Authorization` header value against `expected`.
fn check_bearer<'a>(header: Option<&'a str>, expected: &str) -> Result<&'a str, AuthRejection> {
    if expected.is_empty() {
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Server authentication not configured",
        });
    }

    let token = match header.and_then(|v| v.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => {
            return Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                message: "Missing or invalid authorization token",
            })
        }
    };

    if !constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        return Err(AuthRejection {
            status: StatusCode::FORBIDDEN,
            message: "Invalid authorization token",
        });
    }
    Ok(token)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        match check_bearer(header, &expected_token()) {
            Ok(token) => Ok(AuthBearer(token.to_string())),
            Err(rejection) => {
                warn!(path = %parts.uri.path(), reason = rejection.message, "request rejected");
                Err(rejection)
            }
        }
    }
}

/// Validate a token passed outside the `Authorization` header.
pub fn validate_token(token: &str) -> bool {
    let expected = expected_token();
    !expected.is_empty() && constant_time_eq(token.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(constant_time_eq(b"", b""));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer_string"));
        assert!(!constant_time_eq(b"\x00", b"\x01"));
    }

    #[test]
    fn bearer_accepted_when_matching() {
        assert_eq!(check_bearer(Some("Bearer s3cret"), "s3cret").ok(), Some("s3cret"));
    }

    #[test]
    fn bearer_rejections() {
        let missing = check_bearer(None, "s3cret").err().unwrap();
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);

        let wrong_scheme = check_bearer(Some("Basic s3cret"), "s3cret").err().unwrap();
        assert_eq!(wrong_scheme.status, StatusCode::UNAUTHORIZED);

        let wrong = check_bearer(Some("Bearer nope"), "s3cret").err().unwrap();
        assert_eq!(wrong.status, StatusCode::FORBIDDEN);

        let unconfigured = check_bearer(Some("Bearer s3cret"), "").err().unwrap();
        assert_eq!(unconfigured.status, StatusCode::FORBIDDEN);
    }
}
