use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{error::ApiError, state::AppState};

/// Login session cookie name.
pub const SESSION_COOKIE: &str = "paird_session";

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Gate for mutating routes and credential export.
///
/// Passes everything through when no admin token is configured.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.gateway.auth.is_enabled() || is_authorized(&state, &request) {
        return next.run(request).await;
    }
    ApiError::unauthorized().into_response()
}

/// Gate for status and QR reads; only enforced with `protect_reads`.
pub async fn require_read(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.gateway.auth.protect_reads() {
        return next.run(request).await;
    }
    require_admin(State(state), request, next).await
}

fn is_authorized(state: &AppState, request: &Request<Body>) -> bool {
    let auth = &state.gateway.auth;
    let headers = request.headers();

    if let Some(token) = header_token(headers)
        && auth.verify(token)
    {
        return true;
    }

    if let Some(token) = query_token(request.uri().query())
        && auth.verify(&token)
    {
        return true;
    }

    cookie_header(headers)
        .and_then(|c| parse_cookie(c, SESSION_COOKIE))
        .is_some_and(|token| state.gateway.logins.validate(token))
}

/// `X-Admin-Token`, then `Authorization: Bearer`.
fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
}

fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

pub(crate) fn cookie_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::COOKIE).and_then(|v| v.to_str().ok())
}

/// Parse a specific cookie value from a Cookie header string.
pub fn parse_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|part| {
        part.trim()
            .strip_prefix(name)
            .and_then(|value| value.strip_prefix('='))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn test_parse_cookie() {
        assert_eq!(
            parse_cookie("paird_session=abc123; other=def", SESSION_COOKIE),
            Some("abc123")
        );
        assert_eq!(
            parse_cookie("other=def; paird_session=xyz", SESSION_COOKIE),
            Some("xyz")
        );
        assert_eq!(parse_cookie("paird_session_old=1", SESSION_COOKIE), None);
        assert_eq!(parse_cookie("", SESSION_COOKIE), None);
    }

    #[test]
    fn test_query_token() {
        assert_eq!(query_token(Some("token=a%2Bb&x=1")).as_deref(), Some("a+b"));
        assert_eq!(query_token(Some("wait_ms=10")), None);
        assert_eq!(query_token(None), None);
    }

    #[test]
    fn test_header_token_prefers_admin_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer from-bearer".parse().unwrap());
        assert_eq!(header_token(&headers), Some("from-bearer"));
        headers.insert(ADMIN_TOKEN_HEADER, "from-header".parse().unwrap());
        assert_eq!(header_token(&headers), Some("from-header"));
    }
}
