use {
    axum::{
        Json, Router,
        extract::{State, rejection::JsonRejection},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::post,
    },
    serde::Deserialize,
    tracing::{info, warn},
};

use crate::{
    auth_middleware::{SESSION_COOKIE, cookie_header, parse_cookie},
    error::ApiError,
    state::AppState,
};

/// `/api/auth/*` routes.
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
}

#[derive(Deserialize)]
struct LoginRequest {
    token: String,
}

async fn login_handler(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let gw = &state.gateway;
    if !gw.auth.is_enabled() {
        return Json(serde_json::json!({ "ok": true, "auth_disabled": true })).into_response();
    }
    let body = match body {
        Ok(Json(body)) => body,
        Err(e) => {
            return ApiError::new(StatusCode::BAD_REQUEST, "validation_error", e.body_text())
                .into_response();
        },
    };
    if !gw.auth.verify(&body.token) {
        warn!("rejected login with invalid admin token");
        return ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "invalid admin token")
            .into_response();
    }
    info!("admin login");
    session_response(&gw.logins.create(), gw.logins.ttl().as_secs())
}

async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = cookie_header(&headers).and_then(|c| parse_cookie(c, SESSION_COOKIE)) {
        state.gateway.logins.revoke(token);
    }
    clear_session_response()
}

fn session_response(token: &str, max_age_secs: u64) -> Response {
    let cookie = format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age_secs}"
    );
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "ok": true })),
    )
        .into_response()
}

fn clear_session_response() -> Response {
    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0");
    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(serde_json::json!({ "ok": true })),
    )
        .into_response()
}
