//! `/sessions` HTTP surface over the lifecycle manager.

use std::time::Duration;

use {
    axum::{
        Json, Router,
        extract::{Path, Query, State, rejection::JsonRejection},
        middleware,
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
};

use paird_sessions::{Error, PairingArtifact, PhoneNumber, SessionId};

use crate::{
    auth_middleware::{require_admin, require_read},
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Longest a QR read may block waiting for the first challenge.
const MAX_QR_WAIT: Duration = Duration::from_secs(30);

pub fn session_router(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/sessions", get(list_handler))
        .route("/sessions/{id}", axum::routing::delete(logout_handler))
        .route("/sessions/{id}/start", post(start_handler))
        .route("/sessions/{id}/stop", post(stop_handler))
        .route(
            "/sessions/{id}/pair-code",
            post(request_pair_code_handler).get(pair_code_handler),
        )
        .route("/sessions/{id}/credentials", get(credentials_handler))
        .route(
            "/sessions/{id}/credentials/base64",
            get(credentials_base64_handler),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let read = Router::new()
        .route("/sessions/{id}/status", get(status_handler))
        .route("/sessions/{id}/qr", get(qr_handler))
        .layer(middleware::from_fn_with_state(state, require_read));

    admin.merge(read)
}

fn session_id(raw: &str) -> ApiResult<SessionId> {
    Ok(SessionId::parse(raw)?)
}

async fn list_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sessions = state.gateway.manager.list().await?;
    Ok(Json(json!({ "ok": true, "sessions": sessions })))
}

async fn start_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let result = state.gateway.manager.start(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id, "result": result })))
}

async fn stop_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    state.gateway.manager.stop(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id })))
}

async fn logout_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    state.gateway.manager.logout(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id })))
}

async fn status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let status = state.gateway.manager.status(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id, "status": status })))
}

#[derive(Deserialize)]
struct QrQuery {
    #[serde(default)]
    wait_ms: Option<u64>,
}

async fn qr_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<QrQuery>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let manager = &state.gateway.manager;
    let artifact = match query.wait_ms {
        Some(ms) if ms > 0 => {
            manager
                .wait_for_artifact(&id, Duration::from_millis(ms).min(MAX_QR_WAIT))
                .await
        },
        _ => manager.pairing_artifact(&id),
    };
    match artifact {
        Some(PairingArtifact::Qr { payload, .. }) => {
            Ok(Json(json!({ "ok": true, "id": id, "qr": payload })))
        },
        _ => Err(ApiError::not_found(format!("no QR available for {id}"))),
    }
}

/// `{"number": ...}`; a JSON number is accepted as well as a string.
fn phone_from_body(body: Result<Json<Value>, JsonRejection>) -> ApiResult<PhoneNumber> {
    let Json(body) = body.map_err(|e| Error::validation("phone number", e.body_text()))?;
    let raw = match body.get("number") {
        Some(Value::String(number)) => number.clone(),
        Some(Value::Number(number)) => number.to_string(),
        Some(_) => {
            return Err(Error::validation("phone number", "expected a string or number").into());
        },
        None => {
            return Err(Error::validation("phone number", "missing field `number`").into());
        },
    };
    Ok(PhoneNumber::parse(&raw)?)
}

async fn request_pair_code_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let phone = phone_from_body(body)?;
    let pairing = state
        .gateway
        .manager
        .request_pairing_code(&id, &phone)
        .await?;
    Ok(Json(json!({ "ok": true, "id": id, "pairing": pairing })))
}

async fn pair_code_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    match state.gateway.manager.pairing_artifact(&id) {
        Some(PairingArtifact::Code(pairing)) => {
            Ok(Json(json!({ "ok": true, "id": id, "pairing": pairing })))
        },
        _ => Err(ApiError::not_found(format!("no pairing code for {id}"))),
    }
}

async fn credentials_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let files = state.gateway.manager.export(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id, "files": files })))
}

async fn credentials_base64_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = session_id(&id)?;
    let base64 = state.gateway.manager.credentials_base64(&id).await?;
    Ok(Json(json!({ "ok": true, "id": id, "base64": base64 })))
}
