use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    tracing::error,
};

/// Error body returned by every API route: `{ok: false, error, message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "admin token required",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

impl From<paird_sessions::Error> for ApiError {
    fn from(err: paird_sessions::Error) -> Self {
        use paird_sessions::Error as E;

        let status = match &err {
            E::Validation { .. } => StatusCode::BAD_REQUEST,
            E::NotFound { .. } => StatusCode::NOT_FOUND,
            E::AlreadyAuthenticated { .. } => StatusCode::CONFLICT,
            E::Connection { .. } => StatusCode::BAD_GATEWAY,
            E::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "session operation failed");
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "ok": false,
                "error": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
