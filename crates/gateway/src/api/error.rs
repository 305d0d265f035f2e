//! Maps the shared `ts_domain::Error` to an HTTP response. The single place
//! typed errors become a status code, per the error handling design.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use ts_domain::error::Error;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) | Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Provider { .. } | Error::ToolError { .. } => StatusCode::BAD_GATEWAY,
            // A unique-constraint violation is a programming error in the
            // Executor, not a client mistake: 500, same as any other
            // internal failure.
            Error::Conflict(_)
            | Error::Io(_)
            | Error::Database(_)
            | Error::Config(_)
            | Error::Other(_)
            | Error::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
