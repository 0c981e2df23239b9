use std::ops::Deref;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tokenlens_core::ResolveError;

/// Newtype wrapper for `ResolveError` to implement `IntoResponse`
/// (orphan rule prevents implementing an external trait on an external type).
pub struct ApiError {
    pub inner: ResolveError,
    pub debug: bool,
}

impl ApiError {
    pub fn new(inner: ResolveError, debug: bool) -> Self {
        Self { inner, debug }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        ApiError { inner: err, debug: false }
    }
}

impl Deref for ApiError {
    type Target = ResolveError;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = if self.debug {
            json!({
                "error": self.inner.message,
                "kind": self.inner.kind.as_str(),
                "transient": self.inner.transient,
                "attempts": self.inner.attempts,
            })
        } else {
            json!({ "error": self.inner.message })
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
