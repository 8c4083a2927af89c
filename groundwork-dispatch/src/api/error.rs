//! Error responses
//!
//! Failures are returned as a response envelope whose `code` repeats the
//! HTTP status and whose `message` carries the originating error.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use groundwork_common::Error;

use crate::envelope::ResponseEnvelope;

/// Error returned by API handlers
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AmbiguousRecord(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidField(_)
            | Error::UnsupportedOperation(_)
            | Error::Format(_)
            | Error::InvalidInput(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Persistence(_)
            | Error::Introspection(_)
            | Error::Io(_)
            | Error::Config(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ResponseEnvelope::failure(status.as_u16(), self.0.to_string()));
        (status, body).into_response()
    }
}
