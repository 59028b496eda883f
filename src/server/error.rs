//! API error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::i18n::Lang;
use crate::voices::VoiceError;

/// Error returned by the JSON API. `message` is already localized.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    /// Map a voice library error; `failure_key` localizes unexpected failures.
    pub fn voice(err: VoiceError, lang: Lang, failure_key: &str) -> Self {
        let message = err.message(lang, failure_key);
        match err {
            VoiceError::NotFound(_) => Self::not_found(message),
            VoiceError::Io(_) | VoiceError::Json(_) | VoiceError::Audio(_) => {
                log::error!("Voice operation failed: {err}");
                Self::internal(message)
            }
            _ => Self::bad_request(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "code": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}
