//! Service error taxonomy and its HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::engine::registry::ModelKind;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("no url")]
    MissingUrl,

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("failed to decode image from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("model {} is not configured", .0.as_str())]
    ModelUnavailable(ModelKind),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unsupported operation")]
    UnsupportedOperation,
}

impl FaceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FaceError::MissingUrl => StatusCode::BAD_REQUEST,
            FaceError::Fetch { .. } | FaceError::Decode { .. } => StatusCode::NOT_FOUND,
            FaceError::ModelLoad(_) | FaceError::ModelUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FaceError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FaceError::UnsupportedOperation => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            FaceError::MissingUrl => "MISSING_URL",
            FaceError::Fetch { .. } => "FETCH_ERROR",
            FaceError::Decode { .. } => "DECODE_ERROR",
            FaceError::ModelLoad(_) => "MODEL_LOAD_ERROR",
            FaceError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            FaceError::Inference(_) => "INFERENCE_ERROR",
            FaceError::UnsupportedOperation => "UNSUPPORTED_OPERATION",
        }
    }

    /// Fetch and decode failures look the same to clients
    pub fn is_no_data(&self) -> bool {
        matches!(self, FaceError::Fetch { .. } | FaceError::Decode { .. })
    }

    pub fn inference(err: impl std::fmt::Display) -> Self {
        FaceError::Inference(err.to_string())
    }
}

impl IntoResponse for FaceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            FaceError::MissingUrl => {
                tracing::error!("no url");
                (status, "no url").into_response()
            }
            FaceError::Fetch { url, .. } | FaceError::Decode { url, .. } => {
                tracing::warn!("{}", self);
                tracing::warn!("no data by {}", url);
                (status, format!("no data by {}", url)).into_response()
            }
            FaceError::UnsupportedOperation => {
                tracing::warn!("rejected unsupported operation");
                (status, "unsupported operation").into_response()
            }
            _ => {
                tracing::error!("Request failed: {} ({})", self, status);
                let body = serde_json::json!({
                    "error": {
                        "code": self.error_code(),
                        "message": self.to_string(),
                    }
                });
                (status, axum::Json(body)).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_and_decode_both_map_to_404() {
        let fetch = FaceError::Fetch {
            url: "http://host/a.jpg".to_string(),
            reason: "connection refused".to_string(),
        };
        let decode = FaceError::Decode {
            url: "http://host/a.jpg".to_string(),
            source: image::ImageError::IoError(std::io::Error::other("truncated")),
        };
        assert_eq!(fetch.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(decode.status_code(), StatusCode::NOT_FOUND);
        assert!(fetch.is_no_data() && decode.is_no_data());
        assert_ne!(fetch.error_code(), decode.error_code());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FaceError::MissingUrl.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            FaceError::ModelLoad("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            FaceError::ModelUnavailable(ModelKind::Recognition).to_string(),
            "model face_recognition is not configured"
        );
    }
}
