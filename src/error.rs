use crate::{decode::ImageDecodeError, engine::EngineError, messages::ErrorResponse};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Everything that can go wrong while serving a caption request.
#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    #[error("No image uploaded")]
    MissingImage,

    #[error("Invalid image: {0}")]
    InvalidImage(#[from] ImageDecodeError),

    #[error("Invalid upload: {message}")]
    Upload { status: StatusCode, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaptionError {
    /// The HTTP status reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            CaptionError::MissingImage | CaptionError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            CaptionError::Upload { status, .. } => *status,
            CaptionError::Engine(EngineError::Busy | EngineError::Stopped) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CaptionError::Engine(EngineError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            CaptionError::Engine(EngineError::Inference(_)) | CaptionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for CaptionError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        CaptionError::Upload {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for CaptionError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Caption request failed: {self}");
        } else {
            log::warn!("Caption request rejected: {self}");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_image_matches_wire_message() {
        let err = CaptionError::MissingImage;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "No image uploaded");
    }

    #[test]
    fn client_errors_are_4xx() {
        let err = CaptionError::from(ImageDecodeError::Empty);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Invalid image: the uploaded image is empty");

        let err = CaptionError::Upload {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            message: "length limit exceeded".into(),
        };
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn engine_errors_are_5xx() {
        let cases = [
            (EngineError::Busy, StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::Stopped, StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::Timeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                EngineError::Inference("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(CaptionError::from(err).status(), status);
        }
    }

    #[test]
    fn inference_error_message_is_forwarded() {
        let err = CaptionError::from(EngineError::Inference("CUDA out of memory".into()));
        assert_eq!(err.to_string(), "Inference failed: CUDA out of memory");
    }
}
