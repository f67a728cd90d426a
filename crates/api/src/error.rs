use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use dataservice_core::{DataServiceError, ErrorCode};

/// 错误响应体：`{"error": {"code": "...", "message": "..."}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub DataServiceError);

pub fn status_for_code(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::AlreadyExists => StatusCode::CONFLICT,
        ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 远端没有返回错误体时，按HTTP状态码推断错误
pub fn error_from_status(status: StatusCode, body: String) -> DataServiceError {
    let message = format!("HTTP {status}: {body}");
    match status {
        StatusCode::NOT_FOUND => DataServiceError::NotFound(message),
        StatusCode::CONFLICT => DataServiceError::AlreadyExists(message),
        StatusCode::PRECONDITION_FAILED => DataServiceError::FailedPrecondition(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            DataServiceError::InvalidArgument(message)
        }
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            DataServiceError::Unavailable(message)
        }
        _ => DataServiceError::Internal(message),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for_code(code);
        if status.is_server_error() {
            tracing::warn!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for_code(ErrorCode::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_code(ErrorCode::FailedPrecondition),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for_code(ErrorCode::Unavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_body_format() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: ErrorCode::AlreadyExists,
                message: "dataset 1000".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"error": {"code": "ALREADY_EXISTS", "message": "dataset 1000"}})
        );
    }

    #[test]
    fn test_error_from_status_fallback() {
        let err = error_from_status(StatusCode::BAD_GATEWAY, "upstream".to_string());
        assert!(err.is_unavailable());
        let err = error_from_status(StatusCode::IM_A_TEAPOT, String::new());
        assert_eq!(err.code(), ErrorCode::Internal);
    }
}
