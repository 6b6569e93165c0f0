use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::blob::BlobError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("You must be signed in to do that")]
    Unauthenticated,

    #[error("{0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found")]
    NotFound,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Sign-in cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Message safe to show next to the control that triggered the failure.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthenticated => "You must be signed in to do that.".to_string(),
            AppError::Validation(msg) => msg.clone(),
            AppError::PermissionDenied(_) => "You are not allowed to do that.".to_string(),
            AppError::NotFound => "That item no longer exists.".to_string(),
            AppError::Unavailable(_) => {
                "The service is unreachable right now. Please try again.".to_string()
            }
            AppError::Cancelled => String::new(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound,
            StoreError::PermissionDenied(msg) => AppError::PermissionDenied(msg),
            StoreError::Unavailable(msg) => AppError::Unavailable(msg),
            StoreError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl From<BlobError> for AppError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::QuotaExceeded { size, limit } => AppError::Validation(format!(
                "Image is too large ({} bytes, limit is {} bytes).",
                size, limit
            )),
            BlobError::InvalidKey(key) => AppError::Validation(format!("Invalid file name: {}", key)),
            BlobError::Network(msg) => AppError::Unavailable(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.user_message()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::PermissionDenied(msg) => {
                tracing::warn!("Permission denied: {}", msg);
                (StatusCode::FORBIDDEN, self.user_message())
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Unavailable(msg) => {
                tracing::error!("Store unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, self.user_message())
            }
            AppError::Cancelled => {
                tracing::warn!("Sign-in cancelled by the user");
                (StatusCode::NO_CONTENT, String::new())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, message).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn response_status(err: AppError) -> StatusCode {
        let response = err.into_response();
        response.status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(response_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthenticated_returns_401() {
        assert_eq!(
            response_status(AppError::Unauthenticated),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn validation_returns_400() {
        assert_eq!(
            response_status(AppError::Validation("oops".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn permission_denied_returns_403() {
        assert_eq!(
            response_status(AppError::PermissionDenied("stale owner".into())),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn unavailable_returns_503() {
        assert_eq!(
            response_status(AppError::Unavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn cancelled_has_no_visible_message() {
        assert_eq!(response_status(AppError::Cancelled), StatusCode::NO_CONTENT);
        assert!(AppError::Cancelled.user_message().is_empty());
    }

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let err: AppError = StoreError::NotFound {
            collection: "posts".into(),
            id: "p1".into(),
        }
        .into();
        assert!(matches!(err, AppError::NotFound));

        let err: AppError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[test]
    fn quota_exceeded_is_a_validation_error() {
        let err: AppError = BlobError::QuotaExceeded { size: 10, limit: 5 }.into();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn internal_returns_500() {
        assert_eq!(
            response_status(AppError::Internal("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
