use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Every failure a handler can return. Rendered as `{"error": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(&'static str),

    /// The record kept changing underneath the request.
    #[error("{0}")]
    Conflict(&'static str),

    /// `message` is what the client sees; `source` is only logged.
    #[error("{message}")]
    Internal {
        message: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        AppError::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    /// Adapter for `map_err`: wraps any error under a route-specific message.
    pub fn internal<E>(message: &'static str) -> impl FnOnce(E) -> AppError
    where
        E: Into<anyhow::Error>,
    {
        move |e| AppError::Internal {
            message,
            source: e.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(details) => json!({
                "error": self.to_string(),
                "details": details,
            }),
            AppError::Internal { message, source } => {
                error!(error = ?source, "{}", message);
                json!({ "error": message })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_lists_details() {
        let (status, body) = render(AppError::Validation(vec![
            "Title is required".into(),
            "Description is required".into(),
        ]))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][1], "Description is required");
    }

    #[tokio::test]
    async fn internal_hides_the_cause() {
        let err = AppError::internal("Failed to fetch bugs")(anyhow::anyhow!("connection reset"));
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to fetch bugs" }));
    }

    #[tokio::test]
    async fn conflict_maps_to_409() {
        let (status, body) = render(AppError::Conflict("Bug was modified concurrently")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Bug was modified concurrently");
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let (status, body) = render(AppError::NotFound("Bug not found")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Bug not found");
    }
}
