use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use promptlab_core::{ConfigError, RequestError};
use promptlab_services::ServiceError;
use serde::Serialize;

/// Which operation a failed request was in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Request,
    Load,
    Generate,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Load(String),
    Generate(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    stage: Stage,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, stage, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Stage::Request, msg),
            AppError::Load(msg) => (StatusCode::SERVICE_UNAVAILABLE, Stage::Load, msg),
            AppError::Generate(msg) => (StatusCode::INTERNAL_SERVER_ERROR, Stage::Generate, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, Stage::Generate, msg),
        };
        (status, Json(ErrorResponse { error: message, stage })).into_response()
    }
}

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Load(format!("Model load failed: {}", err))
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Load(_) => AppError::Load(message),
            ServiceError::Config(e) => AppError::from(e),
            ServiceError::Generation(_) => AppError::Generate(message),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Generation failed: worker task aborted: {}", err))
    }
}
