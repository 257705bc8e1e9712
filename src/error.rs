use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;
use crate::users::UserStoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserExists,

    #[error("Internal Server Error: Could not update sensor data")]
    SensorWrite(#[source] StoreError),

    #[error("Internal Server Error: Could not read sensor data")]
    SensorRead(#[source] StoreError),

    #[error("Internal Server Error")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl From<UserStoreError> for AppError {
    fn from(e: UserStoreError) -> Self {
        match e {
            UserStoreError::NotFound => AppError::UserNotFound,
            UserStoreError::AlreadyExists => AppError::UserExists,
            UserStoreError::InvalidUsername(name) => {
                AppError::MalformedPayload(format!("invalid username {name:?}"))
            }
            other => AppError::Internal(Box::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(Box::new(e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::UserExists => StatusCode::CONFLICT,
            AppError::SensorWrite(ref e) => {
                error!(error = %e, "Error updating sensor data");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::SensorRead(ref e) => {
                error!(error = %e, "Failed to read or parse sensor data");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(ref e) => {
                error!(error = %e, "Internal server error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
