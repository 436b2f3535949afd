//! Typed errors and HTTP mapping.

use crate::response::Envelope;
use crate::service::validation::ValidationResult;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Registration-time failures. These abort startup.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("invalid model {name}: {reason}")]
    InvalidModel { name: String, reason: String },
    #[error("resource {0} is already registered")]
    DuplicateRegistration(String),
    #[error("route {0} is already registered")]
    DuplicateRoute(String),
    #[error("resource {0} not found")]
    ResourceNotFound(String),
    #[error("invalid validation rule for {field}: {source}")]
    InvalidRule {
        field: String,
        #[source]
        source: regex::Error,
    },
}

/// Failures reported by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
}

/// Request-time failures. Every variant becomes a JSON envelope; none escape as panics.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("resource {0} not found")]
    ResourceNotFound(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("Validation failed")]
    Validation(ValidationResult),
    /// Row absent or owned by someone else; callers cannot tell the two apart.
    #[error("Instance not found")]
    NotFound,
    #[error("{0}")]
    MalformedInput(String),
    #[error("{context}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("Error writing audit entry")]
    AuditWrite(#[source] StoreError),
    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn storage(context: &'static str) -> impl FnOnce(StoreError) -> AppError {
        move |source| AppError::Storage { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ResourceNotFound(_) | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) | AppError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            AppError::Storage { .. } | AppError::AuditWrite(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let data = match &self {
            AppError::Validation(result) => serde_json::to_value(result).ok(),
            _ => None,
        };
        let body = Envelope {
            success: false,
            data,
            message: self.to_string(),
            pagination: None,
        };
        (status, Json(body)).into_response()
    }
}
