//! Standard response envelope: `{ success, data, message, pagination }`.

use crate::store::Pagination;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

/// A successful handler result: status plus envelope.
#[derive(Clone, Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Envelope,
}

impl Reply {
    pub fn new(status: StatusCode, data: Option<Value>, message: impl Into<String>) -> Self {
        Reply {
            status,
            body: Envelope {
                success: status.is_success(),
                data,
                message: message.into(),
                pagination: None,
            },
        }
    }

    pub fn ok(data: impl Serialize, message: impl Into<String>) -> Self {
        Reply::serialized(StatusCode::OK, data, message)
    }

    pub fn created(data: impl Serialize, message: impl Into<String>) -> Self {
        Reply::serialized(StatusCode::CREATED, data, message)
    }

    /// Data that cannot be represented as JSON becomes a 500 failure envelope.
    fn serialized(status: StatusCode, data: impl Serialize, message: impl Into<String>) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Reply::new(status, Some(value), message),
            Err(err) => {
                tracing::error!(error = %err, "response data is not serializable");
                Reply::new(StatusCode::INTERNAL_SERVER_ERROR, None, "Internal server error")
            }
        }
    }

    pub fn paginated(data: impl Serialize, message: impl Into<String>, pagination: Pagination) -> Self {
        let mut reply = Reply::ok(data, message);
        if reply.body.success {
            reply.body.pagination = Some(pagination);
        }
        reply
    }

    pub fn data(&self) -> Option<&Value> {
        self.body.data.as_ref()
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Envelope for a failure outside the handler pipeline (panics, missing routes).
pub fn error_body(message: impl Into<String>) -> Envelope {
    Envelope {
        success: false,
        data: None,
        message: message.into(),
        pagination: None,
    }
}
