//! Request correlation id, taken from `X-Request-Id` or generated.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::{request::Parts, HeaderValue},
    middleware::Next,
    response::Response,
};

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Extractor for the request's trace id. Never rejects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn generate() -> Self {
        TraceId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn from_headers(parts: &Parts) -> Option<TraceId> {
    parts
        .headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v: &HeaderValue| v.to_str().ok())
        .map(|s: &str| s.trim().to_string())
        .filter(|s: &String| !s.is_empty())
        .map(TraceId)
}

#[async_trait]
impl<S> FromRequestParts<S> for TraceId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(from_headers(parts).unwrap_or_else(TraceId::generate))
    }
}

/// Middleware: make sure every request carries `X-Request-Id` and echo it on the response.
pub async fn propagate(req: Request, next: Next) -> Response {
    let (mut parts, body) = req.into_parts();
    let trace = from_headers(&parts).unwrap_or_else(TraceId::generate);
    let value = HeaderValue::from_str(trace.as_str()).ok();
    if let Some(v) = &value {
        parts.headers.insert(REQUEST_ID_HEADER, v.clone());
    }
    let mut res = next.run(Request::from_parts(parts, body)).await;
    if let Some(v) = value {
        res.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    res
}
