//! Handler plumbing shared by the resource routes.
//!
//! A [`Handler`] is transport-agnostic: it receives the application state, the resource the route
//! belongs to and a [`PipelineRequest`], and returns a [`Reply`]. `routes::resource` adapts axum
//! requests into this shape; tests can call handlers directly.

pub mod api;
pub mod entity;
pub mod timeline;

use crate::error::AppError;
use crate::identity::Actor;
use crate::registry::Resource;
use crate::response::Reply;
use crate::state::AppState;
use axum::body::Bytes;
use axum::http::Method;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Reply, AppError>> + Send>>;

pub type Handler = Arc<dyn Fn(AppState, Arc<Resource>, PipelineRequest) -> HandlerFuture + Send + Sync>;

/// Wrap an async fn into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(AppState, Arc<Resource>, PipelineRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, AppError>> + Send + 'static,
{
    Arc::new(move |state, resource, req| Box::pin(f(state, resource, req)))
}

/// Everything the pipeline reads from an inbound request.
#[derive(Clone, Debug)]
pub struct PipelineRequest {
    pub method: Method,
    /// `None` only on routes that do not require authentication.
    pub actor: Option<Actor>,
    pub trace_id: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl PipelineRequest {
    pub fn new(method: Method) -> Self {
        PipelineRequest {
            method,
            actor: None,
            trace_id: String::new(),
            params: HashMap::new(),
            query: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn actor(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = trace_id.into();
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// JSON body. A value that fails to serialize leaves the body empty, which the
    /// handlers reject as malformed input.
    pub fn json(self, body: &impl Serialize) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => self.body(bytes),
            Err(err) => {
                tracing::warn!(error = %err, "request body is not serializable");
                self.body(Bytes::new())
            }
        }
    }

    /// The authenticated caller.
    pub fn require_actor(&self) -> Result<&Actor, AppError> {
        self.actor.as_ref().ok_or(AppError::Unauthenticated)
    }

    pub fn expect_method(&self, method: Method) -> Result<(), AppError> {
        if self.method == method {
            Ok(())
        } else {
            Err(AppError::MethodNotAllowed(self.method.to_string()))
        }
    }

    /// Label used in log lines.
    pub fn actor_id(&self) -> &str {
        self.actor.as_ref().map(|a| a.id.as_str()).unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn json_body_is_serialized_or_left_empty() {
        let req = PipelineRequest::new(Method::POST).json(&serde_json::json!({"name": "Ada"}));
        assert_eq!(&req.body[..], br#"{"name":"Ada"}"#);

        let mut keyed = BTreeMap::new();
        keyed.insert((1, 2), "pair keys are not JSON");
        let req = PipelineRequest::new(Method::POST).json(&keyed);
        assert!(req.body.is_empty());
    }
}
