//! Mounts every registry route on an axum router and adapts requests into [`PipelineRequest`]s.

use crate::error::AppError;
use crate::extractors::trace::{self, TraceId};
use crate::handlers::{api, PipelineRequest};
use crate::identity::{self, Actor};
use crate::registry::{Resource, RouteSpec};
use crate::response::error_body;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Extension, Json, Router,
};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Router with the API index at the base path and one route per registered [`RouteSpec`].
pub fn resource_routes(state: AppState) -> Router {
    let base = state.registry.base_path();
    let index_path = if base.is_empty() { "/" } else { base };
    let mut router: Router<AppState> = Router::new().route(index_path, get(api::index));

    for (resource, route) in state.registry.routes() {
        let path = route.path.clone();
        let resource = resource.clone();
        let route = route.clone();
        router = router.route(
            &path,
            any(
                move |State(state): State<AppState>,
                      method: Method,
                      actor: Option<Extension<Actor>>,
                      trace: TraceId,
                      params: Option<Path<HashMap<String, String>>>,
                      Query(query): Query<HashMap<String, String>>,
                      body: Bytes| {
                    let resource = resource.clone();
                    let route = route.clone();
                    async move {
                        let req = PipelineRequest {
                            method,
                            actor: actor.map(|Extension(a)| a),
                            trace_id: trace.0,
                            params: params.map(|Path(p)| p).unwrap_or_default(),
                            query,
                            body,
                        };
                        dispatch(state, resource, &route, req).await
                    }
                },
            ),
        );
    }

    router
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(identity::trusted_headers))
        .layer(axum::middleware::from_fn(trace::propagate))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

async fn dispatch(state: AppState, resource: Arc<Resource>, route: &RouteSpec, req: PipelineRequest) -> Response {
    if !route.methods.contains(&req.method) {
        return AppError::MethodNotAllowed(req.method.to_string()).into_response();
    }
    if route.requires_auth && req.actor.is_none() {
        return AppError::Unauthenticated.into_response();
    }

    let trace_id = req.trace_id.clone();
    let actor = req.actor_id().to_string();
    match (route.handler)(state, resource.clone(), req).await {
        Ok(reply) => reply.into_response(),
        Err(err) => {
            if err.status().is_server_error() {
                tracing::error!(
                    route = %route.name,
                    resource = %resource.name(),
                    trace_id = %trace_id,
                    actor = %actor,
                    error = ?err,
                    "request failed"
                );
            } else {
                tracing::debug!(
                    route = %route.name,
                    resource = %resource.name(),
                    trace_id = %trace_id,
                    actor = %actor,
                    error = %err,
                    "request rejected"
                );
            }
            err.into_response()
        }
    }
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(error_body("Route not found"))).into_response()
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown");
    tracing::error!(panic = %detail, "handler panicked");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(error_body("Internal server error"))).into_response()
}
