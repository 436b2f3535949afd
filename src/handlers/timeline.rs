//! Audit timeline: history entries of one resource type, optionally narrowed to one object.

use crate::error::AppError;
use crate::handlers::PipelineRequest;
use crate::permissions::Operation;
use crate::registry::Resource;
use crate::response::Reply;
use crate::service::crud::{require_permission, ListQuery};
use crate::state::AppState;
use axum::http::Method;
use std::collections::HashMap;
use std::sync::Arc;

const RESOURCE_NAME_PARAM: &str = "resource_name";
const RESOURCE_ID_PARAM: &str = "resource_id";

/// `GET {base}/timeline?resource_name=&resource_id=`. `history` is the audit resource itself;
/// the caller needs read on it and on the queried resource.
pub async fn timeline(state: AppState, history: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    req.expect_method(Method::GET)?;
    let actor = req.require_actor()?;
    require_permission(&history, actor, Operation::Read)?;

    let name = req
        .query
        .get(RESOURCE_NAME_PARAM)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::MalformedInput("Resource Name is required".into()))?;
    let target = state
        .registry
        .resolve_by_name(name)
        .map_err(|_| AppError::ResourceNotFound(name.to_string()))?;
    require_permission(&target, actor, Operation::Read)?;

    let paging: HashMap<String, String> = req
        .query
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), RESOURCE_NAME_PARAM | RESOURCE_ID_PARAM))
        .filter(|(k, _)| !history.has_field(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let mut query = ListQuery::parse(&paging, &history, &state.settings);
    query.filters.push("resourceName", target.name());
    if let Some(id) = req.query.get(RESOURCE_ID_PARAM).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        query.filters.push("resourceId", id);
    }

    let rows = state
        .store
        .find_many(history.table(), &query.filters, &mut query.pagination, &query.order)
        .await
        .map_err(AppError::storage("Error finding history"))?;
    tracing::debug!(
        resource = %target.name(),
        trace_id = %req.trace_id,
        actor = %actor.id,
        total = query.pagination.total,
        "timeline"
    );
    Ok(Reply::paginated(rows, "resource timeline", query.pagination))
}
