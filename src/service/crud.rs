//! Generic CRUD pipeline: method check, permission check, ownership scope, body parsing,
//! validation, persistence, diff and audit. Every failure short-circuits into an [`AppError`].

use crate::config::Settings;
use crate::error::{AppError, StoreError};
use crate::handlers::PipelineRequest;
use crate::identity::Actor;
use crate::model::{strip_restricted, EntityId, Record, FIELD_CREATED_BY, FIELD_ID, FIELD_UPDATED_BY};
use crate::permissions::Operation;
use crate::registry::Resource;
use crate::response::Reply;
use crate::service::audit::AuditLog;
use crate::service::diff::{diff_records, ChangeMap};
use crate::state::AppState;
use crate::store::{Filters, OrderBy, Pagination, StoreTx};
use axum::body::Bytes;
use axum::http::Method;
use serde_json::Value;
use std::collections::HashMap;

const PAGE_PARAM: &str = "page";
const LIMIT_PARAM: &str = "limit";
const ORDER_PARAM: &str = "order";

/// Parsed list query: page, ordering and equality filters on model fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub pagination: Pagination,
    pub order: Vec<OrderBy>,
    pub filters: Filters,
}

impl ListQuery {
    /// `page` defaults to 1 and `limit` to the configured default, capped at the maximum; values
    /// that are not positive integers also fall back to those defaults. Unknown order fields fall
    /// back to the default order (`ID` descending). Remaining parameters that name a field of the
    /// resource become equality filters.
    pub fn parse(query: &HashMap<String, String>, resource: &Resource, settings: &Settings) -> Self {
        let page = parse_positive(query, PAGE_PARAM).unwrap_or(1);
        let limit = parse_positive(query, LIMIT_PARAM)
            .unwrap_or(settings.default_page_limit)
            .min(settings.max_page_limit);

        let mut order = Vec::new();
        if let Some(raw) = query.get(ORDER_PARAM).filter(|s| !s.trim().is_empty()) {
            for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (field, descending) = match part.strip_prefix('-') {
                    Some(f) => (f, true),
                    None => (part, false),
                };
                if !resource.has_field(field) {
                    tracing::warn!(resource = %resource.name(), field = %field, "unknown order field, using default order");
                    order.clear();
                    break;
                }
                order.push(OrderBy {
                    field: field.to_string(),
                    descending,
                });
            }
        }
        if order.is_empty() {
            order.push(OrderBy::desc(FIELD_ID));
        }

        let mut keys: Vec<&String> = query
            .keys()
            .filter(|k| !matches!(k.as_str(), PAGE_PARAM | LIMIT_PARAM | ORDER_PARAM))
            .filter(|k| resource.has_field(k))
            .collect();
        keys.sort();
        let mut filters = Filters::new();
        for k in keys {
            filters.push(k.clone(), Value::String(query[k].clone()));
        }

        ListQuery {
            pagination: Pagination::new(page, limit),
            order,
            filters,
        }
    }
}

fn parse_positive(query: &HashMap<String, String>, key: &str) -> Option<u32> {
    let raw = query.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())?;
    match raw.parse::<u32>() {
        Ok(n) if n >= 1 => Some(n),
        _ => {
            tracing::debug!(param = key, value = %raw, "invalid paging parameter, using default");
            None
        }
    }
}

/// Fail with 403 unless one of the actor's roles grants `operation`.
pub fn require_permission(resource: &Resource, actor: &Actor, operation: Operation) -> Result<(), AppError> {
    if resource.allows(&actor.roles, operation) {
        return Ok(());
    }
    tracing::warn!(
        resource = %resource.name(),
        actor = %actor.id,
        operation = operation.as_str(),
        "permission denied"
    );
    Err(AppError::PermissionDenied(format!(
        "User is not allowed to {} this resource",
        operation.as_str()
    )))
}

/// Path id as a storage id.
pub fn parse_id(req: &PipelineRequest) -> Result<EntityId, AppError> {
    req.params
        .get("id")
        .and_then(|s| s.trim().parse::<EntityId>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::MalformedInput("Invalid id".into()))
}

/// Request body as a JSON object.
pub fn parse_body(body: &Bytes) -> Result<Record, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::MalformedInput(format!("Invalid request body: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::MalformedInput("Request body must be a JSON object".into())),
    }
}

fn normalize(resource: &Resource, candidate: Record) -> Result<Record, AppError> {
    resource
        .normalize(candidate)
        .map_err(|e| AppError::MalformedInput(format!("Invalid request body: {}", e)))
}

fn validate(resource: &Resource, candidate: &Record) -> Result<(), AppError> {
    let result = resource.validate(candidate);
    if result.is_empty() {
        Ok(())
    } else {
        tracing::debug!(resource = %resource.name(), errors = %result, "validation failed");
        Err(AppError::Validation(result))
    }
}

/// The mutation an audit entry describes.
enum Mutation<'a> {
    Created,
    Updated(&'a ChangeMap),
    Deleted,
}

async fn write_audit(
    tx: &mut dyn StoreTx,
    actor: &Actor,
    resource: &Resource,
    row: &Record,
    mutation: &Mutation<'_>,
    trace_id: &str,
) -> Result<Record, StoreError> {
    match mutation {
        Mutation::Created => AuditLog::record_create(tx, actor, resource.name(), row, trace_id).await,
        Mutation::Updated(diff) => AuditLog::record_update(tx, actor, resource.name(), row, diff, trace_id).await,
        Mutation::Deleted => AuditLog::record_delete(tx, actor, resource.name(), row, trace_id).await,
    }
}

fn audit_failed(resource: &Resource, trace_id: &str, err: StoreError) -> AppError {
    tracing::error!(resource = %resource.name(), trace_id = %trace_id, error = %err, "audit write failed");
    AppError::AuditWrite(err)
}

/// Record the audit entry and commit. With atomic audit the entry shares the mutation's
/// transaction, so a failed entry rolls the mutation back. Otherwise the mutation commits first
/// and the entry is written in its own transaction; a failure there is still reported.
async fn commit_with_audit(
    state: &AppState,
    resource: &Resource,
    mut tx: Box<dyn StoreTx>,
    actor: &Actor,
    row: &Record,
    mutation: Mutation<'_>,
    trace_id: &str,
) -> Result<(), AppError> {
    if state.settings.atomic_audit {
        write_audit(tx.as_mut(), actor, resource, row, &mutation, trace_id)
            .await
            .map_err(|e| audit_failed(resource, trace_id, e))?;
        tx.commit()
            .await
            .map_err(AppError::storage("Error committing transaction"))?;
        return Ok(());
    }

    tx.commit()
        .await
        .map_err(AppError::storage("Error committing transaction"))?;
    let mut audit_tx = state
        .store
        .begin()
        .await
        .map_err(|e| audit_failed(resource, trace_id, e))?;
    write_audit(audit_tx.as_mut(), actor, resource, row, &mutation, trace_id)
        .await
        .map_err(|e| audit_failed(resource, trace_id, e))?;
    audit_tx
        .commit()
        .await
        .map_err(|e| audit_failed(resource, trace_id, e))
}

/// Row `id` within the actor's ownership scope, or 404.
async fn find_owned(
    state: &AppState,
    resource: &Resource,
    actor: &Actor,
    id: EntityId,
) -> Result<Record, AppError> {
    let mut filters = resource.owner_filter(actor);
    filters.push(FIELD_ID, id);
    state
        .store
        .find_one(resource.table(), &filters)
        .await
        .map_err(AppError::storage("Error finding instance"))?
        .ok_or(AppError::NotFound)
}

pub struct CrudService;

impl CrudService {
    pub async fn list(state: &AppState, resource: &Resource, req: &PipelineRequest) -> Result<Reply, AppError> {
        req.expect_method(Method::GET)?;
        let actor = req.require_actor()?;
        require_permission(resource, actor, Operation::Read)?;

        let mut query = ListQuery::parse(&req.query, resource, &state.settings);
        for (k, v) in resource.owner_filter(actor).0 {
            query.filters.push(k, v);
        }
        let rows = state
            .store
            .find_many(resource.table(), &query.filters, &mut query.pagination, &query.order)
            .await
            .map_err(AppError::storage("Error finding instances"))?;

        tracing::debug!(
            resource = %resource.name(),
            trace_id = %req.trace_id,
            actor = %actor.id,
            count = rows.len(),
            total = query.pagination.total,
            "list"
        );
        Ok(Reply::paginated(
            rows,
            format!("{} list", resource.names.plural),
            query.pagination,
        ))
    }

    pub async fn detail(state: &AppState, resource: &Resource, req: &PipelineRequest) -> Result<Reply, AppError> {
        req.expect_method(Method::GET)?;
        let actor = req.require_actor()?;
        require_permission(resource, actor, Operation::Read)?;
        let id = parse_id(req)?;

        let row = find_owned(state, resource, actor, id).await?;
        Ok(Reply::ok(row, format!("{} Detail", resource.name())))
    }

    pub async fn create(state: &AppState, resource: &Resource, req: &PipelineRequest) -> Result<Reply, AppError> {
        req.expect_method(Method::POST)?;
        let actor = req.require_actor()?;
        require_permission(resource, actor, Operation::Create)?;

        let mut body = parse_body(&req.body)?;
        strip_restricted(&mut body);
        let mut candidate = resource.default_record().clone();
        candidate.extend(body);
        candidate.insert(FIELD_CREATED_BY.into(), Value::String(actor.id.clone()));
        candidate.insert(FIELD_UPDATED_BY.into(), Value::String(actor.id.clone()));
        let candidate = normalize(resource, candidate)?;
        validate(resource, &candidate)?;

        let mut tx = state
            .store
            .begin()
            .await
            .map_err(AppError::storage("Error creating instance"))?;
        let created = tx
            .create(resource.table(), candidate)
            .await
            .map_err(AppError::storage("Error creating instance"))?;
        commit_with_audit(state, resource, tx, actor, &created, Mutation::Created, &req.trace_id).await?;

        let id = created.get(FIELD_ID).cloned().unwrap_or(Value::Null);
        tracing::info!(
            resource = %resource.name(),
            trace_id = %req.trace_id,
            actor = %actor.id,
            id = %id,
            "created"
        );
        Ok(Reply::created(created, format!("{} has been created", resource.name())))
    }

    pub async fn update(state: &AppState, resource: &Resource, req: &PipelineRequest) -> Result<Reply, AppError> {
        req.expect_method(Method::PUT)?;
        let actor = req.require_actor()?;
        require_permission(resource, actor, Operation::Read)?;
        require_permission(resource, actor, Operation::Update)?;
        let id = parse_id(req)?;

        let previous = find_owned(state, resource, actor, id).await?;
        let mut body = parse_body(&req.body)?;
        strip_restricted(&mut body);
        let mut candidate = previous.clone();
        candidate.extend(body);
        let mut candidate = normalize(resource, candidate)?;
        validate(resource, &candidate)?;

        let before = resource
            .normalize(previous.clone())
            .map_err(|e| AppError::Internal(format!("stored {} does not match its model: {}", resource.name(), e)))?;
        let changes = diff_records(&before, &candidate);
        if changes.is_empty() {
            tracing::debug!(resource = %resource.name(), trace_id = %req.trace_id, id, "no changes");
            return Ok(Reply::ok(previous, format!("{} is up to date", resource.name())));
        }

        candidate.insert(FIELD_UPDATED_BY.into(), Value::String(actor.id.clone()));
        let mut tx = state
            .store
            .begin()
            .await
            .map_err(AppError::storage("Error updating instance"))?;
        let updated = tx
            .update(resource.table(), id, candidate)
            .await
            .map_err(AppError::storage("Error updating instance"))?
            .ok_or(AppError::NotFound)?;
        commit_with_audit(state, resource, tx, actor, &updated, Mutation::Updated(&changes), &req.trace_id).await?;

        tracing::info!(
            resource = %resource.name(),
            trace_id = %req.trace_id,
            actor = %actor.id,
            id,
            changed = changes.len(),
            "updated"
        );
        Ok(Reply::ok(updated, format!("{} has been updated", resource.name())))
    }

    pub async fn delete(state: &AppState, resource: &Resource, req: &PipelineRequest) -> Result<Reply, AppError> {
        req.expect_method(Method::DELETE)?;
        let actor = req.require_actor()?;
        require_permission(resource, actor, Operation::Read)?;
        require_permission(resource, actor, Operation::Delete)?;
        let id = parse_id(req)?;

        find_owned(state, resource, actor, id).await?;
        let mut tx = state
            .store
            .begin()
            .await
            .map_err(AppError::storage("Error deleting instance"))?;
        let deleted = tx
            .delete(resource.table(), id)
            .await
            .map_err(AppError::storage("Error deleting instance"))?
            .ok_or(AppError::NotFound)?;
        commit_with_audit(state, resource, tx, actor, &deleted, Mutation::Deleted, &req.trace_id).await?;

        tracing::info!(
            resource = %resource.name(),
            trace_id = %req.trace_id,
            actor = %actor.id,
            id,
            "deleted"
        );
        Ok(Reply::ok(deleted, format!("{} has been deleted", resource.name())))
    }
}
