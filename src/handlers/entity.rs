//! Default resource handlers. Installed for every handler slot a resource does not override.

use crate::error::AppError;
use crate::handlers::PipelineRequest;
use crate::registry::Resource;
use crate::response::Reply;
use crate::service::CrudService;
use crate::state::AppState;
use axum::http::Method;
use std::sync::Arc;

pub async fn list(state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    CrudService::list(&state, &resource, &req).await
}

pub async fn detail(state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    CrudService::detail(&state, &resource, &req).await
}

pub async fn create(state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    CrudService::create(&state, &resource, &req).await
}

pub async fn update(state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    CrudService::update(&state, &resource, &req).await
}

pub async fn delete(state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    CrudService::delete(&state, &resource, &req).await
}

/// Field layout of the model. Public: no actor needed.
pub async fn schema(_state: AppState, resource: Arc<Resource>, req: PipelineRequest) -> Result<Reply, AppError> {
    req.expect_method(Method::GET)?;
    Ok(Reply::ok(resource.schema(), format!("Schema for {}", resource.name())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceConfig, Settings};
    use crate::identity::Actor;
    use crate::model::fixtures::Contact;
    use crate::permissions::{Operation, PermissionTable, Role};
    use crate::registry::Registry;
    use crate::store::MemoryStore;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn setup() -> (AppState, Arc<Resource>) {
        let mut registry = Registry::new("/api").unwrap();
        let resource = registry
            .register::<Contact>(ResourceConfig {
                permissions: PermissionTable::new()
                    .grant_all(Role::admin())
                    .grant(Role::visitor(), Operation::ALL),
                ..Default::default()
            })
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        registry.ensure_tables(store.as_ref()).await.unwrap();
        (AppState::new(store, registry, Settings::default()), resource)
    }

    fn visitor() -> Actor {
        Actor::new("u1", "u1@example.com", vec![Role::visitor()])
    }

    #[tokio::test]
    async fn schema_needs_no_actor() {
        let (state, resource) = setup().await;
        let reply = schema(state, resource, PipelineRequest::new(Method::GET)).await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body.message, "Schema for Contact");
        assert_eq!(reply.data().unwrap()["name"], json!("Contact"));
    }

    #[tokio::test]
    async fn create_then_detail() {
        let (state, resource) = setup().await;
        let req = PipelineRequest::new(Method::POST)
            .actor(visitor())
            .json(&json!({"name": "Ada", "email": "ada@example.com"}));
        let reply = create(state.clone(), resource.clone(), req).await.unwrap();
        assert_eq!(reply.status, StatusCode::CREATED);
        let id = reply.data().unwrap()["ID"].as_i64().unwrap();

        let req = PipelineRequest::new(Method::GET).actor(visitor()).param("id", id.to_string());
        let reply = detail(state, resource, req).await.unwrap();
        assert_eq!(reply.body.message, "Contact Detail");
        assert_eq!(reply.data().unwrap()["name"], json!("Ada"));
    }

    #[tokio::test]
    async fn list_without_actor_is_unauthenticated() {
        let (state, resource) = setup().await;
        let err = list(state, resource, PipelineRequest::new(Method::GET)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
