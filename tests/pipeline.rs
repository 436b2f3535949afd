use axum::http::{Method, StatusCode};
use resource_sdk::service::HISTORY_TABLE;
use resource_sdk::{
    impl_model, Actor, AppError, AppState, CrudService, MemoryStore, Operation, PermissionTable, PipelineRequest,
    Registry, Reply, Resource, ResourceConfig, Role, Settings, SystemData, ValidationRule,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
struct Contact {
    #[serde(flatten)]
    system: SystemData,
    name: String,
    email: String,
    age: Option<i64>,
}
impl_model!(Contact);

struct Harness {
    state: AppState,
    store: Arc<MemoryStore>,
    contacts: Arc<Resource>,
}

async fn harness(settings: Settings) -> Harness {
    let mut registry = Registry::new("/api").unwrap();
    let required = ValidationRule {
        required: Some(true),
        ..Default::default()
    };
    let contacts = registry
        .register::<Contact>(
            ResourceConfig::new()
                .permissions(
                    PermissionTable::new()
                        .grant_all(Role::admin())
                        .grant(Role::visitor(), [Operation::Read, Operation::Create, Operation::Update]),
                )
                .rule("name", required.clone())
                .rule(
                    "email",
                    ValidationRule {
                        format: Some("email".into()),
                        ..required
                    },
                ),
        )
        .unwrap();
    let store = Arc::new(MemoryStore::new());
    registry.ensure_tables(store.as_ref()).await.unwrap();
    Harness {
        state: AppState::new(store.clone(), registry, settings),
        store,
        contacts,
    }
}

fn visitor(id: &str) -> Actor {
    Actor::new(id, format!("{}@example.com", id), vec![Role::visitor()])
}

fn admin() -> Actor {
    Actor::new("root", "root@example.com", vec![Role::admin()])
}

impl Harness {
    async fn create(&self, actor: Actor, body: Value) -> Result<Reply, AppError> {
        let req = PipelineRequest::new(Method::POST).actor(actor).json(&body);
        CrudService::create(&self.state, &self.contacts, &req).await
    }

    async fn update(&self, actor: Actor, id: i64, body: Value) -> Result<Reply, AppError> {
        let req = PipelineRequest::new(Method::PUT)
            .actor(actor)
            .param("id", id.to_string())
            .json(&body);
        CrudService::update(&self.state, &self.contacts, &req).await
    }

    async fn detail(&self, actor: Actor, id: i64) -> Result<Reply, AppError> {
        let req = PipelineRequest::new(Method::GET).actor(actor).param("id", id.to_string());
        CrudService::detail(&self.state, &self.contacts, &req).await
    }

    async fn history(&self, action: &str) -> Vec<Value> {
        self.store
            .all_rows(HISTORY_TABLE)
            .await
            .into_iter()
            .filter(|r| r["action"] == json!(action))
            .map(Value::Object)
            .collect()
    }
}

fn id_of(reply: &Reply) -> i64 {
    reply.data().unwrap()["ID"].as_i64().unwrap()
}

#[tokio::test]
async fn records_are_scoped_to_their_creator() {
    let h = harness(Settings::default()).await;
    let created = h
        .create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
        .await
        .unwrap();
    let id = id_of(&created);

    let err = h.detail(visitor("b"), id).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
    assert_eq!(err.to_string(), "Instance not found");

    let reply = h.detail(admin(), id).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.data().unwrap()["name"], json!("Ada"));

    let reply = h.detail(visitor("a"), id).await.unwrap();
    assert_eq!(reply.data().unwrap()["CreatedByID"], json!("a"));
}

#[tokio::test]
async fn create_ignores_client_supplied_system_fields() {
    let h = harness(Settings::default()).await;
    let reply = h
        .create(
            visitor("a"),
            json!({"ID": 999, "CreatedByID": "mallory", "name": "Ada", "email": "ada@example.com"}),
        )
        .await
        .unwrap();
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body.message, "Contact has been created");
    let data = reply.data().unwrap();
    assert_ne!(data["ID"], json!(999));
    assert_eq!(data["CreatedByID"], json!("a"));
    assert_eq!(data["UpdatedByID"], json!("a"));

    let entries = h.history("created").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["resourceId"], json!(data["ID"].to_string()));
    let detail: Value = serde_json::from_str(entries[0]["detail"].as_str().unwrap()).unwrap();
    assert_eq!(detail["name"], json!("Ada"));
}

#[tokio::test]
async fn validation_reports_every_failing_field() {
    let h = harness(Settings::default()).await;
    let err = h.create(visitor("a"), json!({"age": 3})).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.to_string(), "Validation failed");
    match err {
        AppError::Validation(result) => {
            assert_eq!(result.for_field("name").count(), 1);
            assert_eq!(result.for_field("email").count(), 1);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(h.store.all_rows("contacts").await.is_empty());
    assert!(h.store.all_rows(HISTORY_TABLE).await.is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_rejected() {
    let h = harness(Settings::default()).await;
    let req = PipelineRequest::new(Method::POST).actor(visitor("a")).body("{not json");
    let err = CrudService::create(&h.state, &h.contacts, &req).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let err = h.create(visitor("a"), json!([1, 2])).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);

    let err = h
        .create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com", "age": "old"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unchanged_update_writes_nothing() {
    let h = harness(Settings::default()).await;
    let id = id_of(
        &h.create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
            .await
            .unwrap(),
    );

    let reply = h.update(visitor("a"), id, json!({"name": "Ada"})).await.unwrap();
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.message.contains("up to date"));
    assert!(h.history("updated").await.is_empty());
}

#[tokio::test]
async fn update_records_only_changed_fields() {
    let h = harness(Settings::default()).await;
    let id = id_of(
        &h.create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
            .await
            .unwrap(),
    );

    let reply = h
        .update(visitor("a"), id, json!({"name": "Grace", "UpdatedByID": "mallory"}))
        .await
        .unwrap();
    assert_eq!(reply.body.message, "Contact has been updated");
    assert_eq!(reply.data().unwrap()["name"], json!("Grace"));
    assert_eq!(reply.data().unwrap()["UpdatedByID"], json!("a"));

    let entries = h.history("updated").await;
    assert_eq!(entries.len(), 1);
    let detail: Value = serde_json::from_str(entries[0]["detail"].as_str().unwrap()).unwrap();
    assert_eq!(detail, json!({"name": ["Ada", "Grace"]}));
}

#[tokio::test]
async fn concurrent_updates_write_one_entry_each() {
    let h = harness(Settings::default()).await;
    let id = id_of(
        &h.create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
            .await
            .unwrap(),
    );

    let (first, second) = tokio::join!(
        h.update(visitor("a"), id, json!({"name": "Grace"})),
        h.update(visitor("a"), id, json!({"email": "grace@example.com"})),
    );
    assert_eq!(first.unwrap().status, StatusCode::OK);
    assert_eq!(second.unwrap().status, StatusCode::OK);
    assert_eq!(h.history("updated").await.len(), 2);
}

#[tokio::test]
async fn delete_requires_the_delete_grant() {
    let h = harness(Settings::default()).await;
    let id = id_of(
        &h.create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
            .await
            .unwrap(),
    );
    let req = PipelineRequest::new(Method::DELETE)
        .actor(visitor("a"))
        .param("id", id.to_string());
    let err = CrudService::delete(&h.state, &h.contacts, &req).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(err.to_string(), "User is not allowed to delete this resource");

    let req = PipelineRequest::new(Method::DELETE).actor(admin()).param("id", id.to_string());
    let reply = CrudService::delete(&h.state, &h.contacts, &req).await.unwrap();
    assert_eq!(reply.body.message, "Contact has been deleted");
    assert!(!reply.data().unwrap()["DeletedAt"].is_null());

    let entries = h.history("deleted").await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["detail"], json!(""));
    assert_eq!(h.detail(admin(), id).await.unwrap_err().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_paginates_filters_and_scopes() {
    let h = harness(Settings::default()).await;
    for (owner, name) in [("a", "Ada"), ("a", "Grace"), ("a", "Linus"), ("b", "Barbara")] {
        h.create(visitor(owner), json!({"name": name, "email": "x@example.com"}))
            .await
            .unwrap();
    }

    let req = PipelineRequest::new(Method::GET).actor(visitor("a")).query("limit", "2");
    let reply = CrudService::list(&h.state, &h.contacts, &req).await.unwrap();
    assert_eq!(reply.body.message, "Contacts list");
    let pagination = reply.body.pagination.unwrap();
    assert_eq!((pagination.total, pagination.page, pagination.limit), (3, 1, 2));
    let names: Vec<&str> = reply.data().unwrap().as_array().unwrap().iter().map(|r| r["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["Linus", "Grace"]);

    let req = PipelineRequest::new(Method::GET)
        .actor(visitor("a"))
        .query("order", "name")
        .query("page", "2")
        .query("limit", "2");
    let reply = CrudService::list(&h.state, &h.contacts, &req).await.unwrap();
    let rows = reply.data().unwrap().as_array().unwrap().clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("Linus"));

    let req = PipelineRequest::new(Method::GET).actor(admin()).query("name", "Barbara");
    let reply = CrudService::list(&h.state, &h.contacts, &req).await.unwrap();
    assert_eq!(reply.body.pagination.unwrap().total, 1);

    let req = PipelineRequest::new(Method::GET)
        .actor(admin())
        .query("page", "zero")
        .query("limit", "0");
    let reply = CrudService::list(&h.state, &h.contacts, &req).await.unwrap();
    let pagination = reply.body.pagination.unwrap();
    assert_eq!((pagination.total, pagination.page, pagination.limit), (4, 1, 10));
    assert_eq!(reply.data().unwrap().as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn atomic_audit_failure_rolls_back_the_mutation() {
    let h = harness(Settings::default()).await;
    h.store.fail_writes_to(HISTORY_TABLE).await;
    let err = h
        .create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(matches!(err, AppError::AuditWrite(_)));
    assert!(h.store.all_rows("contacts").await.is_empty());
}

#[tokio::test]
async fn deferred_audit_failure_keeps_the_mutation_and_reports_it() {
    let h = harness(Settings {
        atomic_audit: false,
        ..Settings::default()
    })
    .await;
    h.store.fail_writes_to(HISTORY_TABLE).await;
    let err = h
        .create(visitor("a"), json!({"name": "Ada", "email": "ada@example.com"}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.to_string(), "Error writing audit entry");
    assert_eq!(h.store.all_rows("contacts").await.len(), 1);
}

#[tokio::test]
async fn wrong_method_and_missing_actor_are_rejected() {
    let h = harness(Settings::default()).await;
    let req = PipelineRequest::new(Method::GET).actor(visitor("a"));
    let err = CrudService::create(&h.state, &h.contacts, &req).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);

    let req = PipelineRequest::new(Method::GET).param("id", "1");
    let err = CrudService::detail(&h.state, &h.contacts, &req).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

    let req = PipelineRequest::new(Method::GET).actor(visitor("a")).param("id", "abc");
    let err = CrudService::detail(&h.state, &h.contacts, &req).await.unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
}
