//! Example server: registers two models, picks PostgreSQL when DATABASE_URL is set (in-memory
//! otherwise), ensures tables and serves the API.
//!
//! Identity comes from `X-User-Id`, `X-User-Label` and `X-User-Roles` headers, as set by an
//! authenticating proxy.

use resource_sdk::{
    app, impl_model, AppState, MemoryStore, Operation, PermissionTable, PgStore, Registry, ResourceConfig, Role,
    Settings, Store, SystemData, ValidationRule,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::ToSchema;

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
struct Contact {
    #[serde(flatten)]
    system: SystemData,
    name: String,
    email: String,
    phone: Option<String>,
}
impl_model!(Contact);

#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
#[serde(default)]
struct BlogPost {
    #[serde(flatten)]
    system: SystemData,
    title: String,
    body: String,
    status: String,
}
impl_model!(BlogPost);

fn registry(base_path: &str) -> Result<Registry, Box<dyn std::error::Error>> {
    let mut registry = Registry::new(base_path)?;
    registry.register::<Contact>(
        ResourceConfig::new()
            .permissions(
                PermissionTable::new()
                    .grant_all(Role::admin())
                    .grant(Role::visitor(), Operation::ALL),
            )
            .rule(
                "name",
                ValidationRule {
                    required: Some(true),
                    max_length: Some(120),
                    ..Default::default()
                },
            )
            .rule(
                "email",
                ValidationRule {
                    required: Some(true),
                    format: Some("email".into()),
                    ..Default::default()
                },
            ),
    )?;
    registry.register::<BlogPost>(
        ResourceConfig::new()
            .permissions(
                PermissionTable::new()
                    .grant_all(Role::admin())
                    .grant(Role::visitor(), [Operation::Read]),
            )
            .rule(
                "title",
                ValidationRule {
                    required: Some(true),
                    ..Default::default()
                },
            )
            .rule(
                "status",
                ValidationRule {
                    allowed: Some(vec!["draft".into(), "published".into()]),
                    ..Default::default()
                },
            ),
    )?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resource_sdk=info".parse()?))
        .init();

    let settings = Settings::load()?;
    let store: Arc<dyn Store> = if settings.database_url.is_some() {
        Arc::new(PgStore::connect(&settings).await?)
    } else {
        tracing::warn!("DATABASE_URL not set, using in-memory store");
        Arc::new(MemoryStore::new())
    };

    let registry = registry(&settings.api_base_path)?;
    registry.ensure_tables(store.as_ref()).await?;

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    let state = AppState::new(store, registry, settings);
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
