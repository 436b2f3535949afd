//! Resource SDK: registry-driven REST resources with role permissions, field validation and
//! diff-based audit history.

pub mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod model;
pub mod permissions;
pub mod registry;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{ExtraRoute, HandlerOverrides, ResourceConfig, Settings, ValidationRule};
pub use error::{AppError, RegistryError, StoreError};
pub use handlers::{handler, Handler, PipelineRequest};
pub use identity::Actor;
pub use model::{EntityId, Model, Record, SystemData};
pub use permissions::{Operation, PermissionTable, Role};
pub use registry::{Registry, Resource, ResourceNames, RouteKind, RouteSpec};
pub use response::{error_body, Envelope, Reply};
pub use routes::{app, common_routes, common_routes_with_ready, resource_routes};
pub use service::{AuditAction, AuditLog, CrudService, HistoryEntry, ValidatorChain};
pub use state::AppState;
pub use store::{ensure_database_exists, Filters, MemoryStore, OrderBy, Pagination, PgStore, Store, StoreTx};
