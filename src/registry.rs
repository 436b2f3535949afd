//! Resource registry: turns model types into [`Resource`] descriptors with routes, permissions,
//! validators and handlers. Built once at startup, then shared read-only behind an `Arc`.

use crate::case::{is_pascal_case, pluralize, to_kebab_case, to_snake_case};
use crate::config::{HandlerOverrides, ResourceConfig};
use crate::error::{RegistryError, StoreError};
use crate::handlers::{entity, handler, timeline, Handler};
use crate::identity::Actor;
use crate::model::{self, Model, Nameable, Record, FIELD_CREATED_BY};
use crate::permissions::{Operation, PermissionTable, Role};
use crate::service::audit::HistoryEntry;
use crate::service::validation::{ValidationResult, ValidatorChain};
use crate::store::{Filters, Store};
use axum::http::Method;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Name forms derived from a PascalCase singular.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResourceNames {
    #[serde(rename = "name")]
    pub singular: String,
    #[serde(rename = "pluralName")]
    pub plural: String,
    #[serde(rename = "snakeName")]
    pub snake: String,
    #[serde(rename = "snakePluralName")]
    pub snake_plural: String,
    #[serde(rename = "kebabName")]
    pub kebab: String,
    #[serde(rename = "kebabPluralName")]
    pub kebab_plural: String,
}

impl ResourceNames {
    pub fn derive(singular: &str) -> Self {
        let plural = pluralize(singular);
        ResourceNames {
            singular: singular.to_string(),
            snake: to_snake_case(singular),
            kebab: to_kebab_case(singular),
            snake_plural: to_snake_case(&plural),
            kebab_plural: to_kebab_case(&plural),
            plural,
        }
    }

    /// Storage table name.
    pub fn table(&self) -> &str {
        &self.snake_plural
    }

    fn matches(&self, name: &str) -> bool {
        [&self.singular, &self.plural, &self.snake, &self.snake_plural, &self.kebab, &self.kebab_plural]
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteKind {
    List,
    Schema,
    Create,
    Update,
    Delete,
    Detail,
    Extra,
}

/// One mountable route: path (axum syntax, `:id`), verbs, auth gate and handler.
#[derive(Clone)]
pub struct RouteSpec {
    pub path: String,
    pub name: String,
    pub kind: RouteKind,
    pub methods: Vec<Method>,
    pub requires_auth: bool,
    pub handler: Handler,
}

impl fmt::Debug for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteSpec")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("methods", &self.methods)
            .field("requires_auth", &self.requires_auth)
            .finish()
    }
}

/// Type-erased operations on the registered model.
struct ModelOps {
    type_id: TypeId,
    normalize: fn(Record) -> Result<Record, serde_json::Error>,
}

/// Descriptor of a registered model. Immutable after registration.
pub struct Resource {
    pub names: ResourceNames,
    pub skip_owner_binding: bool,
    pub permissions: PermissionTable,
    pub validators: ValidatorChain,
    pub routes: Vec<RouteSpec>,
    field_keys: Vec<String>,
    default_record: Record,
    schema: Value,
    ops: ModelOps,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("names", &self.names)
            .field("skip_owner_binding", &self.skip_owner_binding)
            .field("permissions", &self.permissions)
            .field("validators", &self.validators)
            .field("routes", &self.routes)
            .finish()
    }
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.names.singular
    }

    pub fn table(&self) -> &str {
        self.names.table()
    }

    /// Serializable field keys, system fields included.
    pub fn field_keys(&self) -> &[String] {
        &self.field_keys
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.field_keys.iter().any(|k| k == key)
    }

    /// Record form of the model's default value; the base every create body is merged onto.
    pub fn default_record(&self) -> &Record {
        &self.default_record
    }

    /// Round-trip through the model type.
    pub fn normalize(&self, record: Record) -> Result<Record, serde_json::Error> {
        (self.ops.normalize)(record)
    }

    /// JSON Schema document with the model's field keys.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.ops.type_id == TypeId::of::<T>()
    }

    pub fn allows(&self, roles: &[Role], operation: Operation) -> bool {
        self.permissions.has_permission(roles, operation)
    }

    pub fn validate(&self, candidate: &Record) -> ValidationResult {
        self.validators.validate(candidate)
    }

    /// Ownership scope for `actor`: rows created by the actor, unless the resource opts out
    /// or the actor is an administrator.
    pub fn owner_filter(&self, actor: &Actor) -> Filters {
        let mut filters = Filters::new();
        if !(self.skip_owner_binding || actor.is_admin()) {
            filters.push(FIELD_CREATED_BY, actor.id.clone());
        }
        filters
    }

    pub fn route(&self, kind: RouteKind) -> Option<&RouteSpec> {
        self.routes.iter().find(|r| r.kind == kind)
    }
}

fn schema_of<T: Model>(field_keys: &[String]) -> Result<Value, serde_json::Error> {
    let mut components = Vec::new();
    <T as utoipa::ToSchema>::schemas(&mut components);
    let components: serde_json::Map<String, Value> = components
        .into_iter()
        .map(|(name, schema)| Ok((name, serde_json::to_value(schema)?)))
        .collect::<Result<_, serde_json::Error>>()?;
    Ok(serde_json::json!({
        "name": T::NAME,
        "schema": serde_json::to_value(<T as utoipa::PartialSchema>::schema())?,
        "components": components,
        "fields": field_keys,
    }))
}

fn resolve_handlers(overrides: HandlerOverrides) -> [(RouteKind, Handler); 6] {
    [
        (RouteKind::List, overrides.list.unwrap_or_else(|| handler(entity::list))),
        (RouteKind::Schema, overrides.schema.unwrap_or_else(|| handler(entity::schema))),
        (RouteKind::Create, overrides.create.unwrap_or_else(|| handler(entity::create))),
        (RouteKind::Update, overrides.update.unwrap_or_else(|| handler(entity::update))),
        (RouteKind::Delete, overrides.delete.unwrap_or_else(|| handler(entity::delete))),
        (RouteKind::Detail, overrides.detail.unwrap_or_else(|| handler(entity::detail))),
    ]
}

fn canonical_route(base: &str, names: &ResourceNames, kind: RouteKind, handler: Handler) -> RouteSpec {
    let root = format!("{}/{}", base, names.kebab_plural);
    let (path, suffix, method, requires_auth) = match kind {
        RouteKind::List => (root, "list", Method::GET, true),
        RouteKind::Schema => (format!("{}/schema", root), "schema", Method::GET, false),
        RouteKind::Create => (format!("{}/new", root), "new", Method::POST, true),
        RouteKind::Update => (format!("{}/:id/update", root), "update", Method::PUT, true),
        RouteKind::Delete => (format!("{}/:id/delete", root), "delete", Method::DELETE, true),
        RouteKind::Detail | RouteKind::Extra => (format!("{}/:id", root), "detail", Method::GET, true),
    };
    RouteSpec {
        path,
        name: format!("{}-{}", names.kebab, suffix),
        kind,
        methods: vec![method],
        requires_auth,
        handler,
    }
}

/// Paths mounted by `routes::common` next to the resource routes.
pub const RESERVED_PATHS: &[&str] = &["/health", "/ready", "/version"];

/// Name- and type-keyed table of resources.
pub struct Registry {
    base_path: String,
    resources: Vec<Arc<Resource>>,
    by_type: HashMap<TypeId, usize>,
    route_paths: HashSet<String>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("base_path", &self.base_path)
            .field("resources", &self.resources.iter().map(|r| r.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// New registry with the audit resource ([`HistoryEntry`]) and its timeline route installed.
    pub fn new(base_path: impl Into<String>) -> Result<Self, RegistryError> {
        let mut registry = Registry {
            base_path: base_path.into().trim_end_matches('/').to_string(),
            resources: Vec::new(),
            by_type: HashMap::new(),
            route_paths: HashSet::new(),
        };
        let index = if registry.base_path.is_empty() { "/".to_string() } else { registry.base_path.clone() };
        registry.route_paths.insert(index);
        registry.route_paths.extend(RESERVED_PATHS.iter().map(|p| p.to_string()));
        let timeline = crate::config::ExtraRoute {
            path: format!("{}/timeline", registry.base_path),
            name: "timeline".into(),
            methods: vec![Method::GET],
            requires_auth: true,
            handler: handler(timeline::timeline),
        };
        registry.register::<HistoryEntry>(
            ResourceConfig::new()
                .skip_owner_binding(true)
                .permissions(PermissionTable::new().grant(Role::admin(), [Operation::Read]))
                .route(timeline),
        )?;
        Ok(registry)
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Register a model type. Fails on a non-object model, a non-PascalCase name, a name or
    /// route already taken, or an invalid validation rule.
    pub fn register<T: Model>(&mut self, config: ResourceConfig) -> Result<Arc<Resource>, RegistryError> {
        let name = T::NAME;
        let invalid = |reason: String| RegistryError::InvalidModel {
            name: name.to_string(),
            reason,
        };
        if !is_pascal_case(name) {
            return Err(invalid("name must be PascalCase".into()));
        }
        let default_record = model::to_record(&T::default()).map_err(|e| invalid(e.to_string()))?;
        let field_keys: Vec<String> = default_record.keys().cloned().collect();
        let names = ResourceNames::derive(name);

        if self.by_type.contains_key(&TypeId::of::<T>())
            || self.resources.iter().any(|r| r.names.matches(&names.singular) || r.names.table() == names.table())
        {
            return Err(RegistryError::DuplicateRegistration(name.to_string()));
        }

        let mut validators = config.validators;
        let rules = ValidatorChain::from_rules(config.rules.iter()).map_err(|source| {
            let field = config
                .rules
                .iter()
                .find(|(_, rule)| rule.compile().is_err())
                .map(|(f, _)| f.clone())
                .unwrap_or_default();
            RegistryError::InvalidRule { field, source }
        })?;
        validators.extend(rules);

        let mut routes: Vec<RouteSpec> = resolve_handlers(config.handlers)
            .into_iter()
            .map(|(kind, h)| canonical_route(&self.base_path, &names, kind, h))
            .collect();
        routes.extend(config.routes.into_iter().map(|extra| RouteSpec {
            path: extra.path,
            name: extra.name,
            kind: RouteKind::Extra,
            methods: extra.methods,
            requires_auth: extra.requires_auth,
            handler: extra.handler,
        }));

        let mut seen = HashSet::new();
        for route in &routes {
            if self.route_paths.contains(&route.path) || !seen.insert(route.path.clone()) {
                return Err(RegistryError::DuplicateRoute(route.path.clone()));
            }
        }

        let schema = schema_of::<T>(&field_keys).map_err(|e| invalid(e.to_string()))?;
        let resource = Arc::new(Resource {
            names,
            skip_owner_binding: config.skip_owner_binding,
            permissions: config.permissions,
            validators,
            routes,
            field_keys,
            default_record,
            schema,
            ops: ModelOps {
                type_id: TypeId::of::<T>(),
                normalize: model::normalize::<T>,
            },
        });

        self.route_paths.extend(seen);
        self.by_type.insert(TypeId::of::<T>(), self.resources.len());
        self.resources.push(resource.clone());
        tracing::debug!(resource = %name, routes = resource.routes.len(), "resource registered");
        Ok(resource)
    }

    /// Resource registered for `T`.
    pub fn resolve<T: Model>(&self) -> Result<Arc<Resource>, RegistryError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|&i| self.resources.get(i))
            .cloned()
            .ok_or_else(|| RegistryError::ResourceNotFound(T::NAME.to_string()))
    }

    /// Resource by any of its name forms, case-insensitively.
    pub fn resolve_by_name(&self, name: &str) -> Result<Arc<Resource>, RegistryError> {
        self.resources
            .iter()
            .find(|r| r.names.matches(name))
            .cloned()
            .ok_or_else(|| RegistryError::ResourceNotFound(name.to_string()))
    }

    /// Resources in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.iter()
    }

    /// Every route of every resource, paired with its owner.
    pub fn routes(&self) -> impl Iterator<Item = (&Arc<Resource>, &RouteSpec)> {
        self.resources.iter().flat_map(|r| r.routes.iter().map(move |route| (r, route)))
    }

    /// Create the backing table of every registered resource.
    pub async fn ensure_tables(&self, store: &dyn Store) -> Result<(), StoreError> {
        for resource in &self.resources {
            store.ensure_table(resource.table()).await?;
        }
        Ok(())
    }
}
