//! Registration-time configuration for a resource.

use crate::handlers::Handler;
use crate::permissions::PermissionTable;
use crate::service::validation::{self, Validator, ValidatorChain};
use axum::http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Declarative per-field rules; compiled into validators at registration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

impl ValidationRule {
    /// Validators for this rule, `required` first. Unknown formats are ignored.
    pub fn compile(&self) -> Result<Vec<Validator>, regex::Error> {
        let mut out: Vec<Validator> = Vec::new();
        if self.required == Some(true) {
            out.push(Arc::new(validation::required));
        }
        match self.format.as_deref().map(str::to_lowercase).as_deref() {
            Some("email") => out.push(Arc::new(validation::email)),
            Some("uuid") => out.push(Arc::new(validation::uuid)),
            _ => {}
        }
        if let Some(max) = self.max_length {
            out.push(Arc::new(validation::max_length(max as usize)));
        }
        if let Some(min) = self.min_length {
            out.push(Arc::new(validation::min_length(min as usize)));
        }
        if let Some(ref p) = self.pattern {
            out.push(Arc::new(validation::pattern(Regex::new(p)?)));
        }
        if let Some(ref allowed) = self.allowed {
            out.push(Arc::new(validation::one_of(allowed.clone())));
        }
        if let Some(min) = self.minimum {
            out.push(Arc::new(validation::minimum(min)));
        }
        if let Some(max) = self.maximum {
            out.push(Arc::new(validation::maximum(max)));
        }
        Ok(out)
    }
}

/// Replacement handlers for individual operations; unset slots use the defaults.
#[derive(Clone, Default)]
pub struct HandlerOverrides {
    pub list: Option<Handler>,
    pub detail: Option<Handler>,
    pub create: Option<Handler>,
    pub update: Option<Handler>,
    pub delete: Option<Handler>,
    pub schema: Option<Handler>,
}

/// Additional route mounted alongside a resource's canonical routes.
#[derive(Clone)]
pub struct ExtraRoute {
    /// Absolute path, e.g. `/api/timeline`. Path parameters use `:name`.
    pub path: String,
    pub name: String,
    pub methods: Vec<Method>,
    pub requires_auth: bool,
    pub handler: Handler,
}

/// Everything a caller supplies when registering a model.
#[derive(Clone, Default)]
pub struct ResourceConfig {
    /// When true, rows are not scoped to their creator (e.g. system-wide logs).
    pub skip_owner_binding: bool,
    pub permissions: PermissionTable,
    pub validators: ValidatorChain,
    /// Declarative rules, merged after `validators`.
    pub rules: HashMap<String, ValidationRule>,
    pub handlers: HandlerOverrides,
    pub routes: Vec<ExtraRoute>,
}

impl ResourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_owner_binding(mut self, skip: bool) -> Self {
        self.skip_owner_binding = skip;
        self
    }

    pub fn permissions(mut self, permissions: PermissionTable) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn validators(mut self, validators: ValidatorChain) -> Self {
        self.validators = validators;
        self
    }

    pub fn rule(mut self, field: impl Into<String>, rule: ValidationRule) -> Self {
        self.rules.insert(field.into(), rule);
        self
    }

    pub fn handlers(mut self, handlers: HandlerOverrides) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn route(mut self, route: ExtraRoute) -> Self {
        self.routes.push(route);
        self
    }
}
