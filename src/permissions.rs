//! Role -> allowed operations mapping.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// CRUD operation a role may be granted on a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role identifier carried by an actor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub const ADMIN: &'static str = "admin";
    pub const VISITOR: &'static str = "visitor";
    pub const SCHEDULER: &'static str = "scheduler";

    pub fn new(name: impl Into<String>) -> Self {
        Role(name.into())
    }

    pub fn admin() -> Self {
        Role::new(Self::ADMIN)
    }

    pub fn visitor() -> Self {
        Role::new(Self::VISITOR)
    }

    pub fn scheduler() -> Self {
        Role::new(Self::SCHEDULER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.0 == Self::ADMIN
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role::new(s)
    }
}

/// Maps roles to the operations they may perform. A role without an entry has no permissions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionTable {
    grants: HashMap<Role, HashSet<Operation>>,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add operations to a role, keeping any it already has.
    pub fn grant(mut self, role: impl Into<Role>, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.grants.entry(role.into()).or_default().extend(operations);
        self
    }

    /// Grant every CRUD operation to a role.
    pub fn grant_all(self, role: impl Into<Role>) -> Self {
        self.grant(role, Operation::ALL)
    }

    /// True when at least one of `roles` maps to a set containing `operation`.
    /// Unknown roles are ignored; an empty role set is never allowed.
    pub fn has_permission(&self, roles: &[Role], operation: Operation) -> bool {
        roles.iter().any(|role| {
            self.grants
                .get(role)
                .map(|ops| ops.contains(&operation))
                .unwrap_or(false)
        })
    }

    pub fn operations_for(&self, role: &Role) -> Option<&HashSet<Operation>> {
        self.grants.get(role)
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl From<HashMap<Role, Vec<Operation>>> for PermissionTable {
    fn from(map: HashMap<Role, Vec<Operation>>) -> Self {
        map.into_iter()
            .fold(PermissionTable::new(), |table, (role, ops)| table.grant(role, ops))
    }
}
