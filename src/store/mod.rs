//! Persistence contract consumed by the CRUD pipeline, plus in-memory and PostgreSQL backends.
//!
//! Stores work on generic records keyed by wire field names. They own the system fields:
//! `ID`, `CreatedAt` and `UpdatedAt` are assigned on write, `delete` sets `DeletedAt`, and
//! soft-deleted rows are invisible to every lookup.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use crate::model::{EntityId, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Equality filters, ANDed together.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filters(pub Vec<(String, Value)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(field, value);
        self
    }

    pub fn push(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.push((field.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True when the record has every filtered field with an equal value.
    pub fn matches(&self, record: &Record) -> bool {
        self.iter().all(|(k, v)| record.get(k).map(|rv| loose_eq(rv, v)).unwrap_or(false))
    }
}

/// Numbers compare by value; a string filter matches a scalar field with the same text,
/// which is how query-string filters reach the store.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(n), Value::Number(m)) => n.as_f64() == m.as_f64(),
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => n.to_string() == *s,
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => x.to_string() == *s,
        _ => a == b,
    }
}

/// 1-indexed page request; `total` is filled in by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: u32, limit: u32) -> Self {
        Pagination {
            total: 0,
            page: page.max(1),
            limit,
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            descending: true,
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the table backing a resource if it does not exist.
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError>;

    async fn find_one(&self, table: &str, filters: &Filters) -> Result<Option<Record>, StoreError>;

    /// Rows matching `filters`, ordered, one page at a time. Sets `pagination.total`.
    async fn find_many(
        &self,
        table: &str,
        filters: &Filters,
        pagination: &mut Pagination,
        order: &[OrderBy],
    ) -> Result<Vec<Record>, StoreError>;

    /// Start a unit of work. Dropping it without `commit` discards its writes.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Insert; returns the stored row with system fields assigned.
    async fn create(&mut self, table: &str, record: Record) -> Result<Record, StoreError>;

    /// Replace the non-system fields and `UpdatedByID` of a live row.
    async fn update(&mut self, table: &str, id: EntityId, record: Record) -> Result<Option<Record>, StoreError>;

    /// Soft delete a live row.
    async fn delete(&mut self, table: &str, id: EntityId) -> Result<Option<Record>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
