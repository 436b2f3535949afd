//! In-process store. One mutex guards all tables; a transaction holds it until commit or drop,
//! which serializes writers the way row locks would.

use super::{Filters, OrderBy, Pagination, Store, StoreTx};
use crate::error::StoreError;
use crate::model::{
    EntityId, Record, FIELD_CREATED_AT, FIELD_CREATED_BY, FIELD_DELETED_AT, FIELD_ID, FIELD_UPDATED_AT,
    FIELD_UPDATED_BY,
};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Debug, Default)]
struct Table {
    next_id: EntityId,
    rows: BTreeMap<EntityId, Record>,
}

#[derive(Clone, Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    failing: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write to `table` fail with [`StoreError::Unavailable`].
    pub async fn fail_writes_to(&self, table: &str) {
        self.state.lock().await.failing.insert(table.to_string());
    }

    /// Every row of a table, soft-deleted ones included, in id order.
    pub async fn all_rows(&self, table: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn now() -> Value {
    Value::String(chrono::Utc::now().to_rfc3339())
}

fn is_live(row: &Record) -> bool {
    row.get(FIELD_DELETED_AT).map(Value::is_null).unwrap_or(true)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn sort_rows(rows: &mut [Record], order: &[OrderBy]) {
    rows.sort_by(|a, b| {
        for o in order {
            let ord = compare(a.get(&o.field), b.get(&o.field));
            let ord = if o.descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

impl State {
    fn table(&self, name: &str) -> Result<&Table, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_for_write(&mut self, name: &str) -> Result<&mut Table, StoreError> {
        if self.failing.contains(name) {
            return Err(StoreError::Unavailable(format!("writes to {} are disabled", name)));
        }
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .tables
            .entry(table.to_string())
            .or_default();
        Ok(())
    }

    async fn find_one(&self, table: &str, filters: &Filters) -> Result<Option<Record>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .table(table)?
            .rows
            .values()
            .find(|r| is_live(r) && filters.matches(r))
            .cloned())
    }

    async fn find_many(
        &self,
        table: &str,
        filters: &Filters,
        pagination: &mut Pagination,
        order: &[OrderBy],
    ) -> Result<Vec<Record>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<Record> = state
            .table(table)?
            .rows
            .values()
            .filter(|r| is_live(r) && filters.matches(r))
            .cloned()
            .collect();
        pagination.total = rows.len() as u64;
        sort_rows(&mut rows, order);
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    /// Restored on drop unless the transaction committed.
    snapshot: Option<State>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn create(&mut self, table: &str, mut record: Record) -> Result<Record, StoreError> {
        let t = self.guard.table_for_write(table)?;
        t.next_id += 1;
        let id = t.next_id;
        let ts = now();
        record.insert(FIELD_ID.into(), Value::from(id));
        record.insert(FIELD_CREATED_AT.into(), ts.clone());
        record.insert(FIELD_UPDATED_AT.into(), ts);
        record.insert(FIELD_DELETED_AT.into(), Value::Null);
        for key in [FIELD_CREATED_BY, FIELD_UPDATED_BY] {
            record.entry(key).or_insert_with(|| Value::String(String::new()));
        }
        t.rows.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&mut self, table: &str, id: EntityId, mut record: Record) -> Result<Option<Record>, StoreError> {
        let t = self.guard.table_for_write(table)?;
        let Some(existing) = t.rows.get_mut(&id).filter(|r| is_live(r)) else {
            return Ok(None);
        };
        for key in [FIELD_ID, FIELD_CREATED_AT, FIELD_DELETED_AT, FIELD_CREATED_BY] {
            if let Some(v) = existing.get(key) {
                record.insert(key.to_string(), v.clone());
            }
        }
        if !record.contains_key(FIELD_UPDATED_BY) {
            if let Some(v) = existing.get(FIELD_UPDATED_BY) {
                record.insert(FIELD_UPDATED_BY.to_string(), v.clone());
            }
        }
        record.insert(FIELD_UPDATED_AT.into(), now());
        *existing = record.clone();
        Ok(Some(record))
    }

    async fn delete(&mut self, table: &str, id: EntityId) -> Result<Option<Record>, StoreError> {
        let t = self.guard.table_for_write(table)?;
        let Some(existing) = t.rows.get_mut(&id).filter(|r| is_live(r)) else {
            return Ok(None);
        };
        existing.insert(FIELD_DELETED_AT.into(), now());
        Ok(Some(existing.clone()))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    async fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.ensure_table("notes").await.unwrap();
        s
    }

    #[tokio::test]
    async fn create_assigns_system_fields() {
        let s = store().await;
        let mut tx = s.begin().await.unwrap();
        let row = tx
            .create("notes", rec(json!({"ID": 999, "text": "a", "CreatedByID": "u1"})))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row["ID"], json!(1));
        assert!(row["CreatedAt"].is_string());
        assert_eq!(row["CreatedByID"], json!("u1"));
        let found = s.find_one("notes", &Filters::new().eq("ID", 1)).await.unwrap();
        assert_eq!(found.unwrap()["text"], json!("a"));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let s = store().await;
        {
            let mut tx = s.begin().await.unwrap();
            tx.create("notes", rec(json!({"text": "gone"}))).await.unwrap();
        }
        assert!(s.all_rows("notes").await.is_empty());
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden() {
        let s = store().await;
        let mut tx = s.begin().await.unwrap();
        tx.create("notes", rec(json!({"text": "a"}))).await.unwrap();
        assert!(tx.delete("notes", 1).await.unwrap().is_some());
        assert!(tx.delete("notes", 1).await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert!(s.find_one("notes", &Filters::new().eq("ID", 1)).await.unwrap().is_none());
        assert_eq!(s.all_rows("notes").await.len(), 1);
    }

    #[tokio::test]
    async fn update_keeps_ownership_and_bumps_updater() {
        let s = store().await;
        let mut tx = s.begin().await.unwrap();
        tx.create("notes", rec(json!({"text": "a", "CreatedByID": "u1", "UpdatedByID": "u1"})))
            .await
            .unwrap();
        let row = tx
            .update("notes", 1, rec(json!({"text": "b", "CreatedByID": "x", "UpdatedByID": "u2"})))
            .await
            .unwrap()
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row["text"], json!("b"));
        assert_eq!(row["CreatedByID"], json!("u1"));
        assert_eq!(row["UpdatedByID"], json!("u2"));
    }

    #[tokio::test]
    async fn find_many_paginates_orders_and_counts() {
        let s = store().await;
        let mut tx = s.begin().await.unwrap();
        for i in 0..5 {
            tx.create("notes", rec(json!({"n": i, "owner": if i % 2 == 0 { "a" } else { "b" }})))
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let mut page = Pagination::new(1, 2);
        let rows = s
            .find_many("notes", &Filters::new(), &mut page, &[OrderBy::desc("ID")])
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(rows.iter().map(|r| r["ID"].clone()).collect::<Vec<_>>(), vec![json!(5), json!(4)]);

        let mut page = Pagination::new(2, 2);
        let rows = s
            .find_many("notes", &Filters::new().eq("owner", "a"), &mut page, &[OrderBy::asc("n")])
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], json!(4));
    }

    #[tokio::test]
    async fn failing_table_rejects_writes_and_unknown_table_errors() {
        let s = store().await;
        s.fail_writes_to("notes").await;
        let mut tx = s.begin().await.unwrap();
        assert!(matches!(
            tx.create("notes", Record::new()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            tx.create("other", Record::new()).await,
            Err(StoreError::UnknownTable(_))
        ));
    }
}
