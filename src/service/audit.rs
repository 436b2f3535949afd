//! Append-only audit trail. Every mutation in the CRUD pipeline writes one [`HistoryEntry`].

use crate::error::StoreError;
use crate::identity::Actor;
use crate::model::{record_id, to_record, Record, SystemData};
use crate::service::diff::ChangeMap;
use crate::store::StoreTx;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Table backing [`HistoryEntry`]; equal to the snake plural of its name.
pub const HISTORY_TABLE: &str = "history_entries";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    #[default]
    Created,
    Updated,
    Deleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::Deleted => "deleted",
        }
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub system: SystemData,
    pub action: AuditAction,
    pub user_id: String,
    /// Display label of the actor.
    pub username: String,
    pub resource_name: String,
    /// Empty when the object had no id.
    pub resource_id: String,
    /// RFC 3339 with nanoseconds.
    pub timestamp: String,
    /// Full object JSON on create, change map JSON on update, empty on delete.
    pub detail: String,
    /// Trace id of the originating request.
    pub request_id: String,
}
crate::impl_model!(HistoryEntry);

pub struct AuditLog;

impl AuditLog {
    /// Build an entry without persisting it.
    pub fn entry(
        action: AuditAction,
        actor: &Actor,
        resource_name: &str,
        object: &Record,
        diff: Option<&ChangeMap>,
        request_id: &str,
    ) -> Result<HistoryEntry, serde_json::Error> {
        let detail = match action {
            AuditAction::Created => serde_json::to_string(object)?,
            AuditAction::Updated => serde_json::to_string(&diff.cloned().unwrap_or_default())?,
            AuditAction::Deleted => String::new(),
        };
        Ok(HistoryEntry {
            system: SystemData {
                created_by_id: actor.id.clone(),
                updated_by_id: actor.id.clone(),
                ..Default::default()
            },
            action,
            user_id: actor.id.clone(),
            username: actor.label.clone(),
            resource_name: resource_name.to_string(),
            resource_id: record_id(object),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            detail,
            request_id: request_id.to_string(),
        })
    }

    /// Persist an entry inside `tx`. Returns the stored row.
    pub async fn write(tx: &mut dyn StoreTx, entry: &HistoryEntry) -> Result<Record, StoreError> {
        let record = to_record(entry)?;
        let stored = tx.create(HISTORY_TABLE, record).await?;
        tracing::debug!(
            action = entry.action.as_str(),
            resource = %entry.resource_name,
            resource_id = %entry.resource_id,
            trace_id = %entry.request_id,
            "audit entry written"
        );
        Ok(stored)
    }

    pub async fn record_create(
        tx: &mut dyn StoreTx,
        actor: &Actor,
        resource_name: &str,
        object: &Record,
        request_id: &str,
    ) -> Result<Record, StoreError> {
        let entry = Self::entry(AuditAction::Created, actor, resource_name, object, None, request_id)?;
        Self::write(tx, &entry).await
    }

    pub async fn record_update(
        tx: &mut dyn StoreTx,
        actor: &Actor,
        resource_name: &str,
        object: &Record,
        diff: &ChangeMap,
        request_id: &str,
    ) -> Result<Record, StoreError> {
        let entry = Self::entry(AuditAction::Updated, actor, resource_name, object, Some(diff), request_id)?;
        Self::write(tx, &entry).await
    }

    pub async fn record_delete(
        tx: &mut dyn StoreTx,
        actor: &Actor,
        resource_name: &str,
        object: &Record,
        request_id: &str,
    ) -> Result<Record, StoreError> {
        let entry = Self::entry(AuditAction::Deleted, actor, resource_name, object, None, request_id)?;
        Self::write(tx, &entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{pluralize, to_snake_case};
    use crate::model::Nameable;
    use crate::permissions::Role;
    use crate::store::{Filters, MemoryStore, Store};
    use chrono::DateTime;
    use serde_json::{json, Value};

    fn actor() -> Actor {
        Actor::new("u1", "ada@example.com", vec![Role::visitor()])
    }

    fn object() -> Record {
        json!({"ID": 12, "name": "Ada"}).as_object().cloned().unwrap()
    }

    #[test]
    fn table_name_matches_derived_name() {
        assert_eq!(HISTORY_TABLE, to_snake_case(&pluralize(HistoryEntry::NAME)));
    }

    #[test]
    fn create_detail_is_full_object() {
        let e = AuditLog::entry(AuditAction::Created, &actor(), "Contact", &object(), None, "t-1").unwrap();
        assert_eq!(e.resource_id, "12");
        assert_eq!(e.user_id, "u1");
        assert_eq!(e.username, "ada@example.com");
        assert_eq!(e.request_id, "t-1");
        let detail: Value = serde_json::from_str(&e.detail).unwrap();
        assert_eq!(detail, json!({"ID": 12, "name": "Ada"}));
        assert!(DateTime::parse_from_rfc3339(&e.timestamp).is_ok());
    }

    #[test]
    fn update_detail_is_diff_and_delete_detail_is_empty() {
        let diff = json!({"name": ["Ada", "Grace"]}).as_object().cloned().unwrap();
        let e = AuditLog::entry(AuditAction::Updated, &actor(), "Contact", &object(), Some(&diff), "t").unwrap();
        assert_eq!(serde_json::from_str::<Value>(&e.detail).unwrap(), json!({"name": ["Ada", "Grace"]}));

        let e = AuditLog::entry(AuditAction::Deleted, &actor(), "Contact", &object(), None, "t").unwrap();
        assert_eq!(e.detail, "");
    }

    #[test]
    fn missing_id_gives_empty_resource_id() {
        let e = AuditLog::entry(AuditAction::Created, &actor(), "Contact", &Record::new(), None, "t").unwrap();
        assert_eq!(e.resource_id, "");
    }

    #[test]
    fn wire_names_are_camel_case() {
        let e = AuditLog::entry(AuditAction::Deleted, &actor(), "Contact", &object(), None, "t").unwrap();
        let rec = to_record(&e).unwrap();
        for k in ["action", "userId", "username", "resourceName", "resourceId", "timestamp", "detail", "requestId", "ID"] {
            assert!(rec.contains_key(k), "missing {}", k);
        }
        assert_eq!(rec["action"], json!("deleted"));
    }

    #[tokio::test]
    async fn write_persists_inside_the_transaction() {
        let store = MemoryStore::new();
        store.ensure_table(HISTORY_TABLE).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        let row = AuditLog::record_create(tx.as_mut(), &actor(), "Contact", &object(), "t")
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(row["resourceName"], json!("Contact"));
        assert_eq!(row["CreatedByID"], json!("u1"));
        let found = store
            .find_one(HISTORY_TABLE, &Filters::new().eq("resourceId", "12"))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let store = MemoryStore::new();
        store.ensure_table(HISTORY_TABLE).await.unwrap();
        store.fail_writes_to(HISTORY_TABLE).await;
        let mut tx = store.begin().await.unwrap();
        let res = AuditLog::record_delete(tx.as_mut(), &actor(), "Contact", &object(), "t").await;
        assert!(res.is_err());
    }
}
