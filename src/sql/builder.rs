//! Builds parameterized statements for resource tables.
//!
//! Every resource table has the same layout: system columns plus one JSONB `data` column
//! holding the model's own fields. Identifiers come from the registry only; values and
//! JSON keys are always parameters.

use super::params::SqlParam;
use crate::model::{
    Record, FIELD_CREATED_AT, FIELD_CREATED_BY, FIELD_DELETED_AT, FIELD_ID, FIELD_UPDATED_AT, FIELD_UPDATED_BY,
};
use crate::store::{Filters, OrderBy, Pagination};
use chrono::DateTime;
use serde_json::Value;

/// Columns returned by every statement, in row-decoding order.
pub const RETURNING: &str =
    r#""id", "created_by_id", "updated_by_id", "created_at", "updated_at", "deleted_at", "data""#;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Int,
    Text,
    Timestamp,
}

enum Column<'a> {
    System(&'static str, Kind),
    Data(&'a str),
}

fn column_for(field: &str) -> Column<'_> {
    match field {
        FIELD_ID => Column::System("id", Kind::Int),
        FIELD_CREATED_BY => Column::System("created_by_id", Kind::Text),
        FIELD_UPDATED_BY => Column::System("updated_by_id", Kind::Text),
        FIELD_CREATED_AT => Column::System("created_at", Kind::Timestamp),
        FIELD_UPDATED_AT => Column::System("updated_at", Kind::Timestamp),
        FIELD_DELETED_AT => Column::System("deleted_at", Kind::Timestamp),
        other => Column::Data(other),
    }
}

/// True for wire names stored in dedicated columns rather than in `data`.
pub fn is_system_field(field: &str) -> bool {
    matches!(column_for(field), Column::System(..))
}

/// Quote identifier for PostgreSQL.
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl QueryBuf {
    fn push_param(&mut self, v: SqlParam) -> usize {
        self.params.push(v);
        self.params.len()
    }
}

/// DDL for one resource table: schema, table, owner index. Each statement is idempotent.
pub fn create_table(schema: &str, table: &str) -> Vec<String> {
    let q_table = qualified_table(schema, table);
    vec![
        format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema)),
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                "id" BIGSERIAL PRIMARY KEY,
                "created_by_id" TEXT NOT NULL DEFAULT '',
                "updated_by_id" TEXT NOT NULL DEFAULT '',
                "created_at" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                "updated_at" TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                "deleted_at" TIMESTAMPTZ,
                "data" JSONB NOT NULL DEFAULT '{{}}'
            )
            "#,
            q_table
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (\"created_by_id\")",
            quoted(&format!("{}_created_by_id_idx", table)),
            q_table
        ),
    ]
}

/// WHERE clause for live rows matching `filters`. Text comparison on data fields mirrors the
/// loose equality of [`Filters::matches`].
fn where_clause(q: &mut QueryBuf, filters: &Filters) -> String {
    let mut parts = vec![r#""deleted_at" IS NULL"#.to_string()];
    for (field, value) in filters.iter() {
        let part = match column_for(field) {
            Column::System(col, Kind::Int) => match SqlParam::int_of(value) {
                Some(p) => format!("{} = ${}", quoted(col), q.push_param(p)),
                None => "FALSE".to_string(),
            },
            Column::System(col, Kind::Text) => {
                format!("{} = ${}", quoted(col), q.push_param(SqlParam::text_of(value)))
            }
            Column::System(col, Kind::Timestamp) => match value {
                Value::Null => format!("{} IS NULL", quoted(col)),
                v => match timestamp_of(v) {
                    Some(ts) => format!("{} = ${}::timestamptz", quoted(col), q.push_param(SqlParam::Text(ts))),
                    None => "FALSE".to_string(),
                },
            },
            Column::Data(key) => {
                let k = q.push_param(SqlParam::from(key));
                match value {
                    Value::Null => format!(r#"("data" ->> ${}) IS NULL"#, k),
                    v => format!(r#"("data" ->> ${}) = ${}"#, k, q.push_param(SqlParam::text_of(v))),
                }
            }
        };
        parts.push(part);
    }
    format!(" WHERE {}", parts.join(" AND "))
}

/// RFC 3339 text of a timestamp filter value; anything else can never match.
fn timestamp_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|ts| ts.to_rfc3339())
}

fn order_clause(q: &mut QueryBuf, order: &[OrderBy]) -> String {
    let mut parts: Vec<String> = order
        .iter()
        .map(|o| {
            let expr = match column_for(&o.field) {
                Column::System(col, _) => quoted(col),
                Column::Data(key) => format!(r#"("data" -> ${})"#, q.push_param(SqlParam::from(key))),
            };
            format!("{} {}", expr, if o.descending { "DESC" } else { "ASC" })
        })
        .collect();
    if parts.is_empty() {
        parts.push(r#""id" DESC"#.to_string());
    }
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT the first live row matching `filters`.
pub fn select_one(schema: &str, table: &str, filters: &Filters) -> QueryBuf {
    let mut q = QueryBuf::default();
    let w = where_clause(&mut q, filters);
    q.sql = format!(
        "SELECT {} FROM {}{} ORDER BY \"id\" LIMIT 1",
        RETURNING,
        qualified_table(schema, table),
        w
    );
    q
}

/// SELECT one page of live rows.
pub fn select_page(
    schema: &str,
    table: &str,
    filters: &Filters,
    pagination: &Pagination,
    order: &[OrderBy],
) -> QueryBuf {
    let mut q = QueryBuf::default();
    let w = where_clause(&mut q, filters);
    let o = order_clause(&mut q, order);
    q.sql = format!(
        "SELECT {} FROM {}{}{} LIMIT {} OFFSET {}",
        RETURNING,
        qualified_table(schema, table),
        w,
        o,
        pagination.limit,
        pagination.offset()
    );
    q
}

pub fn count(schema: &str, table: &str, filters: &Filters) -> QueryBuf {
    let mut q = QueryBuf::default();
    let w = where_clause(&mut q, filters);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(schema, table), w);
    q
}

/// Model fields of a record, i.e. everything but the system fields.
pub fn data_of(record: &Record) -> Value {
    Value::Object(
        record
            .iter()
            .filter(|(k, _)| !is_system_field(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

fn owner_text(record: &Record, field: &str) -> SqlParam {
    match record.get(field) {
        Some(Value::String(s)) => SqlParam::Text(s.clone()),
        _ => SqlParam::Text(String::new()),
    }
}

/// INSERT a row; id and timestamps come from column defaults.
pub fn insert(schema: &str, table: &str, record: &Record) -> QueryBuf {
    let mut q = QueryBuf::default();
    let by = q.push_param(owner_text(record, FIELD_CREATED_BY));
    let upd = q.push_param(owner_text(record, FIELD_UPDATED_BY));
    let data = q.push_param(SqlParam::Json(data_of(record)));
    q.sql = format!(
        r#"INSERT INTO {} ("created_by_id", "updated_by_id", "data") VALUES (${}, ${}, ${}) RETURNING {}"#,
        qualified_table(schema, table),
        by,
        upd,
        data,
        RETURNING
    );
    q
}

/// UPDATE the model fields and updater of a live row; ownership and creation time never change.
pub fn update(schema: &str, table: &str, id: i64, record: &Record) -> QueryBuf {
    let mut q = QueryBuf::default();
    let data = q.push_param(SqlParam::Json(data_of(record)));
    let set_updater = match record.get(FIELD_UPDATED_BY) {
        Some(Value::String(s)) => {
            let n = q.push_param(SqlParam::Text(s.clone()));
            format!(r#", "updated_by_id" = ${}"#, n)
        }
        _ => String::new(),
    };
    let id_param = q.push_param(SqlParam::Int(id));
    q.sql = format!(
        r#"UPDATE {} SET "data" = ${}{}, "updated_at" = NOW() WHERE "id" = ${} AND "deleted_at" IS NULL RETURNING {}"#,
        qualified_table(schema, table),
        data,
        set_updater,
        id_param,
        RETURNING
    );
    q
}

/// Soft delete: stamp `deleted_at` on a live row.
pub fn soft_delete(schema: &str, table: &str, id: i64) -> QueryBuf {
    let mut q = QueryBuf::default();
    let id_param = q.push_param(SqlParam::Int(id));
    q.sql = format!(
        r#"UPDATE {} SET "deleted_at" = NOW() WHERE "id" = ${} AND "deleted_at" IS NULL RETURNING {}"#,
        qualified_table(schema, table),
        id_param,
        RETURNING
    );
    q
}
