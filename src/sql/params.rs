//! Typed query parameters and binding onto sqlx queries.

use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A value bound to a PostgreSQL statement. Each variant carries its own SQL type, so the
/// statement only needs casts where the column type differs (e.g. `$n::timestamptz`).
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Text(String),
    Json(Value),
}

impl SqlParam {
    /// Text form of a JSON scalar, matching what `->>` yields for the same value.
    pub fn text_of(v: &Value) -> Self {
        match v {
            Value::String(s) => SqlParam::Text(s.clone()),
            other => SqlParam::Text(other.to_string()),
        }
    }

    /// Integer for an id column; `None` when the value cannot be an id.
    pub fn int_of(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => n.as_i64().map(SqlParam::Int),
            Value::String(s) => s.trim().parse().ok().map(SqlParam::Int),
            _ => None,
        }
    }
}

impl From<i64> for SqlParam {
    fn from(n: i64) -> Self {
        SqlParam::Int(n)
    }
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Text(s.to_string())
    }
}

impl From<Value> for SqlParam {
    fn from(v: Value) -> Self {
        SqlParam::Json(v)
    }
}

pub fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for p in params {
        query = match p.clone() {
            SqlParam::Int(n) => query.bind(n),
            SqlParam::Text(s) => query.bind(s),
            SqlParam::Json(v) => query.bind(v),
        };
    }
    query
}
