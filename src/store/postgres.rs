//! PostgreSQL backend. One table per resource, system columns plus a JSONB `data` column.

use super::{Filters, OrderBy, Pagination, Store, StoreTx};
use crate::config::Settings;
use crate::error::StoreError;
use crate::model::{
    EntityId, Record, FIELD_CREATED_AT, FIELD_CREATED_BY, FIELD_DELETED_AT, FIELD_ID, FIELD_UPDATED_AT,
    FIELD_UPDATED_BY,
};
use crate::sql::{self, bind_params, QueryBuf};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Row, Transaction};
use std::str::FromStr;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        PgStore {
            pool,
            schema: schema.into(),
        }
    }

    /// Create the database if needed, then open a pool. `settings.database_url` must be set.
    pub async fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let url = settings
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".into()))?;
        ensure_database_exists(url).await?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.db_max_connections)
            .connect(url)
            .await?;
        Ok(PgStore::new(pool, settings.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn timestamp(row: &PgRow, col: &str) -> Result<Value, sqlx::Error> {
    let v: Option<DateTime<Utc>> = row.try_get(col)?;
    Ok(v.map(|d| Value::String(d.to_rfc3339())).unwrap_or(Value::Null))
}

/// Decode a row laid out as [`sql::RETURNING`] into a wire-named record.
fn row_to_record(row: &PgRow) -> Result<Record, StoreError> {
    let mut record = match row.try_get::<Value, _>("data")? {
        Value::Object(map) => map,
        _ => Record::new(),
    };
    let id: i64 = row.try_get("id")?;
    let created_by: String = row.try_get("created_by_id")?;
    let updated_by: String = row.try_get("updated_by_id")?;
    record.insert(FIELD_ID.into(), Value::from(id));
    record.insert(FIELD_CREATED_BY.into(), Value::String(created_by));
    record.insert(FIELD_UPDATED_BY.into(), Value::String(updated_by));
    record.insert(FIELD_CREATED_AT.into(), timestamp(row, "created_at")?);
    record.insert(FIELD_UPDATED_AT.into(), timestamp(row, "updated_at")?);
    record.insert(FIELD_DELETED_AT.into(), timestamp(row, "deleted_at")?);
    Ok(record)
}

async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Record>, StoreError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bind_params(sqlx::query(&q.sql), &q.params)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(row_to_record).transpose()
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").fetch_optional(&self.pool).await?;
        Ok(())
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        for ddl in sql::create_table(&self.schema, table) {
            sqlx::query(&ddl).execute(&self.pool).await?;
        }
        tracing::debug!(schema = %self.schema, table = %table, "table ensured");
        Ok(())
    }

    async fn find_one(&self, table: &str, filters: &Filters) -> Result<Option<Record>, StoreError> {
        let q = sql::select_one(&self.schema, table, filters);
        let mut conn = self.pool.acquire().await?;
        fetch_optional(&mut *conn, &q).await
    }

    async fn find_many(
        &self,
        table: &str,
        filters: &Filters,
        pagination: &mut Pagination,
        order: &[OrderBy],
    ) -> Result<Vec<Record>, StoreError> {
        let c = sql::count(&self.schema, table, filters);
        tracing::debug!(sql = %c.sql, params = ?c.params, "query");
        let total: i64 = bind_params(sqlx::query(&c.sql), &c.params)
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;
        pagination.total = u64::try_from(total).unwrap_or(0);

        let q = sql::select_page(&self.schema, table, filters, pagination, order);
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let rows = bind_params(sqlx::query(&q.sql), &q.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx {
            tx,
            schema: self.schema.clone(),
        }))
    }
}

/// Rolled back by sqlx when dropped without commit.
struct PgTx {
    tx: Transaction<'static, Postgres>,
    schema: String,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn create(&mut self, table: &str, record: Record) -> Result<Record, StoreError> {
        let q = sql::insert(&self.schema, table, &record);
        fetch_optional(&mut *self.tx, &q)
            .await?
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))
    }

    async fn update(&mut self, table: &str, id: EntityId, record: Record) -> Result<Option<Record>, StoreError> {
        let q = sql::update(&self.schema, table, id, &record);
        fetch_optional(&mut *self.tx, &q).await
    }

    async fn delete(&mut self, table: &str, id: EntityId) -> Result<Option<Record>, StoreError> {
        let q = sql::soft_delete(&self.schema, table, id);
        fetch_optional(&mut *self.tx, &q).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before creating the main pool.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Unavailable("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_database_name_and_admin_url() {
        let (admin, db) = parse_db_name_from_url("postgres://u:p@localhost:5432/app?sslmode=disable").unwrap();
        assert_eq!(admin, "postgres://u:p@localhost:5432/postgres");
        assert_eq!(db, "app");
        assert!(parse_db_name_from_url("nothing").is_err());
    }
}
