// src/store/postgres.rs

use std::sync::RwLock;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;

use super::config::{StoreConfig, StoreKind};
use super::driver::StoreDriver;
use super::types::{Query, QueryOptions, Record, RecordStream, SortOrder, StoreError, StoreOp};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// PostgreSQL driver. Rows are returned as JSON objects via `row_to_json`.
pub struct PostgresStore {
    options: PgConnectOptions,
    max_connections: u32,
    pool: RwLock<Option<PgPool>>,
}

impl PostgresStore {
    pub fn new(config: &StoreConfig) -> Self {
        let mut options = PgConnectOptions::new()
            .host(config.host())
            .port(config.port_or_default(StoreKind::Postgres))
            .database(&config.name);
        if let Some(user) = &config.user {
            options = options.username(user);
        }
        if let Some(pass) = &config.pass {
            options = options.password(pass);
        }

        PostgresStore {
            options,
            max_connections: config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            pool: RwLock::new(None),
        }
    }

    fn pool(&self) -> Result<PgPool, StoreError> {
        self.pool
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| StoreError::NotConnected(StoreKind::Postgres.to_string()))
    }
}

/// Quotes a possibly schema-qualified identifier.
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Parameters travel as text; queries cast them where a type matters.
fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn append_options(sql: &mut String, options: &QueryOptions) {
    if !options.sort.is_empty() {
        let order = options
            .sort
            .iter()
            .map(|(field, dir)| {
                let dir = match dir {
                    SortOrder::Asc => "ASC",
                    SortOrder::Desc => "DESC",
                };
                format!("q.{} {dir}", quote_ident(field))
            })
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(" ORDER BY ");
        sql.push_str(&order);
    }
    if let Some(limit) = options.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = options.offset {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
}

/// Renders `query` into a statement yielding one JSON column per row.
fn render_select(query: &Query, options: &QueryOptions) -> (String, Vec<Option<String>>) {
    let (mut sql, params) = match query {
        Query::Sql { text, values } => (
            format!("SELECT row_to_json(q) FROM ({text}) AS q"),
            values.iter().map(param_text).collect(),
        ),
        Query::Find { collection, filter } => {
            let mut sql = format!("SELECT row_to_json(q) FROM {} AS q", quote_ident(collection));
            let mut params = Vec::new();
            let mut conditions = Vec::new();
            // sorted so the rendered text does not depend on map ordering
            let mut fields: Vec<_> = filter.iter().collect();
            fields.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (field, value) in fields {
                match param_text(value) {
                    None => conditions.push(format!("q.{} IS NULL", quote_ident(field))),
                    Some(text) => {
                        params.push(Some(text));
                        conditions.push(format!("q.{}::text = ${}", quote_ident(field), params.len()));
                    }
                }
            }
            if !conditions.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conditions.join(" AND "));
            }
            (sql, params)
        }
    };
    append_options(&mut sql, options);
    (sql, params)
}

/// Renders an insert (or upsert when `key` is given) of one JSON object.
fn render_write(table: &str, key: Option<&[String]>, record: &Record) -> Result<String, StoreError> {
    let fields = record
        .as_object()
        .filter(|fields| !fields.is_empty())
        .ok_or_else(|| StoreError::InvalidRecord("postgres writes require a non-empty object".to_string()))?;

    let table = quote_ident(table);
    let columns = fields
        .keys()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM json_populate_record(NULL::{table}, $1::json)"
    );

    if let Some(key) = key {
        if let Some(missing) = key.iter().find(|k| !fields.contains_key(k.as_str())) {
            return Err(StoreError::InvalidRecord(format!("missing key field '{missing}'")));
        }
        let conflict = key.iter().map(|k| quote_ident(k)).collect::<Vec<_>>().join(", ");
        let updates = fields
            .keys()
            .filter(|c| !key.contains(*c))
            .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
            .collect::<Vec<_>>();
        if updates.is_empty() {
            sql.push_str(&format!(" ON CONFLICT ({conflict}) DO NOTHING"));
        } else {
            sql.push_str(&format!(" ON CONFLICT ({conflict}) DO UPDATE SET {}", updates.join(", ")));
        }
    }
    Ok(sql)
}

#[async_trait]
impl StoreDriver for PostgresStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Postgres
    }

    async fn connect(&self) -> Result<(), StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(self.options.clone())
            .await
            .map_err(StoreError::connection)?;
        *self.pool.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(pool);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok(())
    }

    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<Vec<Record>, StoreError> {
        let pool = self.pool()?;
        let (sql, params) = render_select(query, options);

        let mut statement = sqlx::query_scalar::<Postgres, Json<Value>>(&sql);
        for param in params {
            statement = statement.bind(param);
        }
        let rows = statement.fetch_all(&pool).await?;
        Ok(rows.into_iter().map(|Json(record)| record).collect())
    }

    async fn stream(
        &self,
        query: &Query,
        options: &QueryOptions,
    ) -> Result<RecordStream, StoreError> {
        let pool = self.pool()?;
        let (sql, params) = render_select(query, options);

        let records = async_stream::stream! {
            let mut statement = sqlx::query_scalar::<Postgres, Json<Value>>(&sql);
            for param in params {
                statement = statement.bind(param);
            }
            let mut rows = statement.fetch(&pool);
            while let Some(row) = rows.next().await {
                let item: Result<Record, StoreError> =
                    row.map(|Json(record)| record).map_err(StoreError::from);
                let failed = item.is_err();
                yield item;
                if failed {
                    break;
                }
            }
        };
        Ok(records.boxed())
    }

    async fn insert(&self, collection: &str, record: &Record) -> Result<(), StoreError> {
        let pool = self.pool()?;
        let sql = render_write(collection, None, record)?;
        sqlx::query(&sql)
            .bind(record.to_string())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &[String],
        record: &Record,
    ) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::Unsupported {
                kind: StoreKind::Postgres.as_str(),
                op: StoreOp::Upsert,
            });
        }
        let pool = self.pool()?;
        let sql = render_write(collection, Some(key), record)?;
        sqlx::query(&sql)
            .bind(record.to_string())
            .execute(&pool)
            .await?;
        Ok(())
    }
}
