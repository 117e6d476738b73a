//! PostgreSQL store over a sqlx pool. The applied schema version lives in `_relmap_meta`.

use super::{Row, Store, Value};
use crate::error::StoreError;
use crate::migration::MigrationStep;
use crate::query::{DeleteDescriptor, QueryDescriptor};
use crate::resolver::TableFact;
use crate::schema::StorageClass;
use crate::sql::builder::{self, QueryBuf};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{ConnectOptions, Row as _};
use std::str::FromStr;

const META_TABLE: &str = "_relmap_meta";
const VERSION_KEY: &str = "schema_version";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(PgStore { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_meta_table(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (key TEXT PRIMARY KEY, value BIGINT NOT NULL)",
            META_TABLE
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn execute(&self, buf: QueryBuf) -> Result<u64, StoreError> {
        tracing::debug!(sql = %buf.sql, "execute");
        let mut q = sqlx::query(&buf.sql);
        for p in buf.params {
            q = q.bind(p);
        }
        Ok(q.execute(&self.pool).await?.rows_affected())
    }
}

fn decode_cell(row: &PgRow, i: usize, storage: StorageClass) -> Result<Value, StoreError> {
    let v = match storage {
        StorageClass::Integer => row.try_get::<Option<i64>, _>(i)?.map(Value::Integer),
        StorageClass::Real => row.try_get::<Option<f64>, _>(i)?.map(Value::Real),
        StorageClass::Text => row.try_get::<Option<String>, _>(i)?.map(Value::Text),
        StorageClass::Blob => row.try_get::<Option<Vec<u8>>, _>(i)?.map(Value::Blob),
    };
    Ok(v.unwrap_or(Value::Null))
}

#[async_trait]
impl Store for PgStore {
    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Row>, StoreError> {
        let buf = builder::select(query);
        tracing::debug!(sql = %buf.sql, "query");
        let mut q = sqlx::query(&buf.sql);
        for p in buf.params {
            q = q.bind(p);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| {
                query
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| decode_cell(r, i, c.storage))
                    .collect()
            })
            .collect()
    }

    async fn insert(&self, table: &TableFact, values: &[(String, Value)]) -> Result<i64, StoreError> {
        let buf = builder::insert(table, values)?;
        tracing::debug!(sql = %buf.sql, "insert");
        let mut q = sqlx::query_scalar::<_, i64>(&buf.sql);
        for p in buf.params {
            q = q.bind(p);
        }
        Ok(q.fetch_one(&self.pool).await?)
    }

    async fn update(&self, table: &TableFact, id: i64, values: &[(String, Value)]) -> Result<u64, StoreError> {
        if values.is_empty() {
            return Ok(0);
        }
        self.execute(builder::update(table, id, values)?).await
    }

    async fn delete(&self, query: &DeleteDescriptor) -> Result<u64, StoreError> {
        self.execute(builder::delete(query)).await
    }

    async fn apply(&self, step: &MigrationStep) -> Result<(), StoreError> {
        tracing::debug!(sql = %step.sql(), "ddl");
        sqlx::query(step.sql()).execute(&self.pool).await?;
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StoreError> {
        self.ensure_meta_table().await?;
        let v: Option<i64> = sqlx::query_scalar(&format!("SELECT value FROM \"{}\" WHERE key = $1", META_TABLE))
            .bind(VERSION_KEY)
            .fetch_optional(&self.pool)
            .await?;
        let v = v.unwrap_or(0);
        u32::try_from(v).map_err(|_| StoreError::Decode(format!("invalid stored schema version {}", v)))
    }

    async fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        self.ensure_meta_table().await?;
        sqlx::query(&format!(
            "INSERT INTO \"{}\" (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            META_TABLE
        ))
        .bind(VERSION_KEY)
        .bind(i64::from(version))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Ensure the database in `database_url` exists; create it if not. Connects to the
/// default `postgres` database to run CREATE DATABASE. Call before `PgStore::connect`.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), StoreError> {
    let (admin_url, db_name) = split_database_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name.replace('"', "\"\"")))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

/// Split a URL into (admin URL on the `postgres` database, database name).
fn split_database_url(url: &str) -> Result<(String, String), StoreError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| StoreError::Decode("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
