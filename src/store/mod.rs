//! Storage seam. The query engine and migration runner only talk to `Store`.

mod memory;
mod pg;

pub use memory::MemoryStore;
pub use pg::{ensure_database_exists, PgStore};

use crate::error::StoreError;
use crate::migration::MigrationStep;
use crate::query::{DeleteDescriptor, QueryDescriptor};
use crate::resolver::TableFact;
use crate::schema::FieldValue;
use async_trait::async_trait;

/// One stored cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode a literal default: booleans as 0/1, instants as epoch milliseconds.
    pub fn from_literal(v: &FieldValue) -> Value {
        match v {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(i) | FieldValue::Reference(i) => Value::Integer(*i),
            FieldValue::Real(f) => Value::Real(*f),
            FieldValue::Bool(b) => Value::Integer(i64::from(*b)),
            FieldValue::Text(s) => Value::Text(s.clone()),
            FieldValue::Bytes(b) => Value::Blob(b.clone()),
            FieldValue::Instant(t) => Value::Integer(t.timestamp_millis()),
        }
    }

    /// SQL equality: NULL never equals anything; integers and reals compare numerically.
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Integer(a), Value::Real(b)) | (Value::Real(b), Value::Integer(a)) => (*a as f64) == *b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Blob(a), Value::Blob(b)) => a == b,
            _ => false,
        }
    }
}

/// A fetched row: cells in the descriptor's column order.
pub type Row = Vec<Value>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Row>, StoreError>;

    /// Insert one row; omitted columns take their defaults. Returns the new identity.
    async fn insert(&self, table: &TableFact, values: &[(String, Value)]) -> Result<i64, StoreError>;

    /// Returns the number of rows updated.
    async fn update(&self, table: &TableFact, id: i64, values: &[(String, Value)]) -> Result<u64, StoreError>;

    /// Returns the number of rows deleted.
    async fn delete(&self, query: &DeleteDescriptor) -> Result<u64, StoreError>;

    async fn apply(&self, step: &MigrationStep) -> Result<(), StoreError>;

    /// Last applied schema version; 0 for an empty store.
    async fn schema_version(&self) -> Result<u32, StoreError>;

    async fn set_schema_version(&self, version: u32) -> Result<(), StoreError>;
}
