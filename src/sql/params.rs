//! Convert stored cells to types that sqlx can bind.

use crate::schema::StorageClass;
use crate::store::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

/// A value that can be bound to a PostgreSQL query. Nulls keep the column's type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null(StorageClass),
    I64(i64),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl PgBindValue {
    pub fn from_value(v: &Value, storage: StorageClass) -> Self {
        match v {
            Value::Null => PgBindValue::Null(storage),
            Value::Integer(i) => PgBindValue::I64(*i),
            Value::Real(f) => PgBindValue::F64(*f),
            Value::Text(s) => PgBindValue::String(s.clone()),
            Value::Blob(b) => PgBindValue::Bytes(b.clone()),
        }
    }

    pub fn storage(&self) -> StorageClass {
        match self {
            PgBindValue::Null(s) => *s,
            PgBindValue::I64(_) => StorageClass::Integer,
            PgBindValue::F64(_) => StorageClass::Real,
            PgBindValue::String(_) => StorageClass::Text,
            PgBindValue::Bytes(_) => StorageClass::Blob,
        }
    }
}

/// PostgreSQL type for a storage class, as used in DDL and parameter casts.
pub fn pg_type(storage: StorageClass) -> &'static str {
    match storage {
        StorageClass::Integer => "BIGINT",
        StorageClass::Real => "DOUBLE PRECISION",
        StorageClass::Text => "TEXT",
        StorageClass::Blob => "BYTEA",
    }
}

fn type_info(storage: StorageClass) -> PgTypeInfo {
    PgTypeInfo::with_name(match storage {
        StorageClass::Integer => "INT8",
        StorageClass::Real => "FLOAT8",
        StorageClass::Text => "TEXT",
        StorageClass::Blob => "BYTEA",
    })
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null(_) => IsNull::Yes,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            PgBindValue::Bytes(b) => <Vec<u8> as Encode<Postgres>>::encode_by_ref(b, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(type_info(self.storage()))
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}
