//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Resolution-time failures. Fatal to code generation: no partial output is produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing reference: {kind} '{name}'")]
    MissingReference { kind: &'static str, name: String },
    #[error("unknown type '{type_name}' for {model}.{field}")]
    UnknownType {
        model: String,
        field: String,
        type_name: String,
    },
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid version for {0}: versions start at 1")]
    InvalidVersion(String),
    #[error("duplicate model: {0}")]
    DuplicateModel(String),
    #[error("duplicate field: {model}.{field}")]
    DuplicateField { model: String, field: String },
    #[error("duplicate field id {id} in {model}")]
    DuplicateFieldId { model: String, id: i64 },
    #[error("duplicate column '{column}' in {model}")]
    DuplicateColumn { model: String, column: String },
    #[error("duplicate table name '{table}' (models {first} and {second})")]
    DuplicateTable {
        table: String,
        first: String,
        second: String,
    },
    #[error("invalid join model {model}: {reason}")]
    InvalidJoinModel { model: String, reason: String },
    #[error("repeated primitive field {model}.{field} is not supported")]
    RepeatedPrimitive { model: String, field: String },
    #[error("key-value model {model} can only hold single primitive values ({field})")]
    InvalidKeyValueField { model: String, field: String },
    #[error("{model}.{field} references a key-value model")]
    KeyValueReference { model: String, field: String },
    #[error("models {first} and {second} share the route path '{path}'")]
    DuplicateRoute {
        path: String,
        first: String,
        second: String,
    },
    #[error("invalid default for {model}.{field}: expected {expected}")]
    InvalidDefault {
        model: String,
        field: String,
        expected: &'static str,
    },
    #[error("schema load: {0}")]
    Load(String),
}

/// Migration planning failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("{model}.{field} has version {field_version}, older than its model (version {model_version})")]
    NonMonotonicVersion {
        model: String,
        field: String,
        model_version: u32,
        field_version: u32,
    },
    #[error("{model}.{field} (version {field_version}) references {target}, introduced at version {target_version}")]
    ReferencePredatesTarget {
        model: String,
        field: String,
        target: String,
        field_version: u32,
        target_version: u32,
    },
}

/// Save-time constraint violations, raised before any write is issued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("{model}: a value for '{field}' must be explicitly provided")]
    Required { model: String, field: String },
}

/// A relationship operation was attempted on an entity that has no identity yet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{model} must be saved first")]
pub struct PersistenceRequiredError {
    pub model: String,
}

/// Storage failures. Passed through to callers without interpretation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },
    #[error("unique constraint violated on {table} ({columns})")]
    UniqueViolation { table: String, columns: String },
    #[error("null value in {table}.{column} violates not-null constraint")]
    NotNullViolation { table: String, column: String },
    #[error("table already exists: {0}")]
    TableExists(String),
    #[error("column already exists: {table}.{column}")]
    ColumnExists { table: String, column: String },
    #[error("decode: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    PersistenceRequired(#[from] PersistenceRequiredError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("unknown column: {table}.{column}")]
    UnknownColumn { table: String, column: String },
    #[error("unknown relation: {model}.{relation}")]
    UnknownRelation { model: String, relation: String },
    #[error("type mismatch for {column}: expected {expected}")]
    TypeMismatch { column: String, expected: &'static str },
    #[error("relation {relation} shares its join with another relation in this query")]
    ConflictingJoin { relation: String },
    #[error("relation {0} is read-only")]
    ReadOnlyRelation(String),
    #[error("wrong target: expected {expected}, got {found}")]
    WrongTarget { expected: String, found: String },
    #[error("decode: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(StoreError::Database(e))
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Schema(_) | AppError::Migration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "schema_error")
            }
            AppError::Constraint(_) => (StatusCode::UNPROCESSABLE_ENTITY, "constraint_error"),
            AppError::PersistenceRequired(_) => (StatusCode::CONFLICT, "persistence_required"),
            AppError::Store(StoreError::UniqueViolation { .. }) => {
                (StatusCode::CONFLICT, "conflict")
            }
            AppError::Store(StoreError::Database(sqlx::Error::RowNotFound)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AppError::Store(_) | AppError::Decode(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            AppError::UnknownModel(_) | AppError::UnknownRelation { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            AppError::UnknownColumn { .. }
            | AppError::TypeMismatch { .. }
            | AppError::ConflictingJoin { .. }
            | AppError::ReadOnlyRelation(_)
            | AppError::WrongTarget { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        }
    }
}

impl AppError {
    /// Structured context for the error body: the model, column or relation involved.
    fn details(&self) -> Option<serde_json::Value> {
        use serde_json::json;
        Some(match self {
            AppError::Constraint(ConstraintError::Required { model, field }) => {
                json!({ "model": model, "field": field })
            }
            AppError::PersistenceRequired(e) => json!({ "model": e.model }),
            AppError::Store(StoreError::UniqueViolation { table, columns }) => {
                json!({ "table": table, "columns": columns })
            }
            AppError::UnknownModel(model) => json!({ "model": model }),
            AppError::UnknownColumn { table, column } => json!({ "table": table, "column": column }),
            AppError::UnknownRelation { model, relation } => json!({ "model": model, "relation": relation }),
            AppError::TypeMismatch { column, expected } => json!({ "column": column, "expected": expected }),
            AppError::ConflictingJoin { relation } | AppError::ReadOnlyRelation(relation) => {
                json!({ "relation": relation })
            }
            AppError::WrongTarget { expected, found } => json!({ "expected": expected, "found": found }),
            _ => return None,
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_errors_map_to_unprocessable() {
        let err: AppError = ConstraintError::Required {
            model: "blog.post".into(),
            field: "author".into(),
        }
        .into();
        assert_eq!(err.status_and_code().0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.to_string(),
            "blog.post: a value for 'author' must be explicitly provided"
        );
    }

    #[test]
    fn persistence_required_maps_to_conflict() {
        let err: AppError = PersistenceRequiredError {
            model: "blog.post".into(),
        }
        .into();
        assert_eq!(err.status_and_code(), (StatusCode::CONFLICT, "persistence_required"));
    }

    #[tokio::test]
    async fn response_body_carries_details() {
        let err = AppError::UnknownColumn {
            table: "blog_post".into(),
            column: "missing".into(),
        };
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
        assert_eq!(
            json["error"]["details"],
            serde_json::json!({ "table": "blog_post", "column": "missing" })
        );

        let res = AppError::Decode("bad cell".into()).into_response();
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].get("details").is_none());
    }
}
