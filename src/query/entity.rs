//! A single row of a table-backed model, addressed by field or column name.

use super::decode::to_storage;
use super::descriptor::{DeleteDescriptor, Predicate};
use super::relation::Relation;
use crate::error::{AppError, ConstraintError, PersistenceRequiredError};
use crate::resolver::{ColumnKind, Mapping, TableFact};
use crate::schema::FieldValue;
use crate::store::{Store, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct Entity {
    mapping: Arc<Mapping>,
    table: Arc<TableFact>,
    /// By ordinal; `None` means never set, so the store default applies on insert.
    values: Vec<Option<FieldValue>>,
}

impl Entity {
    pub(crate) fn new(mapping: Arc<Mapping>, table: Arc<TableFact>) -> Self {
        let values = vec![None; table.columns.len()];
        Entity { mapping, table, values }
    }

    pub(crate) fn from_row(mapping: Arc<Mapping>, table: Arc<TableFact>, row: Vec<FieldValue>) -> Self {
        Entity {
            mapping,
            table,
            values: row.into_iter().map(Some).collect(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.table.model_name
    }

    pub fn table(&self) -> &Arc<TableFact> {
        &self.table
    }

    pub(crate) fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn id(&self) -> Option<i64> {
        match self.values.first() {
            Some(Some(FieldValue::Integer(id))) => Some(*id),
            _ => None,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    pub(crate) fn require_id(&self) -> Result<i64, PersistenceRequiredError> {
        self.id().ok_or_else(|| PersistenceRequiredError {
            model: self.table.model_name.clone(),
        })
    }

    fn ordinal(&self, name: &str) -> Result<usize, AppError> {
        self.table
            .column(name)
            .filter(|c| !c.is_identity())
            .map(|c| c.ordinal)
            .ok_or_else(|| AppError::UnknownColumn {
                table: self.table.table_name.clone(),
                column: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        let ordinal = self.table.column(name)?.ordinal;
        self.values.get(ordinal)?.as_ref()
    }

    /// Set a field (or its column) after checking the value fits the column.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<&mut Self, AppError> {
        let ordinal = self.ordinal(name)?;
        let value = value.into();
        to_storage(&value, &self.table.columns[ordinal])?;
        self.values[ordinal] = Some(value);
        Ok(self)
    }

    /// Point a foreign key at a saved entity of the referenced model.
    pub fn set_reference(&mut self, name: &str, target: &Entity) -> Result<&mut Self, AppError> {
        let ordinal = self.ordinal(name)?;
        let column = &self.table.columns[ordinal];
        let ColumnKind::ForeignKey { target: model, .. } = &column.kind else {
            return Err(AppError::TypeMismatch {
                column: column.name.clone(),
                expected: "reference",
            });
        };
        if *model != target.table.model {
            return Err(AppError::WrongTarget {
                expected: self
                    .mapping
                    .table_for(*model)
                    .map(|t| t.model_name.clone())
                    .unwrap_or_default(),
                found: target.model_name().to_string(),
            });
        }
        let id = target.require_id()?;
        self.values[ordinal] = Some(FieldValue::Reference(id));
        Ok(self)
    }

    /// Check required columns and encode every set value, before anything touches the store.
    fn pending_values(&self) -> Result<Vec<(String, Value)>, AppError> {
        let mut out = Vec::new();
        for column in self.table.columns.iter().filter(|c| !c.is_identity()) {
            let value = &self.values[column.ordinal];
            let missing = match value {
                None => column.required,
                Some(v) => v.is_null() && column.not_null,
            };
            if missing {
                return Err(ConstraintError::Required {
                    model: self.table.model_name.clone(),
                    field: column.field_name.clone().unwrap_or_else(|| column.name.clone()),
                }
                .into());
            }
            if let Some(v) = value {
                out.push((column.name.clone(), to_storage(v, column)?));
            }
        }
        Ok(out)
    }

    /// Insert a new row or update the existing one. Returns the identity.
    pub async fn save(&mut self, store: &dyn Store) -> Result<i64, AppError> {
        let values = self.pending_values()?;
        match self.id() {
            Some(id) => {
                store.update(&self.table, id, &values).await?;
                tracing::debug!(model = %self.table.model_name, id, "updated");
                Ok(id)
            }
            None => {
                let id = store.insert(&self.table, &values).await?;
                self.values[0] = Some(FieldValue::Integer(id));
                tracing::debug!(model = %self.table.model_name, id, "inserted");
                Ok(id)
            }
        }
    }

    /// Validate now, save on the runtime, then hand the saved entity to `callback` exactly once.
    pub fn save_with<F>(self, store: Arc<dyn Store>, callback: F) -> Result<JoinHandle<()>, AppError>
    where
        F: FnOnce(Result<Entity, AppError>) + Send + 'static,
    {
        self.pending_values()?;
        let mut entity = self;
        Ok(tokio::spawn(async move {
            let result = match entity.save(store.as_ref()).await {
                Ok(_) => Ok(entity),
                Err(e) => Err(e),
            };
            callback(result);
        }))
    }

    /// Delete the row. The entity keeps its values but is no longer persisted.
    pub async fn delete(&mut self, store: &dyn Store) -> Result<(), AppError> {
        let id = self.require_id()?;
        let identity = self.table.identity();
        let removed = store
            .delete(&DeleteDescriptor {
                table: self.table.table_name.clone(),
                conditions: vec![Predicate {
                    alias: self.table.table_name.clone(),
                    column: identity.name.clone(),
                    storage: identity.storage,
                    value: Value::Integer(id),
                    negated: false,
                }],
            })
            .await?;
        tracing::debug!(model = %self.table.model_name, id, removed, "deleted");
        self.values[0] = None;
        Ok(())
    }

    pub fn relation(&self, name: &str) -> Result<Relation<'_>, AppError> {
        let fact = self.table.relation(name).ok_or_else(|| AppError::UnknownRelation {
            model: self.table.model_name.clone(),
            relation: name.to_string(),
        })?;
        Ok(Relation::new(self, fact))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::blog_mapping;

    async fn setup() -> (Arc<Mapping>, MemoryStore) {
        let (schema, mapping) = blog_mapping();
        let store = MemoryStore::new();
        let plan = crate::migration::plan(&schema, &mapping).unwrap();
        crate::migration::apply_migrations(&store, &plan).await.unwrap();
        (Arc::new(mapping), store)
    }

    #[tokio::test]
    async fn missing_required_field_fails_before_any_write() {
        let (mapping, store) = setup().await;
        let mut post = mapping.entity("blog.post").unwrap();
        post.set("title", "orphan").unwrap();
        let err = post.save(&store).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Constraint(ConstraintError::Required { ref field, .. }) if field == "author"
        ));
        assert_eq!(store.row_count("blog_post").await.unwrap(), 0);
        assert!(!post.is_persisted());
    }

    #[tokio::test]
    async fn save_inserts_then_updates() {
        let (mapping, store) = setup().await;
        let mut user = mapping.entity("blog.user").unwrap();
        user.set("name", "ada").unwrap();
        let id = user.save(&store).await.unwrap();
        assert_eq!(user.id(), Some(id));

        user.set("email", "ada@example.com").unwrap();
        assert_eq!(user.save(&store).await.unwrap(), id);
        assert_eq!(store.row_count("blog_user").await.unwrap(), 1);

        let fetched = mapping.query("blog.user").unwrap().filter("email", "ada@example.com").first(&store).await.unwrap();
        assert_eq!(fetched.unwrap().get("name"), Some(&FieldValue::Text("ada".into())));
    }

    #[tokio::test]
    async fn references_need_a_saved_target_of_the_right_model() {
        let (mapping, store) = setup().await;
        let mut post = mapping.entity("blog.post").unwrap();
        let user = mapping.entity("blog.user").unwrap();
        assert!(matches!(post.set_reference("author", &user), Err(AppError::PersistenceRequired(_))));

        let mut tag = mapping.entity("blog.tag").unwrap();
        tag.set("label", "rust").unwrap();
        tag.save(&store).await.unwrap();
        assert!(matches!(post.set_reference("author", &tag), Err(AppError::WrongTarget { .. })));
        assert!(matches!(post.set_reference("title", &tag), Err(AppError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn delete_unpersists() {
        let (mapping, store) = setup().await;
        let mut tag = mapping.entity("blog.tag").unwrap();
        assert!(matches!(tag.delete(&store).await, Err(AppError::PersistenceRequired(_))));
        tag.set("label", "x").unwrap();
        tag.save(&store).await.unwrap();
        tag.delete(&store).await.unwrap();
        assert!(!tag.is_persisted());
        assert_eq!(store.row_count("blog_tag").await.unwrap(), 0);
    }

    #[test]
    fn identity_and_unknown_columns_cannot_be_set() {
        let (_, mapping) = blog_mapping();
        let mapping = Arc::new(mapping);
        let mut user = mapping.entity("blog.user").unwrap();
        assert!(matches!(user.set("_id", 4), Err(AppError::UnknownColumn { .. })));
        assert!(matches!(user.set("age", 4), Err(AppError::UnknownColumn { .. })));
        assert!(matches!(user.set("name", 4), Err(AppError::TypeMismatch { .. })));
    }
}
