//! Fluent filter builder over one table.
//!
//! Conditions accumulate into the current conjunctive group; `or()` opens a new
//! group. Lookup and type errors are deferred to `build()` so the chain stays fluent.

use super::decode::{decode_row, to_storage};
use super::descriptor::{JoinClause, JoinKind, Predicate, QueryDescriptor, SelectColumn};
use super::entity::Entity;
use crate::error::AppError;
use crate::resolver::{Mapping, RelationPath, TableFact};
use crate::schema::{FieldValue, ModelId};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuilderState {
    Empty,
    Building,
}

pub struct QueryBuilder {
    mapping: Arc<Mapping>,
    table: Arc<TableFact>,
    groups: Vec<Vec<Predicate>>,
    joins: Vec<JoinClause>,
    /// Set once a relation's join has been added.
    joined: HashMap<String, bool>,
    /// Which relation claimed each join model.
    join_models: HashMap<ModelId, String>,
    limit: Option<u64>,
    error: Option<AppError>,
    state: BuilderState,
}

impl QueryBuilder {
    pub(crate) fn new(mapping: Arc<Mapping>, table: Arc<TableFact>) -> Self {
        QueryBuilder {
            mapping,
            table,
            groups: vec![Vec::new()],
            joins: Vec::new(),
            joined: HashMap::new(),
            join_models: HashMap::new(),
            limit: None,
            error: None,
            state: BuilderState::Empty,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn table(&self) -> &Arc<TableFact> {
        &self.table
    }

    fn fail(&mut self, err: AppError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn push(&mut self, predicate: Predicate) {
        if let Some(group) = self.groups.last_mut() {
            group.push(predicate);
        }
    }

    fn predicate(table: &TableFact, alias: &str, column: &str, value: FieldValue, negated: bool) -> Result<Predicate, AppError> {
        let col = table.column(column).ok_or_else(|| AppError::UnknownColumn {
            table: table.table_name.clone(),
            column: column.to_string(),
        })?;
        Ok(Predicate {
            alias: alias.to_string(),
            column: col.name.clone(),
            storage: col.storage,
            value: to_storage(&value, col)?,
            negated,
        })
    }

    fn condition(mut self, column: &str, value: FieldValue, negated: bool) -> Self {
        self.state = BuilderState::Building;
        match Self::predicate(&self.table, &self.table.table_name, column, value, negated) {
            Ok(p) => self.push(p),
            Err(e) => self.fail(e),
        }
        self
    }

    /// `column = value`; a null value matches IS NULL.
    pub fn filter(self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.condition(column, value.into(), false)
    }

    /// `column <> value`; a null value matches IS NOT NULL.
    pub fn exclude(self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.condition(column, value.into(), true)
    }

    /// Close the current group. Later conditions go into a new OR branch.
    pub fn or(mut self) -> Self {
        self.state = BuilderState::Building;
        if self.groups.last().is_some_and(|g| !g.is_empty()) {
            self.groups.push(Vec::new());
        }
        self
    }

    fn related(mut self, relation: &str, column: &str, value: FieldValue, negated: bool) -> Self {
        self.state = BuilderState::Building;
        match self.relationship_predicate(relation, column, value, negated) {
            Ok(p) => self.push(p),
            Err(e) => self.fail(e),
        }
        self
    }

    fn relationship_predicate(
        &mut self,
        relation: &str,
        column: &str,
        value: FieldValue,
        negated: bool,
    ) -> Result<Predicate, AppError> {
        let rel = self.table.relation(relation).cloned().ok_or_else(|| AppError::UnknownRelation {
            model: self.table.model_name.clone(),
            relation: relation.to_string(),
        })?;
        let target = self
            .mapping
            .table_for(rel.target)
            .cloned()
            .ok_or_else(|| AppError::UnknownModel(rel.target_table.clone()))?;
        let predicate = Self::predicate(&target, rel.far_alias(), column, value, negated)?;

        if !self.joined.get(relation).copied().unwrap_or(false) {
            if let Some(join_model) = rel.join_model() {
                if self.join_models.get(&join_model).is_some_and(|owner| owner != relation) {
                    return Err(AppError::ConflictingJoin {
                        relation: relation.to_string(),
                    });
                }
                self.join_models.insert(join_model, relation.to_string());
            }
            let kind = match &rel.path {
                RelationPath::Join { side, fragment } => JoinKind::Join {
                    fragment: Arc::clone(fragment),
                    near: *side,
                },
                RelationPath::Reverse(r) => JoinKind::Reverse(Arc::clone(r)),
            };
            self.joins.push(JoinClause {
                relation: relation.to_string(),
                kind,
            });
            self.joined.insert(relation.to_string(), true);
        }
        Ok(predicate)
    }

    /// Filter on a column of the rows reached through `relation`. The join is added once per builder.
    pub fn relationship_filter(self, relation: &str, column: &str, value: impl Into<FieldValue>) -> Self {
        self.related(relation, column, value.into(), false)
    }

    pub fn relationship_exclude(self, relation: &str, column: &str, value: impl Into<FieldValue>) -> Self {
        self.related(relation, column, value.into(), true)
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn build(self) -> Result<QueryDescriptor, AppError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let table = &self.table;
        Ok(QueryDescriptor {
            table: table.table_name.clone(),
            identity: table.identity().name.clone(),
            columns: table
                .columns
                .iter()
                .map(|c| SelectColumn {
                    name: c.name.clone(),
                    storage: c.storage,
                })
                .collect(),
            joins: self.joins,
            groups: self.groups.into_iter().filter(|g| !g.is_empty()).collect(),
            limit: self.limit,
        })
    }

    pub async fn all(self, store: &dyn Store) -> Result<Vec<Entity>, AppError> {
        let mapping = Arc::clone(&self.mapping);
        let table = Arc::clone(&self.table);
        let query = self.build()?;
        fetch_entities(store, &mapping, &table, &query).await
    }

    pub async fn first(self, store: &dyn Store) -> Result<Option<Entity>, AppError> {
        Ok(self.limit(1).all(store).await?.into_iter().next())
    }

    /// Validate now, fetch on the runtime, then hand the outcome to `callback` exactly once.
    pub fn all_with<F>(self, store: Arc<dyn Store>, callback: F) -> Result<JoinHandle<()>, AppError>
    where
        F: FnOnce(Result<Vec<Entity>, AppError>) + Send + 'static,
    {
        let mapping = Arc::clone(&self.mapping);
        let table = Arc::clone(&self.table);
        let query = self.build()?;
        Ok(tokio::spawn(async move {
            let result = fetch_entities(store.as_ref(), &mapping, &table, &query).await;
            callback(result);
        }))
    }

    pub fn first_with<F>(self, store: Arc<dyn Store>, callback: F) -> Result<JoinHandle<()>, AppError>
    where
        F: FnOnce(Result<Option<Entity>, AppError>) + Send + 'static,
    {
        self.limit(1)
            .all_with(store, move |result| callback(result.map(|rows| rows.into_iter().next())))
    }
}

async fn fetch_entities(
    store: &dyn Store,
    mapping: &Arc<Mapping>,
    table: &Arc<TableFact>,
    query: &QueryDescriptor,
) -> Result<Vec<Entity>, AppError> {
    let rows = store.fetch(query).await?;
    tracing::debug!(table = %table.table_name, rows = rows.len(), "fetched");
    rows.iter()
        .map(|row| {
            let values = decode_row(table, row, 0)?;
            Ok(Entity::from_row(Arc::clone(mapping), Arc::clone(table), values))
        })
        .collect()
}
