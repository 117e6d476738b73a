//! Query/filter engine: fluent builders, entities and relation navigation over a `Store`.

mod builder;
pub mod decode;
mod descriptor;
mod entity;
mod relation;

pub use builder::{BuilderState, QueryBuilder};
pub use decode::{decode_row, decode_rows};
pub use descriptor::*;
pub use entity::Entity;
pub use relation::Relation;

use crate::error::AppError;
use crate::resolver::{Mapping, TableFact};
use std::sync::Arc;

impl Mapping {
    fn table_or_unknown(&self, model: &str) -> Result<Arc<TableFact>, AppError> {
        self.table(model)
            .cloned()
            .ok_or_else(|| AppError::UnknownModel(model.to_string()))
    }

    /// Start a query over `model` (qualified model name or table name).
    pub fn query(self: &Arc<Self>, model: &str) -> Result<QueryBuilder, AppError> {
        Ok(QueryBuilder::new(Arc::clone(self), self.table_or_unknown(model)?))
    }

    /// A new, unsaved entity of `model`.
    pub fn entity(self: &Arc<Self>, model: &str) -> Result<Entity, AppError> {
        Ok(Entity::new(Arc::clone(self), self.table_or_unknown(model)?))
    }
}
