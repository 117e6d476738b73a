//! relmap SDK: compiles a declarative schema into relational tables, versioned
//! migrations, a filter query engine and a route table.

pub mod case;
pub mod config;
pub mod error;
pub mod migration;
pub mod query;
pub mod resolver;
pub mod routes;
pub mod schema;
pub mod sql;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{build_schema, load_from_path, parse_document, MappingOptions, SchemaDocument};
pub use error::{AppError, ConstraintError, MigrationError, PersistenceRequiredError, SchemaError, StoreError};
pub use migration::{apply_migrations, fresh_install, plan, MigrationPlan, MigrationStep};
pub use query::{Entity, QueryBuilder, Relation};
pub use resolver::{resolve, resolve_against, Mapping, TableFact};
pub use routes::{dispatch_router, RouteTable};
pub use schema::{FieldValue, Schema};
pub use store::{ensure_database_exists, MemoryStore, PgStore, Store};
