//! Versioned forward migrations: CREATE TABLE and ADD COLUMN steps gated by schema version.
//!
//! Version 1 is the baseline. For every later version, new tables come first (in
//! dependency order), then columns added to tables that already existed.

use crate::error::{AppError, MigrationError};
use crate::resolver::{ColumnFact, Mapping, TableFact};
use crate::schema::{FieldId, FieldKind, ModelId, Schema};
use crate::sql::ddl;
use crate::store::Store;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq)]
pub enum MigrationStep {
    CreateTable {
        model: ModelId,
        model_name: String,
        table: String,
        /// Columns as of the step's version, in ordinal order.
        columns: Vec<ColumnFact>,
        unique_groups: Vec<Vec<String>>,
        sql: String,
    },
    AddColumn {
        model: ModelId,
        model_name: String,
        table: String,
        field: FieldId,
        column: ColumnFact,
        sql: String,
    },
}

impl MigrationStep {
    pub fn sql(&self) -> &str {
        match self {
            MigrationStep::CreateTable { sql, .. } | MigrationStep::AddColumn { sql, .. } => sql,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            MigrationStep::CreateTable { table, .. } | MigrationStep::AddColumn { table, .. } => table,
        }
    }

    pub fn model(&self) -> ModelId {
        match self {
            MigrationStep::CreateTable { model, .. } | MigrationStep::AddColumn { model, .. } => *model,
        }
    }

    /// "CreateTable(blog.tag)" / "AddColumn(blog.user.email)".
    pub fn label(&self) -> String {
        match self {
            MigrationStep::CreateTable { model_name, .. } => format!("CreateTable({})", model_name),
            MigrationStep::AddColumn {
                model_name, column, ..
            } => format!(
                "AddColumn({}.{})",
                model_name,
                column.field_name.as_deref().unwrap_or(&column.name)
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedStep {
    pub version: u32,
    pub step: MigrationStep,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MigrationPlan {
    pub steps: Vec<PlannedStep>,
    pub target_version: u32,
}

impl MigrationPlan {
    /// Steps for versions in `(from, to]`, in order.
    pub fn steps_between(&self, from: u32, to: u32) -> impl Iterator<Item = &PlannedStep> + '_ {
        self.steps
            .iter()
            .filter(move |s| s.version > from && s.version <= to)
    }

    pub fn for_version(&self, v: u32) -> impl Iterator<Item = &MigrationStep> + '_ {
        self.steps.iter().filter(move |s| s.version == v).map(|s| &s.step)
    }
}

/// Field-vs-model ordering is checked across the whole schema before references.
fn check_versions(schema: &Schema) -> Result<(), MigrationError> {
    for m in schema.models() {
        for f in schema.fields_of(m.id) {
            if f.version < m.version {
                return Err(MigrationError::NonMonotonicVersion {
                    model: m.name.clone(),
                    field: f.name.clone(),
                    model_version: m.version,
                    field_version: f.version,
                });
            }
        }
    }
    for m in schema.models() {
        for f in schema.fields_of(m.id) {
            let target = match f.kind {
                FieldKind::ForeignKey(t) => Some(t),
                FieldKind::Relation { join, .. } => Some(join),
                FieldKind::Primitive(_) | FieldKind::Reverse { .. } => None,
            };
            if let Some(t) = target.map(|t| schema.model(t)) {
                if f.version < t.version {
                    return Err(MigrationError::ReferencePredatesTarget {
                        model: m.name.clone(),
                        field: f.name.clone(),
                        target: t.name.clone(),
                        field_version: f.version,
                        target_version: t.version,
                    });
                }
            }
        }
    }
    Ok(())
}

fn create_step(table: &TableFact, version: u32, existing: &HashSet<String>) -> MigrationStep {
    let columns: Vec<ColumnFact> = table.columns_as_of(version).cloned().collect();
    let sql = ddl::create_table(&table.table_name, &columns, &table.unique_groups, |t| existing.contains(t));
    let unique_groups = table
        .unique_groups
        .iter()
        .filter(|g| g.iter().all(|c| columns.iter().any(|col| &col.name == c)))
        .cloned()
        .collect();
    MigrationStep::CreateTable {
        model: table.model,
        model_name: table.model_name.clone(),
        table: table.table_name.clone(),
        columns,
        unique_groups,
        sql,
    }
}

/// Plan every step from an empty store to the schema's current version.
pub fn plan(schema: &Schema, mapping: &Mapping) -> Result<MigrationPlan, MigrationError> {
    check_versions(schema)?;
    let target_version = schema.version();
    let identity = mapping.options().identity_column.as_str();
    let mut existing: HashSet<String> = HashSet::new();
    let mut steps = Vec::new();

    for v in 1..=target_version {
        let introduced: Vec<ModelId> = schema
            .models()
            .iter()
            .filter(|m| m.version == v && m.is_table_backed())
            .map(|m| m.id)
            .collect();
        for model in schema.order_subset(&introduced) {
            let Some(table) = mapping.table_for(model) else {
                continue;
            };
            existing.insert(table.table_name.clone());
            steps.push(PlannedStep {
                version: v,
                step: create_step(table, v, &existing),
            });
        }

        for m in schema.models().iter().filter(|m| m.version < v) {
            let Some(table) = mapping.table_for(m.id) else {
                continue;
            };
            for f in schema.persisted_fields(m.id).filter(|f| f.version == v) {
                let Some(column) = table.column_for_field(f.id) else {
                    continue;
                };
                let references = match f.kind {
                    FieldKind::ForeignKey(_) => Some(identity),
                    _ => None,
                };
                steps.push(PlannedStep {
                    version: v,
                    step: MigrationStep::AddColumn {
                        model: m.id,
                        model_name: m.name.clone(),
                        table: table.table_name.clone(),
                        field: f.id,
                        column: column.clone(),
                        sql: ddl::add_column(&table.table_name, column, references),
                    },
                });
            }
        }
    }

    tracing::debug!(steps = steps.len(), target_version, "migration plan");
    Ok(MigrationPlan { steps, target_version })
}

/// CREATE TABLE for every table at the current version, in dependency order.
pub fn fresh_install(schema: &Schema, mapping: &Mapping) -> Vec<MigrationStep> {
    let version = schema.version();
    let mut existing = HashSet::new();
    let mut steps = Vec::new();
    for model in schema.dependency_order() {
        if let Some(table) = mapping.table_for(model) {
            existing.insert(table.table_name.clone());
            steps.push(create_step(table, version, &existing));
        }
    }
    steps
}

/// Run every step newer than the store's last applied version, recording progress per version.
/// Returns the version the store is at afterwards.
pub async fn apply_migrations(store: &dyn Store, plan: &MigrationPlan) -> Result<u32, AppError> {
    let current = store.schema_version().await?;
    if current >= plan.target_version {
        if current > plan.target_version {
            tracing::warn!(current, target = plan.target_version, "store is ahead of the schema");
        }
        return Ok(current);
    }
    for v in (current + 1)..=plan.target_version {
        for step in plan.for_version(v) {
            tracing::info!(version = v, step = %step.label(), sql = %step.sql(), "migration step");
            store.apply(step).await?;
        }
        store.set_schema_version(v).await?;
    }
    tracing::info!(from = current, to = plan.target_version, "migrations applied");
    Ok(plan.target_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_schema, MappingOptions};
    use crate::resolver::resolve;
    use crate::testing::{blog_document, blog_mapping};
    use serde_json::json;

    fn labels(plan: &MigrationPlan, v: u32) -> Vec<String> {
        plan.for_version(v).map(|s| s.label()).collect()
    }

    #[test]
    fn baseline_creates_version_one_tables_in_dependency_order() {
        let (schema, mapping) = blog_mapping();
        let plan = plan(&schema, &mapping).unwrap();
        assert_eq!(plan.target_version, 3);
        assert_eq!(
            labels(&plan, 1),
            ["CreateTable(blog.user)", "CreateTable(blog.post)", "CreateTable(blog.comment)"]
        );
    }

    #[test]
    fn later_versions_create_before_adding_columns() {
        let (schema, mapping) = blog_mapping();
        let plan = plan(&schema, &mapping).unwrap();
        assert_eq!(
            labels(&plan, 2),
            ["CreateTable(blog.tag)", "CreateTable(blog.post_tag)", "AddColumn(blog.user.email)"]
        );
        assert_eq!(
            labels(&plan, 3),
            [
                "CreateTable(blog.user_friends)",
                "AddColumn(blog.post.publishedAt)",
                "AddColumn(blog.post.pinned)"
            ]
        );
    }

    #[test]
    fn create_table_carries_columns_as_of_its_version() {
        let (schema, mapping) = blog_mapping();
        let plan = plan(&schema, &mapping).unwrap();
        let Some(MigrationStep::CreateTable { columns, sql, .. }) = plan.for_version(1).nth(1) else {
            panic!("expected post table");
        };
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["_id", "author_id", "title"]);
        assert!(sql.contains("REFERENCES \"blog_user\""));
    }

    #[test]
    fn fields_introduced_with_their_model_are_not_added() {
        let (schema, mapping) = blog_mapping();
        let plan = plan(&schema, &mapping).unwrap();
        for s in &plan.steps {
            if let MigrationStep::AddColumn { model, field, .. } = &s.step {
                assert!(schema.field(*field).version > schema.model(*model).version);
                assert_eq!(schema.field(*field).version, s.version);
            }
        }
    }

    #[test]
    fn field_older_than_model_is_rejected() {
        let mut doc = blog_document();
        doc["models"][2]["fields"][0]["version"] = json!(1);
        let schema = build_schema(&serde_json::from_value(doc).unwrap()).unwrap();
        let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
        assert_eq!(
            plan(&schema, &mapping).unwrap_err(),
            MigrationError::NonMonotonicVersion {
                model: "blog.tag".into(),
                field: "label".into(),
                model_version: 2,
                field_version: 1,
            }
        );
    }

    #[test]
    fn reference_older_than_target_is_rejected() {
        let doc = json!({ "models": [
            { "name": "a.x", "version": 2 },
            { "name": "a.y", "fields": [{ "name": "x", "id": 1, "type": "a.x" }] }
        ] });
        let schema = build_schema(&serde_json::from_value(doc).unwrap()).unwrap();
        let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
        assert!(matches!(
            plan(&schema, &mapping),
            Err(MigrationError::ReferencePredatesTarget { target_version: 2, .. })
        ));
    }

    #[test]
    fn field_older_than_its_model_wins_over_reference_errors() {
        let doc = json!({ "models": [
            { "name": "a.b", "version": 2 },
            { "name": "a.a", "version": 2, "fields": [
                { "name": "f", "id": 1, "type": { "ref": "a.b" }, "version": 1 }
            ] }
        ] });
        let schema = build_schema(&serde_json::from_value(doc).unwrap()).unwrap();
        let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
        assert_eq!(
            plan(&schema, &mapping).unwrap_err(),
            MigrationError::NonMonotonicVersion {
                model: "a.a".into(),
                field: "f".into(),
                model_version: 2,
                field_version: 1,
            }
        );

        // a reference error in an earlier model does not hide it either
        let doc = json!({ "models": [
            { "name": "a.x", "version": 2 },
            { "name": "a.y", "fields": [{ "name": "x", "id": 1, "type": "a.x" }] },
            { "name": "a.z", "version": 3, "fields": [{ "name": "n", "id": 1, "type": "int32", "version": 2 }] }
        ] });
        let schema = build_schema(&serde_json::from_value(doc).unwrap()).unwrap();
        let mapping = resolve(&schema, &MappingOptions::default()).unwrap();
        assert!(matches!(
            plan(&schema, &mapping),
            Err(MigrationError::NonMonotonicVersion { ref model, .. }) if model == "a.z"
        ));
    }

    #[test]
    fn steps_between_is_a_half_open_range() {
        let (schema, mapping) = blog_mapping();
        let plan = plan(&schema, &mapping).unwrap();
        assert!(plan.steps_between(1, 3).all(|s| s.version == 2 || s.version == 3));
        assert_eq!(plan.steps_between(3, 3).count(), 0);
        assert_eq!(plan.steps_between(0, 3).count(), plan.steps.len());
    }

    #[test]
    fn fresh_install_creates_every_table_whole() {
        let (schema, mapping) = blog_mapping();
        let steps = fresh_install(&schema, &mapping);
        assert_eq!(steps.len(), mapping.tables().len());
        let MigrationStep::CreateTable { columns, .. } = &steps[1] else {
            panic!("expected create table");
        };
        assert_eq!(columns.len(), 5);
    }
}
