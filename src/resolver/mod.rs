//! Relational mapping: schema IR -> per-model table facts.
//!
//! Pure and total over valid schemas. Join fragments are built once per join
//! model here and shared by `Arc` with every relation and query that uses them.

mod table;

pub use table::*;

use crate::config::MappingOptions;
use crate::error::SchemaError;
use crate::schema::{Field, FieldId, FieldKind, Model, ModelId, ModelKind, Schema, StorageClass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Ordinal instability. Never fatal, never silently re-indexed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ResolverWarning {
    /// A persisted field number is lower than one declared before it.
    NonMonotonicFieldIds {
        table: String,
        field: String,
        number: i64,
        previous: i64,
    },
    OrdinalChanged {
        table: String,
        column: String,
        was: usize,
        now: usize,
    },
    ColumnRemoved { table: String, column: String },
}

impl fmt::Display for ResolverWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolverWarning::NonMonotonicFieldIds {
                table,
                field,
                number,
                previous,
            } => write!(
                f,
                "{}: field {} has id {} after id {}; column order no longer follows field ids",
                table, field, number, previous
            ),
            ResolverWarning::OrdinalChanged { table, column, was, now } => {
                write!(f, "{}.{} moved from ordinal {} to {}", table, column, was, now)
            }
            ResolverWarning::ColumnRemoved { table, column } => {
                write!(f, "{}.{} no longer exists", table, column)
            }
        }
    }
}

/// Column names per table in ordinal order, captured from a deployed mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalSnapshot {
    pub tables: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct Mapping {
    tables: Vec<Arc<TableFact>>,
    kv: Vec<KvFact>,
    by_model: HashMap<ModelId, usize>,
    by_name: HashMap<String, usize>,
    warnings: Vec<ResolverWarning>,
    options: MappingOptions,
}

impl Mapping {
    /// Table facts in schema declaration order.
    pub fn tables(&self) -> &[Arc<TableFact>] {
        &self.tables
    }

    /// By qualified model name or table name.
    pub fn table(&self, name: &str) -> Option<&Arc<TableFact>> {
        self.by_name.get(name).map(|i| &self.tables[*i])
    }

    pub fn table_for(&self, model: ModelId) -> Option<&Arc<TableFact>> {
        self.by_model.get(&model).map(|i| &self.tables[*i])
    }

    pub fn kv_facts(&self) -> &[KvFact] {
        &self.kv
    }

    pub fn kv(&self, model_name: &str) -> Option<&KvFact> {
        self.kv.iter().find(|k| k.model_name == model_name)
    }

    pub fn warnings(&self) -> &[ResolverWarning] {
        &self.warnings
    }

    pub fn options(&self) -> &MappingOptions {
        &self.options
    }

    pub fn snapshot(&self) -> OrdinalSnapshot {
        OrdinalSnapshot {
            tables: self
                .tables
                .iter()
                .map(|t| (t.table_name.clone(), t.columns.iter().map(|c| c.name.clone()).collect()))
                .collect(),
        }
    }
}

/// Lower-cased qualified name with `.` replaced by `_`.
pub fn table_name(model: &Model) -> String {
    model.name.to_lowercase().replace('.', "_")
}

pub fn column_name(field: &Field, options: &MappingOptions) -> String {
    let base = options.casing.apply(&field.name);
    match field.kind {
        FieldKind::ForeignKey(_) => format!("{}{}", base, options.foreign_key_suffix),
        _ => base,
    }
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn resolve(schema: &Schema, options: &MappingOptions) -> Result<Mapping, SchemaError> {
    let mut table_names: HashMap<ModelId, String> = HashMap::new();
    let mut owners: HashMap<String, &str> = HashMap::new();
    for m in schema.models().iter().filter(|m| m.is_table_backed()) {
        let name = table_name(m);
        if let Some(first) = owners.insert(name.clone(), &m.name) {
            return Err(SchemaError::DuplicateTable {
                table: name,
                first: first.to_string(),
                second: m.name.clone(),
            });
        }
        table_names.insert(m.id, name);
    }

    let mut warnings = Vec::new();
    let mut columns: HashMap<ModelId, Vec<ColumnFact>> = HashMap::new();
    for m in schema.models().iter().filter(|m| m.is_table_backed()) {
        let cols = resolve_columns(schema, m, &table_names, options, &mut warnings)?;
        columns.insert(m.id, cols);
    }

    let mut fragments: HashMap<ModelId, Arc<JoinFragment>> = HashMap::new();
    for m in schema.models() {
        if let ModelKind::Join { source, dest } = m.kind {
            let fragment = join_fragment(m, source, dest, &table_names, &columns)?;
            fragments.insert(m.id, Arc::new(fragment));
        }
    }

    let mut tables = Vec::new();
    let mut kv = Vec::new();
    for m in schema.models() {
        if !m.is_table_backed() {
            kv.push(kv_fact(schema, m));
            continue;
        }
        let table = &table_names[&m.id];
        let cols = columns.remove(&m.id).unwrap_or_default();

        let mut unique_groups = Vec::new();
        if let (Some(fragment), true) = (fragments.get(&m.id), options.unique_join_pairs) {
            unique_groups.push(vec![fragment.source.column.clone(), fragment.dest.column.clone()]);
        }

        let mut relations = Vec::new();
        for f in schema.fields_of(m.id) {
            match f.kind {
                FieldKind::Relation { join, side } => {
                    let Some(fragment) = fragments.get(&join) else {
                        return Err(SchemaError::InvalidJoinModel {
                            model: schema.model(join).name.clone(),
                            reason: "not a join model".into(),
                        });
                    };
                    let target = fragment.endpoint(side.opposite()).model;
                    relations.push(RelationFact {
                        name: f.name.clone(),
                        field: f.id,
                        target,
                        target_table: table_names[&target].clone(),
                        path: RelationPath::Join {
                            side,
                            fragment: Arc::clone(fragment),
                        },
                    });
                }
                FieldKind::Reverse { child, via } => {
                    let child_table = table_names[&child].clone();
                    let fk_column = column_name(schema.field(via), options);
                    let alias = format!("{}__{}", table, f.name);
                    let sql = format!(
                        "INNER JOIN {} AS {} ON {}.{} = {}.{}",
                        quoted(&child_table),
                        quoted(&alias),
                        quoted(&alias),
                        quoted(&fk_column),
                        quoted(table),
                        quoted(&options.identity_column)
                    );
                    relations.push(RelationFact {
                        name: f.name.clone(),
                        field: f.id,
                        target: child,
                        target_table: child_table.clone(),
                        path: RelationPath::Reverse(Arc::new(ReverseFragment {
                            child,
                            child_table,
                            fk_column,
                            alias,
                            sql,
                        })),
                    });
                }
                FieldKind::Primitive(_) | FieldKind::ForeignKey(_) => {}
            }
        }

        let ordinals = cols.iter().map(|c| (c.name.clone(), c.ordinal)).collect();
        let field_columns = cols
            .iter()
            .filter_map(|c| c.field.map(|f| (f, c.ordinal)))
            .collect();
        tables.push(Arc::new(TableFact {
            model: m.id,
            model_name: m.name.clone(),
            table_name: table.clone(),
            version: m.version,
            columns: cols,
            field_columns,
            ordinals,
            unique_groups,
            relations,
            join: fragments.get(&m.id).cloned(),
        }));
    }

    let mut by_model = HashMap::new();
    let mut by_name = HashMap::new();
    for (i, t) in tables.iter().enumerate() {
        by_model.insert(t.model, i);
        by_name.insert(t.model_name.clone(), i);
        by_name.insert(t.table_name.clone(), i);
    }

    for w in &warnings {
        tracing::warn!(warning = %w, "ordinal stability");
    }
    tracing::debug!(tables = tables.len(), kv = kv.len(), "schema resolved");

    Ok(Mapping {
        tables,
        kv,
        by_model,
        by_name,
        warnings,
        options: options.clone(),
    })
}

/// Resolve, then compare ordinals against a previously deployed snapshot.
pub fn resolve_against(
    schema: &Schema,
    options: &MappingOptions,
    baseline: &OrdinalSnapshot,
) -> Result<Mapping, SchemaError> {
    let mut mapping = resolve(schema, options)?;
    let mut drift = Vec::new();
    for (table, old_columns) in &baseline.tables {
        let Some(current) = mapping.table(table) else {
            continue;
        };
        for (was, column) in old_columns.iter().enumerate() {
            match current.ordinal(column) {
                Some(now) if now != was => drift.push(ResolverWarning::OrdinalChanged {
                    table: table.clone(),
                    column: column.clone(),
                    was,
                    now,
                }),
                Some(_) => {}
                None => drift.push(ResolverWarning::ColumnRemoved {
                    table: table.clone(),
                    column: column.clone(),
                }),
            }
        }
    }
    for w in &drift {
        tracing::warn!(warning = %w, "ordinal stability");
    }
    mapping.warnings.extend(drift);
    Ok(mapping)
}

fn resolve_columns(
    schema: &Schema,
    m: &Model,
    table_names: &HashMap<ModelId, String>,
    options: &MappingOptions,
    warnings: &mut Vec<ResolverWarning>,
) -> Result<Vec<ColumnFact>, SchemaError> {
    let table = &table_names[&m.id];
    let mut cols = vec![ColumnFact {
        name: options.identity_column.clone(),
        ordinal: 0,
        field: None,
        field_name: None,
        kind: ColumnKind::Identity,
        storage: StorageClass::Integer,
        required: false,
        not_null: true,
        unique: false,
        default: None,
        version: m.version,
    }];

    let mut previous: Option<i64> = None;
    for f in schema.persisted_fields(m.id) {
        let name = column_name(f, options);
        if cols.iter().any(|c| c.name == name) {
            return Err(SchemaError::DuplicateColumn {
                model: m.name.clone(),
                column: name,
            });
        }
        if let Some(prev) = previous.filter(|p| f.number < *p) {
            warnings.push(ResolverWarning::NonMonotonicFieldIds {
                table: table.clone(),
                field: f.name.clone(),
                number: f.number,
                previous: prev,
            });
        }
        previous = Some(previous.map_or(f.number, |p| p.max(f.number)));

        let (kind, storage) = match f.kind {
            FieldKind::Primitive(p) => (ColumnKind::Primitive(p), p.storage_class()),
            FieldKind::ForeignKey(target) => (
                ColumnKind::ForeignKey {
                    target,
                    table: table_names.get(&target).cloned().unwrap_or_default(),
                },
                StorageClass::Integer,
            ),
            FieldKind::Relation { .. } | FieldKind::Reverse { .. } => continue,
        };
        cols.push(ColumnFact {
            ordinal: cols.len(),
            name,
            field: Some(f.id),
            field_name: Some(f.name.clone()),
            kind,
            storage,
            required: f.is_required(),
            not_null: f.is_required() && !f.modifiers.nullable,
            unique: f.modifiers.unique,
            default: f.modifiers.default.clone(),
            version: f.version,
        });
    }
    Ok(cols)
}

fn join_fragment(
    m: &Model,
    source: FieldId,
    dest: FieldId,
    table_names: &HashMap<ModelId, String>,
    columns: &HashMap<ModelId, Vec<ColumnFact>>,
) -> Result<JoinFragment, SchemaError> {
    let invalid = |reason: &str| SchemaError::InvalidJoinModel {
        model: m.name.clone(),
        reason: reason.to_string(),
    };
    let cols = &columns[&m.id];
    let refs: Vec<&ColumnFact> = cols
        .iter()
        .filter(|c| matches!(c.kind, ColumnKind::ForeignKey { .. }))
        .collect();
    if refs.len() != 2 || cols.len() != 3 {
        return Err(invalid("a join model must have exactly two reference fields"));
    }
    let join_table = table_names[&m.id].clone();
    let endpoint = |field: FieldId, alias_suffix: &str| -> Result<JoinEndpoint, SchemaError> {
        let col = refs
            .iter()
            .find(|c| c.field == Some(field))
            .ok_or_else(|| invalid("endpoint is not a persisted reference field"))?;
        let ColumnKind::ForeignKey { target, ref table } = col.kind else {
            return Err(invalid("endpoint is not a reference"));
        };
        Ok(JoinEndpoint {
            model: target,
            column: col.name.clone(),
            table: table.clone(),
            alias: format!("{}__{}", join_table, alias_suffix),
        })
    };
    let source = endpoint(source, "src")?;
    let dest = endpoint(dest, "dst")?;
    let identity = &cols[0].name;

    let on = |e: &JoinEndpoint| {
        format!(
            "INNER JOIN {} AS {} ON {}.{} = {}.{}",
            quoted(&e.table),
            quoted(&e.alias),
            quoted(&join_table),
            quoted(&e.column),
            quoted(&e.alias),
            quoted(identity)
        )
    };
    let sql = format!("{} {} {}", quoted(&join_table), on(&source), on(&dest));
    Ok(JoinFragment {
        join_model: m.id,
        join_table,
        source,
        dest,
        sql,
    })
}

fn kv_fact(schema: &Schema, m: &Model) -> KvFact {
    let entries = schema
        .persisted_fields(m.id)
        .filter_map(|f| match f.kind {
            FieldKind::Primitive(p) => Some(KvEntry {
                field: f.id,
                key: f.name.clone(),
                primitive: p,
                default: f.modifiers.default.clone(),
            }),
            _ => None,
        })
        .collect();
    KvFact {
        model: m.id,
        model_name: m.name.clone(),
        store_name: m.name.split('.').collect::<Vec<_>>().join("__"),
        entries,
    }
}
