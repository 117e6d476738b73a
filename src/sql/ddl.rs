//! DDL rendering for resolved tables: CREATE TABLE and ALTER TABLE ... ADD COLUMN.

use crate::resolver::{ColumnFact, ColumnKind};
use crate::schema::{DefaultValue, FieldValue};
use crate::sql::params::pg_type;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Render a literal default as SQL, encoded the way the column stores it.
pub fn sql_literal(v: &FieldValue) -> String {
    match v {
        FieldValue::Null => "NULL".into(),
        FieldValue::Integer(i) | FieldValue::Reference(i) => i.to_string(),
        FieldValue::Real(f) => format!("{:?}", f),
        FieldValue::Bool(b) => i64::from(*b).to_string(),
        FieldValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        FieldValue::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
            format!("'\\x{}'::BYTEA", hex)
        }
        FieldValue::Instant(t) => t.timestamp_millis().to_string(),
    }
}

/// One column definition. Foreign keys get a REFERENCES clause only when
/// `reference_identity` names the target's identity column.
pub fn column_definition(col: &ColumnFact, reference_identity: Option<&str>) -> String {
    if col.is_identity() {
        return format!("{} BIGSERIAL PRIMARY KEY", quote(&col.name));
    }
    let mut def = format!("{} {}", quote(&col.name), pg_type(col.storage));
    if col.not_null {
        def.push_str(" NOT NULL");
    }
    if col.unique {
        def.push_str(" UNIQUE");
    }
    if let Some(ref d) = col.default {
        def.push_str(" DEFAULT ");
        match d {
            DefaultValue::Literal(v) => def.push_str(&sql_literal(v)),
            DefaultValue::Expression(e) => def.push_str(e),
        }
    }
    if let (ColumnKind::ForeignKey { table, .. }, Some(identity)) = (&col.kind, reference_identity) {
        def.push_str(&format!(" REFERENCES {} ({})", quote(table), quote(identity)));
    }
    def
}

/// CREATE TABLE with the given columns. `references` decides per target table whether
/// a REFERENCES clause can be emitted (the target must already exist).
pub fn create_table(
    table: &str,
    columns: &[ColumnFact],
    unique_groups: &[Vec<String>],
    references: impl Fn(&str) -> bool,
) -> String {
    let identity = columns.first().map(|c| c.name.as_str()).unwrap_or("_id");
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| {
            let target_exists = match &c.kind {
                ColumnKind::ForeignKey { table: target, .. } => target == table || references(target),
                _ => false,
            };
            column_definition(c, target_exists.then_some(identity))
        })
        .collect();
    for group in unique_groups {
        if group.iter().all(|g| columns.iter().any(|c| &c.name == g)) {
            let cols: Vec<String> = group.iter().map(|s| quote(s)).collect();
            defs.push(format!("UNIQUE ({})", cols.join(", ")));
        }
    }
    format!("CREATE TABLE {} ({})", quote(table), defs.join(", "))
}

pub fn add_column(table: &str, col: &ColumnFact, reference_identity: Option<&str>) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote(table),
        column_definition(col, reference_identity)
    )
}
