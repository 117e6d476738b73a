//! Per-model structural facts produced by the resolver.

use crate::schema::{DefaultValue, FieldId, JoinSide, ModelId, PrimitiveType, StorageClass};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnKind {
    Identity,
    Primitive(PrimitiveType),
    /// Holds the identity of a row in `table`.
    ForeignKey { target: ModelId, table: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnFact {
    pub name: String,
    pub ordinal: usize,
    /// `None` for the identity column.
    pub field: Option<FieldId>,
    pub field_name: Option<String>,
    pub kind: ColumnKind,
    pub storage: StorageClass,
    /// Must be explicitly provided on save.
    pub required: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<DefaultValue>,
    /// Schema version that introduced the column.
    pub version: u32,
}

impl ColumnFact {
    pub fn is_identity(&self) -> bool {
        self.kind == ColumnKind::Identity
    }

    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self.kind {
            ColumnKind::Primitive(p) => Some(p),
            _ => None,
        }
    }
}

/// One side of a join fragment: the join table's foreign key and the aliased table it binds.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinEndpoint {
    /// Model the endpoint references.
    pub model: ModelId,
    pub column: String,
    pub table: String,
    pub alias: String,
}

/// `"J" INNER JOIN "S" AS "J__src" ON ... INNER JOIN "D" AS "J__dst" ON ...`,
/// built once per join model and shared by every query that navigates it.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinFragment {
    pub join_model: ModelId,
    pub join_table: String,
    pub source: JoinEndpoint,
    pub dest: JoinEndpoint,
    pub sql: String,
}

impl JoinFragment {
    pub fn endpoint(&self, side: JoinSide) -> &JoinEndpoint {
        match side {
            JoinSide::Source => &self.source,
            JoinSide::Dest => &self.dest,
        }
    }
}

/// `INNER JOIN "child" AS "<table>__<relation>" ON ... = "<table>"."_id"` for a back-reference.
#[derive(Clone, Debug, PartialEq)]
pub struct ReverseFragment {
    pub child: ModelId,
    pub child_table: String,
    pub fk_column: String,
    pub alias: String,
    pub sql: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RelationPath {
    /// Through a join model; the owning table sits on `side`.
    Join {
        side: JoinSide,
        fragment: Arc<JoinFragment>,
    },
    Reverse(Arc<ReverseFragment>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RelationFact {
    pub name: String,
    pub field: FieldId,
    /// Model whose rows the relation reaches.
    pub target: ModelId,
    pub target_table: String,
    pub path: RelationPath,
}

impl RelationFact {
    /// Alias under which the related rows appear in a query.
    pub fn far_alias(&self) -> &str {
        match &self.path {
            RelationPath::Join { side, fragment } => &fragment.endpoint(side.opposite()).alias,
            RelationPath::Reverse(r) => &r.alias,
        }
    }

    pub fn join_model(&self) -> Option<ModelId> {
        match &self.path {
            RelationPath::Join { fragment, .. } => Some(fragment.join_model),
            RelationPath::Reverse(_) => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.path, RelationPath::Join { .. })
    }
}

#[derive(Clone, Debug)]
pub struct TableFact {
    pub model: ModelId,
    pub model_name: String,
    pub table_name: String,
    pub version: u32,
    /// Ordinal order; index 0 is the identity column.
    pub columns: Vec<ColumnFact>,
    pub field_columns: HashMap<FieldId, usize>,
    pub ordinals: HashMap<String, usize>,
    pub unique_groups: Vec<Vec<String>>,
    pub relations: Vec<RelationFact>,
    pub join: Option<Arc<JoinFragment>>,
}

impl TableFact {
    pub fn identity(&self) -> &ColumnFact {
        &self.columns[0]
    }

    pub fn ordinal(&self, column: &str) -> Option<usize> {
        self.ordinals.get(column).copied()
    }

    /// Look up by column name, falling back to the field name ("author" finds "author_id").
    pub fn column(&self, name: &str) -> Option<&ColumnFact> {
        self.ordinal(name)
            .map(|o| &self.columns[o])
            .or_else(|| self.columns.iter().find(|c| c.field_name.as_deref() == Some(name)))
    }

    pub fn column_for_field(&self, field: FieldId) -> Option<&ColumnFact> {
        self.field_columns.get(&field).map(|o| &self.columns[*o])
    }

    pub fn relation(&self, name: &str) -> Option<&RelationFact> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Columns that existed at schema version `v`, in ordinal order.
    pub fn columns_as_of(&self, v: u32) -> impl Iterator<Item = &ColumnFact> + '_ {
        self.columns.iter().filter(move |c| c.is_identity() || c.version <= v)
    }

    pub fn is_join(&self) -> bool {
        self.join.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KvEntry {
    pub field: FieldId,
    pub key: String,
    pub primitive: PrimitiveType,
    pub default: Option<DefaultValue>,
}

/// Key-value models bypass tables entirely: field name -> storage key.
#[derive(Clone, Debug, PartialEq)]
pub struct KvFact {
    pub model: ModelId,
    pub model_name: String,
    /// Name of the backing store: qualified name joined with "__".
    pub store_name: String,
    pub entries: Vec<KvEntry>,
}

impl KvFact {
    pub fn key(&self, field: &str) -> Option<&str> {
        self.entries.iter().find(|e| e.key == field).map(|e| e.key.as_str())
    }
}
