//! Schema IR: an immutable arena of models and fields with version tags.
//!
//! Models and fields are addressed by index (`ModelId`, `FieldId`), so self- and
//! mutual references need no ownership tricks. Built once by the loader.

mod value;

pub use value::{DefaultValue, FieldValue};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Int,
    Long,
    Date,
    Timestamp,
    Time,
    Bool,
    String,
    Bytes,
}

/// Physical storage class of a column cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Integer,
    Real,
    Text,
    Blob,
}

impl StorageClass {
    pub fn name(self) -> &'static str {
        match self {
            StorageClass::Integer => "integer",
            StorageClass::Real => "real",
            StorageClass::Text => "text",
            StorageClass::Blob => "blob",
        }
    }
}

impl PrimitiveType {
    pub fn parse(name: &str) -> Option<Self> {
        use PrimitiveType::*;
        Some(match name {
            "double" => Double,
            "float" => Float,
            "int32" => Int32,
            "int64" => Int64,
            "uint32" => UInt32,
            "uint64" => UInt64,
            "sint32" => SInt32,
            "sint64" => SInt64,
            "fixed32" => Fixed32,
            "fixed64" => Fixed64,
            "sfixed32" => SFixed32,
            "sfixed64" => SFixed64,
            "int" => Int,
            "long" => Long,
            "date" => Date,
            "timestamp" => Timestamp,
            "time" => Time,
            "bool" => Bool,
            "string" => String,
            "bytes" => Bytes,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use PrimitiveType::*;
        match self {
            Double => "double",
            Float => "float",
            Int32 => "int32",
            Int64 => "int64",
            UInt32 => "uint32",
            UInt64 => "uint64",
            SInt32 => "sint32",
            SInt64 => "sint64",
            Fixed32 => "fixed32",
            Fixed64 => "fixed64",
            SFixed32 => "sfixed32",
            SFixed64 => "sfixed64",
            Int => "int",
            Long => "long",
            Date => "date",
            Timestamp => "timestamp",
            Time => "time",
            Bool => "bool",
            String => "string",
            Bytes => "bytes",
        }
    }

    pub fn is_integer(self) -> bool {
        use PrimitiveType::*;
        matches!(
            self,
            Int32 | Int64 | UInt32 | UInt64 | SInt32 | SInt64 | Fixed32 | Fixed64 | SFixed32 | SFixed64 | Int | Long
        )
    }

    pub fn is_real(self) -> bool {
        matches!(self, PrimitiveType::Double | PrimitiveType::Float)
    }

    /// Date, timestamp and time are stored as integer milliseconds since the Unix epoch.
    pub fn is_temporal(self) -> bool {
        matches!(self, PrimitiveType::Date | PrimitiveType::Timestamp | PrimitiveType::Time)
    }

    pub fn storage_class(self) -> StorageClass {
        match self {
            PrimitiveType::String => StorageClass::Text,
            PrimitiveType::Bytes => StorageClass::Blob,
            t if t.is_real() => StorageClass::Real,
            _ => StorageClass::Integer,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    Required,
    #[default]
    Optional,
    Repeated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Source,
    Dest,
}

impl JoinSide {
    pub fn opposite(self) -> Self {
        match self {
            JoinSide::Source => JoinSide::Dest,
            JoinSide::Dest => JoinSide::Source,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Table,
    /// Many-to-many association; `source` and `dest` are its two reference fields.
    Join { source: FieldId, dest: FieldId },
    KeyValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Primitive(PrimitiveType),
    ForeignKey(ModelId),
    /// Navigated through a join model; the owner sits on `side`.
    Relation { join: ModelId, side: JoinSide },
    /// Back-reference: rows of `child` whose foreign key `via` points at the owner.
    Reverse { child: ModelId, via: FieldId },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Modifiers {
    pub unique: bool,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
    pub related_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub kind: ModelKind,
    pub version: u32,
    pub fields: Vec<FieldId>,
    /// Created by the loader for a repeated reference without an explicit join model.
    pub synthesized: bool,
}

impl Model {
    pub fn is_table_backed(&self) -> bool {
        !matches!(self.kind, ModelKind::KeyValue)
    }

    pub fn is_join(&self) -> bool {
        matches!(self.kind, ModelKind::Join { .. })
    }

    /// Last segment of the qualified name: "blog.post_tag" -> "post_tag".
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug)]
pub struct Field {
    pub id: FieldId,
    pub owner: ModelId,
    pub name: String,
    /// Field number; `<= 0` marks a structural field that is never stored.
    pub number: i64,
    pub kind: FieldKind,
    pub multiplicity: Multiplicity,
    pub version: u32,
    pub modifiers: Modifiers,
}

impl Field {
    /// Materialized as a column: positive number, not repeated, primitive or foreign key.
    pub fn is_persisted(&self) -> bool {
        self.number > 0
            && self.multiplicity != Multiplicity::Repeated
            && matches!(self.kind, FieldKind::Primitive(_) | FieldKind::ForeignKey(_))
    }

    pub fn is_required(&self) -> bool {
        self.multiplicity == Multiplicity::Required
    }

    pub fn references(&self) -> Option<ModelId> {
        match self.kind {
            FieldKind::ForeignKey(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Schema {
    models: Vec<Model>,
    fields: Vec<Field>,
    by_name: HashMap<String, ModelId>,
}

impl Schema {
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub fn model_by_name(&self, name: &str) -> Option<&Model> {
        self.by_name.get(name).map(|id| self.model(*id))
    }

    pub fn fields_of(&self, model: ModelId) -> impl Iterator<Item = &Field> + '_ {
        self.model(model).fields.iter().map(move |f| self.field(*f))
    }

    pub fn field_by_name(&self, model: ModelId, name: &str) -> Option<&Field> {
        self.fields_of(model).find(|f| f.name == name)
    }

    pub fn persisted_fields(&self, model: ModelId) -> impl Iterator<Item = &Field> + '_ {
        self.fields_of(model).filter(|f| f.is_persisted())
    }

    /// Models this model's foreign keys point at (self-references excluded).
    pub fn dependencies(&self, model: ModelId) -> Vec<ModelId> {
        let mut out = Vec::new();
        for f in self.persisted_fields(model) {
            if let Some(target) = f.references() {
                if target != model && !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }

    /// Stable topological order: declaration order wherever it already satisfies
    /// dependencies. A cycle releases its first remaining model in declaration order.
    pub fn dependency_order(&self) -> Vec<ModelId> {
        let ids: Vec<ModelId> = self.models.iter().map(|m| m.id).collect();
        self.order_subset(&ids)
    }

    pub(crate) fn order_subset(&self, subset: &[ModelId]) -> Vec<ModelId> {
        let members: HashSet<ModelId> = subset.iter().copied().collect();
        let mut emitted: HashSet<ModelId> = HashSet::new();
        let mut remaining: Vec<ModelId> = subset.to_vec();
        let mut out = Vec::with_capacity(subset.len());
        while !remaining.is_empty() {
            let ready = remaining.iter().position(|m| {
                self.dependencies(*m)
                    .iter()
                    .all(|d| emitted.contains(d) || !members.contains(d))
            });
            let next = remaining.remove(ready.unwrap_or(0));
            emitted.insert(next);
            out.push(next);
        }
        out
    }

    /// Global schema version: maximum over models and fields, never below 1.
    pub fn version(&self) -> u32 {
        self.models
            .iter()
            .map(|m| m.version)
            .chain(self.fields.iter().map(|f| f.version))
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// The schema as it stood at version `v`: later models and fields are dropped,
    /// together with anything that refers to them. Ids are renumbered.
    pub fn truncated(&self, v: u32) -> Schema {
        let keep_model: Vec<bool> = self
            .models
            .iter()
            .map(|m| {
                m.version <= v
                    && match m.kind {
                        ModelKind::Join { source, dest } => [source, dest].iter().all(|f| {
                            let f = self.field(*f);
                            f.version <= v && f.references().map_or(true, |t| self.model(t).version <= v)
                        }),
                        _ => true,
                    }
            })
            .collect();
        let keep_field = |f: &Field| -> bool {
            if f.version > v || !keep_model[f.owner.0] {
                return false;
            }
            match f.kind {
                FieldKind::Primitive(_) => true,
                FieldKind::ForeignKey(t) => keep_model[t.0],
                FieldKind::Relation { join, .. } => keep_model[join.0],
                FieldKind::Reverse { child, via } => {
                    keep_model[child.0] && self.field(via).version <= v
                }
            }
        };

        let mut builder = SchemaBuilder::default();
        let mut model_map: HashMap<ModelId, ModelId> = HashMap::new();
        for m in self.models.iter().filter(|m| keep_model[m.id.0]) {
            let id = builder.add_model(&m.name, m.kind, m.version, m.synthesized);
            model_map.insert(m.id, id);
        }
        let mut field_map: HashMap<FieldId, FieldId> = HashMap::new();
        for m in self.models.iter().filter(|m| keep_model[m.id.0]) {
            for f in self.fields_of(m.id).filter(|f| keep_field(f)) {
                let new_id = builder.add_field(model_map[&f.owner], f.clone());
                field_map.insert(f.id, new_id);
            }
        }
        for f in builder.fields.iter_mut() {
            f.kind = match f.kind {
                FieldKind::Primitive(p) => FieldKind::Primitive(p),
                FieldKind::ForeignKey(t) => FieldKind::ForeignKey(model_map[&t]),
                FieldKind::Relation { join, side } => FieldKind::Relation {
                    join: model_map[&join],
                    side,
                },
                FieldKind::Reverse { child, via } => FieldKind::Reverse {
                    child: model_map[&child],
                    via: field_map[&via],
                },
            };
        }
        for m in builder.models.iter_mut() {
            if let ModelKind::Join { source, dest } = m.kind {
                m.kind = ModelKind::Join {
                    source: field_map[&source],
                    dest: field_map[&dest],
                };
            }
        }
        builder.finish()
    }
}

/// Incremental construction of a `Schema`; used by the loader and by truncation.
#[derive(Default)]
pub(crate) struct SchemaBuilder {
    models: Vec<Model>,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub(crate) fn add_model(&mut self, name: &str, kind: ModelKind, version: u32, synthesized: bool) -> ModelId {
        let id = ModelId(self.models.len());
        self.models.push(Model {
            id,
            name: name.to_string(),
            kind,
            version,
            fields: Vec::new(),
            synthesized,
        });
        id
    }

    /// Append a field to `owner`. The field's own `id` and `owner` are overwritten.
    pub(crate) fn add_field(&mut self, owner: ModelId, mut field: Field) -> FieldId {
        let id = FieldId(self.fields.len());
        field.id = id;
        field.owner = owner;
        self.fields.push(field);
        self.models[owner.0].fields.push(id);
        id
    }

    pub(crate) fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub(crate) fn model_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0]
    }

    pub(crate) fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub(crate) fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0]
    }

    pub(crate) fn model_ids(&self) -> Vec<ModelId> {
        self.models.iter().map(|m| m.id).collect()
    }

    pub(crate) fn model_id(&self, name: &str) -> Option<ModelId> {
        self.models.iter().find(|m| m.name == name).map(|m| m.id)
    }

    pub(crate) fn finish(self) -> Schema {
        let by_name = self.models.iter().map(|m| (m.name.clone(), m.id)).collect();
        Schema {
            models: self.models,
            fields: self.fields,
            by_name,
        }
    }
}
