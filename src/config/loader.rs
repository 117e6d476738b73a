//! Build the Schema IR from a validated document: type resolution, join-model
//! binding and synthesis, and back-reference fields.

use crate::case::to_snake_case;
use crate::config::types::*;
use crate::config::validate;
use crate::error::SchemaError;
use crate::schema::{
    DefaultValue, Field, FieldId, FieldKind, FieldValue, JoinSide, ModelId, ModelKind, Modifiers, Multiplicity,
    PrimitiveType, Schema, SchemaBuilder,
};
use chrono::{DateTime, Utc};
use std::path::Path;

enum TypeRef {
    Primitive(PrimitiveType),
    Model(ModelId),
}

struct PendingRelation {
    field: FieldId,
    owner: ModelId,
    target: ModelId,
    through: Option<String>,
    related_name: Option<String>,
}

pub fn parse_document(text: &str) -> Result<SchemaDocument, SchemaError> {
    serde_json::from_str(text).map_err(|e| SchemaError::Load(e.to_string()))
}

/// Read, parse and build a schema document from disk.
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<Schema, SchemaError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SchemaError::Load(format!("{}: {}", path.display(), e)))?;
    let doc = parse_document(&text)?;
    let schema = build_schema(&doc)?;
    tracing::info!(
        path = %path.display(),
        models = schema.models().len(),
        version = schema.version(),
        "schema loaded"
    );
    Ok(schema)
}

/// Validate the document and build the IR.
pub fn build_schema(doc: &SchemaDocument) -> Result<Schema, SchemaError> {
    validate(doc)?;

    let mut b = SchemaBuilder::default();
    for m in &doc.models {
        let kind = match m.kind {
            ModelKindConfig::KeyValue => ModelKind::KeyValue,
            // join endpoints are bound once fields exist
            ModelKindConfig::Table | ModelKindConfig::Join => ModelKind::Table,
        };
        b.add_model(&m.name, kind, m.version, false);
    }

    let mut pending = Vec::new();
    for (i, m) in doc.models.iter().enumerate() {
        let owner = ModelId(i);
        for f in &m.fields {
            let version = f.version.unwrap_or(m.version);
            let type_ref = resolve_type(&b, m, f)?;
            let kind = match (m.kind, type_ref) {
                (ModelKindConfig::KeyValue, TypeRef::Primitive(p)) if f.multiplicity != Multiplicity::Repeated => {
                    FieldKind::Primitive(p)
                }
                (ModelKindConfig::KeyValue, _) => {
                    return Err(SchemaError::InvalidKeyValueField {
                        model: m.name.clone(),
                        field: f.name.clone(),
                    })
                }
                (_, TypeRef::Primitive(_)) if f.multiplicity == Multiplicity::Repeated => {
                    return Err(SchemaError::RepeatedPrimitive {
                        model: m.name.clone(),
                        field: f.name.clone(),
                    })
                }
                (_, TypeRef::Primitive(p)) => FieldKind::Primitive(p),
                (_, TypeRef::Model(target)) => {
                    if b.model(target).kind == ModelKind::KeyValue {
                        return Err(SchemaError::KeyValueReference {
                            model: m.name.clone(),
                            field: f.name.clone(),
                        });
                    }
                    if f.multiplicity == Multiplicity::Repeated {
                        // placeholder, replaced when the join model is bound
                        FieldKind::Relation {
                            join: target,
                            side: JoinSide::Source,
                        }
                    } else {
                        FieldKind::ForeignKey(target)
                    }
                }
            };
            let field = Field {
                id: FieldId(0),
                owner,
                name: f.name.clone(),
                number: f.id,
                kind,
                multiplicity: f.multiplicity,
                version,
                modifiers: modifiers(m, f, kind)?,
            };
            let repeated_target = match kind {
                FieldKind::Relation { join, .. } => Some(join),
                _ => None,
            };
            let id = b.add_field(owner, field);
            if let Some(target) = repeated_target {
                pending.push(PendingRelation {
                    field: id,
                    owner,
                    target,
                    through: f.through.clone(),
                    related_name: f.related_name.clone(),
                });
            }
        }
    }

    for (i, m) in doc.models.iter().enumerate() {
        if m.kind == ModelKindConfig::Join {
            bind_join_model(&mut b, ModelId(i), m)?;
        }
    }

    for p in pending {
        bind_relation(&mut b, p)?;
    }

    add_reverse_fields(&mut b)?;
    Ok(b.finish())
}

fn resolve_type(b: &SchemaBuilder, m: &ModelConfig, f: &FieldConfig) -> Result<TypeRef, SchemaError> {
    match &f.type_ {
        FieldTypeConfig::Name(name) => {
            if let Some(p) = PrimitiveType::parse(name) {
                return Ok(TypeRef::Primitive(p));
            }
            b.model_id(name).map(TypeRef::Model).ok_or_else(|| SchemaError::UnknownType {
                model: m.name.clone(),
                field: f.name.clone(),
                type_name: name.clone(),
            })
        }
        FieldTypeConfig::Reference { target } => {
            b.model_id(target)
                .map(TypeRef::Model)
                .ok_or_else(|| SchemaError::MissingReference {
                    kind: "model",
                    name: target.clone(),
                })
        }
    }
}

fn modifiers(m: &ModelConfig, f: &FieldConfig, kind: FieldKind) -> Result<Modifiers, SchemaError> {
    let default = match &f.default {
        None => None,
        Some(DefaultConfig::Expression { expression }) => Some(DefaultValue::Expression(expression.clone())),
        Some(DefaultConfig::Literal(v)) => {
            let invalid = |expected: &'static str| SchemaError::InvalidDefault {
                model: m.name.clone(),
                field: f.name.clone(),
                expected,
            };
            let value = FieldValue::from_json(v).ok_or_else(|| invalid("a scalar literal"))?;
            Some(DefaultValue::Literal(literal_default(kind, value).map_err(invalid)?))
        }
    };
    Ok(Modifiers {
        unique: f.unique,
        nullable: f.nullable,
        default,
        related_name: f.related_name.clone(),
    })
}

/// Coerce a JSON literal default into the value the field stores. Temporal fields
/// take an RFC 3339 string or epoch milliseconds.
fn literal_default(kind: FieldKind, value: FieldValue) -> Result<FieldValue, &'static str> {
    if value.is_null() {
        return Ok(value);
    }
    let prim = match kind {
        FieldKind::Primitive(p) => p,
        FieldKind::ForeignKey(_) => {
            return match value {
                FieldValue::Integer(id) => Ok(FieldValue::Reference(id)),
                _ => Err("an integer row identity"),
            }
        }
        FieldKind::Relation { .. } | FieldKind::Reverse { .. } => return Err("no literal (relations have no column)"),
    };
    match (prim, value) {
        (PrimitiveType::Bool, FieldValue::Bool(b)) => Ok(FieldValue::Bool(b)),
        (PrimitiveType::Bool, _) => Err("a boolean"),
        (p, FieldValue::Text(s)) if p.is_temporal() => DateTime::parse_from_rfc3339(&s)
            .map(|t| FieldValue::Instant(t.with_timezone(&Utc)))
            .map_err(|_| "an RFC 3339 timestamp or epoch milliseconds"),
        (p, FieldValue::Integer(ms)) if p.is_temporal() => DateTime::from_timestamp_millis(ms)
            .map(FieldValue::Instant)
            .ok_or("an RFC 3339 timestamp or epoch milliseconds"),
        (p, _) if p.is_temporal() => Err("an RFC 3339 timestamp or epoch milliseconds"),
        (p, FieldValue::Integer(i)) if p.is_integer() => Ok(FieldValue::Integer(i)),
        (p, _) if p.is_integer() => Err("an integer"),
        (p, FieldValue::Real(r)) if p.is_real() => Ok(FieldValue::Real(r)),
        (p, FieldValue::Integer(i)) if p.is_real() => Ok(FieldValue::Real(i as f64)),
        (p, _) if p.is_real() => Err("a number"),
        (PrimitiveType::String, FieldValue::Text(s)) => Ok(FieldValue::Text(s)),
        (PrimitiveType::String, _) => Err("a string"),
        (_, _) => Err("null (bytes take no literal default)"),
    }
}

fn find_field(b: &SchemaBuilder, model: ModelId, name: &str) -> Option<FieldId> {
    b.model(model)
        .fields
        .iter()
        .copied()
        .find(|f| b.field(*f).name == name)
}

/// A join model holds exactly two persisted reference fields: its declared endpoints.
fn bind_join_model(b: &mut SchemaBuilder, id: ModelId, m: &ModelConfig) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidJoinModel {
        model: m.name.clone(),
        reason,
    };
    let persisted: Vec<FieldId> = b
        .model(id)
        .fields
        .iter()
        .copied()
        .filter(|f| b.field(*f).is_persisted())
        .collect();
    if persisted.len() != 2 || persisted.iter().any(|f| b.field(*f).references().is_none()) {
        return Err(invalid("a join model must have exactly two reference fields".into()));
    }
    let endpoint = |name: &Option<String>| -> Result<FieldId, SchemaError> {
        let name = name.as_deref().unwrap_or_default();
        find_field(b, id, name)
            .filter(|f| persisted.contains(f))
            .ok_or_else(|| invalid(format!("{} is not a persisted reference field", name)))
    };
    let source = endpoint(&m.source_field)?;
    let dest = endpoint(&m.dest_field)?;
    b.model_mut(id).kind = ModelKind::Join { source, dest };
    Ok(())
}

fn bind_relation(b: &mut SchemaBuilder, p: PendingRelation) -> Result<(), SchemaError> {
    let (join, side) = match &p.through {
        Some(name) => {
            let join = b.model_id(name).ok_or_else(|| SchemaError::MissingReference {
                kind: "join model",
                name: name.clone(),
            })?;
            let invalid = |reason: String| SchemaError::InvalidJoinModel {
                model: name.clone(),
                reason,
            };
            let ModelKind::Join { source, dest } = b.model(join).kind else {
                return Err(invalid("not declared with kind \"join\"".into()));
            };
            let s = b.field(source).references();
            let d = b.field(dest).references();
            if s == Some(p.owner) && d == Some(p.target) {
                (join, JoinSide::Source)
            } else if d == Some(p.owner) && s == Some(p.target) {
                (join, JoinSide::Dest)
            } else {
                return Err(invalid(format!(
                    "does not connect {} and {}",
                    b.model(p.owner).name,
                    b.model(p.target).name
                )));
            }
        }
        None => (synthesize_join(b, &p)?, JoinSide::Source),
    };
    b.field_mut(p.field).kind = FieldKind::Relation { join, side };

    if let Some(name) = p.related_name {
        if find_field(b, p.target, &name).is_some() {
            return Err(SchemaError::DuplicateField {
                model: b.model(p.target).name.clone(),
                field: name,
            });
        }
        let version = b.field(p.field).version;
        b.add_field(
            p.target,
            Field {
                id: FieldId(0),
                owner: p.target,
                name,
                number: 0,
                kind: FieldKind::Relation {
                    join,
                    side: side.opposite(),
                },
                multiplicity: Multiplicity::Repeated,
                version,
                modifiers: Modifiers::default(),
            },
        );
    }
    Ok(())
}

/// Join model `<owner>_<field>` at the field's version. Endpoint fields are named
/// after the two models, prefixed `from_`/`to_` when the names coincide.
fn synthesize_join(b: &mut SchemaBuilder, p: &PendingRelation) -> Result<ModelId, SchemaError> {
    let field = b.field(p.field);
    let name = format!("{}_{}", b.model(p.owner).name, field.name);
    let version = field.version;
    if b.model_id(&name).is_some() {
        return Err(SchemaError::DuplicateModel(name));
    }
    let owner_short = to_snake_case(b.model(p.owner).short_name());
    let target_short = to_snake_case(b.model(p.target).short_name());
    let (source_name, dest_name) = if owner_short == target_short {
        (format!("from_{}", owner_short), format!("to_{}", target_short))
    } else {
        (owner_short, target_short)
    };

    let join = b.add_model(&name, ModelKind::Table, version, true);
    let endpoint = |name: String, number: i64, target: ModelId| Field {
        id: FieldId(0),
        owner: join,
        name,
        number,
        kind: FieldKind::ForeignKey(target),
        multiplicity: Multiplicity::Required,
        version,
        modifiers: Modifiers::default(),
    };
    let source = b.add_field(join, endpoint(source_name, 1, p.owner));
    let dest = b.add_field(join, endpoint(dest_name, 2, p.target));
    b.model_mut(join).kind = ModelKind::Join { source, dest };
    tracing::debug!(join = %name, "synthesized join model");
    Ok(join)
}

/// Every persisted foreign key of a table model gets a read-only back-reference on its
/// target, named by `related_name` or `<owner>_set`, numbered with the negated key id.
fn add_reverse_fields(b: &mut SchemaBuilder) -> Result<(), SchemaError> {
    let mut keys = Vec::new();
    for m in b.model_ids() {
        let model = b.model(m);
        if model.kind != ModelKind::Table {
            continue;
        }
        for f in &model.fields {
            let field = b.field(*f);
            if let (true, Some(target)) = (field.is_persisted(), field.references()) {
                keys.push((*f, target));
            }
        }
    }

    for (fk, target) in keys {
        let field = b.field(fk);
        let child = field.owner;
        let name = field
            .modifiers
            .related_name
            .clone()
            .unwrap_or_else(|| format!("{}_set", to_snake_case(b.model(child).short_name())));
        if find_field(b, target, &name).is_some() {
            return Err(SchemaError::DuplicateField {
                model: b.model(target).name.clone(),
                field: name,
            });
        }
        let reverse = Field {
            id: FieldId(0),
            owner: target,
            name,
            number: -field.number,
            kind: FieldKind::Reverse { child, via: fk },
            multiplicity: Multiplicity::Repeated,
            version: field.version,
            modifiers: Modifiers::default(),
        };
        b.add_field(target, reverse);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{blog_document, blog_schema};
    use serde_json::json;

    fn build(v: serde_json::Value) -> Result<Schema, SchemaError> {
        build_schema(&serde_json::from_value(v).unwrap())
    }

    #[test]
    fn explicit_join_model_binds_owner_to_source_side() {
        let schema = blog_schema();
        let post = schema.model_by_name("blog.post").unwrap();
        let tags = schema.field_by_name(post.id, "tags").unwrap();
        let join = schema.model_by_name("blog.post_tag").unwrap();
        assert_eq!(
            tags.kind,
            FieldKind::Relation {
                join: join.id,
                side: JoinSide::Source
            }
        );
        // related_name on the repeated field mirrors it on the target
        let tag = schema.model_by_name("blog.tag").unwrap();
        let posts = schema.field_by_name(tag.id, "posts").unwrap();
        assert_eq!(
            posts.kind,
            FieldKind::Relation {
                join: join.id,
                side: JoinSide::Dest
            }
        );
    }

    #[test]
    fn self_referential_repeated_field_synthesizes_join() {
        let schema = blog_schema();
        let join = schema.model_by_name("blog.user_friends").unwrap();
        assert!(join.synthesized);
        assert_eq!(join.version, 3);
        let names: Vec<&str> = schema.fields_of(join.id).map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["from_user", "to_user"]);
        let numbers: Vec<i64> = schema.fields_of(join.id).map(|f| f.number).collect();
        assert_eq!(numbers, [1, 2]);
    }

    #[test]
    fn foreign_keys_get_back_references() {
        let schema = blog_schema();
        let user = schema.model_by_name("blog.user").unwrap();
        let posts = schema.field_by_name(user.id, "posts").unwrap();
        let post = schema.model_by_name("blog.post").unwrap();
        let author = schema.field_by_name(post.id, "author").unwrap();
        assert_eq!(
            posts.kind,
            FieldKind::Reverse {
                child: post.id,
                via: author.id
            }
        );
        assert_eq!(posts.number, -1);
        assert!(!posts.is_persisted());

        let comment = schema.model_by_name("blog.comment").unwrap();
        assert!(schema.field_by_name(post.id, "comment_set").is_some());
        assert!(schema.field_by_name(comment.id, "post").is_some());
    }

    #[test]
    fn rejects_repeated_primitives_and_key_value_references() {
        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "tags", "id": 1, "type": "string", "multiplicity": "repeated" }
        ] }] }));
        assert!(matches!(err, Err(SchemaError::RepeatedPrimitive { .. })));

        let err = build(json!({ "models": [
            { "name": "a.prefs", "kind": "key_value", "fields": [{ "name": "theme", "id": 1, "type": "string" }] },
            { "name": "a.x", "fields": [{ "name": "prefs", "id": 1, "type": { "ref": "a.prefs" } }] }
        ] }));
        assert!(matches!(err, Err(SchemaError::KeyValueReference { .. })));
    }

    #[test]
    fn unknown_types_and_references_fail() {
        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "y", "id": 1, "type": "a.missing" }
        ] }] }));
        assert!(matches!(err, Err(SchemaError::UnknownType { .. })));

        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "y", "id": 1, "type": { "ref": "a.missing" } }
        ] }] }));
        assert_eq!(
            err.unwrap_err(),
            SchemaError::MissingReference {
                kind: "model",
                name: "a.missing".into()
            }
        );
    }

    #[test]
    fn join_model_with_extra_payload_is_invalid() {
        let err = build(json!({ "models": [
            { "name": "a.x" },
            { "name": "a.j", "kind": "join", "source_field": "l", "dest_field": "r", "fields": [
                { "name": "l", "id": 1, "type": "a.x" },
                { "name": "r", "id": 2, "type": "a.x" },
                { "name": "note", "id": 3, "type": "string" }
            ] }
        ] }));
        assert!(matches!(err, Err(SchemaError::InvalidJoinModel { .. })));
    }

    #[test]
    fn through_must_connect_owner_and_target() {
        let mut doc = blog_document();
        doc["models"][1]["fields"][2]["type"] = json!({ "ref": "blog.user" });
        let err = build(doc);
        assert!(matches!(err, Err(SchemaError::InvalidJoinModel { ref model, .. }) if model == "blog.post_tag"));
    }

    #[test]
    fn literal_defaults_must_match_the_field_type() {
        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "n", "id": 1, "type": "int32", "default": "abc" }
        ] }] }));
        assert_eq!(
            err.unwrap_err(),
            SchemaError::InvalidDefault {
                model: "a.x".into(),
                field: "n".into(),
                expected: "an integer",
            }
        );

        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "on", "id": 1, "type": "bool", "default": "yes" }
        ] }] }));
        assert!(matches!(err, Err(SchemaError::InvalidDefault { ref field, .. }) if field == "on"));

        let ok = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "ratio", "id": 1, "type": "double", "default": 2 },
            { "name": "note", "id": 2, "type": "string", "default": null }
        ] }] }))
        .unwrap();
        let x = ok.model_by_name("a.x").unwrap();
        assert_eq!(
            ok.field_by_name(x.id, "ratio").unwrap().modifiers.default,
            Some(DefaultValue::Literal(FieldValue::Real(2.0)))
        );
    }

    #[test]
    fn temporal_defaults_accept_rfc3339() {
        let schema = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "since", "id": 1, "type": "timestamp", "default": "2024-01-02T03:04:05.678Z" },
            { "name": "until", "id": 2, "type": "date", "default": 0 }
        ] }] }))
        .unwrap();
        let x = schema.model_by_name("a.x").unwrap();
        let since = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.678Z").unwrap().with_timezone(&Utc);
        assert_eq!(
            schema.field_by_name(x.id, "since").unwrap().modifiers.default,
            Some(DefaultValue::Literal(FieldValue::Instant(since)))
        );
        assert_eq!(
            schema.field_by_name(x.id, "until").unwrap().modifiers.default,
            Some(DefaultValue::Literal(FieldValue::Instant(DateTime::UNIX_EPOCH)))
        );

        let err = build(json!({ "models": [{ "name": "a.x", "fields": [
            { "name": "since", "id": 1, "type": "timestamp", "default": "yesterday" }
        ] }] }));
        assert!(matches!(err, Err(SchemaError::InvalidDefault { .. })));
    }

    #[tokio::test]
    async fn load_from_path_reports_missing_file() {
        let err = load_from_path("/nonexistent/relmap/schema.json").await.unwrap_err();
        assert!(matches!(err, SchemaError::Load(_)));
    }
}
