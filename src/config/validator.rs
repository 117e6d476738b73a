//! Document validation: identifiers, uniqueness, versions and join declarations.

use crate::config::{ModelConfig, ModelKindConfig, SchemaDocument};
use crate::error::SchemaError;
use regex::Regex;
use std::collections::HashSet;

const IDENTIFIER: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

pub fn validate(doc: &SchemaDocument) -> Result<(), SchemaError> {
    let ident = Regex::new(IDENTIFIER).map_err(|e| SchemaError::Load(e.to_string()))?;
    let check = |name: &str| -> Result<(), SchemaError> {
        if ident.is_match(name) {
            Ok(())
        } else {
            Err(SchemaError::InvalidIdentifier(name.to_string()))
        }
    };

    let mut model_names = HashSet::new();
    for m in &doc.models {
        if m.name.is_empty() {
            return Err(SchemaError::InvalidIdentifier(m.name.clone()));
        }
        for segment in m.name.split('.') {
            check(segment)?;
        }
        if !model_names.insert(m.name.as_str()) {
            return Err(SchemaError::DuplicateModel(m.name.clone()));
        }
        if m.version < 1 {
            return Err(SchemaError::InvalidVersion(m.name.clone()));
        }

        let mut field_names = HashSet::new();
        let mut field_ids = HashSet::new();
        for f in &m.fields {
            check(&f.name)?;
            if let Some(ref rn) = f.related_name {
                check(rn)?;
            }
            if !field_names.insert(f.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    model: m.name.clone(),
                    field: f.name.clone(),
                });
            }
            if f.id > 0 && !field_ids.insert(f.id) {
                return Err(SchemaError::DuplicateFieldId {
                    model: m.name.clone(),
                    id: f.id,
                });
            }
            if f.version == Some(0) {
                return Err(SchemaError::InvalidVersion(format!("{}.{}", m.name, f.name)));
            }
        }

        if m.kind == ModelKindConfig::Join {
            validate_join_declaration(m)?;
        }
    }
    Ok(())
}

fn validate_join_declaration(m: &ModelConfig) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidJoinModel {
        model: m.name.clone(),
        reason,
    };
    let (source, dest) = match (&m.source_field, &m.dest_field) {
        (Some(s), Some(d)) => (s, d),
        _ => return Err(invalid("source_field and dest_field are required".into())),
    };
    if source == dest {
        return Err(invalid("source_field and dest_field must differ".into()));
    }
    for name in [source, dest] {
        let field = m
            .fields
            .iter()
            .find(|f| &f.name == name)
            .ok_or_else(|| invalid(format!("no field named {}", name)))?;
        if field.version.is_some_and(|v| v != m.version) {
            return Err(invalid(format!(
                "endpoint {} must be introduced with the join model",
                name
            )));
        }
    }
    Ok(())
}
