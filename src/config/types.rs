//! Raw schema document types matching the JSON input format.

use crate::schema::Multiplicity;
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchemaDocument {
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKindConfig {
    #[default]
    Table,
    Join,
    KeyValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Qualified name, dot-separated ("blog.post").
    pub name: String,
    #[serde(default)]
    pub kind: ModelKindConfig,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    /// Join models only: name of the field holding the source reference.
    #[serde(default)]
    pub source_field: Option<String>,
    #[serde(default)]
    pub dest_field: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_version() -> u32 {
    1
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldTypeConfig {
    /// Primitive type name or bare qualified model name.
    Name(String),
    Reference {
        #[serde(rename = "ref")]
        target: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    /// Field number; `<= 0` for structural fields.
    pub id: i64,
    #[serde(rename = "type")]
    pub type_: FieldTypeConfig,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    /// Defaults to the owning model's version.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<DefaultConfig>,
    #[serde(default)]
    pub related_name: Option<String>,
    /// Explicit join model for a repeated reference.
    #[serde(default)]
    pub through: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DefaultConfig {
    Literal(serde_json::Value),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for DefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(DefaultConfig::Expression { expression: s });
                }
                if let Some(lit) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    if !lit.is_object() && !lit.is_array() {
                        return Ok(DefaultConfig::Literal(lit));
                    }
                }
                Err(serde::de::Error::custom(format!(
                    "field default must be a literal, {{ \"expression\": \"...\" }}, or {{ \"value\": ... }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            serde_json::Value::Array(_) => Err(serde::de::Error::custom(
                "field default must be a literal or { \"expression\": \"...\" }; got array",
            )),
            other => Ok(DefaultConfig::Literal(other)),
        }
    }
}
