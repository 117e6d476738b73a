//! Mapping options: column naming and join-table uniqueness.

use crate::case::ColumnCasing;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOptions {
    pub casing: ColumnCasing,
    /// Name of the synthetic 64-bit identity column (ordinal 0).
    pub identity_column: String,
    /// Appended to a foreign-key field's column name.
    pub foreign_key_suffix: String,
    /// Add UNIQUE (source, dest) to join tables.
    pub unique_join_pairs: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        MappingOptions {
            casing: ColumnCasing::Snake,
            identity_column: "_id".into(),
            foreign_key_suffix: "_id".into(),
            unique_join_pairs: true,
        }
    }
}

impl MappingOptions {
    /// Defaults overridden by `RELMAP_COLUMN_CASING`, `RELMAP_IDENTITY_COLUMN`,
    /// `RELMAP_FK_SUFFIX` and `RELMAP_UNIQUE_JOIN_PAIRS`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut opts = MappingOptions::default();
        if let Some(v) = get("RELMAP_COLUMN_CASING") {
            opts.casing = v.parse()?;
        }
        if let Some(v) = get("RELMAP_IDENTITY_COLUMN") {
            opts.identity_column = v;
        }
        if let Some(v) = get("RELMAP_FK_SUFFIX") {
            opts.foreign_key_suffix = v;
        }
        if let Some(v) = get("RELMAP_UNIQUE_JOIN_PAIRS") {
            opts.unique_join_pairs = match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(format!("invalid RELMAP_UNIQUE_JOIN_PAIRS: {}", v)),
            };
        }
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_defaults() {
        let env: HashMap<&str, &str> = [("RELMAP_COLUMN_CASING", "flat"), ("RELMAP_UNIQUE_JOIN_PAIRS", "off")].into();
        let opts = MappingOptions::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(opts.casing, ColumnCasing::Flat);
        assert!(!opts.unique_join_pairs);
        assert_eq!(opts.identity_column, "_id");
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(MappingOptions::from_lookup(|_| Some("maybe".into())).is_err());
    }

    #[test]
    fn partial_serde_input_keeps_defaults() {
        let opts: MappingOptions = serde_json::from_str(r#"{ "casing": "preserve" }"#).unwrap();
        assert_eq!(opts.casing, ColumnCasing::Preserve);
        assert_eq!(opts.foreign_key_suffix, "_id");
    }
}
