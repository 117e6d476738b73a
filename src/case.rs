//! Identifier casing for column names: field names in the schema document -> column names in the store.

use serde::{Deserialize, Serialize};

/// How field names are normalized into column names.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnCasing {
    /// "firstName" -> "first_name", "first_name" -> "first_name".
    #[default]
    Snake,
    /// Upper camel case, then lower-cased: "first_name" -> "firstname".
    Flat,
    /// Name used verbatim.
    Preserve,
}

impl ColumnCasing {
    pub fn apply(self, name: &str) -> String {
        match self {
            ColumnCasing::Snake => to_snake_case(name),
            ColumnCasing::Flat => to_upper_camel_case(name).to_lowercase(),
            ColumnCasing::Preserve => name.to_string(),
        }
    }
}

impl std::str::FromStr for ColumnCasing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "snake" => Ok(ColumnCasing::Snake),
            "flat" => Ok(ColumnCasing::Flat),
            "preserve" => Ok(ColumnCasing::Preserve),
            _ => Err(format!(
                "invalid column casing: {} (expected snake, flat or preserve)",
                s
            )),
        }
    }
}

/// Convert a single identifier from snake_case to UpperCamelCase.
/// e.g. "user_id" -> "UserId", "post" -> "Post"
pub fn to_upper_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = true;
    for c in s.chars() {
        if c == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a single identifier from camelCase to snake_case.
/// e.g. "userId" -> "user_id", "createdAt" -> "created_at". Leading underscores are kept.
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}
