//! Row decoding by stable ordinal, and the value coercions used on write.
//!
//! Integer primitives travel as `i64`, booleans as nonzero integers and temporal
//! values as whole milliseconds since the Unix epoch.

use crate::error::AppError;
use crate::resolver::{ColumnFact, ColumnKind, TableFact};
use crate::schema::{FieldValue, PrimitiveType};
use crate::store::Value;
use chrono::{DateTime, Utc};

pub fn encode_instant(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub fn decode_instant(ms: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| AppError::Decode(format!("timestamp out of range: {}", ms)))
}

fn expected(column: &ColumnFact) -> &'static str {
    match column.kind {
        ColumnKind::Identity | ColumnKind::ForeignKey { .. } => "reference",
        ColumnKind::Primitive(p) if p == PrimitiveType::Bool => "bool",
        ColumnKind::Primitive(p) if p.is_temporal() => "instant",
        ColumnKind::Primitive(p) if p.is_integer() => "integer",
        ColumnKind::Primitive(p) if p.is_real() => "real",
        ColumnKind::Primitive(PrimitiveType::Bytes) => "bytes",
        ColumnKind::Primitive(_) => "text",
    }
}

/// Encode an entity value for `column`, rejecting values of the wrong kind.
pub fn to_storage(value: &FieldValue, column: &ColumnFact) -> Result<Value, AppError> {
    let mismatch = || AppError::TypeMismatch {
        column: column.name.clone(),
        expected: expected(column),
    };
    if value.is_null() {
        return Ok(Value::Null);
    }
    let prim = match column.kind {
        ColumnKind::Identity | ColumnKind::ForeignKey { .. } => {
            return match value {
                FieldValue::Reference(id) | FieldValue::Integer(id) => Ok(Value::Integer(*id)),
                _ => Err(mismatch()),
            }
        }
        ColumnKind::Primitive(p) => p,
    };
    Ok(match (prim, value) {
        (PrimitiveType::Bool, FieldValue::Bool(b)) => Value::Integer(i64::from(*b)),
        (PrimitiveType::Bool, FieldValue::Integer(i)) => Value::Integer(i64::from(*i != 0)),
        (p, FieldValue::Instant(t)) if p.is_temporal() => Value::Integer(encode_instant(t)),
        (p, FieldValue::Integer(i)) if p.is_temporal() || p.is_integer() => Value::Integer(*i),
        (p, FieldValue::Real(f)) if p.is_real() => Value::Real(*f),
        (p, FieldValue::Integer(i)) if p.is_real() => Value::Real(*i as f64),
        (PrimitiveType::String, FieldValue::Text(s)) => Value::Text(s.clone()),
        (PrimitiveType::Bytes, FieldValue::Bytes(b)) => Value::Blob(b.clone()),
        _ => return Err(mismatch()),
    })
}

/// Decode one stored cell for `column`.
pub fn from_storage(cell: &Value, column: &ColumnFact) -> Result<FieldValue, AppError> {
    let bad = || AppError::Decode(format!("unexpected {:?} in column {}", cell, column.name));
    if cell.is_null() {
        return Ok(FieldValue::Null);
    }
    let prim = match column.kind {
        ColumnKind::Identity => {
            return match cell {
                Value::Integer(i) => Ok(FieldValue::Integer(*i)),
                _ => Err(bad()),
            }
        }
        ColumnKind::ForeignKey { .. } => {
            return match cell {
                Value::Integer(i) => Ok(FieldValue::Reference(*i)),
                _ => Err(bad()),
            }
        }
        ColumnKind::Primitive(p) => p,
    };
    Ok(match (prim, cell) {
        (PrimitiveType::Bool, Value::Integer(i)) => FieldValue::Bool(*i != 0),
        (p, Value::Integer(i)) if p.is_temporal() => FieldValue::Instant(decode_instant(*i)?),
        (p, Value::Integer(i)) if p.is_integer() => FieldValue::Integer(*i),
        (p, Value::Real(f)) if p.is_real() => FieldValue::Real(*f),
        (p, Value::Integer(i)) if p.is_real() => FieldValue::Real(*i as f64),
        (PrimitiveType::String, Value::Text(s)) => FieldValue::Text(s.clone()),
        (PrimitiveType::Bytes, Value::Blob(b)) => FieldValue::Bytes(b.clone()),
        _ => return Err(bad()),
    })
}

/// Decode one entity's columns from `row`, reading each column at `base + ordinal`.
pub fn decode_row(table: &TableFact, row: &[Value], base: usize) -> Result<Vec<FieldValue>, AppError> {
    table
        .columns
        .iter()
        .map(|c| {
            let cell = row.get(base + c.ordinal).ok_or_else(|| {
                AppError::Decode(format!(
                    "{}: row has no cell at {} for column {}",
                    table.table_name,
                    base + c.ordinal,
                    c.name
                ))
            })?;
            from_storage(cell, c)
        })
        .collect()
}

/// Split a flat buffer of consecutive rows, each in the table's column layout.
pub fn decode_rows(table: &TableFact, buffer: &[Value]) -> Result<Vec<Vec<FieldValue>>, AppError> {
    let width = table.columns.len();
    if buffer.len() % width != 0 {
        return Err(AppError::Decode(format!(
            "{}: buffer of {} cells is not a whole number of {}-column rows",
            table.table_name,
            buffer.len(),
            width
        )));
    }
    (0..buffer.len() / width)
        .map(|i| decode_row(table, buffer, i * width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::blog_mapping;
    use chrono::TimeZone;

    #[test]
    fn instants_round_trip_to_whole_milliseconds() {
        let t = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 5).unwrap() + chrono::Duration::milliseconds(250);
        let ms = encode_instant(&t);
        assert_eq!(decode_instant(ms).unwrap(), t);
        let before_epoch = Utc.with_ymd_and_hms(1969, 7, 20, 20, 17, 40).unwrap();
        assert_eq!(decode_instant(encode_instant(&before_epoch)).unwrap(), before_epoch);
    }

    #[test]
    fn decode_reads_at_ordinal_plus_base() {
        let (_, mapping) = blog_mapping();
        let post = mapping.table("blog.post").unwrap();
        let at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let buffer = vec![
            Value::Integer(1),
            Value::Integer(7),
            Value::Text("first".into()),
            Value::Integer(encode_instant(&at)),
            Value::Integer(2),
            Value::Integer(2),
            Value::Integer(7),
            Value::Null,
            Value::Null,
            Value::Integer(0),
        ];
        let rows = decode_rows(post, &buffer).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], FieldValue::Reference(7));
        assert_eq!(rows[0][3], FieldValue::Instant(at));
        assert_eq!(rows[0][4], FieldValue::Bool(true));
        assert_eq!(rows[1][0], FieldValue::Integer(2));
        assert_eq!(rows[1][2], FieldValue::Null);
        assert_eq!(rows[1][4], FieldValue::Bool(false));

        assert!(decode_row(post, &buffer, 6).is_err());
        assert!(decode_rows(post, &buffer[..7]).is_err());
    }

    #[test]
    fn writes_are_type_checked() {
        let (_, mapping) = blog_mapping();
        let post = mapping.table("blog.post").unwrap();
        let title = post.column("title").unwrap();
        let pinned = post.column("pinned").unwrap();
        assert_eq!(to_storage(&FieldValue::Bool(true), pinned).unwrap(), Value::Integer(1));
        assert!(matches!(
            to_storage(&FieldValue::Integer(3), title),
            Err(AppError::TypeMismatch { expected: "text", .. })
        ));
        assert!(matches!(
            to_storage(&FieldValue::Text("x".into()), post.column("author").unwrap()),
            Err(AppError::TypeMismatch { expected: "reference", .. })
        ));
    }
}
