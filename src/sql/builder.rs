//! Builds parameterized SELECT, INSERT, UPDATE and DELETE from query descriptors and table facts.

use crate::error::StoreError;
use crate::query::{DeleteDescriptor, JoinKind, Predicate, QueryDescriptor};
use crate::resolver::TableFact;
use crate::sql::params::{pg_type, PgBindValue};
use crate::store::Value;

/// Quote identifier for PostgreSQL (safe: names come from the schema).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    /// Push a parameter and return its cast placeholder, e.g. `$2::BIGINT`.
    fn push_param(&mut self, v: PgBindValue) -> String {
        let n = self.params.len() + 1;
        let ph = format!("${}::{}", n, pg_type(v.storage()));
        self.params.push(v);
        ph
    }

    fn predicate(&mut self, p: &Predicate) -> String {
        let col = format!("{}.{}", quoted(&p.alias), quoted(&p.column));
        match (&p.value, p.negated) {
            (Value::Null, false) => format!("{} IS NULL", col),
            (Value::Null, true) => format!("{} IS NOT NULL", col),
            (v, negated) => {
                let ph = self.push_param(PgBindValue::from_value(v, p.storage));
                format!("{} {} {}", col, if negated { "<>" } else { "=" }, ph)
            }
        }
    }
}

/// SELECT base columns with the query's joins, predicates (OR of AND groups), identity order and limit.
pub fn select(q: &QueryDescriptor) -> QueryBuf {
    let mut buf = QueryBuf::new();
    let table = quoted(&q.table);
    let cols: Vec<String> = q
        .columns
        .iter()
        .map(|c| format!("{}.{}", table, quoted(&c.name)))
        .collect();
    let mut sql = format!("SELECT {} FROM {}", cols.join(", "), table);

    for join in &q.joins {
        match &join.kind {
            JoinKind::Join { fragment, near } => {
                let near = fragment.endpoint(*near);
                sql.push_str(&format!(
                    " INNER JOIN ({}) ON {}.{} = {}.{}",
                    fragment.sql,
                    quoted(&near.alias),
                    quoted(&q.identity),
                    table,
                    quoted(&q.identity)
                ));
            }
            JoinKind::Reverse(r) => {
                sql.push(' ');
                sql.push_str(&r.sql);
            }
        }
    }

    let groups: Vec<String> = q
        .groups
        .iter()
        .filter(|g| !g.is_empty())
        .map(|g| {
            let parts: Vec<String> = g.iter().map(|p| buf.predicate(p)).collect();
            format!("({})", parts.join(" AND "))
        })
        .collect();
    if !groups.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&groups.join(" OR "));
    }
    sql.push_str(&format!(" ORDER BY {}.{}", table, quoted(&q.identity)));
    if let Some(n) = q.limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    buf.sql = sql;
    buf
}

fn storage_of(table: &TableFact, column: &str) -> Result<crate::schema::StorageClass, StoreError> {
    table
        .column(column)
        .map(|c| c.storage)
        .ok_or_else(|| StoreError::UnknownColumn {
            table: table.table_name.clone(),
            column: column.to_string(),
        })
}

/// INSERT ... RETURNING the identity. No values renders DEFAULT VALUES.
pub fn insert(table: &TableFact, values: &[(String, Value)]) -> Result<QueryBuf, StoreError> {
    let mut buf = QueryBuf::new();
    let identity = quoted(&table.identity().name);
    if values.is_empty() {
        buf.sql = format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            quoted(&table.table_name),
            identity
        );
        return Ok(buf);
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for (col, val) in values {
        let storage = storage_of(table, col)?;
        cols.push(quoted(col));
        placeholders.push(buf.push_param(PgBindValue::from_value(val, storage)));
    }
    buf.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        quoted(&table.table_name),
        cols.join(", "),
        placeholders.join(", "),
        identity
    );
    Ok(buf)
}

/// UPDATE by identity.
pub fn update(table: &TableFact, id: i64, values: &[(String, Value)]) -> Result<QueryBuf, StoreError> {
    let mut buf = QueryBuf::new();
    let mut sets = Vec::with_capacity(values.len());
    for (col, val) in values {
        let storage = storage_of(table, col)?;
        let ph = buf.push_param(PgBindValue::from_value(val, storage));
        sets.push(format!("{} = {}", quoted(col), ph));
    }
    let id_ph = buf.push_param(PgBindValue::I64(id));
    buf.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        quoted(&table.table_name),
        sets.join(", "),
        quoted(&table.identity().name),
        id_ph
    );
    Ok(buf)
}

pub fn delete(d: &DeleteDescriptor) -> QueryBuf {
    let mut buf = QueryBuf::new();
    let conditions: Vec<String> = d.conditions.iter().map(|p| buf.predicate(p)).collect();
    buf.sql = format!("DELETE FROM {}", quoted(&d.table));
    if !conditions.is_empty() {
        buf.sql.push_str(" WHERE ");
        buf.sql.push_str(&conditions.join(" AND "));
    }
    buf
}
