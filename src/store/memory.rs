//! In-process store. Honours NOT NULL, UNIQUE and literal defaults and evaluates
//! joins the way SQL does (one output row per matching join tuple).

use super::{Row, Store, Value};
use crate::error::StoreError;
use crate::migration::MigrationStep;
use crate::query::{DeleteDescriptor, JoinKind, Predicate, QueryDescriptor};
use crate::resolver::{ColumnFact, TableFact};
use crate::schema::DefaultValue;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug)]
struct MemTable {
    name: String,
    /// Physical order; may differ from ordinal order after ADD COLUMN.
    columns: Vec<ColumnFact>,
    unique_groups: Vec<Vec<String>>,
    rows: Vec<Vec<Value>>,
    next_id: i64,
}

impl MemTable {
    fn position(&self, column: &str) -> Result<usize, StoreError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    fn identity(&self, row: &[Value]) -> Option<i64> {
        match row.first() {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        }
    }

    fn default_for(col: &ColumnFact) -> Value {
        match &col.default {
            Some(DefaultValue::Literal(v)) => Value::from_literal(v),
            // expressions are only evaluated by a SQL engine
            Some(DefaultValue::Expression(_)) | None => Value::Null,
        }
    }

    /// Check NOT NULL and UNIQUE for `row`, ignoring the row at index `skip`.
    fn check(&self, row: &[Value], skip: Option<usize>) -> Result<(), StoreError> {
        for (i, col) in self.columns.iter().enumerate() {
            if col.not_null && row[i].is_null() {
                return Err(StoreError::NotNullViolation {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
        }
        let mut groups: Vec<Vec<usize>> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.unique || c.is_identity())
            .map(|(i, _)| vec![i])
            .collect();
        for g in &self.unique_groups {
            groups.push(g.iter().map(|c| self.position(c)).collect::<Result<_, _>>()?);
        }
        for group in groups {
            if group.iter().any(|i| row[*i].is_null()) {
                continue;
            }
            let clash = self
                .rows
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != skip)
                .any(|(_, other)| group.iter().all(|i| other[*i].sql_eq(&row[*i])));
            if clash {
                return Err(StoreError::UniqueViolation {
                    table: self.name.clone(),
                    columns: group
                        .iter()
                        .map(|i| self.columns[*i].name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                });
            }
        }
        Ok(())
    }

    fn matches(&self, row: &[Value], p: &Predicate) -> Result<bool, StoreError> {
        let cell = &row[self.position(&p.column)?];
        Ok(match (&p.value, p.negated) {
            (Value::Null, negated) => cell.is_null() != negated,
            (v, false) => cell.sql_eq(v),
            (v, true) => !cell.is_null() && !cell.sql_eq(v),
        })
    }
}

#[derive(Debug, Default)]
struct MemState {
    tables: HashMap<String, MemTable>,
    version: u32,
}

impl MemState {
    fn table(&self, name: &str) -> Result<&MemTable, StoreError> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemTable, StoreError> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    fn find_by_id<'a>(&'a self, table: &str, id: i64) -> Result<Option<&'a Vec<Value>>, StoreError> {
        let t = self.table(table)?;
        Ok(t.rows.iter().find(|r| t.identity(r) == Some(id)))
    }
}

/// Alias -> (table name, row) bindings for one candidate output row.
type Tuple<'a> = Vec<(&'a str, &'a str, &'a Vec<Value>)>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently in `table`.
    pub async fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.state.read().await.table(table)?.rows.len())
    }

    /// Column names of `table` in physical order.
    pub async fn column_names(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let state = self.state.read().await;
        Ok(state.table(table)?.columns.iter().map(|c| c.name.clone()).collect())
    }

    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

fn expand<'a>(
    state: &'a MemState,
    q: &'a QueryDescriptor,
    base: &'a MemTable,
    row: &'a Vec<Value>,
) -> Result<Vec<Tuple<'a>>, StoreError> {
    let mut tuples: Vec<Tuple<'a>> = vec![vec![(q.table.as_str(), q.table.as_str(), row)]];
    let Some(base_id) = base.identity(row) else {
        return Ok(Vec::new());
    };
    for join in &q.joins {
        let mut next = Vec::new();
        match &join.kind {
            JoinKind::Join { fragment, near } => {
                let near_ep = fragment.endpoint(*near);
                let far_ep = fragment.endpoint(near.opposite());
                let jt = state.table(&fragment.join_table)?;
                let near_pos = jt.position(&near_ep.column)?;
                let far_pos = jt.position(&far_ep.column)?;
                for jr in jt.rows.iter().filter(|r| r[near_pos].sql_eq(&Value::Integer(base_id))) {
                    let Value::Integer(far_id) = jr[far_pos] else {
                        continue;
                    };
                    let Some(far_row) = state.find_by_id(&far_ep.table, far_id)? else {
                        continue;
                    };
                    for t in &tuples {
                        let mut t = t.clone();
                        t.push((fragment.join_table.as_str(), fragment.join_table.as_str(), jr));
                        t.push((near_ep.alias.as_str(), near_ep.table.as_str(), row));
                        t.push((far_ep.alias.as_str(), far_ep.table.as_str(), far_row));
                        next.push(t);
                    }
                }
            }
            JoinKind::Reverse(r) => {
                let child = state.table(&r.child_table)?;
                let fk = child.position(&r.fk_column)?;
                for cr in child.rows.iter().filter(|cr| cr[fk].sql_eq(&Value::Integer(base_id))) {
                    for t in &tuples {
                        let mut t = t.clone();
                        t.push((r.alias.as_str(), r.child_table.as_str(), cr));
                        next.push(t);
                    }
                }
            }
        }
        tuples = next;
    }
    Ok(tuples)
}

fn eval(state: &MemState, tuple: &Tuple<'_>, p: &Predicate) -> Result<bool, StoreError> {
    let Some((_, table, row)) = tuple.iter().find(|(alias, _, _)| *alias == p.alias) else {
        return Err(StoreError::UnknownTable(p.alias.clone()));
    };
    state.table(table)?.matches(row, p)
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, q: &QueryDescriptor) -> Result<Vec<Row>, StoreError> {
        let state = self.state.read().await;
        let base = state.table(&q.table)?;
        let positions: Vec<usize> = q
            .columns
            .iter()
            .map(|c| base.position(&c.name))
            .collect::<Result<_, _>>()?;
        let groups: Vec<&Vec<Predicate>> = q.groups.iter().filter(|g| !g.is_empty()).collect();

        let mut out = Vec::new();
        if q.limit == Some(0) {
            return Ok(out);
        }
        for row in &base.rows {
            for tuple in expand(&state, q, base, row)? {
                let mut keep = groups.is_empty();
                for g in &groups {
                    let mut all = true;
                    for p in g.iter() {
                        if !eval(&state, &tuple, p)? {
                            all = false;
                            break;
                        }
                    }
                    if all {
                        keep = true;
                        break;
                    }
                }
                if keep {
                    out.push(positions.iter().map(|i| row[*i].clone()).collect());
                }
                if q.limit.is_some_and(|n| out.len() as u64 >= n) {
                    return Ok(out);
                }
            }
        }
        Ok(out)
    }

    async fn insert(&self, table: &TableFact, values: &[(String, Value)]) -> Result<i64, StoreError> {
        let mut state = self.state.write().await;
        let t = state.table_mut(&table.table_name)?;
        let mut row: Vec<Value> = t.columns.iter().map(MemTable::default_for).collect();
        for (col, v) in values {
            let i = t.position(col)?;
            row[i] = v.clone();
        }
        let id = match row[0] {
            Value::Integer(id) => id,
            _ => t.next_id,
        };
        row[0] = Value::Integer(id);
        t.check(&row, None)?;
        t.next_id = t.next_id.max(id + 1);
        t.rows.push(row);
        tracing::debug!(table = %table.table_name, id, "insert");
        Ok(id)
    }

    async fn update(&self, table: &TableFact, id: i64, values: &[(String, Value)]) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let t = state.table_mut(&table.table_name)?;
        let Some(index) = t.rows.iter().position(|r| t.identity(r) == Some(id)) else {
            return Ok(0);
        };
        let mut row = t.rows[index].clone();
        for (col, v) in values {
            let i = t.position(col)?;
            row[i] = v.clone();
        }
        t.check(&row, Some(index))?;
        t.rows[index] = row;
        Ok(1)
    }

    async fn delete(&self, d: &DeleteDescriptor) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;
        let t = state.table_mut(&d.table)?;
        let mut keep = Vec::with_capacity(t.rows.len());
        let mut removed = 0;
        for row in std::mem::take(&mut t.rows) {
            let mut hit = true;
            for p in &d.conditions {
                if !t.matches(&row, p)? {
                    hit = false;
                    break;
                }
            }
            if hit {
                removed += 1;
            } else {
                keep.push(row);
            }
        }
        t.rows = keep;
        Ok(removed)
    }

    async fn apply(&self, step: &MigrationStep) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match step {
            MigrationStep::CreateTable {
                table,
                columns,
                unique_groups,
                ..
            } => {
                if state.tables.contains_key(table) {
                    return Err(StoreError::TableExists(table.clone()));
                }
                state.tables.insert(
                    table.clone(),
                    MemTable {
                        name: table.clone(),
                        columns: columns.clone(),
                        unique_groups: unique_groups.clone(),
                        rows: Vec::new(),
                        next_id: 1,
                    },
                );
            }
            MigrationStep::AddColumn { table, column, .. } => {
                let t = state.table_mut(table)?;
                if t.columns.iter().any(|c| c.name == column.name) {
                    return Err(StoreError::ColumnExists {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                let fill = MemTable::default_for(column);
                if column.not_null && fill.is_null() && !t.rows.is_empty() {
                    return Err(StoreError::NotNullViolation {
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                for row in t.rows.iter_mut() {
                    row.push(fill.clone());
                }
                t.columns.push(column.clone());
            }
        }
        Ok(())
    }

    async fn schema_version(&self) -> Result<u32, StoreError> {
        Ok(self.state.read().await.version)
    }

    async fn set_schema_version(&self, version: u32) -> Result<(), StoreError> {
        self.state.write().await.version = version;
        Ok(())
    }
}
