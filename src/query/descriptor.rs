//! Finalized query shapes handed to a `Store`.

use crate::resolver::{JoinFragment, ReverseFragment};
use crate::schema::{JoinSide, StorageClass};
use crate::store::Value;
use std::sync::Arc;

/// Equality (or negated equality) against one column of an aliased table.
/// A `Null` value means IS NULL / IS NOT NULL.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    pub alias: String,
    pub column: String,
    pub storage: StorageClass,
    pub value: Value,
    pub negated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum JoinKind {
    /// The fragment's `near` endpoint is bound to the base table's identity.
    Join {
        fragment: Arc<JoinFragment>,
        near: JoinSide,
    },
    Reverse(Arc<ReverseFragment>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct JoinClause {
    pub relation: String,
    pub kind: JoinKind,
}

impl JoinClause {
    pub fn alias(&self) -> &str {
        match &self.kind {
            JoinKind::Join { fragment, near } => &fragment.endpoint(near.opposite()).alias,
            JoinKind::Reverse(r) => &r.alias,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectColumn {
    pub name: String,
    pub storage: StorageClass,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryDescriptor {
    pub table: String,
    pub identity: String,
    /// Base table columns in ordinal order.
    pub columns: Vec<SelectColumn>,
    pub joins: Vec<JoinClause>,
    /// Disjunction of conjunctions; empty matches every row.
    pub groups: Vec<Vec<Predicate>>,
    pub limit: Option<u64>,
}

impl QueryDescriptor {
    /// How many times `relation` was joined into this query.
    pub fn join_count(&self, relation: &str) -> usize {
        self.joins.iter().filter(|j| j.relation == relation).count()
    }
}

/// Delete rows of `table` matching every condition.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteDescriptor {
    pub table: String,
    pub conditions: Vec<Predicate>,
}
