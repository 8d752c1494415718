//! WHERE clause builder for named queries.
//!
//! ```ignore
//! let mut criteria = Criteria::new();
//! if let Some(name) = ctx.query("name") {
//!     criteria.add(criteria.both_like("name", name));
//! }
//! let sql = criteria.merge_sql("SELECT id, name FROM boards");
//! let boards: Vec<Board> = tpl.named_query(&sql, criteria.named_bind_vars()).await?;
//! ```

use std::fmt::Display;

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Ansi,
    Postgres,
}

/// One `field <op> :bind` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    field: String,
    op: &'static str,
    value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: &'static str, value: impl Serialize) -> Self {
        Self {
            field: field.into(),
            op,
            value: serde_json::to_value(value).unwrap_or(Value::Null),
        }
    }
}

/// Conditions joined with `AND`, with their bind values.
#[derive(Debug, Clone)]
pub struct Criteria {
    dialect: Dialect,
    query: Vec<String>,
    named_bind_vars: Map<String, Value>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self::new()
    }
}

impl Criteria {
    /// ANSI criteria, matching with `LIKE`.
    pub fn new() -> Self {
        Self {
            dialect: Dialect::Ansi,
            query: Vec::new(),
            named_bind_vars: Map::new(),
        }
    }

    /// Postgres criteria, matching with case-insensitive `ILIKE`.
    pub fn postgres() -> Self {
        Self {
            dialect: Dialect::Postgres,
            ..Self::new()
        }
    }

    /// `field LIKE '%value%'`.
    pub fn both_like(&self, field: &str, value: impl Display) -> Condition {
        let op = match self.dialect {
            Dialect::Ansi => "LIKE",
            Dialect::Postgres => "ILIKE",
        };
        Condition::new(field, op, format!("%{value}%"))
    }

    pub fn eq(&self, field: &str, value: impl Serialize) -> Condition {
        Condition::new(field, "=", value)
    }

    pub fn add(&mut self, condition: Condition) {
        let name = self.bind_name(&condition.field);
        self.query
            .push(format!("{} {} :{name}", condition.field, condition.op));
        self.named_bind_vars.insert(name, condition.value);
    }

    /// A placeholder name for `field` not used yet by this criteria.
    fn bind_name(&self, field: &str) -> String {
        let base: String = field
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        if !self.named_bind_vars.contains_key(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{base}_{n}"))
            .find(|name| !self.named_bind_vars.contains_key(name))
            .unwrap_or(base)
    }

    /// Values for the placeholders, usable as a named query argument.
    pub fn named_bind_vars(&self) -> &Map<String, Value> {
        &self.named_bind_vars
    }

    /// Append the WHERE clause to `sql`.
    pub fn merge_sql(&self, sql: &str) -> String {
        format!("{sql} {}", self.to_sql())
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty()
    }

    /// `WHERE a AND b`, or an empty string without conditions.
    pub fn to_sql(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        format!("WHERE {}", self.query.join(" AND "))
    }
}
