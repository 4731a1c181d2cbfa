//! Connection Adapter (C4): the per-dialect `Connection` contract (spec.md
//! §4.4).
//!
//! Every dialect's driver is wrapped behind this trait: parameter style
//! normalization, row→map materialization, commit/rollback/close. The core
//! issues named placeholders (`:name`); adapters translate to whatever the
//! underlying driver accepts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::Result;

/// A single bound value. The core never needs more than these scalar kinds
/// for registry reads/writes and script execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Most adapters round-trip `committed_at`/`planned_at` through a TEXT
    /// column (RFC 3339), so a plain `Value::Timestamp` match would miss
    /// every row read back from the database; fall back to parsing the text.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            Self::Text(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A named parameter bound into a query (`core uses named placeholders:
/// :name / %(name)s`, spec.md §4.4).
pub type Param<'a> = (&'a str, Value);

/// A result row materialized as a case-insensitive map (lower-cased keys,
/// spec.md §4.4 "Materialize result rows as case-insensitive maps").
#[derive(Debug, Clone, Default)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, column: &str, value: Value) {
        self.0.insert(column.to_lowercase(), value);
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(&column.to_lowercase())
    }

    #[must_use]
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn get_timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).and_then(Value::as_timestamp)
    }
}

/// Per-dialect connection contract (spec.md §4.4 C4).
///
/// A `Connection` is owned exclusively by the Transaction Scope that
/// acquired it (spec.md §5); it is never shared across scopes.
pub trait Connection: Send {
    /// Execute a statement with named parameters, returning the number of
    /// affected rows. Statement-level failures surface as
    /// `Error::Deployment` from the caller (the adapter itself returns a
    /// driver-shaped error string; callers attach operation context).
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64>;

    fn fetch_one(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Row>>;

    fn fetch_all(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>>;

    /// Begin a transaction. Called by the Transaction Scope (C5).
    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Close the underlying session. Secondary errors on close are logged
    /// and swallowed by the caller (spec.md §7 propagation policy).
    fn close(&mut self) -> Result<()>;
}
