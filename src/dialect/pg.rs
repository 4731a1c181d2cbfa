//! Postgres dialect: sync `postgres` crate, shared between `pg` and
//! `cockroach` tags — the wire protocol is compatible (spec.md §4.4 "drivers
//! grouped by wire family").

use postgres::types::ToSql;
use postgres::{Client, NoTls};

use crate::connection::{Connection, Param, Row, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::splitter::SplitPolicy;
use crate::substitute::Sigil;
use crate::target::EngineTag;

pub struct PgDialect {
    tag: EngineTag,
}

impl PgDialect {
    pub fn new(tag: EngineTag) -> Self {
        Self { tag }
    }
}

impl Dialect for PgDialect {
    fn tag(&self) -> EngineTag {
        self.tag
    }

    fn ddl_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        let schema = registry_namespace.unwrap_or("sqitch");
        let mut stmts = vec![format!("CREATE SCHEMA IF NOT EXISTS {schema}")];
        stmts.extend(super::registry_ddl(&self.table_prefix(registry_namespace)));
        stmts
    }

    fn table_prefix(&self, registry_namespace: Option<&str>) -> String {
        format!("{}.", registry_namespace.unwrap_or("sqitch"))
    }

    fn session_init_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        let schema = registry_namespace.unwrap_or("sqitch");
        vec![format!("SET search_path TO {schema}, public"), "SET TIME ZONE 'UTC'".to_string()]
    }

    fn split_policy(&self) -> SplitPolicy {
        SplitPolicy::Generic
    }

    fn variable_sigil(&self) -> Sigil {
        Sigil::Colon
    }

    fn regex_condition(&self, column: &str, placeholder: &str) -> String {
        format!("{column} ~ {placeholder}")
    }

    fn create_connection(&self, driver_uri: &str) -> Result<Box<dyn Connection>> {
        let conninfo = format!("postgresql:{driver_uri}");
        let client = Client::connect(&conninfo, NoTls).map_err(|e| {
            Error::connection(self.tag, format!("db:{}:{driver_uri}", self.tag), e.to_string())
        })?;
        Ok(Box::new(PgConnection { client }))
    }
}

pub struct PgConnection {
    client: Client,
}

/// Rewrite `:name` placeholders into positional `$1, $2, ...`, returning the
/// rewritten SQL and the parameters in call order (spec.md §4.4 "adapters
/// translate to whatever the underlying driver accepts").
fn rewrite_placeholders<'a>(sql: &str, params: &'a [Param<'a>]) -> (String, Vec<&'a Value>) {
    let mut out = String::with_capacity(sql.len());
    let mut ordered = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let bytes = sql.as_bytes();

    while let Some((i, c)) = chars.next() {
        if c != ':' {
            out.push(c);
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() {
            let ch = sql[end..].chars().next().unwrap();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                end += ch.len_utf8();
            } else {
                break;
            }
        }
        if end == start {
            out.push(c);
            continue;
        }
        let name = &sql[start..end];
        if let Some((_, value)) = params.iter().find(|(n, _)| *n == name) {
            ordered.push(value);
            out.push_str(&format!("${}", ordered.len()));
        } else {
            out.push(':');
            out.push_str(name);
        }
        while let Some(&(next_i, _)) = chars.peek() {
            if next_i < end {
                chars.next();
            } else {
                break;
            }
        }
    }

    (out, ordered)
}

static SQL_NULL: Option<String> = None;

fn to_sql_params<'a>(values: &'a [&'a Value]) -> Vec<&'a (dyn ToSql + Sync)> {
    values
        .iter()
        .map(|v| {
            let boxed: &(dyn ToSql + Sync) = match v {
                Value::Null => &SQL_NULL,
                Value::Bool(b) => b,
                Value::Int(n) => n,
                Value::Text(s) => s,
                Value::Timestamp(t) => t,
            };
            boxed
        })
        .collect()
}

fn row_from_pg(row: &postgres::Row) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_().name() {
            "int2" | "int4" | "int8" => row
                .try_get::<_, Option<i64>>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Int),
            "bool" => row
                .try_get::<_, Option<bool>>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Bool),
            "timestamptz" | "timestamp" => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Timestamp),
            _ => row
                .try_get::<_, Option<String>>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Text),
        };
        out.insert(column.name(), value);
    }
    out
}

impl Connection for PgConnection {
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let bound = to_sql_params(&ordered);
        self.client
            .execute(&rewritten, bound.as_slice())
            .map_err(|e| Error::engine(e.to_string()))
    }

    fn fetch_one(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Row>> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let bound = to_sql_params(&ordered);
        let row = self
            .client
            .query_opt(&rewritten, bound.as_slice())
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(row.as_ref().map(row_from_pg))
    }

    fn fetch_all(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let bound = to_sql_params(&ordered);
        let rows = self
            .client
            .query(&rewritten, bound.as_slice())
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(rows.iter().map(row_from_pg).collect())
    }

    fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").map_err(|e| Error::engine(e.to_string()))
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").map_err(|e| Error::engine(e.to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").map_err(|e| Error::engine(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
