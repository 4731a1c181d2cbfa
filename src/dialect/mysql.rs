//! Mysql/Mariadb dialect: sync `mysql` crate (spec.md §4.4, §9 "drivers
//! grouped by wire family").
//!
//! Mysql is also the only dialect whose Concurrency Guard (C13) needs an
//! explicit table lock: `LOCK TABLES` on all six registry tables, released
//! in the Transaction Scope's exit hook (spec.md §4.5, §4.12).

use mysql::prelude::Queryable;
use mysql::{Opts, OptsBuilder, Params, Value as MyValue};

use crate::connection::{Connection, Param, Row, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::splitter::SplitPolicy;
use crate::substitute::Sigil;
use crate::target::EngineTag;

/// The six registry tables, in the order `LOCK TABLES` takes them (spec.md
/// §4.12).
const REGISTRY_TABLES: [&str; 6] = ["projects", "releases", "changes", "tags", "dependencies", "events"];

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn tag(&self) -> EngineTag {
        EngineTag::Mysql
    }

    fn ddl_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        let mut stmts = Vec::new();
        if let Some(db) = registry_namespace {
            stmts.push(format!("CREATE DATABASE IF NOT EXISTS {db}"));
        }
        stmts.extend(super::registry_ddl(&self.table_prefix(registry_namespace)));
        stmts
    }

    fn table_prefix(&self, registry_namespace: Option<&str>) -> String {
        registry_namespace.map(|db| format!("{db}.")).unwrap_or_default()
    }

    fn session_init_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        let mut stmts = vec![
            "SET NAMES 'utf8mb4'".to_string(),
            "SET time_zone = '+00:00'".to_string(),
            "SET sql_mode = 'STRICT_ALL_TABLES,NO_ZERO_DATE,NO_ZERO_IN_DATE'".to_string(),
        ];
        if let Some(db) = registry_namespace {
            stmts.push(format!("USE {db}"));
        }
        stmts
    }

    fn pre_transaction_hook(
        &self,
        conn: &mut dyn Connection,
        registry_namespace: Option<&str>,
    ) -> Result<()> {
        let prefix = self.table_prefix(registry_namespace);
        let clause = REGISTRY_TABLES
            .iter()
            .map(|t| format!("{prefix}{t} WRITE"))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(&format!("LOCK TABLES {clause}"), &[])?;
        Ok(())
    }

    fn post_transaction_hook(&self, conn: &mut dyn Connection) -> Result<()> {
        conn.execute("UNLOCK TABLES", &[])?;
        Ok(())
    }

    fn split_policy(&self) -> SplitPolicy {
        SplitPolicy::Mysql
    }

    fn variable_sigil(&self) -> Sigil {
        Sigil::Colon
    }

    fn regex_condition(&self, column: &str, placeholder: &str) -> String {
        format!("{column} REGEXP {placeholder}")
    }

    fn create_connection(&self, driver_uri: &str) -> Result<Box<dyn Connection>> {
        let url = format!("mysql:{driver_uri}");
        let opts = Opts::from_url(&url).map_err(|e| {
            Error::connection(EngineTag::Mysql, format!("db:mysql:{driver_uri}"), e.to_string())
        })?;
        let builder = OptsBuilder::from_opts(opts);
        let conn = mysql::Conn::new(builder).map_err(|e| {
            Error::connection(EngineTag::Mysql, format!("db:mysql:{driver_uri}"), e.to_string())
        })?;
        Ok(Box::new(MysqlConnection { conn }))
    }
}

pub struct MysqlConnection {
    conn: mysql::Conn,
}

/// Rewrite `:name` placeholders into positional `?`, returning rewritten
/// SQL and bound values in call order (spec.md §4.4 "positional `?`" is
/// used for sqlite/firebird/oracle; mysql's driver also accepts `?` for
/// prepared statements even though the wire protocol calls them `%s`
/// conceptually).
fn rewrite_placeholders(sql: &str, params: &[Param<'_>]) -> (String, Vec<MyValue>) {
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
            ordered.push(to_mysql_value(value));
            out.push('?');
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

fn to_mysql_value(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::Int(n) => MyValue::Int(*n),
        Value::Text(s) => MyValue::Bytes(s.clone().into_bytes()),
        Value::Timestamp(t) => MyValue::Bytes(t.to_rfc3339().into_bytes()),
    }
}

fn row_from_mysql(row: mysql::Row) -> Row {
    let mut out = Row::new();
    let columns = row.columns();
    for (i, column) in columns.iter().enumerate() {
        let value = match row.as_ref(i) {
            Some(MyValue::NULL) | None => Value::Null,
            Some(MyValue::Int(n)) => Value::Int(*n),
            Some(MyValue::UInt(n)) => Value::Int(*n as i64),
            Some(other) => {
                let s: String = mysql::from_value_opt(other.clone()).unwrap_or_default();
                Value::Text(s)
            }
        };
        out.insert(column.name_str().as_ref(), value);
    }
    out
}

impl Connection for MysqlConnection {
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        self.conn
            .exec_drop(&rewritten, Params::Positional(ordered))
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(self.conn.affected_rows())
    }

    fn fetch_one(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Row>> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let row: Option<mysql::Row> = self
            .conn
            .exec_first(&rewritten, Params::Positional(ordered))
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(row.map(row_from_mysql))
    }

    fn fetch_all(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let rows: Vec<mysql::Row> = self
            .conn
            .exec(&rewritten, Params::Positional(ordered))
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(rows.into_iter().map(row_from_mysql).collect())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.query_drop("BEGIN").map_err(|e| Error::engine(e.to_string()))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").map_err(|e| Error::engine(e.to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").map_err(|e| Error::engine(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_placeholders_to_positional() {
        let params: Vec<Param> = vec![("name", Value::from("x")), ("id", Value::Int(1))];
        let (sql, ordered) = rewrite_placeholders("SELECT * FROM t WHERE name = :name AND id = :id", &params);
        assert_eq!(sql, "SELECT * FROM t WHERE name = ? AND id = ?");
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn regex_condition_uses_regexp_operator() {
        assert_eq!(MysqlDialect.regex_condition("change", ":p"), "change REGEXP :p");
    }

    #[test]
    fn lock_clause_covers_all_six_tables() {
        let prefix = "";
        let clause = REGISTRY_TABLES
            .iter()
            .map(|t| format!("{prefix}{t} WRITE"))
            .collect::<Vec<_>>()
            .join(", ");
        for t in REGISTRY_TABLES {
            assert!(clause.contains(&format!("{t} WRITE")));
        }
    }
}
