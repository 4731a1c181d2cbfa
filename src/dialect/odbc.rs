//! ODBC-backed dialects: oracle, snowflake, vertica, exasol, firebird
//! (spec.md §4.4, §9 "drivers grouped by wire family").
//!
//! None of these five engines has a mainstream pure-Rust wire driver, so
//! they share one `odbc-api`-backed `Connection` implementation; each gets
//! its own `Dialect` impl below for DDL column types, variable sigil,
//! regex translation, and pagination syntax.

use odbc_api::{ConnectionOptions, Cursor, Environment};
use std::sync::OnceLock;

use crate::connection::{Connection, Param, Row, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::splitter::SplitPolicy;
use crate::substitute::Sigil;
use crate::target::EngineTag;

/// The ODBC driver manager environment. One process-wide handle, matching
/// `odbc-api`'s own guidance (spec.md §5: "no process-wide mutable state
/// other than the Engine Registry").
fn odbc_environment() -> &'static Environment {
    static ENV: OnceLock<Environment> = OnceLock::new();
    ENV.get_or_init(|| Environment::new().expect("failed to initialize ODBC driver manager"))
}

pub struct OdbcDialect {
    tag: EngineTag,
}

impl OdbcDialect {
    pub fn new(tag: EngineTag) -> Self {
        Self { tag }
    }
}

impl Dialect for OdbcDialect {
    fn tag(&self) -> EngineTag {
        self.tag
    }

    fn ddl_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        super::registry_ddl(&self.table_prefix(registry_namespace))
    }

    fn table_prefix(&self, registry_namespace: Option<&str>) -> String {
        match self.tag {
            EngineTag::Vertica | EngineTag::Snowflake => {
                registry_namespace.map(|ns| format!("{ns}.")).unwrap_or_default()
            }
            // Oracle uses the connection's current schema (spec.md §6);
            // exasol/firebird have no schema concept worth qualifying.
            _ => String::new(),
        }
    }

    fn session_init_statements(&self, registry_namespace: Option<&str>) -> Vec<String> {
        match self.tag {
            EngineTag::Oracle => vec![
                "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'YYYY-MM-DD\"T\"HH24:MI:SS'".to_string(),
                "ALTER SESSION SET NLS_TIMESTAMP_TZ_FORMAT = 'YYYY-MM-DD\"T\"HH24:MI:SSTZH:TZM'"
                    .to_string(),
            ],
            EngineTag::Snowflake => {
                let mut stmts = vec!["ALTER SESSION SET TIMEZONE = 'UTC'".to_string()];
                if let Some(wh) = registry_namespace {
                    stmts.push(format!("USE WAREHOUSE {wh}"));
                }
                stmts
            }
            EngineTag::Vertica => vec![
                "SET TIME ZONE 'UTC'".to_string(),
                "SET DATESTYLE TO ISO, YMD".to_string(),
            ],
            _ => Vec::new(),
        }
    }

    fn pre_transaction_hook(
        &self,
        conn: &mut dyn Connection,
        _registry_namespace: Option<&str>,
    ) -> Result<()> {
        if matches!(self.tag, EngineTag::Vertica) {
            conn.execute("LOCK TABLE changes IN EXCLUSIVE MODE", &[])?;
        }
        Ok(())
    }

    fn split_policy(&self) -> SplitPolicy {
        match self.tag {
            EngineTag::Oracle | EngineTag::Firebird => SplitPolicy::Oracle,
            _ => SplitPolicy::Generic,
        }
    }

    fn variable_sigil(&self) -> Sigil {
        match self.tag {
            EngineTag::Oracle | EngineTag::Snowflake | EngineTag::Vertica => Sigil::Ampersand,
            _ => Sigil::Colon,
        }
    }

    fn regex_condition(&self, column: &str, placeholder: &str) -> String {
        match self.tag {
            EngineTag::Oracle => format!("REGEXP_LIKE({column}, {placeholder})"),
            EngineTag::Snowflake => format!("REGEXP_SUBSTR({column}, {placeholder}) IS NOT NULL"),
            EngineTag::Vertica => format!("{column} ~ {placeholder}"),
            EngineTag::Firebird => format!("{column} SIMILAR TO {placeholder}"),
            _ => format!("{column} = {placeholder}"),
        }
    }

    fn limit_offset_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match self.tag {
            EngineTag::Firebird => match (limit, offset) {
                (Some(l), Some(o)) => format!("ROWS {} TO {}", o + 1, o + l),
                (Some(l), None) => format!("FIRST {l}"),
                (None, Some(o)) => format!("ROWS {}", o + 1),
                (None, None) => String::new(),
            },
            EngineTag::Oracle => match (limit, offset) {
                (Some(l), Some(o)) => {
                    format!("OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY")
                }
                (Some(l), None) => format!("FETCH FIRST {l} ROWS ONLY"),
                (None, Some(o)) => format!("OFFSET {o} ROWS"),
                (None, None) => String::new(),
            },
            _ => match (limit, offset) {
                (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
                (Some(l), None) => format!("LIMIT {l}"),
                (None, Some(o)) => format!("OFFSET {o}"),
                (None, None) => String::new(),
            },
        }
    }

    fn create_connection(&self, driver_uri: &str) -> Result<Box<dyn Connection>> {
        let env = odbc_environment();
        let conn = env
            .connect_with_connection_string(driver_uri, ConnectionOptions::default())
            .map_err(|e| {
                Error::connection(self.tag, format!("db:{}:{driver_uri}", self.tag), e.to_string())
            })?;
        Ok(Box::new(OdbcConnection { conn }))
    }
}

pub struct OdbcConnection<'env> {
    conn: odbc_api::Connection<'env>,
}

/// Rewrite `:name` / `&name` placeholders into positional `?` for the ODBC
/// prepared-statement API, returning the rewritten SQL and the values in
/// call order (spec.md §4.4 "positional `?` for ... oracle").
fn rewrite_placeholders<'a>(sql: &str, params: &'a [Param<'a>]) -> (String, Vec<&'a Value>) {
    let mut out = String::with_capacity(sql.len());
    let mut ordered = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let bytes = sql.as_bytes();

    while let Some((i, c)) = chars.next() {
        if c != ':' && c != '&' {
            out.push(c);
            continue;
        }
        let start = i + c.len_utf8();
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
            out.push('?');
        } else {
            out.push(c);
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

fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some((if *b { "1" } else { "0" }).to_string()),
        Value::Int(n) => Some(n.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Timestamp(t) => Some(t.to_rfc3339()),
    }
}

impl Connection for OdbcConnection<'_> {
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let bound: Vec<Option<String>> = ordered.iter().map(|v| value_to_text(v)).collect();
        self.conn
            .execute(&rewritten, bound.as_slice())
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(0)
    }

    fn fetch_one(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Row>> {
        let rows = self.fetch_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    fn fetch_all(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>> {
        let (rewritten, ordered) = rewrite_placeholders(sql, params);
        let bound: Vec<Option<String>> = ordered.iter().map(|v| value_to_text(v)).collect();
        let cursor = self
            .conn
            .execute(&rewritten, bound.as_slice())
            .map_err(|e| Error::engine(e.to_string()))?;
        let Some(mut cursor) = cursor else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let col_names: Vec<String> = (1..=cursor.num_result_cols().unwrap_or(0))
            .map(|i| cursor.col_name(i as u16).unwrap_or_default())
            .collect();
        let mut buffers = odbc_api::buffers::TextRowSet::for_cursor(256, &mut cursor, Some(4096))
            .map_err(|e| Error::engine(e.to_string()))?;
        let mut row_set_cursor = cursor
            .bind_buffer(&mut buffers)
            .map_err(|e| Error::engine(e.to_string()))?;
        while let Some(batch) = row_set_cursor
            .fetch()
            .map_err(|e| Error::engine(e.to_string()))?
        {
            for i in 0..batch.num_rows() {
                let mut row = Row::new();
                for (col_idx, name) in col_names.iter().enumerate() {
                    let value = batch
                        .at(col_idx, i)
                        .map(|bytes| Value::Text(String::from_utf8_lossy(bytes).into_owned()))
                        .unwrap_or(Value::Null);
                    row.insert(name, value);
                }
                out.push(row);
            }
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        // odbc-api commits implicitly per-statement unless autocommit is
        // disabled; registry DDL/DML here runs with autocommit off for the
        // life of the Transaction Scope (set at connect time by callers
        // that need it). No explicit BEGIN statement exists over ODBC.
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.commit().map_err(|e| Error::engine(e.to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.rollback().map_err(|e| Error::engine(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_uses_regexp_like() {
        assert_eq!(
            OdbcDialect::new(EngineTag::Oracle).regex_condition("change", ":p"),
            "REGEXP_LIKE(change, :p)"
        );
    }

    #[test]
    fn snowflake_uses_regexp_substr() {
        assert_eq!(
            OdbcDialect::new(EngineTag::Snowflake).regex_condition("change", ":p"),
            "REGEXP_SUBSTR(change, :p) IS NOT NULL"
        );
    }

    #[test]
    fn firebird_uses_similar_to() {
        assert_eq!(
            OdbcDialect::new(EngineTag::Firebird).regex_condition("change", ":p"),
            "change SIMILAR TO :p"
        );
    }

    #[test]
    fn firebird_pagination_uses_first_rows() {
        let d = OdbcDialect::new(EngineTag::Firebird);
        assert_eq!(d.limit_offset_clause(Some(10), None), "FIRST 10");
        assert_eq!(d.limit_offset_clause(Some(10), Some(5)), "ROWS 6 TO 15");
    }

    #[test]
    fn oracle_pagination_uses_fetch_next() {
        let d = OdbcDialect::new(EngineTag::Oracle);
        assert_eq!(d.limit_offset_clause(Some(10), Some(5)), "OFFSET 5 ROWS FETCH NEXT 10 ROWS ONLY");
    }

    #[test]
    fn variable_sigil_by_tag() {
        assert_eq!(OdbcDialect::new(EngineTag::Oracle).variable_sigil(), Sigil::Ampersand);
        assert_eq!(OdbcDialect::new(EngineTag::Firebird).variable_sigil(), Sigil::Colon);
    }
}
