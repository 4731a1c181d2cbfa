//! Sqlite dialect: `rusqlite` bundled driver (spec.md §4.4, §9 "drivers
//! grouped by wire family").

use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection as RusqliteConn;

use crate::connection::{Connection, Param, Row, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::splitter::SplitPolicy;
use crate::substitute::Sigil;
use crate::target::EngineTag;

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn tag(&self) -> EngineTag {
        EngineTag::Sqlite
    }

    fn ddl_statements(&self, _registry_namespace: Option<&str>) -> Vec<String> {
        super::registry_ddl("")
    }

    fn session_init_statements(&self, _registry_namespace: Option<&str>) -> Vec<String> {
        vec!["PRAGMA foreign_keys = ON".to_string()]
    }

    fn split_policy(&self) -> SplitPolicy {
        SplitPolicy::Generic
    }

    fn variable_sigil(&self) -> Sigil {
        Sigil::Colon
    }

    fn regex_condition(&self, column: &str, placeholder: &str) -> String {
        // Sqlite has no built-in REGEXP unless an extension is loaded; the
        // registry's own default build has none, so approximate with LIKE
        // (spec.md §4.10 "sqlite LIKE-fallback").
        format!("{column} LIKE {placeholder}")
    }

    /// Best-effort regex-to-LIKE translation: `^`/`$` anchor the ends
    /// (absent, the match is a substring search, so both ends get a `%`
    /// wildcard), and `.`/`.*` become `LIKE`'s `_`/`%` wildcards. This is an
    /// approximation, not a regex engine (spec.md §4.10 "sqlite
    /// LIKE-fallback").
    fn translate_pattern(&self, pattern: &str) -> String {
        let anchored_start = pattern.starts_with('^');
        let anchored_end = pattern.ends_with('$');
        let mut body = pattern;
        if anchored_start {
            body = &body[1..];
        }
        if anchored_end {
            body = &body[..body.len() - 1];
        }
        let body = body.replace(".*", "%").replace('.', "_");
        let prefix = if anchored_start { "" } else { "%" };
        let suffix = if anchored_end { "" } else { "%" };
        format!("{prefix}{body}{suffix}")
    }

    fn create_connection(&self, driver_uri: &str) -> Result<Box<dyn Connection>> {
        let path = driver_uri.trim_start_matches("//");
        let conn = RusqliteConn::open(path).map_err(|e| {
            Error::connection(EngineTag::Sqlite, format!("db:sqlite:{driver_uri}"), e.to_string())
        })?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

pub struct SqliteConnection {
    conn: RusqliteConn,
}

fn bind(params: &[Param<'_>]) -> Vec<(String, SqlValue)> {
    params
        .iter()
        .map(|(name, value)| {
            let bound = match value {
                Value::Null => SqlValue::Null,
                Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
                Value::Int(n) => SqlValue::Integer(*n),
                Value::Text(s) => SqlValue::Text(s.clone()),
                Value::Timestamp(t) => SqlValue::Text(t.to_rfc3339()),
            };
            (format!(":{name}"), bound)
        })
        .collect()
}

fn row_from_sqlite(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.as_ref().column_names().iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Int(n),
            ValueRef::Real(f) => Value::Text(f.to_string()),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        };
        out.insert(column, value);
    }
    Ok(out)
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let bound = bind(params);
        let named: Vec<(&str, &dyn rusqlite::ToSql)> =
            bound.iter().map(|(n, v)| (n.as_str(), v as &dyn rusqlite::ToSql)).collect();
        let affected = self
            .conn
            .execute(sql, named.as_slice())
            .map_err(|e| Error::engine(e.to_string()))?;
        Ok(affected as u64)
    }

    fn fetch_one(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Row>> {
        let bound = bind(params);
        let named: Vec<(&str, &dyn rusqlite::ToSql)> =
            bound.iter().map(|(n, v)| (n.as_str(), v as &dyn rusqlite::ToSql)).collect();
        let mut stmt = self.conn.prepare(sql).map_err(|e| Error::engine(e.to_string()))?;
        let mut rows = stmt.query(named.as_slice()).map_err(|e| Error::engine(e.to_string()))?;
        match rows.next().map_err(|e| Error::engine(e.to_string()))? {
            Some(row) => Ok(Some(row_from_sqlite(row).map_err(|e| Error::engine(e.to_string()))?)),
            None => Ok(None),
        }
    }

    fn fetch_all(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Row>> {
        let bound = bind(params);
        let named: Vec<(&str, &dyn rusqlite::ToSql)> =
            bound.iter().map(|(n, v)| (n.as_str(), v as &dyn rusqlite::ToSql)).collect();
        let mut stmt = self.conn.prepare(sql).map_err(|e| Error::engine(e.to_string()))?;
        let mut rows = stmt.query(named.as_slice()).map_err(|e| Error::engine(e.to_string()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::engine(e.to_string()))? {
            out.push(row_from_sqlite(row).map_err(|e| Error::engine(e.to_string()))?);
        }
        Ok(out)
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN").map_err(|e| Error::engine(e.to_string()))
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(|e| Error::engine(e.to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(|e| Error::engine(e.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_in_memory_and_round_trips() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        conn.execute("CREATE TABLE t(id INTEGER, name TEXT)", &[]).unwrap();
        conn.execute(
            "INSERT INTO t(id, name) VALUES (:id, :name)",
            &[("id", Value::Int(1)), ("name", Value::from("alice"))],
        )
        .unwrap();
        let row = conn.fetch_one("SELECT name FROM t WHERE id = :id", &[("id", Value::Int(1))]).unwrap();
        assert_eq!(row.unwrap().get_str("name"), Some("alice"));
    }

    #[test]
    fn regex_condition_falls_back_to_like() {
        assert_eq!(SqliteDialect.regex_condition("note", ":pattern"), "note LIKE :pattern");
    }

    #[test]
    fn translate_pattern_converts_anchors_and_wildcards() {
        assert_eq!(SqliteDialect.translate_pattern("^users$"), "users");
        assert_eq!(SqliteDialect.translate_pattern("users"), "%users%");
        assert_eq!(SqliteDialect.translate_pattern("^us.*$"), "us%");
        assert_eq!(SqliteDialect.translate_pattern("^a.b$"), "a_b");
    }
}
