//! Engine Registry (C12) and the `Dialect` capability trait.
//!
//! Rather than one bespoke implementation of the Connection Adapter (C4) per
//! engine tag, each dialect implements a small capability trait (spec.md §9
//! "Dynamic dispatch over engines") covering DDL, splitting policy, variable
//! sigil, placeholder style, regex translation, pagination syntax, and
//! pre-transaction locking. `create_engine` (§4.11 C12) dispatches on
//! `target.engine_tag`.

pub(crate) mod mysql;
pub(crate) mod odbc;
pub(crate) mod pg;
pub(crate) mod sqlite;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::splitter::SplitPolicy;
use crate::substitute::Sigil;
use crate::target::EngineTag;

/// Capability set implemented once per engine tag (spec.md §9).
pub trait Dialect: Send + Sync {
    fn tag(&self) -> EngineTag;

    /// Registry schema version this dialect's DDL implements (spec.md
    /// §4.6, `registry_version = "1.1"`).
    fn registry_version(&self) -> &'static str {
        "1.1"
    }

    /// Ordered DDL statements creating the six registry tables plus the
    /// `releases` seed row (spec.md §4.6 C6).
    fn ddl_statements(&self, registry_namespace: Option<&str>) -> Vec<String>;

    /// The `"<namespace>."`-style prefix this dialect qualifies registry
    /// table names with, or `""` when the dialect has no notion of a
    /// separate namespace (sqlite, oracle's current-schema, exasol).
    /// Shared by `ddl_statements` and every registry query so table
    /// qualification stays consistent (spec.md §6 registry namespace
    /// resolution).
    fn table_prefix(&self, _registry_namespace: Option<&str>) -> String {
        String::new()
    }

    /// A single registry table name, qualified per [`table_prefix`].
    fn table(&self, name: &str, registry_namespace: Option<&str>) -> String {
        format!("{}{name}", self.table_prefix(registry_namespace))
    }

    /// Session defaults enforced on first connect (spec.md §4.4: UTF-8,
    /// UTC, search_path/charset/timezone per dialect).
    fn session_init_statements(&self, registry_namespace: Option<&str>) -> Vec<String>;

    /// Pre-transaction hook: table locks for mysql/vertica, no-op
    /// elsewhere (spec.md §4.5, §4.12).
    fn pre_transaction_hook(
        &self,
        _conn: &mut dyn Connection,
        _registry_namespace: Option<&str>,
    ) -> Result<()> {
        Ok(())
    }

    /// Hook run when a Transaction Scope exits (success or failure) —
    /// mysql's `UNLOCK TABLES` (spec.md §4.12).
    fn post_transaction_hook(&self, _conn: &mut dyn Connection) -> Result<()> {
        Ok(())
    }

    fn split_policy(&self) -> SplitPolicy;

    fn variable_sigil(&self) -> Sigil;

    /// Build a regex-match WHERE fragment for `column` against bound
    /// parameter `placeholder` (spec.md §4.10: pg `~`, mysql `REGEXP`,
    /// oracle `REGEXP_LIKE`, snowflake `REGEXP_SUBSTR(...) IS NOT NULL`,
    /// vertica `~`, firebird `SIMILAR TO` translation, sqlite LIKE-fallback
    /// or REGEXP if loaded).
    fn regex_condition(&self, column: &str, placeholder: &str) -> String;

    /// Translate a caller-supplied regex pattern into whatever syntax
    /// `regex_condition`'s operator actually expects. Identity for dialects
    /// with a true regex operator; sqlite's `LIKE` fallback overrides this
    /// to turn `^`/`$` anchors and `.`/`.*` into `LIKE` wildcards.
    fn translate_pattern(&self, pattern: &str) -> String {
        pattern.to_string()
    }

    /// Dialect-specific LIMIT/OFFSET syntax (spec.md §4.10).
    fn limit_offset_clause(&self, limit: Option<i64>, offset: Option<i64>) -> String {
        match (limit, offset) {
            (Some(l), Some(o)) => format!("LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!("LIMIT {l}"),
            (None, Some(o)) => format!("OFFSET {o}"),
            (None, None) => String::new(),
        }
    }

    /// Open a fresh connection to `driver_uri` (the part of the target URI
    /// after `db:<tag>:`).
    fn create_connection(&self, driver_uri: &str) -> Result<Box<dyn Connection>>;
}

/// Process-wide mapping from engine tag to dialect constructor (spec.md
/// §4.11 C12). Registration is read-only after this call; there is no
/// process-wide mutable state beyond it (spec.md §5).
#[must_use]
pub fn dialect_for(tag: EngineTag) -> Result<Box<dyn Dialect>> {
    Ok(match tag {
        EngineTag::Sqlite => Box::new(sqlite::SqliteDialect),
        EngineTag::Pg => Box::new(pg::PgDialect::new(EngineTag::Pg)),
        EngineTag::Cockroach => Box::new(pg::PgDialect::new(EngineTag::Cockroach)),
        EngineTag::Mysql => Box::new(mysql::MysqlDialect),
        EngineTag::Oracle => Box::new(odbc::OdbcDialect::new(EngineTag::Oracle)),
        EngineTag::Snowflake => Box::new(odbc::OdbcDialect::new(EngineTag::Snowflake)),
        EngineTag::Vertica => Box::new(odbc::OdbcDialect::new(EngineTag::Vertica)),
        EngineTag::Exasol => Box::new(odbc::OdbcDialect::new(EngineTag::Exasol)),
        EngineTag::Firebird => Box::new(odbc::OdbcDialect::new(EngineTag::Firebird)),
    })
}

/// Translate a POSIX-ish regex into a SQL `SIMILAR TO` pattern (firebird has
/// no native regex operator, spec.md §4.10). Best-effort: firebird's
/// `SIMILAR TO` is a restricted SQL-99 regex dialect, so only the common
/// anchors/classes are mapped; anything else passes through unchanged
/// (callers accept that an invalid translation surfaces as a
/// `DeploymentError` from the driver, spec.md §8 boundary behavior).
#[must_use]
pub fn regex_to_similar_to(pattern: &str) -> String {
    pattern.replace("\\d", "[0-9]").replace("\\w", "[A-Za-z0-9_]")
}

pub(crate) fn unsupported(tag: &str) -> Error {
    Error::engine(format!("unsupported engine type: {tag}"))
}

/// Build the six-table registry schema DDL (spec.md §4.6 C6), qualifying
/// every table name with `prefix` (empty string, or `"<namespace>."` for
/// dialects that support schemas/namespaces).
#[must_use]
pub(crate) fn registry_ddl(prefix: &str) -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE {prefix}releases (\
             version TEXT NOT NULL, \
             installed_at TEXT NOT NULL, \
             PRIMARY KEY (version))"
        ),
        format!(
            "CREATE TABLE {prefix}projects (\
             project TEXT NOT NULL, \
             uri TEXT, \
             created_at TEXT NOT NULL, \
             creator_name TEXT NOT NULL, \
             creator_email TEXT NOT NULL, \
             PRIMARY KEY (project))"
        ),
        format!(
            "CREATE TABLE {prefix}changes (\
             change_id TEXT NOT NULL, \
             script_hash TEXT, \
             change TEXT NOT NULL, \
             project TEXT NOT NULL, \
             note TEXT NOT NULL DEFAULT '', \
             committed_at TEXT NOT NULL, \
             committer_name TEXT NOT NULL, \
             committer_email TEXT NOT NULL, \
             planned_at TEXT NOT NULL, \
             planner_name TEXT NOT NULL, \
             planner_email TEXT NOT NULL, \
             PRIMARY KEY (change_id), \
             UNIQUE (project, script_hash), \
             FOREIGN KEY (project) REFERENCES {prefix}projects(project))"
        ),
        format!(
            "CREATE TABLE {prefix}tags (\
             tag_id TEXT NOT NULL, \
             tag TEXT NOT NULL, \
             project TEXT NOT NULL, \
             change_id TEXT NOT NULL, \
             note TEXT NOT NULL DEFAULT '', \
             committed_at TEXT NOT NULL, \
             committer_name TEXT NOT NULL, \
             committer_email TEXT NOT NULL, \
             planned_at TEXT NOT NULL, \
             planner_name TEXT NOT NULL, \
             planner_email TEXT NOT NULL, \
             PRIMARY KEY (tag_id), \
             UNIQUE (project, tag), \
             FOREIGN KEY (project) REFERENCES {prefix}projects(project), \
             FOREIGN KEY (change_id) REFERENCES {prefix}changes(change_id) ON DELETE CASCADE)"
        ),
        format!(
            "CREATE TABLE {prefix}dependencies (\
             change_id TEXT NOT NULL, \
             type TEXT NOT NULL, \
             dependency TEXT NOT NULL, \
             dependency_id TEXT, \
             PRIMARY KEY (change_id, dependency), \
             FOREIGN KEY (change_id) REFERENCES {prefix}changes(change_id) ON DELETE CASCADE, \
             FOREIGN KEY (dependency_id) REFERENCES {prefix}changes(change_id), \
             CHECK ((type = 'require' AND dependency_id IS NOT NULL) \
                 OR (type = 'conflict' AND dependency_id IS NULL)))"
        ),
        format!(
            "CREATE TABLE {prefix}events (\
             event TEXT NOT NULL, \
             change_id TEXT NOT NULL, \
             change TEXT NOT NULL, \
             project TEXT NOT NULL, \
             note TEXT NOT NULL DEFAULT '', \
             requires TEXT NOT NULL DEFAULT '', \
             conflicts TEXT NOT NULL DEFAULT '', \
             tags TEXT NOT NULL DEFAULT '', \
             committed_at TEXT NOT NULL, \
             committer_name TEXT NOT NULL, \
             committer_email TEXT NOT NULL, \
             planned_at TEXT NOT NULL, \
             planner_name TEXT NOT NULL, \
             planner_email TEXT NOT NULL, \
             PRIMARY KEY (change_id, committed_at), \
             FOREIGN KEY (project) REFERENCES {prefix}projects(project))"
        ),
    ]
}
