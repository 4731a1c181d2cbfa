//! Target resolution: engine tag + connection URI + registry namespace +
//! script directories (spec.md §3 "Target", §6 "Target URI grammar").

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// The closed set of engine tags (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    Pg,
    Mysql,
    Sqlite,
    Oracle,
    Snowflake,
    Vertica,
    Exasol,
    Firebird,
    Cockroach,
}

impl EngineTag {
    /// Parse a tag from its lowercase wire representation (`db:<tag>:...`).
    pub fn parse(tag: &str) -> Result<Self> {
        Ok(match tag {
            "pg" | "postgres" | "postgresql" => Self::Pg,
            "mysql" | "mariadb" => Self::Mysql,
            "sqlite" => Self::Sqlite,
            "oracle" => Self::Oracle,
            "snowflake" => Self::Snowflake,
            "vertica" => Self::Vertica,
            "exasol" => Self::Exasol,
            "firebird" => Self::Firebird,
            "cockroach" | "cockroachdb" => Self::Cockroach,
            other => {
                return Err(Error::engine(format!("unsupported engine type: {other}")));
            }
        })
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pg => "pg",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::Oracle => "oracle",
            Self::Snowflake => "snowflake",
            Self::Vertica => "vertica",
            Self::Exasol => "exasol",
            Self::Firebird => "firebird",
            Self::Cockroach => "cockroach",
        }
    }

    /// Default registry namespace per dialect (spec.md §6).
    #[must_use]
    pub const fn default_registry_namespace(&self) -> Option<&'static str> {
        match self {
            Self::Pg | Self::Snowflake | Self::Vertica | Self::Cockroach => Some("sqitch"),
            Self::Exasol | Self::Firebird => Some("PUBLIC"),
            Self::Mysql | Self::Sqlite | Self::Oracle => None,
        }
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named binding of engine + connection URI + registry namespace + script
/// directories (spec.md §3 "Target").
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    /// The full `db:<tag>:<driver-uri>` string, as given.
    pub uri: String,
    pub engine_tag: EngineTag,
    /// The part of the URI after `db:<tag>:`, handed to the driver as-is.
    pub driver_uri: String,
    pub registry_namespace: Option<String>,
    pub top_dir: PathBuf,
    pub deploy_dir: PathBuf,
    pub revert_dir: PathBuf,
    pub verify_dir: PathBuf,
}

impl Target {
    /// Parse a `db:<engine-tag>:<driver-uri>` string into a `Target`,
    /// defaulting directories relative to `top_dir`.
    pub fn parse(name: impl Into<String>, uri: &str, top_dir: impl Into<PathBuf>) -> Result<Self> {
        let rest = uri.strip_prefix("db:").ok_or_else(|| {
            Error::validation(format!("target URI must start with 'db:': {uri}"))
        })?;
        let (tag, driver_uri) = rest.split_once(':').ok_or_else(|| {
            Error::validation(format!("target URI missing engine tag: {uri}"))
        })?;
        let engine_tag = EngineTag::parse(tag)?;
        let registry_namespace = extract_query_param(driver_uri, "registry");
        let top_dir = top_dir.into();

        Ok(Self {
            name: name.into(),
            uri: uri.to_string(),
            engine_tag,
            driver_uri: driver_uri.to_string(),
            registry_namespace,
            deploy_dir: top_dir.join("deploy"),
            revert_dir: top_dir.join("revert"),
            verify_dir: top_dir.join("verify"),
            top_dir,
        })
    }

    /// The registry namespace to use: explicit `?registry=` override, else
    /// the dialect's default (spec.md §6), else `None` (sqlite/oracle use
    /// the connection itself).
    #[must_use]
    pub fn registry_namespace(&self) -> Option<String> {
        self.registry_namespace
            .clone()
            .or_else(|| self.engine_tag.default_registry_namespace().map(str::to_string))
    }

    #[must_use]
    pub fn deploy_file(&self, change_name: &str) -> PathBuf {
        self.deploy_dir.join(format!("{change_name}.sql"))
    }

    #[must_use]
    pub fn revert_file(&self, change_name: &str) -> PathBuf {
        self.revert_dir.join(format!("{change_name}.sql"))
    }

    #[must_use]
    pub fn verify_file(&self, change_name: &str) -> PathBuf {
        self.verify_dir.join(format!("{change_name}.sql"))
    }
}

/// Pull a single query-string parameter out of a driver URI, if present.
fn extract_query_param(driver_uri: &str, key: &str) -> Option<String> {
    let query = driver_uri.split_once('?').map(|(_, q)| q)?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pg_target() {
        let t = Target::parse("prod", "db:pg://user@host:5432/app", "/proj").unwrap();
        assert_eq!(t.engine_tag, EngineTag::Pg);
        assert_eq!(t.driver_uri, "//user@host:5432/app");
        assert_eq!(t.deploy_dir, PathBuf::from("/proj/deploy"));
    }

    #[test]
    fn parses_sqlite_target() {
        let t = Target::parse("dev", "db:sqlite:./app.db", "/proj").unwrap();
        assert_eq!(t.engine_tag, EngineTag::Sqlite);
        assert_eq!(t.driver_uri, "./app.db");
    }

    #[test]
    fn rejects_missing_prefix() {
        assert!(Target::parse("x", "pg://host/db", "/proj").is_err());
    }

    #[test]
    fn rejects_unknown_engine() {
        assert!(Target::parse("x", "db:mongo://host/db", "/proj").is_err());
    }

    #[test]
    fn registry_override_from_query_string() {
        let t = Target::parse("x", "db:pg://host/app?registry=myreg", "/proj").unwrap();
        assert_eq!(t.registry_namespace(), Some("myreg".to_string()));
    }

    #[test]
    fn registry_default_per_dialect() {
        let t = Target::parse("x", "db:pg://host/app", "/proj").unwrap();
        assert_eq!(t.registry_namespace(), Some("sqitch".to_string()));

        let t = Target::parse("x", "db:sqlite:./app.db", "/proj").unwrap();
        assert_eq!(t.registry_namespace(), None);
    }
}
