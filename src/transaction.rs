//! Transaction Scope (C5): brackets work in BEGIN/COMMIT with guaranteed
//! rollback on error (spec.md §4.5).
//!
//! Any error raised by the wrapped closure causes a rollback and is
//! re-raised as a `DeploymentError` (unless it already is one); rollback
//! and post-transaction-hook failures are logged at debug and swallowed so
//! the primary error surfaces (spec.md §7 propagation policy).

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::target::EngineTag;

/// Run `f` inside a transaction on `conn`, applying `dialect`'s
/// pre/post-transaction hooks (table locks for mysql/vertica, spec.md
/// §4.5, §4.12) around it.
pub fn with_transaction<T>(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    registry_namespace: Option<&str>,
    operation: &'static str,
    change_name: Option<&str>,
    f: impl FnOnce(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    dialect.pre_transaction_hook(conn, registry_namespace)?;
    conn.begin()?;

    let outcome = match f(conn) {
        Ok(value) => conn.commit().map(|()| value).map_err(|e| wrap(dialect.tag(), operation, change_name, e)),
        Err(e) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::debug!(error = %rollback_err, "rollback failed; primary error still surfaces");
            }
            Err(wrap(dialect.tag(), operation, change_name, e))
        }
    };

    if let Err(post_err) = dialect.post_transaction_hook(conn) {
        tracing::debug!(error = %post_err, "post-transaction hook failed");
    }

    outcome
}

fn wrap(engine: EngineTag, operation: &'static str, change_name: Option<&str>, e: Error) -> Error {
    match e {
        deployment @ Error::Deployment { .. } => deployment,
        other => Error::deployment(operation, change_name.map(str::to_string), None, engine, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Param;
    use crate::dialect::sqlite::SqliteDialect;

    #[test]
    fn commits_on_success() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        conn.execute("CREATE TABLE t(id INTEGER)", &[]).unwrap();
        with_transaction(&dialect, conn.as_mut(), None, "deploy", Some("x"), |c| {
            c.execute("INSERT INTO t(id) VALUES (1)", &[])
        })
        .unwrap();
        let rows = conn.fetch_all("SELECT id FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn rolls_back_and_wraps_as_deployment_error() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        conn.execute("CREATE TABLE t(id INTEGER)", &[]).unwrap();
        let result: Result<()> = with_transaction(&dialect, conn.as_mut(), None, "deploy", Some("x"), |c| {
            c.execute("INSERT INTO t(id) VALUES (1)", &[])?;
            let params: Vec<Param> = vec![];
            c.execute("this is not sql", &params)?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::Deployment { change_name: Some(ref n), .. }) if n == "x"));
        let rows = conn.fetch_all("SELECT id FROM t", &[]).unwrap();
        assert!(rows.is_empty());
    }
}
