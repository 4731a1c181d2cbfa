//! Registry Bootstrapper (C7), on top of the Registry Schema DDL (C6) each
//! `Dialect` provides (spec.md §4.6).
//!
//! `ensure_registry` is idempotent: absence is detected by probing
//! `projects`, DDL + a seed `releases` row + the project row are created
//! inside a single transaction on first run, and a version mismatch on
//! subsequent runs is treated as fatal (SPEC_FULL §9 resolves the spec's
//! "upgrade registry from old version" open question this way: no concrete
//! migration path exists in the source, so this crate refuses to operate
//! rather than silently continuing against an unknown schema shape).

use chrono::Utc;

use crate::connection::{Connection, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::plan::Plan;
use crate::target::Target;

/// Probe for registry existence: `SELECT COUNT(*) FROM projects`. Any
/// error (missing table, missing schema, ...) means "absent" (spec.md
/// §4.6 step 1).
fn registry_exists(dialect: &dyn Dialect, conn: &mut dyn Connection, registry_namespace: Option<&str>) -> bool {
    let table = dialect.table("projects", registry_namespace);
    conn.fetch_one(&format!("SELECT COUNT(*) AS n FROM {table}"), &[]).is_ok()
}

/// Ensure the six registry tables exist for `target`'s namespace and that
/// `plan`'s project has a row in `projects` (spec.md §4.6 C7).
pub fn ensure_registry(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    target: &Target,
    plan: &Plan,
) -> Result<()> {
    let ns = target.registry_namespace();
    let ns = ns.as_deref();

    if registry_exists(dialect, conn, ns) {
        return check_version(dialect, conn, ns);
    }

    conn.begin()?;
    let result = bootstrap(dialect, conn, ns, target, plan);
    match result {
        Ok(()) => conn.commit(),
        Err(e) => {
            if let Err(rollback_err) = conn.rollback() {
                tracing::debug!(error = %rollback_err, "rollback failed while bootstrapping registry");
            }
            Err(e)
        }
    }
}

fn bootstrap(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    target: &Target,
    plan: &Plan,
) -> Result<()> {
    for stmt in dialect.ddl_statements(ns) {
        conn.execute(&stmt, &[])
            .map_err(|e| Error::engine(format!("registry schema creation failed: {e}")))?;
    }

    let releases = dialect.table("releases", ns);
    conn.execute(
        &format!("INSERT INTO {releases} (version, installed_at) VALUES (:version, :installed_at)"),
        &[
            ("version", Value::from(dialect.registry_version())),
            ("installed_at", Value::from(Utc::now())),
        ],
    )?;

    let projects = dialect.table("projects", ns);
    let existing = conn.fetch_one(
        &format!("SELECT project FROM {projects} WHERE project = :project"),
        &[("project", Value::from(plan.project_name()))],
    )?;
    if existing.is_none() {
        conn.execute(
            &format!(
                "INSERT INTO {projects} (project, uri, created_at, creator_name, creator_email) \
                 VALUES (:project, :uri, :created_at, :creator_name, :creator_email)"
            ),
            &[
                ("project", Value::from(plan.project_name())),
                ("uri", Value::from(target.uri.clone())),
                ("created_at", Value::from(Utc::now())),
                ("creator_name", Value::from(plan.creator_name())),
                ("creator_email", Value::from(plan.creator_email())),
            ],
        )?;
    }
    Ok(())
}

fn check_version(dialect: &dyn Dialect, conn: &mut dyn Connection, ns: Option<&str>) -> Result<()> {
    let releases = dialect.table("releases", ns);
    let row = conn.fetch_one(&format!("SELECT MAX(version) AS version FROM {releases}"), &[])?;
    let found = row.and_then(|r| r.get_str("version").map(str::to_string));
    let expected = dialect.registry_version();
    match found {
        Some(ref v) if v == expected => Ok(()),
        Some(v) => Err(Error::engine(format!(
            "registry version {v} does not match supported version {expected}; no upgrade path is \
             implemented for this release"
        ))),
        None => Err(Error::engine("registry releases table has no version row")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::dialect::sqlite::SqliteDialect;
    use crate::plan::PlanBuilder;
    use chrono::Utc;

    fn plan() -> Plan {
        let mut b = PlanBuilder::new("widgets", "Ada", "ada@example.com", "/proj");
        b.add(Change::new("widgets", "users", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.build()
    }

    #[test]
    fn bootstraps_from_absent() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        let target = Target::parse_for_test();
        let plan = plan();
        ensure_registry(&dialect, conn.as_mut(), &target, &plan).unwrap();
        let row = conn.fetch_one("SELECT project FROM projects WHERE project = :p", &[("p", Value::from("widgets"))]).unwrap();
        assert!(row.is_some());
    }

    #[test]
    fn is_idempotent() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        let target = Target::parse_for_test();
        let plan = plan();
        ensure_registry(&dialect, conn.as_mut(), &target, &plan).unwrap();
        ensure_registry(&dialect, conn.as_mut(), &target, &plan).unwrap();
        let rows = conn.fetch_all("SELECT project FROM projects", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }

    impl Target {
        fn parse_for_test() -> Self {
            Target::parse("dev", "db:sqlite:./ignored.db", "/proj").unwrap()
        }
    }
}
