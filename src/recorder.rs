//! Change Recorder (C8): writes/deletes `changes`, `dependencies`, and
//! appends to `events` (spec.md §4.7).
//!
//! Dependency resolution: same-project `require`/`conflict` tokens resolve
//! against the in-memory `Plan` (no DB round-trip needed, since a
//! same-project dependency must already have been deployed earlier in plan
//! order to pass `I3`); cross-project tokens resolve against the `changes`
//! table of the shared registry, since the dependent project's plan is not
//! available here.

use chrono::Utc;
use sha1::{Digest, Sha1};

use crate::change::{Change, DependencyType};
use crate::connection::{Connection, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::plan::Plan;

/// Record a `deploy`: insert the `changes` row, one `dependencies` row per
/// dependency, and append a `deploy` event (spec.md §4.7 steps 1-3).
///
/// Committer identity is taken from the change's planner fields, matching
/// the Perl-derived behavior documented as a preserved quirk in SPEC_FULL
/// §3 / DESIGN.md.
pub fn record_deploy(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    plan: &Plan,
    change: &Change,
) -> Result<()> {
    record_deploy_with_hash(dialect, conn, ns, plan, change, &crate::fingerprint::fingerprint(
        &plan.get_deploy_file(change),
        &plan.get_revert_file(change),
        &plan.get_verify_file(change),
    )?)
}

/// Same as [`record_deploy`] but takes an already-computed fingerprint, for
/// callers (the executor) that read the scripts once for both execution
/// and hashing.
pub fn record_deploy_with_hash(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    plan: &Plan,
    change: &Change,
    script_hash: &str,
) -> Result<()> {
    let now = Utc::now();
    let changes = dialect.table("changes", ns);
    conn.execute(
        &format!(
            "INSERT INTO {changes} \
             (change_id, script_hash, change, project, note, committed_at, committer_name, \
              committer_email, planned_at, planner_name, planner_email) \
             VALUES (:change_id, :script_hash, :change, :project, :note, :committed_at, \
             :committer_name, :committer_email, :planned_at, :planner_name, :planner_email)"
        ),
        &[
            ("change_id", Value::from(change.id.clone())),
            ("script_hash", Value::from(script_hash.to_string())),
            ("change", Value::from(change.name.clone())),
            ("project", Value::from(plan.project_name().to_string())),
            ("note", Value::from(change.note.clone())),
            ("committed_at", Value::from(now)),
            ("committer_name", Value::from(change.planner_name.clone())),
            ("committer_email", Value::from(change.planner_email.clone())),
            ("planned_at", Value::from(change.timestamp)),
            ("planner_name", Value::from(change.planner_name.clone())),
            ("planner_email", Value::from(change.planner_email.clone())),
        ],
    )?;

    for dep in &change.dependencies {
        let dependency_id = match dep.dep_type {
            DependencyType::Conflict => None,
            DependencyType::Require => Some(resolve_dependency_id(dialect, conn, ns, plan, dep)?),
        };
        let dependencies = dialect.table("dependencies", ns);
        conn.execute(
            &format!(
                "INSERT INTO {dependencies} (change_id, type, dependency, dependency_id) \
                 VALUES (:change_id, :type, :dependency, :dependency_id)"
            ),
            &[
                ("change_id", Value::from(change.id.clone())),
                ("type", Value::from(dep.dep_type.as_str())),
                ("dependency", Value::from(dep.token())),
                ("dependency_id", Value::from(dependency_id)),
            ],
        )?;
    }

    for tag in &change.tags {
        let tags = dialect.table("tags", ns);
        let tag_id = compute_tag_id(plan.project_name(), &tag.name, &change.id);
        conn.execute(
            &format!(
                "INSERT INTO {tags} \
                 (tag_id, tag, project, change_id, note, committed_at, committer_name, committer_email, \
                  planned_at, planner_name, planner_email) \
                 VALUES (:tag_id, :tag, :project, :change_id, '', :committed_at, :committer_name, \
                 :committer_email, :planned_at, :planner_name, :planner_email)"
            ),
            &[
                ("tag_id", Value::from(tag_id)),
                ("tag", Value::from(tag.name.clone())),
                ("project", Value::from(plan.project_name().to_string())),
                ("change_id", Value::from(change.id.clone())),
                ("committed_at", Value::from(now)),
                ("committer_name", Value::from(change.planner_name.clone())),
                ("committer_email", Value::from(change.planner_email.clone())),
                ("planned_at", Value::from(change.timestamp)),
                ("planner_name", Value::from(change.planner_name.clone())),
                ("planner_email", Value::from(change.planner_email.clone())),
            ],
        )?;
    }

    append_event(dialect, conn, ns, "deploy", plan.project_name(), change, now)
}

/// Derive a stable `tag_id` from project + tag name + the tagged change's id
/// (supplemental: spec.md's `tags` table has no recorder contract of its
/// own, so this crate grounds tag identity the same way `change_id` is
/// grounded — a SHA-1 over its identifying fields, SPEC_FULL §3).
fn compute_tag_id(project: &str, tag: &str, change_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(project.as_bytes());
    hasher.update(b"\n");
    hasher.update(tag.as_bytes());
    hasher.update(b"\n");
    hasher.update(change_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn resolve_dependency_id(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    plan: &Plan,
    dep: &crate::change::Dependency,
) -> Result<String> {
    if dep.project.is_none() {
        if let Some(found) = plan.by_name(&dep.change_name) {
            return Ok(found.id.clone());
        }
    }
    let project = dep.project.as_deref().unwrap_or_else(|| plan.project_name());
    let changes = dialect.table("changes", ns);
    let row = conn.fetch_one(
        &format!("SELECT change_id FROM {changes} WHERE project = :project AND change = :change"),
        &[
            ("project", Value::from(project.to_string())),
            ("change", Value::from(dep.change_name.clone())),
        ],
    )?;
    row.and_then(|r| r.get_str("change_id").map(str::to_string))
        .ok_or_else(|| Error::plan(format!("required dependency not deployed: {}", dep.token())))
}

/// Record a revert: delete the `changes` row (cascades to `dependencies`
/// at the schema level; sqlite/odbc backends without `ON DELETE CASCADE`
/// enforcement delete `dependencies` explicitly here too), then append a
/// `revert` event preserving the original metadata (spec.md §4.7 "Revert is
/// symmetric").
pub fn record_revert(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    plan: &Plan,
    change: &Change,
) -> Result<()> {
    let dependencies = dialect.table("dependencies", ns);
    conn.execute(
        &format!("DELETE FROM {dependencies} WHERE change_id = :change_id"),
        &[("change_id", Value::from(change.id.clone()))],
    )?;
    let changes = dialect.table("changes", ns);
    conn.execute(
        &format!("DELETE FROM {changes} WHERE change_id = :change_id"),
        &[("change_id", Value::from(change.id.clone()))],
    )?;
    append_event(dialect, conn, ns, "revert", plan.project_name(), change, Utc::now())
}

/// Attach `tag_name` to an already-deployed `change` outside of a deploy
/// (the CLI's standalone `tag` command; spec.md §6 "External interfaces"
/// lists `tag` as a CLI surface without further detail, so this crate grounds
/// it directly in the `tags` table schema rather than the plan-file tag-line
/// syntax sqitch uses, which is out of scope per SPEC_FULL §2 A3).
pub fn record_tag(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    project: &str,
    change: &Change,
    tag_name: &str,
) -> Result<()> {
    crate::change::validate_name("tag", tag_name)?;
    let tags = dialect.table("tags", ns);
    let tag_id = compute_tag_id(project, tag_name, &change.id);
    conn.execute(
        &format!(
            "INSERT INTO {tags} \
             (tag_id, tag, project, change_id, note, committed_at, committer_name, committer_email, \
              planned_at, planner_name, planner_email) \
             VALUES (:tag_id, :tag, :project, :change_id, '', :committed_at, :committer_name, \
             :committer_email, :planned_at, :planner_name, :planner_email)"
        ),
        &[
            ("tag_id", Value::from(tag_id)),
            ("tag", Value::from(tag_name.to_string())),
            ("project", Value::from(project.to_string())),
            ("change_id", Value::from(change.id.clone())),
            ("committed_at", Value::from(Utc::now())),
            ("committer_name", Value::from(change.planner_name.clone())),
            ("committer_email", Value::from(change.planner_email.clone())),
            ("planned_at", Value::from(change.timestamp)),
            ("planner_name", Value::from(change.planner_name.clone())),
            ("planner_email", Value::from(change.planner_email.clone())),
        ],
    )?;
    Ok(())
}

/// Append a `fail` event on a non-transactional connection, called by the
/// executor before the enclosing Transaction Scope's rollback completes
/// (spec.md §4.7 "A failed deploy should append a fail event"; SPEC_FULL §9
/// resolves the spec's silence on emission by having the executor do it).
pub fn record_fail(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    project: &str,
    change: &Change,
) -> Result<()> {
    append_event(dialect, conn, ns, "fail", project, change, Utc::now())
}

#[allow(clippy::too_many_arguments)]
fn append_event(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    event: &'static str,
    project: &str,
    change: &Change,
    committed_at: chrono::DateTime<Utc>,
) -> Result<()> {
    let events = dialect.table("events", ns);
    conn.execute(
        &format!(
            "INSERT INTO {events} \
             (event, change_id, change, project, note, requires, conflicts, tags, committed_at, \
              committer_name, committer_email, planned_at, planner_name, planner_email) \
             VALUES (:event, :change_id, :change, :project, :note, :requires, :conflicts, :tags, \
             :committed_at, :committer_name, :committer_email, :planned_at, :planner_name, :planner_email)"
        ),
        &[
            ("event", Value::from(event)),
            ("change_id", Value::from(change.id.clone())),
            ("change", Value::from(change.name.clone())),
            ("project", Value::from(project.to_string())),
            ("note", Value::from(change.note.clone())),
            ("requires", Value::from(change.requires_column())),
            ("conflicts", Value::from(change.conflicts_column())),
            ("tags", Value::from(change.tags_column())),
            ("committed_at", Value::from(committed_at)),
            ("committer_name", Value::from(change.planner_name.clone())),
            ("committer_email", Value::from(change.planner_email.clone())),
            ("planned_at", Value::from(change.timestamp)),
            ("planner_name", Value::from(change.planner_name.clone())),
            ("planner_email", Value::from(change.planner_email.clone())),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Change, Dependency};
    use crate::dialect::sqlite::SqliteDialect;
    use crate::plan::PlanBuilder;
    use crate::target::Target;

    fn setup() -> (SqliteDialect, Box<dyn Connection>, Plan) {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        for stmt in dialect.session_init_statements(None) {
            conn.execute(&stmt, &[]).unwrap();
        }
        for stmt in dialect.ddl_statements(None) {
            conn.execute(&stmt, &[]).unwrap();
        }
        conn.execute(
            "INSERT INTO projects (project, created_at, creator_name, creator_email) \
             VALUES ('widgets', :now, 'Ada', 'ada@example.com')",
            &[("now", Value::from(Utc::now()))],
        )
        .unwrap();
        let mut b = PlanBuilder::new("widgets", "Ada", "ada@example.com", "/proj");
        b.add(Change::new("widgets", "users", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.add(
            Change::new(
                "widgets",
                "posts",
                "",
                Utc::now(),
                "Ada",
                "ada@example.com",
                vec![Dependency::require("users")],
                vec![],
            )
            .unwrap(),
        )
        .unwrap();
        (dialect, conn, b.build())
    }

    #[test]
    fn deploy_then_revert_round_trips_to_empty() {
        let (dialect, mut conn, plan) = setup();
        let users = plan.by_name("users").unwrap().clone();
        record_deploy(&dialect, conn.as_mut(), None, &plan, &users).unwrap();

        let row = conn
            .fetch_one("SELECT change_id FROM changes WHERE change_id = :id", &[("id", Value::from(users.id.clone()))])
            .unwrap();
        assert!(row.is_some());

        record_revert(&dialect, conn.as_mut(), None, &plan, &users).unwrap();
        let row = conn
            .fetch_one("SELECT change_id FROM changes WHERE change_id = :id", &[("id", Value::from(users.id.clone()))])
            .unwrap();
        assert!(row.is_none());

        let events = conn.fetch_all("SELECT event FROM events ORDER BY committed_at", &[]).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get_str("event"), Some("deploy"));
        assert_eq!(events[1].get_str("event"), Some("revert"));
    }

    #[test]
    fn resolves_require_dependency_from_plan() {
        let (dialect, mut conn, plan) = setup();
        let users = plan.by_name("users").unwrap().clone();
        let posts = plan.by_name("posts").unwrap().clone();
        record_deploy(&dialect, conn.as_mut(), None, &plan, &users).unwrap();
        record_deploy(&dialect, conn.as_mut(), None, &plan, &posts).unwrap();

        let row = conn
            .fetch_one(
                "SELECT dependency_id FROM dependencies WHERE change_id = :id",
                &[("id", Value::from(posts.id.clone()))],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("dependency_id"), Some(users.id.as_str()));
    }

    #[test]
    fn require_without_deployed_dependency_errors() {
        let (dialect, mut conn, plan) = setup();
        let posts = plan.by_name("posts").unwrap().clone();
        assert!(record_deploy(&dialect, conn.as_mut(), None, &plan, &posts).is_err());
    }

    #[test]
    fn conflict_dependency_id_is_null() {
        let dialect = SqliteDialect;
        let mut conn = dialect.create_connection("//:memory:").unwrap();
        for stmt in dialect.session_init_statements(None) {
            conn.execute(&stmt, &[]).unwrap();
        }
        for stmt in dialect.ddl_statements(None) {
            conn.execute(&stmt, &[]).unwrap();
        }
        conn.execute(
            "INSERT INTO projects (project, created_at, creator_name, creator_email) \
             VALUES ('widgets', :now, 'Ada', 'ada@example.com')",
            &[("now", Value::from(Utc::now()))],
        )
        .unwrap();
        let mut b = PlanBuilder::new("widgets", "Ada", "ada@example.com", "/proj");
        b.add(Change::new("widgets", "legacy", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.add(
            Change::new(
                "widgets",
                "replacement",
                "",
                Utc::now(),
                "Ada",
                "ada@example.com",
                vec![Dependency::conflict("legacy")],
                vec![],
            )
            .unwrap(),
        )
        .unwrap();
        let plan = b.build();
        let replacement = plan.by_name("replacement").unwrap().clone();
        record_deploy(&dialect, conn.as_mut(), None, &plan, &replacement).unwrap();

        let row = conn
            .fetch_one(
                "SELECT dependency_id FROM dependencies WHERE change_id = :id",
                &[("id", Value::from(replacement.id.clone()))],
            )
            .unwrap()
            .unwrap();
        assert_eq!(row.get_str("dependency_id"), None);
    }

    #[test]
    fn fail_event_is_appended() {
        let (dialect, mut conn, plan) = setup();
        let users = plan.by_name("users").unwrap().clone();
        record_fail(&dialect, conn.as_mut(), None, plan.project_name(), &users).unwrap();
        let events = conn.fetch_all("SELECT event FROM events", &[]).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str("event"), Some("fail"));
    }
}
