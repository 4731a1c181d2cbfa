//! Plan↔Deployed Reconciler (C10, spec.md §4.9): computes the deployed set,
//! the ordered list of changes still to apply or undo, and detects
//! divergence between the plan's current script bytes and what was actually
//! deployed.

use crate::change::Change;
use crate::connection::{Connection, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint;
use crate::plan::Plan;

/// One row of `deployed_ids()`: the change id, when it committed, and the
/// fingerprint recorded at deploy time (spec.md §4.9).
#[derive(Debug, Clone)]
pub struct DeployedChange {
    pub id: String,
    pub committed_at: chrono::DateTime<chrono::Utc>,
    pub script_hash: Option<String>,
}

/// `deploy_plan`'s traversal mode (spec.md §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    All,
    Change,
    Tag,
}

/// Read `changes.change_id` for `project`, ordered `committed_at` ASC with
/// plan order as the tie-break (spec.md §4.9 "Tie-breaks").
pub fn deployed_ids(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    project: &str,
    plan: &Plan,
) -> Result<Vec<DeployedChange>> {
    let changes = dialect.table("changes", ns);
    let rows = conn.fetch_all(
        &format!(
            "SELECT change_id, committed_at, script_hash FROM {changes} \
             WHERE project = :project ORDER BY committed_at ASC"
        ),
        &[("project", Value::from(project.to_string()))],
    )?;

    let mut out: Vec<DeployedChange> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get_str("change_id")?.to_string();
            let committed_at = row.get_timestamp("committed_at")?;
            let script_hash = row.get_str("script_hash").map(str::to_string);
            Some(DeployedChange { id, committed_at, script_hash })
        })
        .collect();

    out.sort_by(|a, b| {
        a.committed_at.cmp(&b.committed_at).then_with(|| {
            let ai = plan.index_of_id(&a.id).unwrap_or(usize::MAX);
            let bi = plan.index_of_id(&b.id).unwrap_or(usize::MAX);
            ai.cmp(&bi)
        })
    });
    Ok(out)
}

/// Changes still to apply, in plan order (spec.md §4.9 `deploy_plan`).
///
/// Unknown `to_change` in `mode = Tag` (no change in the plan carries that
/// tag) raises an `EngineError` rather than silently deploying nothing
/// (SPEC_FULL §4.9, grounded in `sqlitch/engines/base.py`'s
/// `UnknownObjectError`-equivalent behavior).
pub fn deploy_plan(plan: &Plan, deployed: &[DeployedChange], to_change: Option<&str>, mode: Mode) -> Result<Vec<Change>> {
    if mode == Mode::Tag {
        if let Some(tag) = to_change {
            if plan.by_tag(tag).is_none() {
                return Err(Error::engine(format!("unknown tag in deploy plan: {tag}")));
            }
        }
    }

    let deployed_set: std::collections::HashSet<&str> = deployed.iter().map(|d| d.id.as_str()).collect();
    let mut out = Vec::new();
    for change in plan.changes() {
        if deployed_set.contains(change.id.as_str()) {
            continue;
        }
        out.push(change.clone());
        if let Some(target) = to_change {
            let reached = match mode {
                Mode::All => false,
                Mode::Change => change.name == target,
                Mode::Tag => change.tags.iter().any(|t| t.name == target),
            };
            if reached {
                break;
            }
        }
    }
    Ok(out)
}

/// Changes to undo, newest-first (spec.md §4.9 `revert_plan`).
///
/// `to_change` selects the suffix committed strictly after the matching
/// deployed change; absent, the whole deployed list reverts.
pub fn revert_plan(plan: &Plan, deployed: &[DeployedChange], to_change: Option<&str>) -> Result<Vec<Change>> {
    let suffix: Vec<&DeployedChange> = match to_change {
        None => deployed.iter().collect(),
        Some(name) => {
            let target_id = plan
                .by_name(name)
                .or_else(|| plan.by_tag(name))
                .map(|c| c.id.clone())
                .ok_or_else(|| Error::plan(format!("unknown change or tag: {name}")))?;
            let cut = deployed
                .iter()
                .position(|d| d.id == target_id)
                .ok_or_else(|| Error::plan(format!("change not deployed: {name}")))?;
            deployed[cut + 1..].iter().collect()
        }
    };

    let mut out = Vec::with_capacity(suffix.len());
    for deployed_change in suffix {
        let change = plan
            .by_id(&deployed_change.id)
            .ok_or_else(|| Error::plan(format!("deployed change not found in plan: {}", deployed_change.id)))?;
        out.push(change.clone());
    }
    out.reverse();
    Ok(out)
}

/// The common ancestor of `plan` and `deployed` (spec.md §4.9
/// "Common-ancestor detection"): walk both in parallel from index 0,
/// comparing each deployed row's stored `script_hash` against the
/// recomputed fingerprint of the plan's current script bytes. Returns the
/// last change both sides agree on, or `None` if they diverge at index 0 or
/// either side is empty.
pub fn common_ancestor(plan: &Plan, deployed: &[DeployedChange]) -> Result<Option<Change>> {
    let mut last_match: Option<usize> = None;
    for (i, deployed_change) in deployed.iter().enumerate() {
        let Some(planned) = plan.changes().get(i) else {
            break;
        };
        if planned.id != deployed_change.id {
            break;
        }
        let current_hash = fingerprint(
            &plan.get_deploy_file(planned),
            &plan.get_revert_file(planned),
            &plan.get_verify_file(planned),
        )?;
        if deployed_change.script_hash.as_deref() != Some(current_hash.as_str()) {
            break;
        }
        last_match = Some(i);
    }
    Ok(last_match.map(|i| plan.changes()[i].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::dialect::sqlite::SqliteDialect;
    use crate::plan::PlanBuilder;
    use crate::recorder;
    use chrono::Utc;
    use std::fs;
    use tempfile::tempdir;

    fn setup() -> (SqliteDialect, Box<dyn Connection>, Plan, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("deploy")).unwrap();
        fs::create_dir_all(dir.path().join("revert")).unwrap();
        fs::create_dir_all(dir.path().join("verify")).unwrap();
        fs::write(dir.path().join("deploy/a.sql"), "CREATE TABLE a(id INTEGER);").unwrap();
        fs::write(dir.path().join("deploy/b.sql"), "CREATE TABLE b(id INTEGER);").unwrap();
        fs::write(dir.path().join("deploy/c.sql"), "CREATE TABLE c(id INTEGER);").unwrap();

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

        let mut b = PlanBuilder::new("widgets", "Ada", "ada@example.com", dir.path());
        b.add(Change::new("widgets", "a", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.add(Change::new("widgets", "b", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.add(Change::new("widgets", "c", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        (dialect, conn, b.build(), dir)
    }

    #[test]
    fn deploy_plan_skips_already_deployed() {
        let (dialect, mut conn, plan, _dir) = setup();
        let a = plan.by_name("a").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &a).unwrap();

        let deployed = deployed_ids(&dialect, conn.as_mut(), None, "widgets", &plan).unwrap();
        let pending = deploy_plan(&plan, &deployed, None, Mode::All).unwrap();
        assert_eq!(pending.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn deploy_plan_stops_at_named_change() {
        let (_dialect, _conn, plan, _dir) = setup();
        let pending = deploy_plan(&plan, &[], Some("b"), Mode::Change).unwrap();
        assert_eq!(pending.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn deploy_plan_unknown_tag_errors() {
        let (_dialect, _conn, plan, _dir) = setup();
        assert!(deploy_plan(&plan, &[], Some("v1"), Mode::Tag).is_err());
    }

    #[test]
    fn revert_plan_reverses_newest_first() {
        let (dialect, mut conn, plan, _dir) = setup();
        let a = plan.by_name("a").unwrap().clone();
        let b = plan.by_name("b").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &a).unwrap();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &b).unwrap();

        let deployed = deployed_ids(&dialect, conn.as_mut(), None, "widgets", &plan).unwrap();
        let reverting = revert_plan(&plan, &deployed, None).unwrap();
        assert_eq!(reverting.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn revert_plan_to_change_reverts_suffix_only() {
        let (dialect, mut conn, plan, _dir) = setup();
        let a = plan.by_name("a").unwrap().clone();
        let b = plan.by_name("b").unwrap().clone();
        let c = plan.by_name("c").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &a).unwrap();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &b).unwrap();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &c).unwrap();

        let deployed = deployed_ids(&dialect, conn.as_mut(), None, "widgets", &plan).unwrap();
        let reverting = revert_plan(&plan, &deployed, Some("a")).unwrap();
        assert_eq!(reverting.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[test]
    fn revert_plan_to_tag_reverts_everything_after_it() {
        let (dialect, mut conn, _plan, dir) = setup();

        let mut b = PlanBuilder::new("widgets", "Ada", "ada@example.com", dir.path());
        b.add(Change::new("widgets", "a", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        b.add(
            Change::new(
                "widgets",
                "b",
                "",
                Utc::now(),
                "Ada",
                "ada@example.com",
                vec![],
                vec![crate::change::Tag { name: "v1".to_string() }],
            )
            .unwrap(),
        )
        .unwrap();
        b.add(Change::new("widgets", "c", "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap())
            .unwrap();
        let plan = b.build();

        let a = plan.by_name("a").unwrap().clone();
        let b = plan.by_name("b").unwrap().clone();
        let c = plan.by_name("c").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &a).unwrap();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &b).unwrap();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &c).unwrap();

        let deployed = deployed_ids(&dialect, conn.as_mut(), None, "widgets", &plan).unwrap();
        let reverting = revert_plan(&plan, &deployed, Some("v1")).unwrap();
        assert_eq!(reverting.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn common_ancestor_detects_divergence_at_zero() {
        let (dialect, mut conn, plan, dir) = setup();
        let a = plan.by_name("a").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &a).unwrap();
        let deployed = deployed_ids(&dialect, conn.as_mut(), None, "widgets", &plan).unwrap();

        // Undisturbed: common ancestor is `a`.
        let ancestor = common_ancestor(&plan, &deployed).unwrap();
        assert_eq!(ancestor.map(|c| c.name), Some("a".to_string()));

        // Mutate the deploy script bytes after deploy: divergence at index 0.
        fs::write(dir.path().join("deploy/a.sql"), "CREATE TABLE a(id INTEGER, extra TEXT);").unwrap();
        let ancestor = common_ancestor(&plan, &deployed).unwrap();
        assert!(ancestor.is_none());
    }
}
