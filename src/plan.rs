//! Plan — the ordered sequence of Changes for a single project (spec.md
//! §3 "Plan"). Building a `Plan` from an on-disk plan file is explicitly out
//! of scope (spec.md §1); this module gives the CLI and tests a
//! `PlanBuilder` to assemble an already-resolved `Plan` in memory (SPEC_FULL
//! §2 A3).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::change::Change;
use crate::error::{Error, Result};

/// Ordered sequence of Changes for a single project (spec.md §3 "Plan").
///
/// Invariant: names are unique per project (enforced by `PlanBuilder`).
#[derive(Debug, Clone)]
pub struct Plan {
    project_name: String,
    creator_name: String,
    creator_email: String,
    changes: Vec<Change>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
    deploy_dir: PathBuf,
    revert_dir: PathBuf,
    verify_dir: PathBuf,
}

impl Plan {
    #[must_use]
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    #[must_use]
    pub fn creator_name(&self) -> &str {
        &self.creator_name
    }

    #[must_use]
    pub fn creator_email(&self) -> &str {
        &self.creator_email
    }

    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Change> {
        self.by_name.get(name).map(|&i| &self.changes[i])
    }

    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&Change> {
        self.by_id.get(id).map(|&i| &self.changes[i])
    }

    #[must_use]
    pub fn index_of_id(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// The first change whose tags contain `tag_name`, if any (used by
    /// `deploy_plan(mode = "tag")` / `revert_plan`).
    #[must_use]
    pub fn by_tag(&self, tag_name: &str) -> Option<&Change> {
        self.changes
            .iter()
            .find(|c| c.tags.iter().any(|t| t.name == tag_name))
    }

    #[must_use]
    pub fn get_deploy_file(&self, change: &Change) -> PathBuf {
        self.deploy_dir.join(format!("{}.sql", change.name))
    }

    #[must_use]
    pub fn get_revert_file(&self, change: &Change) -> PathBuf {
        self.revert_dir.join(format!("{}.sql", change.name))
    }

    #[must_use]
    pub fn get_verify_file(&self, change: &Change) -> PathBuf {
        self.verify_dir.join(format!("{}.sql", change.name))
    }
}

/// Builder that enforces the Plan's uniqueness invariant as changes are
/// added (spec.md §3 "Invariant: names unique per project").
pub struct PlanBuilder {
    project_name: String,
    creator_name: String,
    creator_email: String,
    changes: Vec<Change>,
    deploy_dir: PathBuf,
    revert_dir: PathBuf,
    verify_dir: PathBuf,
}

impl PlanBuilder {
    pub fn new(
        project_name: impl Into<String>,
        creator_name: impl Into<String>,
        creator_email: impl Into<String>,
        top_dir: impl AsRef<Path>,
    ) -> Self {
        let top_dir = top_dir.as_ref();
        Self {
            project_name: project_name.into(),
            creator_name: creator_name.into(),
            creator_email: creator_email.into(),
            changes: Vec::new(),
            deploy_dir: top_dir.join("deploy"),
            revert_dir: top_dir.join("revert"),
            verify_dir: top_dir.join("verify"),
        }
    }

    pub fn add(&mut self, change: Change) -> Result<&mut Self> {
        if self.changes.iter().any(|c| c.name == change.name) {
            return Err(Error::validation(format!(
                "duplicate change name in plan: {}",
                change.name
            )));
        }
        self.changes.push(change);
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> Plan {
        let mut by_name = HashMap::with_capacity(self.changes.len());
        let mut by_id = HashMap::with_capacity(self.changes.len());
        for (i, change) in self.changes.iter().enumerate() {
            by_name.insert(change.name.clone(), i);
            by_id.insert(change.id.clone(), i);
        }
        Plan {
            project_name: self.project_name,
            creator_name: self.creator_name,
            creator_email: self.creator_email,
            changes: self.changes,
            by_name,
            by_id,
            deploy_dir: self.deploy_dir,
            revert_dir: self.revert_dir,
            verify_dir: self.verify_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use chrono::Utc;

    fn change(project: &str, name: &str) -> Change {
        Change::new(project, name, "", Utc::now(), "Ada", "ada@example.com", vec![], vec![]).unwrap()
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut b = PlanBuilder::new("p", "Ada", "ada@example.com", "/proj");
        b.add(change("p", "a")).unwrap();
        assert!(b.add(change("p", "a")).is_err());
    }

    #[test]
    fn lookup_by_name_and_id() {
        let mut b = PlanBuilder::new("p", "Ada", "ada@example.com", "/proj");
        let c = change("p", "a");
        let id = c.id.clone();
        b.add(c).unwrap();
        let plan = b.build();
        assert_eq!(plan.by_name("a").unwrap().id, id);
        assert_eq!(plan.by_id(&id).unwrap().name, "a");
        assert!(plan.by_name("missing").is_none());
    }

    #[test]
    fn file_paths_derive_from_top_dir() {
        let mut b = PlanBuilder::new("p", "Ada", "ada@example.com", "/proj");
        let c = change("p", "a");
        b.add(c.clone()).unwrap();
        let plan = b.build();
        assert_eq!(plan.get_deploy_file(&c), PathBuf::from("/proj/deploy/a.sql"));
        assert_eq!(plan.get_revert_file(&c), PathBuf::from("/proj/revert/a.sql"));
        assert_eq!(plan.get_verify_file(&c), PathBuf::from("/proj/verify/a.sql"));
    }
}
