//! Change, Dependency, and Tag — the plan's unit types (spec.md §3).

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// `^[A-Za-z0-9_-]+$`, length <= 255 (spec.md §3, SPEC_FULL §3).
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(Error::validation(format!(
            "{kind} name must be 1-255 characters: {name:?}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::validation(format!(
            "{kind} name contains invalid characters: {name:?}"
        )));
    }
    Ok(())
}

/// Pragmatic `local@domain` shape check (SPEC_FULL §3), not full RFC 5322.
pub fn validate_email(email: &str) -> Result<()> {
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid email address: {email:?}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    Require,
    Conflict,
}

impl DependencyType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Require => "require",
            Self::Conflict => "conflict",
        }
    }
}

/// `{type, change_name, project?}` — optional cross-project prefix
/// `project:name` (spec.md §3 "Dependency").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub dep_type: DependencyType,
    pub project: Option<String>,
    pub change_name: String,
}

impl Dependency {
    #[must_use]
    pub fn require(token: &str) -> Self {
        Self::parse(DependencyType::Require, token)
    }

    #[must_use]
    pub fn conflict(token: &str) -> Self {
        Self::parse(DependencyType::Conflict, token)
    }

    fn parse(dep_type: DependencyType, token: &str) -> Self {
        match token.split_once(':') {
            Some((project, change_name)) => Self {
                dep_type,
                project: Some(project.to_string()),
                change_name: change_name.to_string(),
            },
            None => Self {
                dep_type,
                project: None,
                change_name: token.to_string(),
            },
        }
    }

    /// The `project:name` / `name` token as it appears in `events.requires`
    /// / `events.conflicts` and in the change-id hash input.
    #[must_use]
    pub fn token(&self) -> String {
        match &self.project {
            Some(project) => format!("{project}:{}", self.change_name),
            None => self.change_name.clone(),
        }
    }
}

/// Project-unique label attached to one change (spec.md §3 "Tag").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
}

/// A named, ordered unit of SQL in a Plan (spec.md §3 "Change").
///
/// Identity is `id`, a 40-hex SHA-1 derived from project + name + timestamp
/// + planner identity + dependencies + note (SPEC_FULL §3, grounded in
/// `original_source/sqlitch/core/types.py`). Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: String,
    pub name: String,
    pub note: String,
    pub timestamp: DateTime<Utc>,
    pub planner_name: String,
    pub planner_email: String,
    pub dependencies: Vec<Dependency>,
    pub tags: Vec<Tag>,
}

impl Change {
    /// Construct a Change within `project`, computing its id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project: &str,
        name: impl Into<String>,
        note: impl Into<String>,
        timestamp: DateTime<Utc>,
        planner_name: impl Into<String>,
        planner_email: impl Into<String>,
        dependencies: Vec<Dependency>,
        tags: Vec<Tag>,
    ) -> Result<Self> {
        let name = name.into();
        validate_name("change", &name)?;
        let planner_name = planner_name.into();
        let planner_email = planner_email.into();
        validate_email(&planner_email)?;
        let note = note.into();

        let id = compute_change_id(
            project,
            &name,
            timestamp,
            &planner_name,
            &planner_email,
            &dependencies,
            &note,
        );

        Ok(Self {
            id,
            name,
            note,
            timestamp,
            planner_name,
            planner_email,
            dependencies,
            tags,
        })
    }

    #[must_use]
    pub fn requires(&self) -> Vec<&Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.dep_type == DependencyType::Require)
            .collect()
    }

    #[must_use]
    pub fn conflicts(&self) -> Vec<&Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.dep_type == DependencyType::Conflict)
            .collect()
    }

    /// Space-delimited dependency tokens for `events.requires`.
    #[must_use]
    pub fn requires_column(&self) -> String {
        self.requires()
            .iter()
            .map(|d| d.token())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Space-delimited dependency tokens for `events.conflicts`.
    #[must_use]
    pub fn conflicts_column(&self) -> String {
        self.conflicts()
            .iter()
            .map(|d| d.token())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Space-delimited tag names for `events.tags` / `tags`.
    #[must_use]
    pub fn tags_column(&self) -> String {
        self.tags
            .iter()
            .map(|t| t.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// SHA-1 hex digest over project, name, timestamp, planner identity,
/// dependencies (in order) and note — newline-joined, matching the field
/// order `original_source/sqlitch/core/types.py` uses so ids computed by
/// this crate match ids computed by any other registry-compatible
/// installation (spec.md §6 compatibility requirement).
fn compute_change_id(
    project: &str,
    name: &str,
    timestamp: DateTime<Utc>,
    planner_name: &str,
    planner_email: &str,
    dependencies: &[Dependency],
    note: &str,
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(project.as_bytes());
    hasher.update(b"\n");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string().as_bytes());
    hasher.update(b"\n");
    hasher.update(format!("{planner_name} <{planner_email}>").as_bytes());
    hasher.update(b"\n");
    for dep in dependencies {
        hasher.update(dep.dep_type.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(dep.token().as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(note.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn change_id_is_40_hex() {
        let c = Change::new(
            "myproj",
            "users",
            "add users table",
            ts(),
            "Ada",
            "ada@example.com",
            vec![],
            vec![],
        )
        .unwrap();
        assert_eq!(c.id.len(), 40);
        assert!(c.id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn change_id_is_deterministic() {
        let a = Change::new("p", "c", "n", ts(), "Ada", "ada@example.com", vec![], vec![]).unwrap();
        let b = Change::new("p", "c", "n", ts(), "Ada", "ada@example.com", vec![], vec![]).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn change_id_changes_with_dependencies() {
        let a = Change::new("p", "c", "n", ts(), "Ada", "ada@example.com", vec![], vec![]).unwrap();
        let b = Change::new(
            "p",
            "c",
            "n",
            ts(),
            "Ada",
            "ada@example.com",
            vec![Dependency::require("other")],
            vec![],
        )
        .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_bad_name() {
        assert!(Change::new("p", "bad name!", "n", ts(), "Ada", "ada@example.com", vec![], vec![]).is_err());
    }

    #[test]
    fn rejects_bad_email() {
        assert!(Change::new("p", "c", "n", ts(), "Ada", "not-an-email", vec![], vec![]).is_err());
    }

    #[test]
    fn dependency_token_roundtrips_cross_project_prefix() {
        let d = Dependency::require("otherproj:users");
        assert_eq!(d.project.as_deref(), Some("otherproj"));
        assert_eq!(d.change_name, "users");
        assert_eq!(d.token(), "otherproj:users");
    }

    #[test]
    fn requires_and_conflicts_split_by_type() {
        let c = Change::new(
            "p",
            "c",
            "n",
            ts(),
            "Ada",
            "ada@example.com",
            vec![Dependency::require("a"), Dependency::conflict("b")],
            vec![],
        )
        .unwrap();
        assert_eq!(c.requires_column(), "a");
        assert_eq!(c.conflicts_column(), "b");
    }
}
