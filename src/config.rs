//! Config / Target resolution (A2, SPEC_FULL §2): turns a `db:<tag>:<uri>`
//! string plus environment into a `Target`, and resolves the planner
//! identity used when constructing `Change`s programmatically.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};
use crate::target::Target;

/// Resolve a `Target` from a name, URI, and project directory (spec.md §6,
/// SPEC_FULL §2 A2). Thin wrapper kept separate from `Target::parse` so the
/// CLI has one place to extend with config-file lookups later without
/// touching the core parser.
pub fn resolve_target(name: &str, uri: &str, top_dir: impl AsRef<Path>) -> Result<Target> {
    Target::parse(name, uri, top_dir)
}

/// Planner identity: name + email pair to attach to a `Change` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerIdentity {
    pub name: String,
    pub email: String,
}

/// Resolve the planner identity in the order documented in SPEC_FULL §3:
/// `SQLITCH_USER_NAME`/`SQLITCH_USER_EMAIL` → `SQITCH_USER_NAME`/
/// `SQITCH_USER_EMAIL` → `git config user.name`/`user.email` → `USER`/`EMAIL`
/// → error.
///
/// This crate checks the `SQLITCH_*` pair before `SQITCH_*`, a deliberate
/// deviation from the upstream Python source recorded as an Open Question
/// decision (see DESIGN.md): callers that set both may be migrating and the
/// more specific name should win.
pub fn resolve_planner_identity() -> Result<PlannerIdentity> {
    if let Some(identity) = from_env_pair("SQLITCH_USER_NAME", "SQLITCH_USER_EMAIL") {
        return Ok(identity);
    }
    if let Some(identity) = from_env_pair("SQITCH_USER_NAME", "SQITCH_USER_EMAIL") {
        return Ok(identity);
    }
    if let Some(identity) = from_git_config() {
        return Ok(identity);
    }
    if let Some(identity) = from_env_pair("USER", "EMAIL") {
        return Ok(identity);
    }
    Err(Error::validation(
        "could not resolve planner identity: set SQITCH_USER_NAME/SQITCH_USER_EMAIL, \
         configure git user.name/user.email, or set USER/EMAIL",
    ))
}

fn from_env_pair(name_var: &str, email_var: &str) -> Option<PlannerIdentity> {
    let name = std::env::var(name_var).ok()?;
    let email = std::env::var(email_var).ok()?;
    if name.is_empty() || email.is_empty() {
        return None;
    }
    Some(PlannerIdentity { name, email })
}

fn from_git_config() -> Option<PlannerIdentity> {
    let name = git_config_value("user.name")?;
    let email = git_config_value("user.email")?;
    Some(PlannerIdentity { name, email })
}

fn git_config_value(key: &str) -> Option<String> {
    let output = Command::new("git").args(["config", "--get", key]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_target_through_target_parse() {
        let t = resolve_target("dev", "db:sqlite:./app.db", "/proj").unwrap();
        assert_eq!(t.name, "dev");
    }

    #[test]
    fn env_pair_requires_both_vars_nonempty() {
        assert!(from_env_pair("DBDEPLOY_TEST_MISSING_NAME", "DBDEPLOY_TEST_MISSING_EMAIL").is_none());
    }
}
