//! A minimal newline-delimited plan format for the CLI and demos (SPEC_FULL
//! §2 A3): explicitly not a reimplementation of sqitch's plan-file grammar
//! (pragmas, `%syntax-version`, tag-line entries). One change per line; each
//! change's timestamp is assigned at load time from its position (second
//! resolution, strictly increasing) since the format carries no timestamp
//! of its own.
//!
//! ```text
//! %project=widgets
//! %creator_name=Ada Lovelace
//! %creator_email=ada@example.com
//!
//! users
//! posts requires:users
//! comments requires:posts conflicts:spam @v1
//! ```

use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};

use crate::change::{Change, Dependency, Tag};
use crate::config::PlannerIdentity;
use crate::error::{Error, Result};
use crate::plan::{Plan, PlanBuilder};

/// Load a `Plan` from `path` using [the module-level format](self), under
/// `top_dir` for script directory resolution.
pub fn load(path: &Path, top_dir: impl AsRef<Path>, planner: &PlannerIdentity) -> Result<Plan> {
    let text = fs::read_to_string(path)?;
    parse(&text, top_dir, planner)
}

fn parse(text: &str, top_dir: impl AsRef<Path>, planner: &PlannerIdentity) -> Result<Plan> {
    let mut project_name = None;
    let mut creator_name = planner.name.clone();
    let mut creator_email = planner.email.clone();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.peek() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix('%') {
            let (key, value) = rest
                .split_once('=')
                .ok_or_else(|| Error::plan(format!("malformed pragma line: {line}")))?;
            match key {
                "project" => project_name = Some(value.to_string()),
                "creator_name" => creator_name = value.to_string(),
                "creator_email" => creator_email = value.to_string(),
                other => return Err(Error::plan(format!("unknown pragma: {other}"))),
            }
            lines.next();
        } else if trimmed.is_empty() {
            lines.next();
        } else {
            break;
        }
    }

    let project_name = project_name.ok_or_else(|| Error::plan("plan file missing %project= pragma"))?;
    let mut builder = PlanBuilder::new(project_name.clone(), creator_name, creator_email, top_dir);

    let base = Utc::now();
    for (i, line) in lines.enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let change = parse_change_line(&project_name, trimmed, base + Duration::seconds(i as i64), planner)?;
        builder.add(change)?;
    }

    Ok(builder.build())
}

fn parse_change_line(
    project: &str,
    line: &str,
    timestamp: chrono::DateTime<Utc>,
    planner: &PlannerIdentity,
) -> Result<Change> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next().ok_or_else(|| Error::plan("empty plan line"))?;

    let mut dependencies = Vec::new();
    let mut tags = Vec::new();
    for token in tokens {
        if let Some(tag) = token.strip_prefix('@') {
            tags.push(Tag { name: tag.to_string() });
        } else if let Some(requires) = token.strip_prefix("requires:") {
            dependencies.push(Dependency::require(requires));
        } else if let Some(conflicts) = token.strip_prefix("conflicts:") {
            dependencies.push(Dependency::conflict(conflicts));
        } else {
            return Err(Error::plan(format!("unrecognized plan token: {token}")));
        }
    }

    Change::new(project, name, "", timestamp, &planner.name, &planner.email, dependencies, tags)
}
