//! Event/History Query (C11, spec.md §4.10): reads `events` with filters,
//! ordering, and pagination; current-state and current-changes readers.

use chrono::{DateTime, Utc};

use crate::connection::{Connection, Value};
use crate::dialect::Dialect;
use crate::error::{Error, Result};

/// `ORDER BY committed_at` direction (spec.md §4.10 "Direction validation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    /// Case-fold and validate; anything other than `ASC`/`DESC` is an
    /// `EngineError` (spec.md §4.10).
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Self::Asc),
            "DESC" => Ok(Self::Desc),
            other => Err(Error::engine(format!("invalid direction: {other}"))),
        }
    }

    const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl Default for Direction {
    fn default() -> Self {
        Self::Desc
    }
}

/// `search_events` filter set (spec.md §4.10). All fields optional; absent
/// fields are omitted from the generated WHERE clause.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_kinds: Vec<String>,
    pub change_regex: Option<String>,
    pub project_regex: Option<String>,
    pub committer_regex: Option<String>,
    pub planner_regex: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub direction: Direction,
}

/// One `events` row, with `requires`/`conflicts`/`tags` parsed back to lists
/// (spec.md §4.10 "Parses requires/conflicts/tags columns back to lists").
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: String,
    pub change_id: String,
    pub change: String,
    pub project: String,
    pub note: String,
    pub requires: Vec<String>,
    pub conflicts: Vec<String>,
    pub tags: Vec<String>,
    pub committed_at: DateTime<Utc>,
    pub committer_name: String,
    pub committer_email: String,
    pub planned_at: DateTime<Utc>,
    pub planner_name: String,
    pub planner_email: String,
}

/// The single most recently committed change for `project`, or `None`
/// (spec.md §4.10 `current_state`).
#[derive(Debug, Clone)]
pub struct CurrentState {
    pub change_id: String,
    pub change: String,
    pub project: String,
    pub committed_at: DateTime<Utc>,
    pub committer_name: String,
    pub committer_email: String,
    pub tags: Vec<String>,
}

/// Build and run the filtered event query (spec.md §4.10 `search_events`).
///
/// Regex clauses use `dialect.regex_condition`; an invalid regex pattern is
/// not validated here and surfaces as a `DeploymentError` from the driver
/// (spec.md §4.10 "Regex-invalid input is passed through to the database").
pub fn search_events(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    filter: &EventFilter,
) -> Result<Vec<EventRecord>> {
    let events = dialect.table("events", ns);
    let mut clauses = Vec::new();
    let mut params: Vec<(String, Value)> = Vec::new();

    if !filter.event_kinds.is_empty() {
        let placeholders: Vec<String> = filter
            .event_kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| {
                let name = format!("event{i}");
                params.push((name.clone(), Value::from(kind.clone())));
                format!(":{name}")
            })
            .collect();
        clauses.push(format!("event IN ({})", placeholders.join(", ")));
    }

    for (column, pattern) in [
        ("change", &filter.change_regex),
        ("project", &filter.project_regex),
        ("committer_name", &filter.committer_regex),
        ("planner_name", &filter.planner_regex),
    ] {
        if let Some(pattern) = pattern {
            let name = format!("{column}_pattern");
            clauses.push(dialect.regex_condition(column, &format!(":{name}")));
            params.push((name, Value::from(dialect.translate_pattern(pattern))));
        }
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let pagination = dialect.limit_offset_clause(filter.limit, filter.offset);
    let pagination = if pagination.is_empty() { String::new() } else { format!(" {pagination}") };

    let sql = format!(
        "SELECT event, change_id, change, project, note, requires, conflicts, tags, committed_at, \
         committer_name, committer_email, planned_at, planner_name, planner_email \
         FROM {events}{where_clause} ORDER BY committed_at {}{pagination}",
        filter.direction.as_sql()
    );

    let bound: Vec<(&str, Value)> = params.iter().map(|(n, v)| (n.as_str(), v.clone())).collect();
    let rows = conn.fetch_all(&sql, &bound)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(EventRecord {
                event: row.get_str("event")?.to_string(),
                change_id: row.get_str("change_id")?.to_string(),
                change: row.get_str("change")?.to_string(),
                project: row.get_str("project")?.to_string(),
                note: row.get_str("note").unwrap_or_default().to_string(),
                requires: split_column(row.get_str("requires")),
                conflicts: split_column(row.get_str("conflicts")),
                tags: split_column(row.get_str("tags")),
                committed_at: row.get_timestamp("committed_at")?,
                committer_name: row.get_str("committer_name")?.to_string(),
                committer_email: row.get_str("committer_email")?.to_string(),
                planned_at: row.get_timestamp("planned_at")?,
                planner_name: row.get_str("planner_name")?.to_string(),
                planner_email: row.get_str("planner_email")?.to_string(),
            })
        })
        .collect())
}

fn split_column(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// The single most recently committed change row joined with its tags
/// (spec.md §4.10 `current_state`).
pub fn current_state(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    project: Option<&str>,
) -> Result<Option<CurrentState>> {
    let changes = dialect.table("changes", ns);
    let tags = dialect.table("tags", ns);

    let (where_clause, params): (String, Vec<(&str, Value)>) = match project {
        Some(p) => (" WHERE project = :project".to_string(), vec![("project", Value::from(p.to_string()))]),
        None => (String::new(), vec![]),
    };

    let row = conn.fetch_one(
        &format!(
            "SELECT change_id, change, project, committed_at, committer_name, committer_email \
             FROM {changes}{where_clause} ORDER BY committed_at DESC"
        ),
        &params,
    )?;

    let Some(row) = row else {
        return Ok(None);
    };
    let change_id = row.get_str("change_id").unwrap_or_default().to_string();

    let tag_rows = conn.fetch_all(
        &format!("SELECT tag FROM {tags} WHERE change_id = :change_id"),
        &[("change_id", Value::from(change_id.clone()))],
    )?;
    let tag_names = tag_rows.into_iter().filter_map(|r| r.get_str("tag").map(str::to_string)).collect();

    Ok(Some(CurrentState {
        change_id,
        change: row.get_str("change").unwrap_or_default().to_string(),
        project: row.get_str("project").unwrap_or_default().to_string(),
        committed_at: row.get_timestamp("committed_at").unwrap_or_default(),
        committer_name: row.get_str("committer_name").unwrap_or_default().to_string(),
        committer_email: row.get_str("committer_email").unwrap_or_default().to_string(),
        tags: tag_names,
    }))
}

/// The same ordered list as `current_state`, without tag aggregation
/// (spec.md §4.10 `current_changes`).
pub fn current_changes(
    dialect: &dyn Dialect,
    conn: &mut dyn Connection,
    ns: Option<&str>,
    project: Option<&str>,
) -> Result<Vec<CurrentState>> {
    let changes = dialect.table("changes", ns);
    let (where_clause, params): (String, Vec<(&str, Value)>) = match project {
        Some(p) => (" WHERE project = :project".to_string(), vec![("project", Value::from(p.to_string()))]),
        None => (String::new(), vec![]),
    };

    let rows = conn.fetch_all(
        &format!(
            "SELECT change_id, change, project, committed_at, committer_name, committer_email \
             FROM {changes}{where_clause} ORDER BY committed_at ASC"
        ),
        &params,
    )?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(CurrentState {
                change_id: row.get_str("change_id")?.to_string(),
                change: row.get_str("change")?.to_string(),
                project: row.get_str("project")?.to_string(),
                committed_at: row.get_timestamp("committed_at")?,
                committer_name: row.get_str("committer_name")?.to_string(),
                committer_email: row.get_str("committer_email")?.to_string(),
                tags: Vec::new(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Change;
    use crate::dialect::sqlite::SqliteDialect;
    use crate::plan::PlanBuilder;
    use crate::recorder;
    use chrono::Utc;

    fn setup() -> (SqliteDialect, Box<dyn Connection>, crate::plan::Plan) {
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
        (dialect, conn, b.build())
    }

    #[test]
    fn direction_parse_case_insensitive_and_rejects_garbage() {
        assert_eq!(Direction::parse("asc").unwrap(), Direction::Asc);
        assert!(Direction::parse("sideways").is_err());
    }

    #[test]
    fn search_events_filters_by_kind_and_change_regex() {
        let (dialect, mut conn, plan) = setup();
        let users = plan.by_name("users").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &users).unwrap();
        recorder::record_revert(&dialect, conn.as_mut(), None, &plan, &users).unwrap();

        let filter = EventFilter {
            event_kinds: vec!["revert".to_string()],
            change_regex: Some("^users$".to_string()),
            direction: Direction::Asc,
            ..Default::default()
        };
        let results = search_events(&dialect, conn.as_mut(), None, &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event, "revert");
        assert_eq!(results[0].change, "users");
    }

    #[test]
    fn current_state_returns_most_recent_with_tags() {
        let (dialect, mut conn, plan) = setup();
        let users = plan.by_name("users").unwrap().clone();
        recorder::record_deploy(&dialect, conn.as_mut(), None, &plan, &users).unwrap();

        let state = current_state(&dialect, conn.as_mut(), None, Some("widgets")).unwrap();
        assert!(state.is_some());
        assert_eq!(state.unwrap().change, "users");
    }

    #[test]
    fn current_state_none_when_empty() {
        let (dialect, mut conn, _plan) = setup();
        let state = current_state(&dialect, conn.as_mut(), None, Some("widgets")).unwrap();
        assert!(state.is_none());
    }
}
