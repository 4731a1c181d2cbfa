//! Statement Splitter (C2): dialect-aware splitting of a script into
//! executable statements (spec.md §4.2).
//!
//! The splitter does not parse strings or block comments; scripts are
//! trusted to be well-formed.

/// Per-dialect splitting policy (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitPolicy {
    /// Buffer by line, skip blank/`--` lines, terminate on a trimmed line
    /// ending in `;`. Used by pg, sqlite, snowflake, vertica, exasol,
    /// cockroach.
    Generic,
    /// Generic plus `DELIMITER <tok>` handling (mysql, mariadb).
    Mysql,
    /// Generic plus a lone `/` terminates a PL/SQL block (oracle, firebird).
    Oracle,
}

/// Split `script` into executable statements per `policy`.
#[must_use]
pub fn split(script: &str, policy: SplitPolicy) -> Vec<String> {
    match policy {
        SplitPolicy::Generic => split_generic(script, ";"),
        SplitPolicy::Mysql => split_mysql(script),
        SplitPolicy::Oracle => split_oracle(script),
    }
}

/// Strip a trailing `-- comment` from a line (inline `--` truncates).
fn strip_inline_comment(line: &str) -> &str {
    match line.find("--") {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn split_generic(script: &str, terminator: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();

    for raw_line in script.lines() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        let line = strip_inline_comment(raw_line);
        let trimmed_line = line.trim_end();

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);

        if trimmed_line.ends_with(terminator) {
            let stmt = buffer.trim().trim_end_matches(terminator).trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            buffer.clear();
        }
    }

    let remainder = buffer.trim();
    if !remainder.is_empty() {
        statements.push(remainder.trim_end_matches(terminator).trim().to_string());
    }

    statements
}

/// Generic splitting plus `DELIMITER <tok>` handling: switches the active
/// terminator until the next `DELIMITER ;` (spec.md §4.2 "Mysql/Mariadb").
fn split_mysql(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();
    let mut terminator = ";".to_string();

    for raw_line in script.lines() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        if let Some(rest) = trimmed
            .strip_prefix("DELIMITER ")
            .or_else(|| trimmed.strip_prefix("delimiter "))
        {
            terminator = rest.trim().to_string();
            continue;
        }

        let line = strip_inline_comment(raw_line);
        let trimmed_line = line.trim_end();

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);

        if trimmed_line.ends_with(terminator.as_str()) {
            let stmt = buffer
                .trim()
                .trim_end_matches(terminator.as_str())
                .trim()
                .to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            buffer.clear();
        }
    }

    let remainder = buffer.trim();
    if !remainder.is_empty() {
        statements.push(
            remainder
                .trim_end_matches(terminator.as_str())
                .trim()
                .to_string(),
        );
    }

    statements
}

/// Generic splitting plus a lone `/` terminating a PL/SQL block (spec.md
/// §4.2 "Oracle"). Also used for firebird.
fn split_oracle(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut buffer = String::new();

    for raw_line in script.lines() {
        let trimmed = raw_line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }

        if trimmed == "/" {
            let stmt = buffer.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            buffer.clear();
            continue;
        }

        let line = strip_inline_comment(raw_line);
        let trimmed_line = line.trim_end();

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(line);

        if trimmed_line.ends_with(';') {
            let stmt = buffer.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            buffer.clear();
        }
    }

    let remainder = buffer.trim();
    if !remainder.is_empty() {
        statements.push(remainder.trim_end_matches(';').trim().to_string());
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_splits_on_semicolon_terminated_lines() {
        let script = "CREATE TABLE a(id INT);\nCREATE TABLE b(id INT);\n";
        let stmts = split(script, SplitPolicy::Generic);
        assert_eq!(stmts, vec!["CREATE TABLE a(id INT)", "CREATE TABLE b(id INT)"]);
    }

    #[test]
    fn generic_skips_blank_and_comment_lines() {
        let script = "-- a comment\n\nCREATE TABLE a(id INT);\n";
        let stmts = split(script, SplitPolicy::Generic);
        assert_eq!(stmts, vec!["CREATE TABLE a(id INT)"]);
    }

    #[test]
    fn generic_truncates_inline_comment() {
        let script = "CREATE TABLE a(id INT); -- trailing note\n";
        let stmts = split(script, SplitPolicy::Generic);
        assert_eq!(stmts, vec!["CREATE TABLE a(id INT)"]);
    }

    #[test]
    fn generic_joins_multiline_statements() {
        let script = "CREATE TABLE a(\n  id INT\n);\n";
        let stmts = split(script, SplitPolicy::Generic);
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("id INT"));
    }

    #[test]
    fn mysql_honors_delimiter_switch() {
        let script = "DELIMITER $$\nCREATE PROCEDURE p() BEGIN SELECT 1; END$$\nDELIMITER ;\nSELECT 2;\n";
        let stmts = split(script, SplitPolicy::Mysql);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE PROCEDURE"));
        assert_eq!(stmts[1], "SELECT 2");
    }

    #[test]
    fn oracle_slash_terminates_block() {
        let script = "CREATE OR REPLACE PROCEDURE p AS\nBEGIN\n  NULL;\nEND;\n/\nSELECT 1 FROM dual;\n";
        let stmts = split(script, SplitPolicy::Oracle);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("CREATE OR REPLACE PROCEDURE"));
        assert_eq!(stmts[1], "SELECT 1 FROM dual");
    }

    #[test]
    fn empty_script_yields_no_statements() {
        assert!(split("", SplitPolicy::Generic).is_empty());
        assert!(split("   \n  \n", SplitPolicy::Generic).is_empty());
    }
}
