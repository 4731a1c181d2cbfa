//! Variable Substitutor (C3): textual replacement of `:name` / `&name`
//! tokens in script text before splitting (spec.md §4.3).
//!
//! No escaping; a missing variable leaves its token untouched.

use std::collections::HashMap;

/// The sigil a dialect uses for variable interpolation (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sigil {
    /// `:name` — pg, mysql, sqlite, cockroach, exasol.
    Colon,
    /// `&name` — oracle, snowflake, vertica.
    Ampersand,
}

impl Sigil {
    const fn ch(self) -> char {
        match self {
            Self::Colon => ':',
            Self::Ampersand => '&',
        }
    }
}

/// Replace `sigil`-prefixed tokens in `script` using `vars`. Reserved tokens
/// (`&registry`, `&warehouse`) are expected to already be present in `vars`
/// by the caller (spec.md §4.3).
#[must_use]
pub fn substitute(script: &str, sigil: Sigil, vars: &HashMap<String, String>) -> String {
    let marker = sigil.ch();
    let mut out = String::with_capacity(script.len());
    let mut chars = script.char_indices().peekable();
    let bytes = script.as_bytes();

    while let Some((i, c)) = chars.next() {
        if c != marker {
            out.push(c);
            continue;
        }
        // Identify the run of identifier characters following the sigil.
        let start = i + c.len_utf8();
        let mut end = start;
        while end < bytes.len() {
            let ch = script[end..].chars().next().unwrap();
            if ch.is_ascii_alphanumeric() || ch == '_' {
                end += ch.len_utf8();
            } else {
                break;
            }
        }

        if end == start {
            out.push(c);
            continue;
        }

        let name = &script[start..end];
        match vars.get(name) {
            Some(value) => out.push_str(value),
            None => {
                out.push(c);
                out.push_str(name);
            }
        }

        // Skip the consumed identifier characters in the outer iterator.
        while let Some(&(next_i, _)) = chars.peek() {
            if next_i < end {
                chars.next();
            } else {
                break;
            }
        }
    }

    out
}

/// Build the reserved-variable map every dialect exposes (spec.md §4.3).
#[must_use]
pub fn reserved_vars(registry_namespace: Option<&str>, warehouse: Option<&str>) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    if let Some(registry) = registry_namespace {
        vars.insert("registry".to_string(), registry.to_string());
    }
    if let Some(warehouse) = warehouse {
        vars.insert("warehouse".to_string(), warehouse.to_string());
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn replaces_colon_tokens() {
        let out = substitute("SET search_path = :registry;", Sigil::Colon, &vars(&[("registry", "sqitch")]));
        assert_eq!(out, "SET search_path = sqitch;");
    }

    #[test]
    fn replaces_ampersand_tokens() {
        let out = substitute("USE WAREHOUSE &warehouse;", Sigil::Ampersand, &vars(&[("warehouse", "compute_wh")]));
        assert_eq!(out, "USE WAREHOUSE compute_wh;");
    }

    #[test]
    fn missing_variable_left_untouched() {
        let out = substitute("SELECT :missing;", Sigil::Colon, &HashMap::new());
        assert_eq!(out, "SELECT :missing;");
    }

    #[test]
    fn does_not_touch_other_sigil() {
        let out = substitute("SELECT &name;", Sigil::Colon, &vars(&[("name", "x")]));
        assert_eq!(out, "SELECT &name;");
    }

    #[test]
    fn reserved_vars_includes_registry_and_warehouse() {
        let v = reserved_vars(Some("sqitch"), Some("compute_wh"));
        assert_eq!(v.get("registry").map(String::as_str), Some("sqitch"));
        assert_eq!(v.get("warehouse").map(String::as_str), Some("compute_wh"));
    }
}
