//! Environment variable expansion for config files.
//!
//! Recognised forms:
//! - `${VAR}` expands to the variable, missing variables are errors
//! - `${VAR:-fallback}` uses `fallback` when VAR is unset or empty
//! - `${VAR-fallback}` uses `fallback` only when VAR is unset
//! - `$$` is a literal `$`
//!
//! Bare `$VAR` is left untouched so that dollar signs inside URLs or header
//! values do not need escaping.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?:(:-|-)([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

/// Expand placeholders in `input` using `lookup` to resolve variables.
///
/// Every problem is collected so a config with several missing variables
/// reports all of them in one go.
pub fn expand_with<L>(input: &str, lookup: L) -> Result<String, Vec<String>>
where
    L: Fn(&str) -> Option<String>,
{
    let mut problems = Vec::new();

    let expanded = PLACEHOLDER.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };
        let operator = caps.get(2).map(|m| m.as_str());
        let fallback = caps.get(3).map_or("", |m| m.as_str());

        match (lookup(name), operator) {
            (Some(value), _) if value.contains(['\n', '\r']) => {
                problems.push(format!("variable '{name}' contains a line break"));
                String::new()
            }
            (Some(value), Some(":-")) if value.is_empty() => fallback.to_string(),
            (Some(value), _) => value,
            (None, Some(_)) => fallback.to_string(),
            (None, None) => {
                problems.push(format!("variable '{name}' is not set"));
                String::new()
            }
        }
    });

    if problems.is_empty() {
        Ok(expanded.into_owned())
    } else {
        Err(problems)
    }
}

/// Expand placeholders from the process environment.
pub fn expand_env(input: &str) -> Result<String, Vec<String>> {
    expand_with(input, |name| std::env::var(name).ok())
}
