//! `{{name}}` placeholder substitution.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::error::{Result, SwarmError};

fn placeholder_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex"))
}

/// Whether `template` mentions `{{name}}`.
pub fn has_placeholder(template: &str, name: &str) -> bool {
    placeholder_pattern()
        .captures_iter(template)
        .any(|c| &c[1] == name)
}

/// Fills known placeholders and leaves unknown ones as written.
pub fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            vars.iter()
                .find(|(k, _)| *k == &caps[1])
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Fills every placeholder from `params`; any placeholder without a value
/// is an error.
pub fn fill_strict(template: &str, params: &HashMap<String, String>) -> Result<String> {
    if let Some(missing) = placeholder_pattern()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .find(|name| !params.contains_key(name))
    {
        return Err(SwarmError::UnresolvedParam(missing));
    }
    Ok(placeholder_pattern()
        .replace_all(template, |caps: &Captures| params[&caps[1]].clone())
        .into_owned())
}
