use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Substitute `{{ env.NAME }}` placeholders in raw configuration text
///
/// `{{ env.NAME | default("value") }}` falls back to `value` when `NAME` is
/// unset. Comment lines are left untouched so that disabled backends may
/// reference variables that do not exist.
pub fn expand_env(input: &str) -> anyhow::Result<String> {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\))?\s*\}\}"#)
            .expect("placeholder pattern is valid")
    });

    let mut lines = Vec::new();
    for line in input.split('\n') {
        if line.trim_start().starts_with('#') {
            lines.push(line.to_owned());
            continue;
        }

        let mut failure = None;
        let expanded = placeholder.replace_all(line, |caps: &Captures<'_>| match lookup(caps) {
            Ok(value) => value,
            Err(e) => {
                failure.get_or_insert(e);
                String::new()
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        lines.push(expanded.into_owned());
    }

    Ok(lines.join("\n"))
}

fn lookup(caps: &Captures<'_>) -> anyhow::Result<String> {
    let key = &caps[1];
    let Some(name) = key.strip_prefix("env.").filter(|n| !n.contains('.')) else {
        anyhow::bail!("unsupported placeholder `{key}`, only `env.NAME` is allowed");
    };

    match (std::env::var(name), caps.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.as_str().to_owned()),
        (Err(_), None) => anyhow::bail!("environment variable `{name}` is not set"),
    }
}
