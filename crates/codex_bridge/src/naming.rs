use std::collections::BTreeMap;

use crate::errors::CodexToolError;

pub const DEFAULT_TOOL_NAME: &str = "codex";
pub const DEFAULT_RUN_CONTEXT_THREAD_ID_KEY: &str = "codex_thread_id";
pub const TOOL_NAME_PREFIX: &str = "codex_";

const STRICT_SUFFIX_PREAMBLE: &str =
    "When with_run_context_thread_id(true) is set without a run_context_thread_id_key, ";

/// Validate a configured tool name. `None` yields the default name.
pub fn resolve_tool_name(configured: Option<&str>) -> Result<String, CodexToolError> {
    let Some(configured) = configured else {
        return Ok(DEFAULT_TOOL_NAME.to_owned());
    };
    let name = configured.trim();
    if name.is_empty() {
        return Err(CodexToolError::Config(
            "Codex tool name must be a non-empty string.".to_owned(),
        ));
    }
    if !is_codex_tool_name(name) {
        return Err(CodexToolError::Config(format!(
            "Codex tool name must be \"{DEFAULT_TOOL_NAME}\" or start with \"{TOOL_NAME_PREFIX}\"."
        )));
    }
    Ok(name.to_owned())
}

pub fn is_codex_tool_name(name: &str) -> bool {
    name == DEFAULT_TOOL_NAME || name.starts_with(TOOL_NAME_PREFIX)
}

/// Run-context key under which a tool stores its thread id.
///
/// An explicit key wins. Otherwise `codex` maps to `codex_thread_id` and
/// `codex_<suffix>` to `codex_thread_id_<suffix>`. `strict` rejects suffixes
/// that are not plain identifiers instead of normalizing them.
pub fn resolve_run_context_thread_id_key(
    tool_name: &str,
    configured_key: Option<&str>,
    strict: bool,
) -> Result<String, CodexToolError> {
    if let Some(key) = configured_key {
        let key = key.trim();
        if key.is_empty() {
            return Err(CodexToolError::Config(
                "run_context_thread_id_key must be a non-empty string.".to_owned(),
            ));
        }
        return Ok(key.to_owned());
    }

    if tool_name == DEFAULT_TOOL_NAME {
        return Ok(DEFAULT_RUN_CONTEXT_THREAD_ID_KEY.to_owned());
    }

    let suffix = tool_name.strip_prefix(TOOL_NAME_PREFIX).unwrap_or(tool_name);
    let suffix = if strict {
        strict_suffix(suffix)?.to_owned()
    } else {
        normalize_key_suffix(suffix)
    };
    Ok(format!("{DEFAULT_RUN_CONTEXT_THREAD_ID_KEY}_{suffix}"))
}

fn strict_suffix(suffix: &str) -> Result<&str, CodexToolError> {
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Err(CodexToolError::Config(format!(
            "{STRICT_SUFFIX_PREAMBLE}codex tool names must include a non-empty suffix after \"{TOOL_NAME_PREFIX}\"."
        )));
    }
    if !suffix
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(CodexToolError::Config(format!(
            "{STRICT_SUFFIX_PREAMBLE}the codex tool name suffix (after \"{TOOL_NAME_PREFIX}\") must match [A-Za-z0-9_]+. \
             Use only letters, numbers, and underscores, or set run_context_thread_id_key explicitly."
        )));
    }
    Ok(suffix)
}

/// Lower-case, collapse runs of non-identifier chars to `_`, trim `_`.
/// Allocation: one String. Complexity: O(n).
fn normalize_key_suffix(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for ch in value.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "tool".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Fail when a Codex tool name is registered more than once.
///
/// `tool_names` is every tool name a host exposes, Codex or not, so a plain
/// tool that shadows a Codex tool is caught too.
pub fn ensure_unique_codex_tool_names<I, S>(tool_names: I) -> Result<(), CodexToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for name in tool_names {
        let name = name.as_ref();
        if is_codex_tool_name(name) {
            *counts.entry(name.to_owned()).or_default() += 1;
        }
    }
    let duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    Err(CodexToolError::Config(format!(
        "Duplicate Codex tool names found: {}",
        duplicates.join(", ")
    )))
}
