//! Size limits for span payloads.
//!
//! Sizes are measured on compact, ASCII-escaped JSON (every non-ASCII char
//! counts as its `\uXXXX` escape), so a budget bounds what a JSON exporter
//! writes, not what the process holds in memory.

use std::fmt::Write as _;

use serde_json::{json, Map, Value};

/// Trimmable fields, highest priority first. Lower-priority fields are
/// dropped first when even their empty skeleton does not fit.
pub const SPAN_TRIM_KEYS: [&str; 8] = [
    "arguments",
    "command",
    "output",
    "result",
    "error",
    "text",
    "changes",
    "items",
];

/// Shorten `value` to at most `max_chars` chars, marking the cut when it fits.
/// `None` keeps the value; `Some(0)` yields an empty string.
/// Allocation: one String. Complexity: O(value length).
pub fn truncate_span_string(value: &str, max_chars: Option<usize>) -> String {
    match max_chars {
        None => value.to_owned(),
        Some(max_chars) => truncate_chars(value, max_chars),
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let len = value.chars().count();
    if len <= max_chars {
        return value.to_owned();
    }

    let suffix = format!("... [truncated, {len} chars]");
    if max_chars <= suffix.len() {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - suffix.len()).collect();
    out.push_str(&suffix);
    out
}

/// Compact JSON with every non-ASCII char escaped as UTF-16 `\uXXXX` units.
/// Allocation: one String. Complexity: O(serialized size).
pub fn ascii_json(value: &Value) -> String {
    let compact = value.to_string();
    if compact.is_ascii() {
        return compact;
    }
    let mut out = String::with_capacity(compact.len() + 16);
    let mut units = [0u16; 2];
    for ch in compact.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        for unit in ch.encode_utf16(&mut units) {
            let _ = write!(out, "\\u{unit:04x}");
        }
    }
    out
}

/// Serialized size of `value` in chars.
pub fn json_char_size(value: &Value) -> usize {
    ascii_json(value).len()
}

fn map_char_size(data: &Map<String, Value>) -> usize {
    // Compact object: braces, commas, quoted keys and colons around each value.
    let mut size = 2 + data.len().saturating_sub(1);
    for (key, value) in data {
        size += json_char_size(&Value::String(key.clone())) + 1 + json_char_size(value);
    }
    size
}

/// String form used for measuring and truncating: strings as-is, `null` as
/// empty, everything else as compact JSON.
pub fn stringify_span_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => ascii_json(other),
    }
}

/// Bound one field value.
///
/// Scalars pass through; strings are truncated; structured values that are
/// too large are replaced by `{preview, truncated: true, original_length}`.
pub fn truncate_span_value(value: Value, max_chars: Option<usize>) -> Value {
    let Some(max_chars) = max_chars else {
        return value;
    };
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => value,
        Value::String(text) => Value::String(truncate_chars(&text, max_chars)),
        structured => {
            let encoded = ascii_json(&structured);
            if encoded.len() <= max_chars {
                return structured;
            }
            json!({
                "preview": truncate_chars(&encoded, max_chars),
                "truncated": true,
                "original_length": encoded.len(),
            })
        }
    }
}

fn drop_empty_string_fields(mut data: Map<String, Value>) -> Map<String, Value> {
    data.retain(|_, value| value.as_str() != Some(""));
    data
}

/// Fit a span payload into `max_chars` serialized chars.
///
/// Non-trimmable keys always survive. Trimmable keys are blanked, then
/// refilled from the leftover budget in proportion to their content length;
/// `arguments` is kept whole first when it fits.
/// Complexity: O(k * s) for k trimmable keys and serialized size s, plus a
/// char-by-char shrink pass when rounding overshoots.
pub fn enforce_span_data_budget(
    data: &Map<String, Value>,
    max_chars: Option<usize>,
) -> Map<String, Value> {
    let Some(max_chars) = max_chars else {
        return drop_empty_string_fields(data.clone());
    };
    if max_chars == 0 {
        return Map::new();
    }

    let mut trimmed = drop_empty_string_fields(data.clone());
    if map_char_size(&trimmed) <= max_chars {
        return trimmed;
    }

    let mut kept_keys: Vec<&str> = SPAN_TRIM_KEYS
        .iter()
        .copied()
        .filter(|key| trimmed.contains_key(*key))
        .collect();
    if kept_keys.is_empty() {
        return trimmed;
    }

    let mut base = trimmed.clone();
    for key in &kept_keys {
        base.insert((*key).to_owned(), Value::String(String::new()));
    }
    let mut base_size = map_char_size(&base);
    while base_size > max_chars {
        let Some(drop_key) = kept_keys.pop() else {
            break;
        };
        base.remove(drop_key);
        trimmed.remove(drop_key);
        base_size = map_char_size(&base);
    }
    if base_size > max_chars || kept_keys.is_empty() {
        return drop_empty_string_fields(base);
    }

    // Rendered non-empty values of the surviving trimmable keys, priority order.
    let mut values: Vec<(&str, String)> = Vec::with_capacity(kept_keys.len());
    for key in &kept_keys {
        match trimmed.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) if text.is_empty() => {}
            Some(value) => values.push((*key, stringify_span_value(value))),
        }
    }

    let available = max_chars - base_size;
    if available == 0 {
        return drop_empty_string_fields(base);
    }

    let budgets = allocate_budgets(&values, available);
    for key in &kept_keys {
        let text = match values.iter().position(|(name, _)| name == key) {
            Some(index) => truncate_chars(&values[index].1, budgets[index]),
            None => String::new(),
        };
        trimmed.insert((*key).to_owned(), Value::String(text));
    }

    let mut size = map_char_size(&trimmed);
    while size > max_chars && !kept_keys.is_empty() {
        // Each dropped char shrinks the encoding by at least one, so cutting
        // the whole overflow at once never removes more than the escapes added.
        let overflow = size - max_chars;
        // First key holding the longest value.
        let Some((position, key)) = kept_keys
            .iter()
            .copied()
            .enumerate()
            .rev()
            .max_by_key(|(_, key)| trimmed.get(*key).map_or(0, rendered_len))
        else {
            break;
        };
        let current = trimmed.get(key).map_or(0, rendered_len);
        if current > 0 {
            let source = values
                .iter()
                .find(|(name, _)| *name == key)
                .map_or("", |(_, text)| text.as_str());
            trimmed.insert(
                key.to_owned(),
                Value::String(truncate_chars(source, current.saturating_sub(overflow))),
            );
        } else {
            kept_keys.remove(position);
        }
        size = map_char_size(&trimmed);
    }

    if size <= max_chars {
        drop_empty_string_fields(trimmed)
    } else {
        drop_empty_string_fields(base)
    }
}

fn rendered_len(value: &Value) -> usize {
    match value {
        Value::String(text) => text.chars().count(),
        other => ascii_json(other).len(),
    }
}

/// Split `available` chars across rendered values.
/// Each value gets one char first (in priority order when short), then
/// `arguments` is topped up, then the rest goes out weighted by unmet length,
/// and rounding leftovers go round-robin from the heaviest value.
fn allocate_budgets(values: &[(&str, String)], available: usize) -> Vec<usize> {
    let lengths: Vec<usize> = values.iter().map(|(_, text)| text.chars().count()).collect();
    let count = values.len();
    let mut budgets = vec![0usize; count];

    let mut remaining = if available >= count {
        budgets.fill(1);
        available - count
    } else {
        for budget in budgets.iter_mut().take(available) {
            *budget = 1;
        }
        0
    };

    if remaining > 0 {
        if let Some(index) = values.iter().position(|(key, _)| *key == "arguments") {
            let needed = lengths[index].saturating_sub(budgets[index]);
            let grant = needed.min(remaining);
            budgets[index] += grant;
            remaining -= grant;
        }
    }

    if remaining > 0 {
        let weights: Vec<usize> = lengths
            .iter()
            .zip(&budgets)
            .map(|(len, budget)| len.saturating_sub(*budget))
            .collect();
        let weight_total: usize = weights.iter().sum();
        if weight_total > 0 {
            for (budget, weight) in budgets.iter_mut().zip(&weights) {
                if *weight == 0 {
                    continue;
                }
                let share = remaining as f64 * (*weight as f64 / weight_total as f64);
                *budget += share as usize;
            }
        }
        for (budget, len) in budgets.iter_mut().zip(&lengths) {
            *budget = (*budget).min(*len);
        }

        let allocated: usize = budgets.iter().sum();
        let mut leftover = available.saturating_sub(allocated);
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by(|a, b| weights[*b].cmp(&weights[*a]));
        let mut cursor = 0usize;
        while leftover > 0 {
            let expandable: Vec<usize> = order
                .iter()
                .copied()
                .filter(|index| budgets[*index] < lengths[*index])
                .collect();
            if expandable.is_empty() {
                break;
            }
            budgets[expandable[cursor % expandable.len()]] += 1;
            leftover -= 1;
            cursor += 1;
        }
    }

    budgets
}

/// Overlay `updates` on `current`, then apply the budget.
pub fn merge_span_data(
    current: &Map<String, Value>,
    updates: Map<String, Value>,
    max_chars: Option<usize>,
) -> Map<String, Value> {
    let mut merged = current.clone();
    merged.extend(updates);
    enforce_span_data_budget(&merged, max_chars)
}
