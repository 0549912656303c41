//! Prompt template rendering (spec.md §9 Design Notes: "treat the template
//! engine as an external collaborator" — the core needs only a render
//! function and a name-extraction function).
//!
//! Placeholder syntax: `{name}` for a flat context entry, `{base[key]}` for
//! a nested lookup (`stage_outputs[list_items]`, `item[title]`). A literal
//! brace is written doubled: `{{` / `}}`.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Extract the set of placeholder names a template references, verbatim
/// (e.g. `"stage_outputs[list_items]"`, `"item_index"`) — used both for the
/// `context_used` audit trail and for the Runner's dependency scan.
#[must_use]
pub fn extract_names(template: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '{' {
            if chars.get(i + 1) == Some(&'{') {
                i += 2;
                continue;
            }
            if let Some(end) = find_close(&chars, i + 1) {
                let name: String = chars[i + 1..end].iter().collect();
                let trimmed = name.trim();
                if !trimmed.is_empty() {
                    names.insert(trimmed.to_string());
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    names
}

fn find_close(chars: &[char], start: usize) -> Option<usize> {
    chars[start..].iter().position(|c| *c == '}').map(|p| start + p)
}

/// Render `template` against `context`, substituting every placeholder with
/// the stringified value [`resolve`] finds (or the empty string if absent —
/// callers are expected to validate names with [`resolve`] beforehand and
/// fail the stage on an unresolved reference rather than rely on this
/// fallback).
#[must_use]
pub fn render(template: &str, context: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '{' => {
                if let Some(end) = find_close(&chars, i + 1) {
                    let name: String = chars[i + 1..end].iter().collect();
                    let name = name.trim();
                    if let Some(value) = resolve(context, name) {
                        out.push_str(&stringify(value));
                    }
                    i = end + 1;
                } else {
                    out.push('{');
                    i += 1;
                }
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Resolve a placeholder name against the context map. Supports flat names
/// (`topic`) and one level of bracketed lookup (`stage_outputs[list_items]`,
/// `item[title]`).
#[must_use]
pub fn resolve<'a>(context: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    match name.split_once('[') {
        None => context.get(name),
        Some((base, rest)) => {
            let key = rest.strip_suffix(']')?.trim().trim_matches(|c| c == '"' || c == '\'');
            context.get(base)?.as_object()?.get(key)
        }
    }
}

/// Stringify a JSON value for interpolation into a rendered prompt (spec.md
/// §9: "the renderer stringifies it").
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}
