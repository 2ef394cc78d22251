//! C2 Response Parser.
//!
//! LLM output is free text that is supposed to contain a JSON plugin
//! descriptor (spec §6 "Plugin descriptor grammar"). The extraction
//! ladder below mirrors the layered-matching style of `core/patch.rs`'s
//! `PatchEngine` (try the strict strategy first, degrade gracefully, and
//! only fail once every strategy is exhausted).

use serde_json::Value;

use crate::error::{ForgeError, ForgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    AggressiveCleanup,
    BraceBalanced,
    RegexArray,
    LineByLine,
    ConservativeRepair,
}

#[derive(Debug, Clone)]
pub struct ParsedResponse {
    pub value: Value,
    pub strategy: ParseStrategy,
}

/// Runs the five-strategy ladder in order, returning the first strategy
/// that yields valid JSON. Falls back to a synthesized minimal plugin
/// descriptor only when every strategy fails, so downstream components
/// always receive *something* structurally valid.
pub fn parse_response(raw: &str, fallback_plugin_name: &str) -> ForgeResult<ParsedResponse> {
    let strategies: [(ParseStrategy, fn(&str) -> Option<Value>); 5] = [
        (ParseStrategy::AggressiveCleanup, aggressive_cleanup),
        (ParseStrategy::BraceBalanced, brace_balanced),
        (ParseStrategy::RegexArray, regex_array),
        (ParseStrategy::LineByLine, line_by_line),
        (ParseStrategy::ConservativeRepair, conservative_repair),
    ];

    for (strategy, f) in strategies {
        if let Some(value) = f(raw) {
            return Ok(ParsedResponse { value, strategy });
        }
    }

    tracing::warn!(
        fallback_plugin_name,
        "all parse strategies failed, synthesizing minimal plugin descriptor"
    );
    Ok(ParsedResponse {
        value: synthesize_minimal(fallback_plugin_name),
        strategy: ParseStrategy::ConservativeRepair,
    })
}

/// Strips markdown code fences and leading/trailing prose, then parses
/// directly.
fn aggressive_cleanup(raw: &str) -> Option<Value> {
    let cleaned = raw
        .replace("```json", "```")
        .split("```")
        .nth(1)
        .unwrap_or(raw)
        .trim();
    serde_json::from_str(cleaned).ok()
}

/// Scans for the first balanced `{...}` span and parses that span alone,
/// tolerating leading/trailing commentary around the JSON object.
fn brace_balanced(raw: &str) -> Option<Value> {
    let bytes = raw.as_bytes();
    let start = bytes.iter().position(|&b| b == b'{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return serde_json::from_str(&raw[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts a top-level `[...]` array when the model wraps files/commands
/// in a JSON array instead of an object.
fn regex_array(raw: &str) -> Option<Value> {
    let re = regex::Regex::new(r"(?s)\[.*\]").ok()?;
    let m = re.find(raw)?;
    serde_json::from_str(m.as_str()).ok()
}

/// Reconstructs a JSON object line by line, keeping only lines that look
/// like `"key": value` and wrapping them in braces — a last-resort
/// structural repair for truncated or malformed responses.
fn line_by_line(raw: &str) -> Option<Value> {
    let key_value = regex::Regex::new(r#"^\s*"[\w.-]+"\s*:\s*.+$"#).ok()?;
    let mut pieces: Vec<&str> = Vec::new();
    for line in raw.lines() {
        if key_value.is_match(line) {
            pieces.push(line.trim_end_matches(','));
        }
    }
    if pieces.is_empty() {
        return None;
    }
    let body = pieces.join(",\n");
    serde_json::from_str(&format!("{{{body}}}")).ok()
}

/// Repairs the most common truncation failure: a response that is valid
/// JSON except for missing closing braces/brackets at the end.
fn conservative_repair(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let opens_curly = trimmed.matches('{').count();
    let closes_curly = trimmed.matches('}').count();
    let opens_square = trimmed.matches('[').count();
    let closes_square = trimmed.matches(']').count();
    if opens_curly <= closes_curly && opens_square <= closes_square {
        return None;
    }
    let mut repaired = trimmed.to_string();
    for _ in 0..opens_square.saturating_sub(closes_square) {
        repaired.push(']');
    }
    for _ in 0..opens_curly.saturating_sub(closes_curly) {
        repaired.push('}');
    }
    serde_json::from_str(&repaired).ok()
}

fn synthesize_minimal(plugin_name: &str) -> Value {
    serde_json::json!({
        "name": plugin_name,
        "version": "1.0.0",
        "main": format!("com.generated.{}.Main", plugin_name.to_lowercase()),
        "files": [],
    })
}

pub fn require_object(value: &Value) -> ForgeResult<&serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ForgeError::Parse("expected a JSON object at top level".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggressive_cleanup_strips_fences() {
        let raw = "Here is the plugin:\n```json\n{\"name\": \"Welcomer\"}\n```\nLet me know if you need changes.";
        let parsed = parse_response(raw, "Welcomer").unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::AggressiveCleanup);
        assert_eq!(parsed.value["name"], "Welcomer");
    }

    #[test]
    fn test_brace_balanced_ignores_surrounding_prose() {
        let raw = "Sure! Here's your config: {\"name\": \"Foo\", \"nested\": {\"a\": 1}} Hope that helps!";
        let parsed = parse_response(raw, "Foo").unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::BraceBalanced);
        assert_eq!(parsed.value["nested"]["a"], 1);
    }

    #[test]
    fn test_conservative_repair_closes_truncated_json() {
        let raw = r#"{"name": "Foo", "files": ["a.java", "b.java""#;
        let parsed = parse_response(raw, "Foo").unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::ConservativeRepair);
    }

    #[test]
    fn test_total_garbage_falls_back_to_synthesized_minimum() {
        let raw = "I cannot help with that request.";
        let parsed = parse_response(raw, "Fallback").unwrap();
        assert_eq!(parsed.value["name"], "Fallback");
        assert_eq!(parsed.value["files"].as_array().unwrap().len(), 0);
    }
}
