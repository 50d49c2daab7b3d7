//! Rendering of approval prompts.
//!
//! Layout, in order: header, action kind, one-line detail, reply instructions.
//! Tests and the router rely on that ordering, not on the exact wording.

use serde_json::Value;

use crate::format::truncate_chars;

pub const PROMPT_HEADER: &str = "🔐 Permission needed";
const GENERIC_DETAIL_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailShape {
    Path,
    Command,
    Pattern,
    Fetch,
    Generic,
}

fn shape_for(action_kind: &str) -> DetailShape {
    let kind = action_kind.to_ascii_lowercase();
    // Web kinds first: "websearch" must not be read as a local search.
    if kind.contains("fetch") || kind.contains("web") || kind.contains("url") {
        DetailShape::Fetch
    } else if kind.contains("exec") || kind.contains("bash") || kind.contains("shell") {
        DetailShape::Command
    } else if kind.contains("grep") || kind.contains("glob") || kind.contains("search") {
        DetailShape::Pattern
    } else if kind.contains("edit") || kind.contains("write") || kind.contains("read") {
        DetailShape::Path
    } else {
        DetailShape::Generic
    }
}

fn first_str<'a>(detail: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| detail.get(*key).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
}

/// One line describing what the action touches.
pub fn render_detail(action_kind: &str, detail: &Value) -> String {
    let specific = match shape_for(action_kind) {
        DetailShape::Path => first_str(detail, &["path", "file_path", "notebook_path"]),
        DetailShape::Command => first_str(detail, &["command", "cmd"]),
        DetailShape::Pattern => first_str(detail, &["pattern", "query"]),
        DetailShape::Fetch => first_str(detail, &["url", "query"]),
        DetailShape::Generic => None,
    };

    let line = match specific {
        Some(value) => value.to_string(),
        None => match detail {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    let single_line = line.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&single_line, GENERIC_DETAIL_MAX_CHARS)
}

pub fn render_prompt(action_kind: &str, detail: &Value) -> String {
    let rendered = render_detail(action_kind, detail);
    let mut out = String::new();
    out.push_str(PROMPT_HEADER);
    out.push('\n');
    out.push_str(&format!("Action: {action_kind}\n"));
    if !rendered.is_empty() {
        out.push_str(&format!("Target: {rendered}\n"));
    }
    out.push_str("\nReply to this message with:\n");
    out.push_str("  yes - allow once\n");
    out.push_str(&format!("  always - allow {action_kind} for this session\n"));
    out.push_str("  no - deny");
    out
}
