use chrono::{DateTime, Utc};

use crate::{engine::TaskOutcome, types::StatusSnapshot};

pub const STOPPED_MESSAGE: &str = "⏹ Task stopped.";
pub const ALREADY_RUNNING_MESSAGE: &str =
    "⚠️ A task is already running in this conversation. Send /stop to cancel it.";
pub const ERROR_PREFIX: &str = "❌ Error: ";

/// Largest index `<= index` that falls on a char boundary.
pub(crate) fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Keep at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Split a long message into chunks of at most `max_len` bytes, preferring to
/// break after a newline.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 || text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let hard = floor_char_boundary(rest, max_len);
        let cut = match rest[..hard].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ if hard > 0 => hard,
            // max_len smaller than the first char; emit that char alone
            _ => rest.chars().next().map(char::len_utf8).unwrap_or(rest.len()),
        };
        chunks.push(rest[..cut].trim_end_matches('\n').to_string());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

pub fn format_started(working_directory: &str) -> String {
    format!("⏳ Working on it in {working_directory}…")
}

pub fn format_success(text: &str, cost_usd: Option<f64>, turns: Option<u32>) -> String {
    let body = if text.trim().is_empty() {
        "✅ Done.".to_string()
    } else {
        format!("✅ {}", text.trim())
    };

    let mut meta = Vec::new();
    if let Some(cost) = cost_usd {
        meta.push(format!("cost ${cost:.4}"));
    }
    if let Some(turns) = turns {
        meta.push(format!("{turns} turn{}", if turns == 1 { "" } else { "s" }));
    }

    if meta.is_empty() {
        body
    } else {
        format!("{body}\n\n{}", meta.join(" · "))
    }
}

pub fn format_failure(message: &str) -> String {
    format!("{ERROR_PREFIX}{}", message.trim())
}

pub fn format_outcome(outcome: &TaskOutcome) -> String {
    if outcome.success {
        format_success(&outcome.text, outcome.cost_usd, outcome.turns)
    } else if outcome.text.trim().is_empty() {
        format_failure("the task failed without a message")
    } else {
        format_failure(&outcome.text)
    }
}

pub fn format_status(
    snapshot: &StatusSnapshot,
    running_here_since: Option<DateTime<Utc>>,
    trusted_kinds: &[String],
    pending_kinds: &[String],
) -> String {
    let here = running_here_since
        .map(|at| format!(" (one here, running since {} UTC)", at.format("%H:%M:%S")))
        .unwrap_or_default();
    let mut lines = vec![
        format!("📂 {}", snapshot.working_directory),
        format!("Tasks: {} active{here}", snapshot.active_tasks),
        format!("Pending approvals: {}", snapshot.pending_approvals),
    ];
    if !pending_kinds.is_empty() {
        lines.push(format!("Waiting on you: {}", pending_kinds.join(", ")));
    }
    if !trusted_kinds.is_empty() {
        lines.push(format!("Trusted: {}", trusted_kinds.join(", ")));
    }
    lines.join("\n")
}

pub const HELP_MESSAGE: &str = "Send any text to start a task.\n\
/stop - cancel the running task\n\
/reset - forget session context and trusted actions\n\
/status - show tasks and pending approvals\n\
/pwd - show the working directory\n\
/cd <path> - change the working directory\n\
Reply yes, always or no to a permission prompt to answer it.";
