//! HTML and shell-argument sanitizers.

use regex::Regex;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));

/// Escape HTML-significant characters to their entity forms.
///
/// Escapes `& < > " ' /` — all six. No raw `<` or `>` may survive.
pub fn sanitize_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            other => out.push(other),
        }
    }
    out
}

/// Remove anything that looks like an HTML tag.
///
/// Matches the tag-like pattern `<[^>]*>` rather than parsing HTML.
/// Known limitation: pathological malformed input (e.g. an unclosed
/// `<` with no matching `>`) is left as-is; use [`sanitize_html`]
/// when the output must be safe to embed.
pub fn strip_html(s: &str) -> String {
    // Repeat until stable so nested fragments like `<scr<script>ipt>`
    // don't reassemble into a tag after one pass.
    let mut current = s.to_string();
    loop {
        let stripped = TAG_PATTERN.replace_all(&current, "").into_owned();
        if stripped == current {
            return stripped;
        }
        current = stripped;
    }
}

/// Strip shell metacharacters and escape quotes.
///
/// Defense-in-depth only — the build path is protected by the
/// whitelist in [`crate::command`], not by this function.
pub fn sanitize_shell_arg(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            ';' | '&' | '|' | '`' | '$' | '(' | ')' | '{' | '}' | '[' | ']' | '!' | '#' => {}
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    out
}
