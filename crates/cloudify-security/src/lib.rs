//! cloudify-security — validation and sanitization of untrusted input.
//!
//! Everything here is a pure function: no I/O, no side effects, no
//! shared state beyond lazily compiled regexes. Two layers:
//!
//! - **Input validators** ([`html`], [`input`]) guard user-facing
//!   fields: HTML output, repository URLs, file paths, webhook URLs,
//!   and JSON payloads merged into trusted state.
//! - **Build command validator** ([`command`]) guards the build-trigger
//!   path. The whitelist-plus-recursive-segment check is the primary
//!   defense against command injection; escaping helpers are
//!   defense-in-depth only.

pub mod command;
pub mod html;
pub mod input;

pub use command::{is_valid_build_command, CommandVerdict};
pub use html::{sanitize_html, sanitize_shell_arg, strip_html};
pub use input::{is_clean_object, is_valid_github_url, is_valid_path, is_valid_webhook_url};
