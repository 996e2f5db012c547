//! Static pre-flight validation of edge-function source.
//!
//! Runs at save time, before a function ever executes: the WAT must
//! parse, may import only the sanctioned host interface, and must
//! export a recognized entry point. This is defense-in-depth — the
//! linker (which simply has nothing else registered) is the real
//! capability boundary.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// The only import namespace an edge function may use.
const ALLOWED_IMPORT: &str = "cloudify:edge/host";

static IMPORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\(import\s+"([^"]+)""#).expect("import pattern compiles"));

static EXPORT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\(export\s+"([^"]+)""#).expect("export pattern compiles"));

/// Recognized entry points, in lookup priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Middleware,
    Handler,
    DefaultHandler,
}

impl EntryPoint {
    /// Priority order: `middleware` wins over `handler` wins over
    /// `default-handler`.
    pub const PRIORITY: [EntryPoint; 3] = [
        EntryPoint::Middleware,
        EntryPoint::Handler,
        EntryPoint::DefaultHandler,
    ];

    /// The export name this entry point is looked up by.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Middleware => "middleware",
            Self::Handler => "handler",
            Self::DefaultHandler => "default-handler",
        }
    }
}

/// Validation failures surfaced at function-save time.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("source is not valid WebAssembly text: {0}")]
    InvalidWat(String),

    #[error("forbidden import `{0}`; only `cloudify:edge/host` is available")]
    ForbiddenImport(String),

    #[error("no recognized entry point; export one of `middleware`, `handler`, `default-handler`")]
    NoEntryPoint,
}

/// Validate edge-function source and resolve its entry point.
pub fn validate_edge_function_code(source: &str) -> Result<EntryPoint, ValidationError> {
    wat::parse_str(source).map_err(|e| ValidationError::InvalidWat(e.to_string()))?;

    for capture in IMPORT_PATTERN.captures_iter(source) {
        let import = &capture[1];
        if !import.starts_with(ALLOWED_IMPORT) {
            return Err(ValidationError::ForbiddenImport(import.to_string()));
        }
    }

    let exports: Vec<&str> = EXPORT_PATTERN
        .captures_iter(source)
        .map(|c| c.get(1).map_or("", |m| m.as_str()))
        .collect();
    EntryPoint::PRIORITY
        .into_iter()
        .find(|entry| exports.contains(&entry.symbol()))
        .ok_or(ValidationError::NoEntryPoint)
}
