//! Glob-pattern matching for route patterns and URL targeting.
//!
//! Patterns use `*` as the only wildcard (matches any run of
//! characters, including `/`). Everything else matches literally.

use regex::Regex;

/// Convert a glob pattern to an anchored regular expression.
///
/// `*` becomes `.*`; all other characters are escaped literally.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for ch in pattern.chars() {
        if ch == '*' {
            expr.push_str(".*");
        } else {
            expr.push_str(&regex::escape(&ch.to_string()));
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

/// Test a path against a glob pattern. An unparseable pattern never matches.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    match glob_to_regex(pattern) {
        Ok(re) => re.is_match(path),
        Err(_) => false,
    }
}
