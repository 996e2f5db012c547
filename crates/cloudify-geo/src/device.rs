//! User-Agent classification.
//!
//! Purely case-insensitive substring matching — no UA grammar parsing.
//! Tablets are checked before mobile because several tablet UAs also
//! contain "mobile".

use serde::{Deserialize, Serialize};

/// Coarse device classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
            Self::Tablet => "tablet",
        }
    }
}

/// Classify the device from a User-Agent string.
pub fn detect_device(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_ascii_lowercase();
    // Tablet first: iPad and Android tablets may carry "mobile" too.
    if ua.contains("ipad") || ua.contains("tablet") || ua.contains("kindle") {
        return DeviceType::Tablet;
    }
    if ua.contains("mobile")
        || ua.contains("iphone")
        || ua.contains("android")
        || ua.contains("ipod")
    {
        return DeviceType::Mobile;
    }
    DeviceType::Desktop
}

/// Detect the browser family from a User-Agent string.
///
/// Order matters: Edge embeds "chrome", Chrome embeds "safari", and
/// Opera embeds both.
pub fn detect_browser(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("edg/") || ua.contains("edge") {
        "edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "opera"
    } else if ua.contains("firefox") {
        "firefox"
    } else if ua.contains("chrome") || ua.contains("crios") {
        "chrome"
    } else if ua.contains("safari") {
        "safari"
    } else {
        "other"
    }
}

/// Detect the operating system from a User-Agent string.
pub fn detect_os(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("windows") {
        "windows"
    } else if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ios") {
        "ios"
    } else if ua.contains("android") {
        "android"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macos"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "other"
    }
}
