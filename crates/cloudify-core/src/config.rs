//! cloudify.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CloudifyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub edge: EdgeConfig,
    #[serde(default)]
    pub ab: AbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the API and middleware listen on.
    pub port: u16,
    /// Base domain used to derive deployment URLs
    /// (`https://{slug}.{base_domain}`).
    pub base_domain: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            base_domain: "cloudify.app".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Data directory for the embedded state database.
    pub data_dir: String,
    /// Counter-store backend for rate limiting: "memory" or "redis".
    pub counter_backend: String,
    /// Address of the shared counter store when `counter_backend = "redis"`.
    pub redis_addr: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "/var/lib/cloudify".to_string(),
            counter_backend: "memory".to_string(),
            redis_addr: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    /// Default per-invocation timeout when a function doesn't set one.
    pub default_timeout_secs: u64,
    /// Memory limit per edge invocation in bytes.
    pub memory_limit_bytes: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
            memory_limit_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbConfig {
    /// Whether visitor/variant cookies carry the `Secure` attribute.
    pub secure_cookies: bool,
}

impl Default for AbConfig {
    fn default() -> Self {
        Self {
            secure_cookies: true,
        }
    }
}

impl CloudifyConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CloudifyConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = CloudifyConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.store.counter_backend, "memory");
        assert!(config.edge.default_timeout_secs > 0);
    }

    #[test]
    fn parses_partial_toml() {
        let config: CloudifyConfig = toml::from_str(
            r#"
            [server]
            port = 9090
            base_domain = "example.dev"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.base_domain, "example.dev");
        // Unspecified sections fall back to defaults.
        assert_eq!(config.store.counter_backend, "memory");
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = CloudifyConfig::default();
        let text = config.to_toml_string().unwrap();
        let back: CloudifyConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, config.server.port);
        assert_eq!(back.ab.secure_cookies, config.ab.secure_cookies);
    }
}
