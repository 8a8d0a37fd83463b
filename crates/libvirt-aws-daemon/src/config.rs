use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5100;

/// Listener settings for the query API.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_to: String,
    pub port: u16,
    /// Requests running longer than this get a 408; the work they started
    /// still completes in the background.
    pub request_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_to: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl DaemonConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_to, self.port)
    }
}

/// Access-key check. Signatures are not verified; only the key id in the
/// credential scope has to be known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub access_keys: Vec<String>,
}

impl AuthConfig {
    pub fn allows(&self, access_key: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }
        access_key
            .map(|key| self.access_keys.iter().any(|k| k == key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_auth_allows_anyone() {
        let auth = AuthConfig::default();
        assert!(auth.allows(None));
        assert!(auth.allows(Some("AKIAANYTHING")));
    }

    #[test]
    fn test_enabled_auth_needs_known_key() {
        let auth = AuthConfig {
            enabled: true,
            access_keys: vec!["AKIDEXAMPLE".to_string()],
        };
        assert!(auth.allows(Some("AKIDEXAMPLE")));
        assert!(!auth.allows(Some("AKIAOTHER")));
        assert!(!auth.allows(None));
    }

    #[test]
    fn test_address() {
        let config = DaemonConfig {
            bind_to: "0.0.0.0".to_string(),
            ..Default::default()
        };
        assert_eq!(config.address(), "0.0.0.0:5100");
    }
}
