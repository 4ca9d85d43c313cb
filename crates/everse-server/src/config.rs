//! Broadcast server configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Configuration for one broadcast server instance. Immutable once the
/// service has been constructed.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind; `0` picks a free port.
    pub port: u16,
    /// Shared secret clients must pass as `?token=`.
    pub token: String,
    /// Advertised mDNS instance / host label.
    pub instance_name: String,
    /// Host-resolvable domain suffix.
    pub domain: String,
    pub service_type: String,
    /// Directory the static viewer is served from.
    pub web_root: PathBuf,
    pub mdns_enabled: bool,
    /// Interval between server pings on each connection.
    pub keep_alive_interval_secs: u64,
    /// Upper bound on how long `stop()` waits for the listener task.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            token: "secret-token".into(),
            instance_name: "iellaurel".into(),
            domain: "local".into(),
            service_type: "_http._tcp".into(),
            web_root: everse_core::data_dir().join("wwwroot"),
            mdns_enabled: true,
            keep_alive_interval_secs: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file; absent fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("parse {}: {e}", path.display())))
    }

    /// Never zero; a zero period would make the ping ticker spin.
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `<instance>.<domain>`, e.g. `iellaurel.local`.
    pub fn mdns_host(&self) -> String {
        format!("{}.{}", self.instance_name, self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.token, "secret-token");
        assert_eq!(cfg.instance_name, "iellaurel");
        assert_eq!(cfg.domain, "local");
        assert_eq!(cfg.service_type, "_http._tcp");
        assert!(cfg.mdns_enabled);
        assert_eq!(cfg.keep_alive_interval(), Duration::from_secs(30));
        assert!(cfg.web_root.ends_with("wwwroot"));
    }

    #[test]
    fn mdns_host() {
        assert_eq!(ServerConfig::default().mdns_host(), "iellaurel.local");
    }

    #[test]
    fn zero_keep_alive_is_clamped() {
        let cfg = ServerConfig {
            keep_alive_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(cfg.keep_alive_interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"port":6001,"token":"t1","mdns_enabled":false}"#).unwrap();

        let cfg = ServerConfig::load(&path).unwrap();
        assert_eq!(cfg.port, 6001);
        assert_eq!(cfg.token, "t1");
        assert!(!cfg.mdns_enabled);
        assert_eq!(cfg.instance_name, "iellaurel");
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn load_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "{port:").unwrap();
        assert!(matches!(ServerConfig::load(&path), Err(ServerError::Config(_))));
    }
}
