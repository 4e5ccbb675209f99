//! Discovery node configuration (spec.md §6 "Configuration").
//!
//! Mirrors `service::config::ServerConfig`'s plain `Default`-impl config
//! struct; validation happens at construction rather than scattered through
//! the call sites that consume the fields.

use discovery_core::path::PathCatalog;

use crate::error::DiscoveryError;

/// Single synchronous-op retry sleep window (spec.md §4.2 `RETRY_TIMEOUT`).
pub const RETRY_TIMEOUT_MS: u64 = 1_000;

/// Diagnostic log cadence while a caller blocks in `joinTopology` (spec.md
/// §5).
pub const JOIN_DIAGNOSTIC_INTERVAL_MS: u64 = 10_000;

/// Configuration for a discovery node instance.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub base_path: String,
    pub cluster_name: String,
    pub connect_string: String,
    /// Used verbatim as `connLossTimeout` (spec.md §4.2).
    pub session_timeout_ms: u64,
    /// Used for thread naming and structured log fields.
    pub instance_name: String,
}

impl DiscoveryConfig {
    /// Validates `cluster_name` and `base_path`, returning
    /// [`DiscoveryError::Fatal`] rather than panicking on malformed input.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Fatal`] if `base_path` is not a well-formed
    /// store path or `cluster_name` is empty.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        PathCatalog::validate_base(&self.base_path)
            .map_err(|e| DiscoveryError::fatal(e.to_string()))?;
        if self.cluster_name.is_empty() {
            return Err(DiscoveryError::fatal("cluster_name must not be empty"));
        }
        Ok(())
    }

    /// Builds the [`PathCatalog`] for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Fatal`] under the same conditions as
    /// [`Self::validate`].
    pub fn path_catalog(&self) -> Result<PathCatalog, DiscoveryError> {
        self.validate()?;
        PathCatalog::new(&self.base_path, &self.cluster_name)
            .map_err(|e| DiscoveryError::fatal(e.to_string()))
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_path: "/discovery".to_string(),
            cluster_name: String::new(),
            connect_string: "127.0.0.1:2181".to_string(),
            session_timeout_ms: 15_000,
            instance_name: "discovery-node".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_rejects_empty_cluster_name() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn valid_config_builds_path_catalog() {
        let config = DiscoveryConfig {
            cluster_name: "prod".to_string(),
            ..DiscoveryConfig::default()
        };
        let catalog = config.path_catalog().unwrap();
        assert_eq!(catalog.cluster_dir(), "/discovery/prod");
    }

    #[test]
    fn malformed_base_path_is_fatal() {
        let config = DiscoveryConfig {
            base_path: "relative/path".to_string(),
            cluster_name: "prod".to_string(),
            ..DiscoveryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DiscoveryError::Fatal { .. })
        ));
    }
}
