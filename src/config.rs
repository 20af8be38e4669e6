//! Configuration for the discovery runtime
//!
//! TOML-backed configuration with serde defaults and validation. Interval
//! fields are plain seconds; `*_duration()` accessors convert them where the
//! runtime needs a [`Duration`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Registry (Consul agent) connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry HTTP API address
    #[serde(default = "default_registry_address")]
    pub address: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Request timeout in seconds; must stay below both loop periods so a
    /// hung call cannot stall the next tick
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Registry datacenter
    pub datacenter: Option<String>,
    /// ACL token for authentication
    pub token: Option<String>,
}

fn default_registry_address() -> String {
    "http://localhost:8500".to_string()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: default_registry_address(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            datacenter: None,
            token: None,
        }
    }
}

impl RegistryConfig {
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Local instance registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Service name announced to the registry
    pub name: String,
    /// Advertised address of this instance
    pub address: String,
    /// Advertised port of this instance
    pub port: u16,
    /// TTL of the liveness contract in seconds; heartbeats fire at half
    /// this period so at least two land before the registry marks the
    /// instance critical
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// How long the registry keeps a critical instance before removing it,
    /// e.g. "60m"
    #[serde(default = "default_deregister_after")]
    pub deregister_after: String,
}

fn default_ttl() -> u64 {
    30
}

fn default_deregister_after() -> String {
    "60m".to_string()
}

impl RegistrationConfig {
    pub fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Heartbeat period: half the declared TTL.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.ttl) / 2
    }
}

/// Instance selection policy for `resolve`
///
/// Callers' load distribution depends on this choice, so it is explicit
/// configuration rather than an implementation detail. `round_robin` is the
/// default: deterministic and evenly spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Cycle through instances in snapshot order
    #[default]
    RoundRobin,
    /// Uniform random choice among instances
    Random,
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionPolicy::RoundRobin => write!(f, "round_robin"),
            SelectionPolicy::Random => write!(f, "random"),
        }
    }
}

/// Resolution cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Snapshot refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    /// Instance selection policy
    #[serde(default)]
    pub selection_policy: SelectionPolicy,
    /// Treat a failed or empty initial fetch as a startup error instead of
    /// starting with an empty snapshot
    #[serde(default)]
    pub require_initial: bool,
}

fn default_refresh_interval() -> u64 {
    60
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            selection_policy: SelectionPolicy::default(),
            require_initial: false,
        }
    }
}

impl ResolverConfig {
    pub fn refresh_duration(&self) -> Duration {
        Duration::from_secs(self.refresh_interval)
    }
}

/// Top-level runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Registry connection settings
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Local instance registration settings
    pub registration: RegistrationConfig,
    /// Resolution cache settings
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        info!("Configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.registration.name.is_empty() {
            return Err(anyhow::anyhow!("registration name must not be empty"));
        }

        if self.registration.port == 0 {
            return Err(anyhow::anyhow!(
                "registration port must be greater than 0"
            ));
        }

        if self.registration.ttl < 2 {
            return Err(anyhow::anyhow!(
                "registration ttl must be at least 2 seconds"
            ));
        }

        if self.resolver.refresh_interval == 0 {
            return Err(anyhow::anyhow!(
                "resolver refresh_interval must be greater than 0"
            ));
        }

        if self.registry.request_timeout == 0 {
            return Err(anyhow::anyhow!(
                "registry request_timeout must be greater than 0"
            ));
        }

        // A hung registry call must never stall the next scheduled tick.
        let heartbeat = self.registration.ttl / 2;
        if self.registry.request_timeout >= heartbeat {
            return Err(anyhow::anyhow!(
                "registry request_timeout ({}s) must be less than the heartbeat interval ({}s)",
                self.registry.request_timeout,
                heartbeat
            ));
        }

        if self.registry.request_timeout >= self.resolver.refresh_interval {
            return Err(anyhow::anyhow!(
                "registry request_timeout ({}s) must be less than the refresh interval ({}s)",
                self.registry.request_timeout,
                self.resolver.refresh_interval
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            registry: RegistryConfig::default(),
            registration: RegistrationConfig {
                name: "orders".to_string(),
                address: "10.0.0.5".to_string(),
                port: 9001,
                ttl: default_ttl(),
                deregister_after: default_deregister_after(),
            },
            resolver: ResolverConfig::default(),
        }
    }

    #[test]
    fn test_defaults() {
        let registry = RegistryConfig::default();
        assert_eq!(registry.address, "http://localhost:8500");
        assert_eq!(registry.connect_timeout_duration(), Duration::from_secs(5));
        assert_eq!(registry.request_timeout_duration(), Duration::from_secs(10));
        assert!(registry.token.is_none());
        assert!(registry.datacenter.is_none());

        let resolver = ResolverConfig::default();
        assert_eq!(resolver.refresh_duration(), Duration::from_secs(60));
        assert_eq!(resolver.selection_policy, SelectionPolicy::RoundRobin);
        assert!(!resolver.require_initial);
    }

    #[test]
    fn test_heartbeat_interval_is_half_ttl() {
        let config = base_config();
        assert_eq!(config.registration.ttl_duration(), Duration::from_secs(30));
        assert_eq!(
            config.registration.heartbeat_interval(),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut config = base_config();
        config.registration.name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = base_config();
        config.registration.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_refresh_interval() {
        let mut config = base_config();
        config.resolver.refresh_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_exceeding_loop_periods() {
        let mut config = base_config();
        config.registry.request_timeout = 15; // equals ttl/2
        assert!(config.validate().is_err());

        let mut config = base_config();
        config.resolver.refresh_interval = 8; // below the 10s request timeout
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [registry]
            address = "http://consul.internal:8500"
            token = "secret"
            request_timeout = 5

            [registration]
            name = "billing"
            address = "10.0.0.9"
            port = 9002
            ttl = 20

            [resolver]
            refresh_interval = 30
            selection_policy = "random"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse config");
        assert_eq!(config.registry.address, "http://consul.internal:8500");
        assert_eq!(config.registry.token, Some("secret".to_string()));
        assert_eq!(config.registration.name, "billing");
        assert_eq!(config.registration.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.resolver.selection_policy, SelectionPolicy::Random);
        assert!(config.validate().is_ok());
    }
}
