//! Registry client abstraction
//!
//! This module defines the contract the runtime consumes from the external
//! registry, along with the shared data types. The registry itself (health
//! bookkeeping, instance catalog) lives outside this crate; both the
//! heartbeat manager and the resolution cache are clients of it.

pub mod consul;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::DiscoveryResult;

pub use consul::ConsulRegistry;

/// Health of an instance as last observed through the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Passing,
    Critical,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Passing => write!(f, "passing"),
            HealthStatus::Critical => write!(f, "critical"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One network-reachable endpoint of a named service
///
/// Immutable once constructed; snapshots hold these by value and never
/// mutate them after publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Service name (multiple instances can share it)
    pub name: String,
    /// IP address or hostname
    pub address: String,
    /// Port number
    pub port: u16,
    /// Health as last observed
    pub health: HealthStatus,
}

impl Instance {
    pub fn new(name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            health: HealthStatus::Passing,
        }
    }

    /// The instance endpoint formatted as `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// The local process's own registration identity
///
/// Created once at startup and owned exclusively by the heartbeat manager;
/// the random suffix makes the id unique for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RegistrationRecord {
    /// Registry-wide unique id, `<name>-<uuid>`
    pub id: String,
    /// Service name
    pub name: String,
    /// Advertised address
    pub address: String,
    /// Advertised port
    pub port: u16,
    /// TTL of the liveness contract
    pub ttl: Duration,
    /// How long the registry keeps the instance after it turns critical
    /// before removing it, in registry duration syntax (e.g. "60m")
    pub deregister_after: String,
}

impl RegistrationRecord {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        ttl: Duration,
        deregister_after: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let id = format!("{}-{}", name, uuid::Uuid::new_v4());
        Self {
            id,
            name,
            address: address.into(),
            port,
            ttl,
            deregister_after: deregister_after.into(),
        }
    }
}

/// Healthy instances of every known service, grouped by service name
pub type ServiceMap = HashMap<String, Vec<Instance>>;

/// Contract consumed from the external registry
///
/// Implementations perform the actual wire calls. Every method must carry a
/// bounded timeout so the calling loops cannot be stalled past their next
/// tick.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register the local instance under a TTL health-check contract
    async fn register_service(&self, record: &RegistrationRecord) -> DiscoveryResult<()>;

    /// Send a "still alive" pass signal for a registration id
    async fn heartbeat(&self, service_id: &str) -> DiscoveryResult<()>;

    /// Remove a registration
    ///
    /// Returns [`DiscoveryError::NotFound`](crate::error::DiscoveryError)
    /// when the registry no longer knows the id; shutdown paths treat that
    /// as successful cleanup.
    async fn deregister_service(&self, service_id: &str) -> DiscoveryResult<()>;

    /// Fetch all instances of all services that pass their health checks
    async fn query_healthy_instances(&self) -> DiscoveryResult<ServiceMap>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_endpoint() {
        let instance = Instance::new("orders", "10.0.0.5", 9001);
        assert_eq!(instance.endpoint(), "10.0.0.5:9001");
        assert_eq!(instance.health, HealthStatus::Passing);
    }

    #[test]
    fn test_registration_record_id_is_unique() {
        let a = RegistrationRecord::new("orders", "10.0.0.5", 9001, Duration::from_secs(30), "60m");
        let b = RegistrationRecord::new("orders", "10.0.0.5", 9001, Duration::from_secs(30), "60m");

        assert!(a.id.starts_with("orders-"));
        assert!(b.id.starts_with("orders-"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "orders");
        assert_eq!(a.deregister_after, "60m");
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(HealthStatus::Passing.to_string(), "passing");
        assert_eq!(HealthStatus::Critical.to_string(), "critical");
        assert_eq!(HealthStatus::Unknown.to_string(), "unknown");
    }
}
