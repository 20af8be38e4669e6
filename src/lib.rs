//! # Beacon - client-side service discovery runtime
//!
//! Beacon keeps a process visible to a Consul-compatible registry and keeps
//! the registry's view of everyone else cached locally:
//!
//! - **Registration & heartbeats**: announce the local instance under a TTL
//!   health-check contract and assert liveness from a background loop;
//!   deregister on graceful shutdown.
//! - **Cached resolution**: periodically pull every service's healthy
//!   instances, publish them as an immutable snapshot, and serve
//!   non-blocking `resolve(name)` lookups with round-robin or random
//!   instance selection.
//!
//! Both loops run independently for the life of the process. Registry
//! outages degrade freshness, never availability: a failed refresh keeps
//! the last-good snapshot, a failed heartbeat retries on the next tick.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beacon::{Config, ConsulRegistry, RegistrationManager, ResolutionCache};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("beacon.toml").await?;
//!     let registry = Arc::new(ConsulRegistry::new(config.registry.clone())?);
//!
//!     let registration = RegistrationManager::new(registry.clone(), &config.registration);
//!     registration.register().await?;
//!
//!     let cache = Arc::new(ResolutionCache::new(registry, &config.resolver));
//!     cache.start().await?;
//!
//!     if let Some(endpoint) = cache.resolve("billing") {
//!         println!("billing lives at {endpoint}");
//!     }
//!
//!     cache.shutdown().await;
//!     registration.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod registration;
pub mod registry;
pub mod resolver;

// Re-export commonly used types
pub use config::{Config, RegistrationConfig, RegistryConfig, ResolverConfig, SelectionPolicy};
pub use error::{DiscoveryError, DiscoveryResult};
pub use registration::RegistrationManager;
pub use registry::{
    ConsulRegistry, HealthStatus, Instance, RegistrationRecord, RegistryClient, ServiceMap,
};
pub use resolver::{ResolutionCache, ServiceSnapshot};
