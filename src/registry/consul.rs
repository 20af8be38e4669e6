//! Consul registry client
//!
//! [`RegistryClient`] implementation over the Consul agent HTTP API.
//! Registration uses a TTL check so the registry never probes the instance;
//! the instance asserts its own liveness through `heartbeat`.

use serde_json::json;

use crate::config::RegistryConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::{HealthStatus, Instance, RegistrationRecord, RegistryClient, ServiceMap};

/// Consul-backed registry client
pub struct ConsulRegistry {
    config: RegistryConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for ConsulRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsulRegistry")
            .field("address", &self.config.address)
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl ConsulRegistry {
    /// Create a new Consul registry client
    ///
    /// Both timeouts come from the config; the per-request timeout bounds
    /// every call made by the background loops.
    pub fn new(config: RegistryConfig) -> DiscoveryResult<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(config.request_timeout_duration())
            .connect_timeout(config.connect_timeout_duration())
            .build()
            .map_err(|e| DiscoveryError::ConnectionFailed(std::io::Error::other(e)))?;

        Ok(Self { config, client })
    }

    fn apply_auth(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.config.datacenter {
            request = request.query(&[("dc", dc)]);
        }
        request
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> DiscoveryResult<reqwest::Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DiscoveryError::timeout(self.config.request_timeout_duration(), operation)
            } else {
                DiscoveryError::NetworkError(format!("{} failed: {}", operation, e))
            }
        })?;
        Ok(response)
    }

    /// Parse one entry of a `/v1/health/service/<name>` response.
    ///
    /// `ServiceAddress` may be empty when the service registered without an
    /// explicit address, in which case the node address applies.
    fn parse_health_entry(entry: &serde_json::Value) -> DiscoveryResult<Instance> {
        let service = entry.get("Service").ok_or_else(|| {
            DiscoveryError::BackendError("Missing Service in health response".to_string())
        })?;

        let name = service["Service"].as_str().ok_or_else(|| {
            DiscoveryError::BackendError("Missing Service name in health response".to_string())
        })?;

        let address = service["Address"]
            .as_str()
            .filter(|a| !a.is_empty())
            .or_else(|| entry["Node"]["Address"].as_str())
            .unwrap_or("")
            .to_string();

        let port = service["Port"].as_u64().ok_or_else(|| {
            DiscoveryError::BackendError("Missing or invalid Port in health response".to_string())
        })? as u16;

        Ok(Instance {
            name: name.to_string(),
            address,
            port,
            health: HealthStatus::Passing,
        })
    }
}

#[async_trait::async_trait]
impl RegistryClient for ConsulRegistry {
    async fn register_service(&self, record: &RegistrationRecord) -> DiscoveryResult<()> {
        let definition = json!({
            "ID": record.id,
            "Name": record.name,
            "Address": record.address,
            "Port": record.port,
            "Check": {
                "TTL": format!("{}s", record.ttl.as_secs()),
                "DeregisterCriticalServiceAfter": record.deregister_after,
            }
        });

        let url = format!("{}/v1/agent/service/register", self.config.address);
        let request = self.apply_auth(self.client.put(&url).json(&definition));
        let response = self.send(request, "service registration").await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DiscoveryError::RegistrationFailed(format!(
                "HTTP {} - {}",
                status, error_text
            )));
        }

        tracing::info!(id = %record.id, "Registered service with registry");
        Ok(())
    }

    async fn heartbeat(&self, service_id: &str) -> DiscoveryResult<()> {
        // TTL checks created through service registration are named
        // "service:<id>" by the agent.
        let url = format!(
            "{}/v1/agent/check/update/service:{}",
            self.config.address, service_id
        );
        let body = json!({ "Status": "passing", "Output": "agent alive" });
        let request = self.apply_auth(self.client.put(&url).json(&body));
        let response = self.send(request, "heartbeat").await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DiscoveryError::NotFound(format!("service:{}", service_id)));
        }

        if !response.status().is_success() {
            return Err(DiscoveryError::BackendError(format!(
                "Heartbeat failed: HTTP {}",
                response.status()
            )));
        }

        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> DiscoveryResult<()> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.config.address, service_id
        );
        let request = self.apply_auth(self.client.put(&url));
        let response = self.send(request, "service deregistration").await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DiscoveryError::NotFound(service_id.to_string()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DiscoveryError::BackendError(format!(
                "Deregistration failed: HTTP {} - {}",
                status, error_text
            )));
        }

        tracing::info!(id = %service_id, "Deregistered service from registry");
        Ok(())
    }

    async fn query_healthy_instances(&self) -> DiscoveryResult<ServiceMap> {
        let url = format!("{}/v1/catalog/services", self.config.address);
        let request = self.apply_auth(self.client.get(&url));
        let response = self.send(request, "service catalog query").await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::BackendError(format!(
                "Catalog query failed: HTTP {}",
                response.status()
            )));
        }

        let catalog: std::collections::HashMap<String, Vec<String>> =
            response.json().await.map_err(|e| {
                DiscoveryError::BackendError(format!("Failed to parse catalog response: {}", e))
            })?;

        let mut services = ServiceMap::new();
        for name in catalog.keys() {
            let url = format!("{}/v1/health/service/{}", self.config.address, name);
            let request = self.apply_auth(self.client.get(&url).query(&[("passing", "true")]));
            let response = self.send(request, "health query").await?;

            if !response.status().is_success() {
                return Err(DiscoveryError::BackendError(format!(
                    "Health query for {} failed: HTTP {}",
                    name,
                    response.status()
                )));
            }

            let entries: Vec<serde_json::Value> = response.json().await.map_err(|e| {
                DiscoveryError::BackendError(format!("Failed to parse health response: {}", e))
            })?;

            let mut instances = Vec::with_capacity(entries.len());
            for entry in &entries {
                match Self::parse_health_entry(entry) {
                    Ok(instance) => instances.push(instance),
                    Err(e) => {
                        tracing::warn!(service = %name, error = %e, "Skipping unparsable instance");
                    }
                }
            }

            if !instances.is_empty() {
                services.insert(name.clone(), instances);
            }
        }

        Ok(services)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_health_entry() {
        let entry = json!({
            "Node": { "Node": "node-1", "Address": "10.0.0.1" },
            "Service": { "ID": "orders-abc", "Service": "orders", "Address": "10.0.0.5", "Port": 9001 }
        });

        let instance = ConsulRegistry::parse_health_entry(&entry).unwrap();
        assert_eq!(instance.name, "orders");
        assert_eq!(instance.endpoint(), "10.0.0.5:9001");
        assert_eq!(instance.health, HealthStatus::Passing);
    }

    #[test]
    fn test_parse_health_entry_falls_back_to_node_address() {
        let entry = json!({
            "Node": { "Node": "node-1", "Address": "10.0.0.1" },
            "Service": { "ID": "orders-abc", "Service": "orders", "Address": "", "Port": 9001 }
        });

        let instance = ConsulRegistry::parse_health_entry(&entry).unwrap();
        assert_eq!(instance.address, "10.0.0.1");
    }

    #[test]
    fn test_parse_health_entry_rejects_missing_port() {
        let entry = json!({
            "Node": { "Address": "10.0.0.1" },
            "Service": { "Service": "orders", "Address": "10.0.0.5" }
        });

        let result = ConsulRegistry::parse_health_entry(&entry);
        assert!(matches!(result, Err(DiscoveryError::BackendError(_))));
    }

    #[tokio::test]
    async fn test_client_creation() {
        let registry = ConsulRegistry::new(RegistryConfig::default());
        assert!(registry.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_registry_reports_network_error() {
        let config = RegistryConfig {
            address: "http://127.0.0.1:1".to_string(),
            connect_timeout: 1,
            request_timeout: 1,
            ..Default::default()
        };
        let registry = ConsulRegistry::new(config).unwrap();

        let record = RegistrationRecord::new(
            "orders",
            "10.0.0.5",
            9001,
            Duration::from_secs(30),
            "60m",
        );
        let result = registry.register_service(&record).await;
        assert!(matches!(
            result,
            Err(DiscoveryError::NetworkError(_)) | Err(DiscoveryError::Timeout { .. })
        ));
    }
}
