//! Registration and heartbeat management
//!
//! Announces the local instance to the registry under a TTL contract and
//! keeps it marked healthy from a background loop. The registration record
//! is owned exclusively by the manager; nothing else reads or mutates it.
//!
//! Lifecycle: unregistered until [`RegistrationManager::register`] succeeds,
//! then heartbeating until [`RegistrationManager::shutdown`] deregisters.
//! A failed heartbeat never leaves the heartbeating state; the next
//! scheduled tick is the retry, which bounds worst-case staleness to one
//! missed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::RegistrationConfig;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::{RegistrationRecord, RegistryClient};

/// Bound on the best-effort deregistration call at shutdown.
const DEREGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Registers the local instance and keeps its TTL check passing
pub struct RegistrationManager {
    registry: Arc<dyn RegistryClient>,
    record: RegistrationRecord,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    registered: AtomicBool,
    shutdown_initiated: AtomicBool,
}

impl std::fmt::Debug for RegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationManager")
            .field("record", &self.record)
            .field("registered", &self.registered.load(Ordering::Relaxed))
            .finish()
    }
}

impl RegistrationManager {
    /// Create a manager from configuration
    ///
    /// Generates the unique registration id (`<name>-<uuid>`); nothing is
    /// sent to the registry until [`register`](Self::register).
    pub fn new(registry: Arc<dyn RegistryClient>, config: &RegistrationConfig) -> Self {
        let record = RegistrationRecord::new(
            config.name.clone(),
            config.address.clone(),
            config.port,
            config.ttl_duration(),
            config.deregister_after.clone(),
        );
        Self::with_record(registry, record)
    }

    /// Create a manager around an existing registration record
    pub fn with_record(registry: Arc<dyn RegistryClient>, record: RegistrationRecord) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            record,
            shutdown_tx,
            task: Mutex::new(None),
            registered: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    /// The unique registration id of this process
    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Register with the registry and start the heartbeat loop
    ///
    /// Registration failure is returned to the caller; an unregistered
    /// instance receives no traffic, so startup code treats it as fatal.
    /// On success the heartbeat loop is spawned and this returns
    /// immediately. Calling a second time is a no-op.
    pub async fn register(&self) -> DiscoveryResult<()> {
        if self.registered.swap(true, Ordering::SeqCst) {
            warn!(id = %self.record.id, "Registration already started; ignoring");
            return Ok(());
        }

        if let Err(e) = self.registry.register_service(&self.record).await {
            self.registered.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let registry = Arc::clone(&self.registry);
        let id = self.record.id.clone();
        // Half the TTL, so at least two heartbeats land before the registry
        // would mark the instance critical.
        let period = self.record.ttl / 2;
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(run_heartbeat_loop(registry, id, period, shutdown_rx));
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Stop the heartbeat loop and deregister from the registry
    ///
    /// Idempotent: repeated calls return immediately. Deregistration is
    /// best-effort under a bounded timeout; failure is logged, never
    /// escalated, since the registry's own deregister-after-critical
    /// countdown cleans up eventually.
    pub async fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            debug!(id = %self.record.id, "Shutdown already initiated");
            return;
        }

        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(id = %self.record.id, error = %e, "Heartbeat task did not stop cleanly");
            }
        }

        if !self.registered.load(Ordering::SeqCst) {
            return;
        }

        match timeout(
            DEREGISTER_TIMEOUT,
            self.registry.deregister_service(&self.record.id),
        )
        .await
        {
            Ok(Ok(())) => {
                info!(id = %self.record.id, "Deregistered on shutdown");
            }
            // The registry already forgot us; that is a successful cleanup.
            Ok(Err(DiscoveryError::NotFound(_))) => {
                debug!(id = %self.record.id, "Registration already absent at shutdown");
            }
            Ok(Err(e)) => {
                warn!(id = %self.record.id, error = %e, "Deregistration failed at shutdown");
            }
            Err(_) => {
                warn!(
                    id = %self.record.id,
                    timeout = ?DEREGISTER_TIMEOUT,
                    "Deregistration timed out at shutdown"
                );
            }
        }
    }
}

async fn run_heartbeat_loop(
    registry: Arc<dyn RegistryClient>,
    id: String,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(id = %id, period = ?period, "Heartbeat loop started");
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match registry.heartbeat(&id).await {
                    Ok(()) => debug!(id = %id, "Heartbeat sent"),
                    // The next scheduled tick is the retry; no out-of-band
                    // retries, no loop termination.
                    Err(e) => warn!(id = %id, error = %e, "Heartbeat failed, retrying on next tick"),
                }
            }
            _ = shutdown_rx.changed() => {
                debug!(id = %id, "Heartbeat loop stopping");
                break;
            }
        }
    }
}
