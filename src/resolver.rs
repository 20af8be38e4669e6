//! Service resolution cache
//!
//! Answers "give me a healthy instance of service X" from a locally cached
//! snapshot, so request-routing code never pays a registry round trip. A
//! background task rebuilds the snapshot from the registry on a fixed
//! period and publishes it wholesale; `resolve` only ever reads the
//! currently published value and never blocks on a refresh.
//!
//! When a refresh fails the previous snapshot is retained unchanged, so a
//! transient registry outage degrades freshness, not availability. Callers
//! see an empty result only when no instance has ever been observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::{ResolverConfig, SelectionPolicy};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::registry::{Instance, RegistryClient, ServiceMap};

/// Instances of one service plus its round-robin cursor
///
/// Instance data never changes after construction; the cursor is the only
/// mutable cell and it carries no reader-visible snapshot state.
#[derive(Debug, Default)]
struct ServiceEntry {
    instances: Vec<Instance>,
    cursor: AtomicUsize,
}

/// Immutable point-in-time view of every known healthy instance
///
/// Built fresh by the refresh task and published via a single reference
/// swap; readers always observe a fully constructed snapshot, never a mix
/// of old and new entries.
#[derive(Debug, Default)]
pub struct ServiceSnapshot {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceSnapshot {
    /// Build a snapshot from raw registry output
    ///
    /// Instances are sorted by `(address, port)` so ordering is stable
    /// across refreshes of identical registry state.
    pub fn from_services(services: ServiceMap) -> Self {
        let services = services
            .into_iter()
            .filter(|(_, instances)| !instances.is_empty())
            .map(|(name, mut instances)| {
                instances.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
                (
                    name,
                    ServiceEntry {
                        instances,
                        cursor: AtomicUsize::new(0),
                    },
                )
            })
            .collect();
        Self { services }
    }

    /// Instances of a service, in stable snapshot order
    pub fn instances(&self, name: &str) -> Option<&[Instance]> {
        self.services.get(name).map(|e| e.instances.as_slice())
    }

    /// Names of all services in this snapshot
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Number of services in this snapshot
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn select(&self, name: &str, policy: SelectionPolicy) -> Option<&Instance> {
        let entry = self.services.get(name)?;
        if entry.instances.is_empty() {
            return None;
        }

        let index = match policy {
            SelectionPolicy::RoundRobin => {
                entry.cursor.fetch_add(1, Ordering::Relaxed) % entry.instances.len()
            }
            SelectionPolicy::Random => {
                use rand::Rng;
                rand::thread_rng().gen_range(0..entry.instances.len())
            }
        };

        Some(&entry.instances[index])
    }
}

/// The published-snapshot slot shared between the refresh task (sole
/// writer) and resolver callers (many readers).
type SnapshotSlot = RwLock<Arc<ServiceSnapshot>>;

/// Locally cached, periodically refreshed view of the registry
pub struct ResolutionCache {
    registry: Arc<dyn RegistryClient>,
    snapshot: Arc<SnapshotSlot>,
    policy: SelectionPolicy,
    refresh_interval: Duration,
    require_initial: bool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    shutdown_initiated: AtomicBool,
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("policy", &self.policy)
            .field("refresh_interval", &self.refresh_interval)
            .field("services", &current(&self.snapshot).len())
            .finish()
    }
}

impl ResolutionCache {
    /// Create a cache; no registry traffic until [`start`](Self::start)
    pub fn new(registry: Arc<dyn RegistryClient>, config: &ResolverConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            snapshot: Arc::new(RwLock::new(Arc::new(ServiceSnapshot::default()))),
            policy: config.selection_policy,
            refresh_interval: config.refresh_duration(),
            require_initial: config.require_initial,
            shutdown_tx,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            shutdown_initiated: AtomicBool::new(false),
        }
    }

    /// Perform the initial fetch and start the background refresh loop
    ///
    /// The initial fetch is best-effort by default: if the registry is
    /// briefly unavailable at boot the cache starts empty and the loop
    /// recovers it. With `require_initial` a failed or empty initial fetch
    /// is a startup error instead, and the cache stays unstarted so the
    /// caller may retry. Calling a second time after success is a no-op.
    pub async fn start(&self) -> DiscoveryResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Resolution cache already started; ignoring");
            return Ok(());
        }

        // Bounded like a loop tick, so a slow registry cannot stall startup.
        let initial = timeout(self.refresh_interval, self.refresh())
            .await
            .unwrap_or_else(|_| {
                Err(DiscoveryError::timeout(
                    self.refresh_interval,
                    "initial snapshot fetch",
                ))
            });

        match initial {
            Ok(()) => {
                let snapshot = current(&self.snapshot);
                if self.require_initial && snapshot.is_empty() {
                    // Roll back so a caller can retry start() once the
                    // registry has instances.
                    self.started.store(false, Ordering::SeqCst);
                    return Err(DiscoveryError::BackendError(
                        "initial fetch returned no healthy instances".to_string(),
                    ));
                }
                info!(services = snapshot.len(), "Initial snapshot fetched");
            }
            Err(e) if self.require_initial => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, "Initial fetch failed, starting with an empty snapshot");
            }
        }

        let registry = Arc::clone(&self.registry);
        let snapshot = Arc::clone(&self.snapshot);
        let period = self.refresh_interval;
        let shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(run_refresh_loop(registry, snapshot, period, shutdown_rx));
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Fetch the registry state and publish a fresh snapshot
    ///
    /// On failure the previously published snapshot stays in place and the
    /// error is returned for the caller to log.
    pub async fn refresh(&self) -> DiscoveryResult<()> {
        fetch_and_publish(self.registry.as_ref(), &self.snapshot).await
    }

    /// Look up a healthy instance of a service
    ///
    /// Returns the selected instance's endpoint as `host:port`, or `None`
    /// when the current snapshot knows no healthy instance of that name.
    /// `None` is a normal outcome for callers to handle, not a failure.
    /// Never blocks on the refresh loop.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let snapshot = current(&self.snapshot);
        snapshot.select(name, self.policy).map(Instance::endpoint)
    }

    /// The currently published snapshot
    pub fn snapshot(&self) -> Arc<ServiceSnapshot> {
        current(&self.snapshot)
    }

    /// Stop the background refresh loop; idempotent
    pub async fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            debug!("Resolution cache shutdown already initiated");
            return;
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Refresh task did not stop cleanly");
            }
        }
    }
}

fn current(slot: &SnapshotSlot) -> Arc<ServiceSnapshot> {
    match slot.read() {
        Ok(guard) => Arc::clone(&guard),
        Err(poisoned) => Arc::clone(&poisoned.into_inner()),
    }
}

async fn fetch_and_publish(
    registry: &dyn RegistryClient,
    slot: &SnapshotSlot,
) -> DiscoveryResult<()> {
    let services = registry.query_healthy_instances().await?;
    let snapshot = Arc::new(ServiceSnapshot::from_services(services));
    debug!(services = snapshot.len(), "Publishing refreshed snapshot");

    // The write lock is held only for the pointer exchange; readers
    // holding the old Arc keep a consistent view until they drop it.
    match slot.write() {
        Ok(mut current) => *current = snapshot,
        Err(poisoned) => *poisoned.into_inner() = snapshot,
    }
    Ok(())
}

async fn run_refresh_loop(
    registry: Arc<dyn RegistryClient>,
    snapshot: Arc<SnapshotSlot>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(period = ?period, "Refresh loop started");
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Individual registry calls are bounded by the client's
                // request timeout, but a refresh makes one call per service;
                // the period caps the aggregate so a slow registry cannot
                // stall the loop past its next tick or past shutdown.
                // No backoff: the fixed period is the implicit retry.
                match timeout(period, fetch_and_publish(registry.as_ref(), &snapshot)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(error = %e, "Refresh failed, serving last-good snapshot");
                    }
                    Err(_) => {
                        warn!(period = ?period, "Refresh overran the period, serving last-good snapshot");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("Refresh loop stopping");
                break;
            }
        }
    }
}
