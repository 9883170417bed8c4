// Periodic poll driver: one timer task drives the reconcile+sample cycle
// for every Active connection, one connection at a time.

use crate::backend::BackendGateway;
use crate::config::{AppConfig, MetricsConfig};
use crate::connection::Connection;
use crate::error::BackendResult;
use crate::models::{ConnectionSummary, DomainSummary, EventEnvelope, MetricKind};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Scheduler timing and sampling config, threaded in at construction.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub history_length: usize,
    pub stats_log_interval_secs: u64,
    pub metrics: MetricsConfig,
}

impl SchedulerConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            poll_interval_ms: config.monitoring.poll_interval_ms,
            history_length: config.monitoring.history_length,
            stats_log_interval_secs: config.monitoring.stats_log_interval_secs,
            metrics: config.metrics.clone(),
        }
    }
}

struct ConnEntry {
    uri: String,
    conn: Mutex<Connection>,
    /// Set while a cycle runs; a firing that would overlap is skipped
    /// outright, never queued.
    in_flight: AtomicBool,
}

struct Shared {
    config: SchedulerConfig,
    connections: RwLock<HashMap<String, Arc<ConnEntry>>>,
    events_tx: broadcast::Sender<EventEnvelope>,
    ticks_total: AtomicU64,
    events_total: AtomicU64,
    overlaps_skipped_total: AtomicU64,
}

pub struct ConnectionScheduler {
    shared: Arc<Shared>,
    timer: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionScheduler {
    pub fn new(config: SchedulerConfig, events_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connections: RwLock::new(HashMap::new()),
                events_tx,
                ticks_total: AtomicU64::new(0),
                events_total: AtomicU64::new(0),
                overlaps_skipped_total: AtomicU64::new(0),
            }),
            timer: std::sync::Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.shared.events_tx.subscribe()
    }

    /// Registers a connection and opens its backend off the poll loop.
    /// Returns once the connection is tracked (state Connecting); the opened
    /// gateway is applied on delivery, and no tick runs for the connection
    /// until then.
    pub async fn add_connection<F>(&self, uri: &str, opener: F)
    where
        F: FnOnce() -> BackendResult<Arc<dyn BackendGateway>> + Send + 'static,
    {
        let mut conn = Connection::new(uri, self.shared.config.history_length);
        conn.mark_connecting();
        let entry = Arc::new(ConnEntry {
            uri: uri.to_string(),
            conn: Mutex::new(conn),
            in_flight: AtomicBool::new(false),
        });
        self.shared
            .connections
            .write()
            .await
            .insert(uri.to_string(), entry.clone());

        let uri = uri.to_string();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(opener).await;
            let mut conn = entry.conn.lock().await;
            match result {
                Ok(Ok(gateway)) => {
                    conn.activate(gateway);
                    info!(uri = %uri, "backend connection opened");
                }
                Ok(Err(e)) => {
                    warn!(uri = %uri, error = %e, "backend open failed");
                    conn.close();
                }
                Err(e) => {
                    error!(uri = %uri, error = %e, "backend open task failed");
                    conn.close();
                }
            }
        });
    }

    /// Removes a connection and invalidates its caches and rings. Waits for
    /// any in-flight cycle to release the lock first, so no partially
    /// applied state survives.
    pub async fn close_connection(&self, uri: &str) -> bool {
        let Some(entry) = self.shared.connections.write().await.remove(uri) else {
            return false;
        };
        entry.conn.lock().await.close();
        info!(uri = %uri, "connection closed");
        true
    }

    /// Sets a per-connection history length override, resolved at tick time.
    pub async fn set_history_override(&self, uri: &str, length: Option<usize>) -> bool {
        let Some(entry) = self.shared.connections.read().await.get(uri).cloned() else {
            return false;
        };
        entry.conn.lock().await.set_history_override(length);
        true
    }

    /// Installs the periodic timer, cancelling any prior one first:
    /// duplicate concurrent pollers for the same scheduler are forbidden.
    pub fn schedule(&self, interval_ms: u64) {
        let shared = self.shared.clone();
        let stats_log_interval = Duration::from_secs(shared.config.stats_log_interval_secs);
        let handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(interval_ms.max(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut stats_log_tick = interval(stats_log_interval);
            stats_log_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        shared.tick_all().await;
                    }
                    _ = stats_log_tick.tick() => {
                        info!(
                            ticks_total = shared.ticks_total.load(Ordering::Relaxed),
                            events_total = shared.events_total.load(Ordering::Relaxed),
                            overlaps_skipped_total =
                                shared.overlaps_skipped_total.load(Ordering::Relaxed),
                            "app stats"
                        );
                    }
                }
            }
        });

        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = timer.replace(handle) {
            prev.abort();
        }
    }

    /// Stops the periodic timer.
    pub fn shutdown(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        debug!("scheduler timer stopped");
    }

    /// One firing over every connection, for callers driving cycles by hand.
    pub async fn tick_all(&self) {
        self.shared.tick_all().await;
    }

    pub fn ticks_total(&self) -> u64 {
        self.shared.ticks_total.load(Ordering::Relaxed)
    }

    pub async fn connection_summaries(&self) -> Vec<ConnectionSummary> {
        let entries = self.shared.entries().await;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let conn = entry.conn.lock().await;
            let newest = conn.samples.newest();
            out.push(ConnectionSummary {
                uri: conn.uri().to_string(),
                state: conn.state,
                domain_count: conn.domains.len(),
                network_count: conn.networks.len(),
                cpu_percent: newest.map(|s| s.cpu_percent).unwrap_or(0.0),
                mem_percent: newest.map(|s| s.mem_percent).unwrap_or(0.0),
            });
        }
        out.sort_by(|a, b| a.uri.cmp(&b.uri));
        out
    }

    pub async fn domain_summaries(&self) -> Vec<DomainSummary> {
        let entries = self.shared.entries().await;
        let mut out = Vec::new();
        for entry in entries {
            let conn = entry.conn.lock().await;
            for domain in conn.domains.values() {
                let newest = domain.latest_sample();
                out.push(DomainSummary {
                    uuid: domain.uuid(),
                    name: domain.name().to_string(),
                    connection: conn.uri().to_string(),
                    active: domain.is_active(),
                    status: domain.status.status(),
                    cpu_percent: newest.map(|s| s.cpu_percent).unwrap_or(0.0),
                    cpu_moving_avg_percent: newest
                        .map(|s| s.cpu_moving_avg_percent)
                        .unwrap_or(0.0),
                    cur_mem_percent: newest.map(|s| s.cur_mem_percent).unwrap_or(0.0),
                    vcpu_count: newest.map(|s| s.vcpu_count).unwrap_or(0),
                });
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Fixed-length metric vector for one guest, newest first.
    pub async fn domain_history(&self, uuid: Uuid, kind: MetricKind) -> Option<Vec<f64>> {
        for entry in self.shared.entries().await {
            let conn = entry.conn.lock().await;
            if let Some(domain) = conn.domains.get(&uuid) {
                return Some(domain.metric_vector(kind, self.shared.config.history_length));
            }
        }
        None
    }

    /// Cached guest descriptor, fetched lazily from the backend.
    pub async fn domain_descriptor(&self, uuid: Uuid) -> Option<String> {
        for entry in self.shared.entries().await {
            let mut conn = entry.conn.lock().await;
            if let Some(domain) = conn.domains.get_mut(&uuid) {
                return domain.descriptor().map(|s| s.to_string());
            }
        }
        None
    }
}

impl Shared {
    async fn entries(&self) -> Vec<Arc<ConnEntry>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// One firing: every Active connection gets its cycle. A panic in one
    /// connection's cycle is caught and logged and never stops the rest.
    async fn tick_all(&self) {
        for entry in self.entries().await {
            if entry.in_flight.swap(true, Ordering::AcqRel) {
                self.overlaps_skipped_total.fetch_add(1, Ordering::Relaxed);
                debug!(uri = %entry.uri, "previous cycle still in flight; skipping");
                continue;
            }
            let mut conn = entry.conn.lock().await;
            let events = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                conn.tick(&self.config.metrics, self.config.history_length)
            })) {
                Ok(events) => events,
                Err(_) => {
                    error!(uri = %entry.uri, "connection cycle panicked");
                    Vec::new()
                }
            };
            drop(conn);
            self.ticks_total.fetch_add(1, Ordering::Relaxed);
            self.events_total
                .fetch_add(events.len() as u64, Ordering::Relaxed);
            for event in events {
                let _ = self.events_tx.send(EventEnvelope {
                    connection: entry.uri.clone(),
                    event,
                });
            }
            entry.in_flight.store(false, Ordering::Release);
        }
    }
}
