// One hypervisor connection: wrapper maps, aggregate ring, and the
// reconcile+sample cycle. All mutation happens under the scheduler's
// per-connection lock on the poll side.

use crate::backend::BackendGateway;
use crate::config::MetricsConfig;
use crate::domain::{Domain, NetDevice, Network};
use crate::error::BackendError;
use crate::models::{ConnState, ConnectionSample, DomainState, Event};
use crate::reconciler;
use crate::samples::{self, SampleRing};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Connection {
    uri: String,
    pub state: ConnState,
    gateway: Option<Arc<dyn BackendGateway>>,
    pub domains: HashMap<Uuid, Domain>,
    pub networks: HashMap<Uuid, Network>,
    pub net_devices: HashMap<String, NetDevice>,
    pub samples: SampleRing<ConnectionSample>,
    history_override: Option<usize>,
}

impl Connection {
    pub fn new(uri: &str, history_length: usize) -> Self {
        Self {
            uri: uri.to_string(),
            state: ConnState::Disconnected,
            gateway: None,
            domains: HashMap::new(),
            networks: HashMap::new(),
            net_devices: HashMap::new(),
            samples: SampleRing::new(history_length),
            history_override: None,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnState::Connecting;
    }

    /// Applies an opened backend. Called on the poll side once the blocking
    /// open delivers its result.
    pub fn activate(&mut self, gateway: Arc<dyn BackendGateway>) {
        self.gateway = Some(gateway);
        self.state = ConnState::Active;
    }

    /// Per-connection history length, overriding the scheduler default.
    pub fn set_history_override(&mut self, length: Option<usize>) {
        self.history_override = length;
    }

    /// Drops all cached state. Nothing from an earlier cycle remains
    /// observable afterwards.
    pub fn close(&mut self) {
        self.domains.clear();
        self.networks.clear();
        self.net_devices.clear();
        self.samples.clear();
        self.gateway = None;
        self.state = ConnState::Disconnected;
    }

    /// One poll cycle at the current wall clock.
    pub fn tick(&mut self, metrics: &MetricsConfig, default_history: usize) -> Vec<Event> {
        self.tick_at(now_ms(), metrics, default_history)
    }

    /// One poll cycle: reconcile inventories, then sample every running
    /// guest and the connection aggregate. A connection that is not Active
    /// is a no-op, not an error.
    pub fn tick_at(
        &mut self,
        now_ms: u64,
        metrics: &MetricsConfig,
        default_history: usize,
    ) -> Vec<Event> {
        if self.state != ConnState::Active {
            return Vec::new();
        }
        let Some(gateway) = self.gateway.clone() else {
            return Vec::new();
        };
        let history = self.history_override.unwrap_or(default_history);

        self.samples.set_capacity(history);
        for domain in self.domains.values_mut() {
            domain.invalidate_descriptor();
            domain.samples.set_capacity(history);
        }

        let mut events = Vec::new();
        reconciler::reconcile_domains(&mut self.domains, gateway.as_ref(), history)
            .emit(crate::models::EntityKind::Domain, &mut events);
        reconciler::reconcile_networks(&mut self.networks, gateway.as_ref())
            .emit(crate::models::EntityKind::Network, &mut events);
        reconciler::refresh_net_devices(&mut self.net_devices, gateway.as_ref());

        let host = match gateway.host_info() {
            Ok(h) => h,
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "host info unavailable; skipping sampling");
                return events;
            }
        };

        let mut agg_mem_kb: u64 = 0;
        let mut agg_cpu_ns: u64 = 0;
        for domain in self.domains.values_mut() {
            if !domain.is_active() {
                if let Some((old, new)) = domain.status.observe(DomainState::ShutOff, 0) {
                    events.push(Event::StatusChanged {
                        uuid: domain.uuid(),
                        old,
                        new,
                    });
                }
                continue;
            }
            let counters = match domain.handle().counters() {
                Ok(c) => c,
                Err(BackendError::NotFound) => {
                    debug!(uuid = %domain.uuid(), "guest vanished before sampling");
                    continue;
                }
                Err(e) => {
                    warn!(uuid = %domain.uuid(), error = %e, "counter read failed");
                    continue;
                }
            };
            if let Some((old, new)) = domain
                .status
                .observe(DomainState::from_code(counters.state_code), counters.state_reason)
            {
                events.push(Event::StatusChanged {
                    uuid: domain.uuid(),
                    old,
                    new,
                });
            }
            let sample =
                samples::derive_domain_sample(&domain.samples, &counters, &host, now_ms, metrics);
            agg_mem_kb += sample.cur_mem_kb;
            agg_cpu_ns += sample.cpu_time_abs;
            domain.samples.push(sample);
            events.push(Event::SamplesUpdated {
                uuid: domain.uuid(),
            });
        }

        let aggregate =
            samples::derive_connection_sample(&self.samples, agg_mem_kb, agg_cpu_ns, &host, now_ms);
        self.samples.push(aggregate);

        events
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}
