// In-memory backend used by the mock:// URI scheme and the test suites.
// Scriptable: tests mutate the inventory between poll cycles and inject
// listing failures or mid-poll vanishes.

use crate::error::{BackendError, BackendResult};
use crate::models::{DomainState, GuestCounters, HostInfo, NetDeviceInfo};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{BackendGateway, DomainHandle, NetworkHandle};

#[derive(Debug, Clone)]
struct MockGuest {
    uuid: Uuid,
    name: String,
    id: Option<i32>,
    counters: GuestCounters,
    descriptor: String,
    /// Destroyed between listing and lookup: still listed, but every
    /// handle-returning or counter call reports NotFound.
    vanished: bool,
}

#[derive(Debug, Clone)]
struct MockNet {
    uuid: Uuid,
    name: String,
    active: bool,
    vanished: bool,
}

#[derive(Debug)]
struct MockState {
    guests: Vec<MockGuest>,
    networks: Vec<MockNet>,
    net_devices: Vec<NetDeviceInfo>,
    host: HostInfo,
    fail_active_listing: bool,
    fail_inactive_listing: bool,
    next_id: i32,
}

/// Scriptable in-memory hypervisor backend.
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                guests: Vec::new(),
                networks: Vec::new(),
                net_devices: Vec::new(),
                host: HostInfo {
                    active_cpus: 4,
                    memory_kb: 8_000_000,
                },
                fail_active_listing: false,
                fail_inactive_listing: false,
                next_id: 1,
            })),
        }
    }

    /// A small pre-populated inventory for demo runs of the binary.
    pub fn with_demo_inventory() -> Self {
        let backend = Self::new();
        let web = backend.define_guest("web");
        backend.start_guest(web);
        let db = backend.define_guest("db");
        backend.start_guest(db);
        backend.define_guest("build");
        let default_net = backend.define_network("default");
        backend.start_network(default_net);
        backend.set_net_devices(vec![NetDeviceInfo {
            path: "/sys/class/net/virbr0".into(),
            rx_kb: 0,
            tx_kb: 0,
        }]);
        backend
    }

    pub fn set_host(&self, host: HostInfo) {
        self.lock().host = host;
    }

    /// Defines a new (inactive) guest and returns its uuid.
    pub fn define_guest(&self, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.lock().guests.push(MockGuest {
            uuid,
            name: name.to_string(),
            id: None,
            counters: GuestCounters {
                state_code: DomainState::ShutOff as i32,
                max_mem_kb: 1_048_576,
                cur_mem_kb: 524_288,
                vcpu_count: 2,
                ..Default::default()
            },
            descriptor: format!("<domain><name>{name}</name><uuid>{uuid}</uuid></domain>"),
            vanished: false,
        });
        uuid
    }

    /// Starts a defined guest, assigning it the next backend id.
    pub fn start_guest(&self, uuid: Uuid) -> Option<i32> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let guest = state.guests.iter_mut().find(|g| g.uuid == uuid)?;
        guest.id = Some(id);
        guest.counters.state_code = 1;
        Some(id)
    }

    pub fn stop_guest(&self, uuid: Uuid) {
        if let Some(g) = self.lock().guests.iter_mut().find(|g| g.uuid == uuid) {
            g.id = None;
            g.counters.state_code = 5;
        }
    }

    pub fn undefine_guest(&self, uuid: Uuid) {
        self.lock().guests.retain(|g| g.uuid != uuid);
    }

    /// Keeps the guest listed but makes every lookup and counter read fail
    /// with NotFound, as if it was destroyed mid-poll.
    pub fn vanish_guest(&self, uuid: Uuid) {
        if let Some(g) = self.lock().guests.iter_mut().find(|g| g.uuid == uuid) {
            g.vanished = true;
        }
    }

    pub fn set_counters(&self, uuid: Uuid, counters: GuestCounters) {
        if let Some(g) = self.lock().guests.iter_mut().find(|g| g.uuid == uuid) {
            g.counters = counters;
        }
    }

    pub fn set_state(&self, uuid: Uuid, state: DomainState, reason: i32) {
        if let Some(g) = self.lock().guests.iter_mut().find(|g| g.uuid == uuid) {
            g.counters.state_code = state as i32;
            g.counters.state_reason = reason;
        }
    }

    pub fn define_network(&self, name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.lock().networks.push(MockNet {
            uuid,
            name: name.to_string(),
            active: false,
            vanished: false,
        });
        uuid
    }

    pub fn start_network(&self, uuid: Uuid) {
        if let Some(n) = self.lock().networks.iter_mut().find(|n| n.uuid == uuid) {
            n.active = true;
        }
    }

    pub fn stop_network(&self, uuid: Uuid) {
        if let Some(n) = self.lock().networks.iter_mut().find(|n| n.uuid == uuid) {
            n.active = false;
        }
    }

    pub fn undefine_network(&self, uuid: Uuid) {
        self.lock().networks.retain(|n| n.uuid != uuid);
    }

    pub fn set_net_devices(&self, devices: Vec<NetDeviceInfo>) {
        self.lock().net_devices = devices;
    }

    pub fn fail_active_listing(&self, fail: bool) {
        self.lock().fail_active_listing = fail;
    }

    pub fn fail_inactive_listing(&self, fail: bool) {
        self.lock().fail_inactive_listing = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl BackendGateway for MockBackend {
    fn list_active_ids(&self) -> BackendResult<Vec<i32>> {
        let state = self.lock();
        if state.fail_active_listing {
            return Err(BackendError::Api("active listing failed".into()));
        }
        Ok(state.guests.iter().filter_map(|g| g.id).collect())
    }

    fn list_inactive_names(&self) -> BackendResult<Vec<String>> {
        let state = self.lock();
        if state.fail_inactive_listing {
            return Err(BackendError::Api("inactive listing failed".into()));
        }
        Ok(state
            .guests
            .iter()
            .filter(|g| g.id.is_none())
            .map(|g| g.name.clone())
            .collect())
    }

    fn lookup_by_id(&self, id: i32) -> BackendResult<Box<dyn DomainHandle>> {
        let state = self.lock();
        let guest = state
            .guests
            .iter()
            .find(|g| g.id == Some(id) && !g.vanished)
            .ok_or(BackendError::NotFound)?;
        Ok(Box::new(MockDomainHandle {
            state: self.state.clone(),
            uuid: guest.uuid,
        }))
    }

    fn lookup_by_name(&self, name: &str) -> BackendResult<Box<dyn DomainHandle>> {
        let state = self.lock();
        let guest = state
            .guests
            .iter()
            .find(|g| g.name == name && !g.vanished)
            .ok_or(BackendError::NotFound)?;
        Ok(Box::new(MockDomainHandle {
            state: self.state.clone(),
            uuid: guest.uuid,
        }))
    }

    fn list_active_network_names(&self) -> BackendResult<Vec<String>> {
        Ok(self
            .lock()
            .networks
            .iter()
            .filter(|n| n.active)
            .map(|n| n.name.clone())
            .collect())
    }

    fn list_inactive_network_names(&self) -> BackendResult<Vec<String>> {
        Ok(self
            .lock()
            .networks
            .iter()
            .filter(|n| !n.active)
            .map(|n| n.name.clone())
            .collect())
    }

    fn lookup_network_by_name(&self, name: &str) -> BackendResult<Box<dyn NetworkHandle>> {
        let state = self.lock();
        let net = state
            .networks
            .iter()
            .find(|n| n.name == name && !n.vanished)
            .ok_or(BackendError::NotFound)?;
        Ok(Box::new(MockNetworkHandle {
            uuid: net.uuid,
            name: net.name.clone(),
        }))
    }

    fn list_net_devices(&self) -> BackendResult<Vec<NetDeviceInfo>> {
        Ok(self.lock().net_devices.clone())
    }

    fn host_info(&self) -> BackendResult<HostInfo> {
        Ok(self.lock().host)
    }
}

struct MockDomainHandle {
    state: Arc<Mutex<MockState>>,
    uuid: Uuid,
}

impl MockDomainHandle {
    fn with_guest<T>(&self, f: impl FnOnce(&MockGuest) -> T) -> BackendResult<T> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .guests
            .iter()
            .find(|g| g.uuid == self.uuid && !g.vanished)
            .map(f)
            .ok_or(BackendError::NotFound)
    }
}

impl DomainHandle for MockDomainHandle {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> String {
        self.with_guest(|g| g.name.clone()).unwrap_or_default()
    }

    fn counters(&self) -> BackendResult<GuestCounters> {
        self.with_guest(|g| g.counters)
    }

    fn descriptor(&self) -> BackendResult<String> {
        self.with_guest(|g| g.descriptor.clone())
    }
}

struct MockNetworkHandle {
    uuid: Uuid,
    name: String,
}

impl NetworkHandle for MockNetworkHandle {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
