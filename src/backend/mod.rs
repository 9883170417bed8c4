// Backend gateway capability surface.
//
// The hypervisor management service is an external collaborator; this trait
// is the backend-agnostic slice of it the monitor core consumes. Calls are
// synchronous: the underlying client libraries block, so callers run them
// from the poll cycle or a blocking task.

pub mod mock;

use crate::error::BackendResult;
use crate::models::{GuestCounters, HostInfo, NetDeviceInfo};
use uuid::Uuid;

pub trait BackendGateway: Send + Sync {
    /// Ids of currently running guests. Fails independently of the other
    /// listing calls.
    fn list_active_ids(&self) -> BackendResult<Vec<i32>>;

    /// Names of defined-but-not-running guests.
    fn list_inactive_names(&self) -> BackendResult<Vec<String>>;

    fn lookup_by_id(&self, id: i32) -> BackendResult<Box<dyn DomainHandle>>;

    fn lookup_by_name(&self, name: &str) -> BackendResult<Box<dyn DomainHandle>>;

    fn list_active_network_names(&self) -> BackendResult<Vec<String>>;

    fn list_inactive_network_names(&self) -> BackendResult<Vec<String>>;

    fn lookup_network_by_name(&self, name: &str) -> BackendResult<Box<dyn NetworkHandle>>;

    fn list_net_devices(&self) -> BackendResult<Vec<NetDeviceInfo>>;

    fn host_info(&self) -> BackendResult<HostInfo>;
}

/// Live handle to one guest. Replaceable: the wrapper record keeps its uuid
/// while the handle underneath is swapped on active/inactive transitions.
pub trait DomainHandle: Send + Sync {
    /// Stable 128-bit identifier, never reused across guest lifecycles.
    fn uuid(&self) -> Uuid;

    fn name(&self) -> String;

    /// One-shot read of all raw counters for this guest.
    fn counters(&self) -> BackendResult<GuestCounters>;

    /// Full guest descriptor document. Fetched lazily; the wrapper caches it
    /// for at most one poll cycle.
    fn descriptor(&self) -> BackendResult<String>;
}

/// Live handle to one virtual network.
pub trait NetworkHandle: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> String;
}
