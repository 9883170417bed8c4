// Domain models for the monitor core

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Guest lifecycle state; serializes to camelCase JSON (e.g. "shutOff").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    ShutOff,
    Crashed,
    Suspended,
    #[serde(other)]
    Unknown,
}

impl DomainState {
    /// Parse from the backend's raw state code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::ShuttingDown,
            5 => DomainState::ShutOff,
            6 => DomainState::Crashed,
            7 => DomainState::Suspended,
            _ => DomainState::Unknown,
        }
    }

    /// Externally visible status. NoState and Blocked are transient backend
    /// artifacts and collapse to Running.
    pub fn normalized(self) -> Self {
        match self {
            DomainState::NoState | DomainState::Blocked => DomainState::Running,
            other => other,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnState {
    Disconnected,
    Connecting,
    Active,
    Inactive,
}

/// Host capacity as reported by the backend.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub active_cpus: u32,
    pub memory_kb: u64,
}

/// Raw per-guest counters read from the backend in one call.
/// Cumulative counters (cpu time, disk, net) are treated as monotonic but
/// defensively clamped downstream if they are not.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestCounters {
    pub state_code: i32,
    pub state_reason: i32,
    pub max_mem_kb: u64,
    pub cur_mem_kb: u64,
    pub vcpu_count: u32,
    pub cpu_time_ns: u64,
    pub disk_rd_kb: u64,
    pub disk_wr_kb: u64,
    pub net_rx_kb: u64,
    pub net_tx_kb: u64,
}

/// A host network device as listed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDeviceInfo {
    pub path: String,
    pub rx_kb: u64,
    pub tx_kb: u64,
}

/// One derived sample for a guest. Newest-first in the ring.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSample {
    pub timestamp_ms: u64,
    pub cpu_time_abs: u64,
    pub cpu_time_delta: u64,
    pub cpu_percent: f64,
    pub cpu_time_moving_avg: u64,
    pub cpu_moving_avg_percent: f64,
    pub cur_mem_kb: u64,
    pub cur_mem_percent: f64,
    pub max_mem_kb: u64,
    pub max_mem_percent: f64,
    pub vcpu_count: u32,
    pub disk_rd_kb: u64,
    pub disk_wr_kb: u64,
    /// Disk read rate in KB/sec (computed from the previous sample).
    pub disk_rd_rate_kb: f64,
    pub disk_wr_rate_kb: f64,
    pub net_rx_kb: u64,
    pub net_tx_kb: u64,
    /// Receive rate in KB/sec (computed from the previous sample).
    pub net_rx_rate_kb: f64,
    pub net_tx_rate_kb: f64,
}

/// One aggregate sample across all running guests of a connection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSample {
    pub timestamp_ms: u64,
    pub memory_kb: u64,
    pub cpu_time_ns: u64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Which inventory an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Domain,
    Network,
}

/// Typed events produced by one reconciliation+sampling cycle.
/// Within a cycle the reconciler emits removed, added, started, stopped in
/// that order; a removal completes before a re-add under the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    EntityAdded { uuid: Uuid, kind: EntityKind },
    EntityRemoved { uuid: Uuid, kind: EntityKind },
    EntityStarted { uuid: Uuid, kind: EntityKind },
    EntityStopped { uuid: Uuid, kind: EntityKind },
    StatusChanged { uuid: Uuid, old: DomainState, new: DomainState },
    SamplesUpdated { uuid: Uuid },
}

/// Event plus the connection it came from, as broadcast to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub connection: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Metric selector for history vector queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    CpuPercent,
    CpuMovingAvgPercent,
    MemPercent,
    DiskReadRate,
    DiskWriteRate,
    NetRxRate,
    NetTxRate,
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(MetricKind::CpuPercent),
            "cpuAvg" => Ok(MetricKind::CpuMovingAvgPercent),
            "mem" => Ok(MetricKind::MemPercent),
            "diskRead" => Ok(MetricKind::DiskReadRate),
            "diskWrite" => Ok(MetricKind::DiskWriteRate),
            "netRx" => Ok(MetricKind::NetRxRate),
            "netTx" => Ok(MetricKind::NetTxRate),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// Connection overview for the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub uri: String,
    pub state: ConnState,
    pub domain_count: usize,
    pub network_count: usize,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// Guest overview for the HTTP API, carrying the newest sample's headline
/// metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSummary {
    pub uuid: Uuid,
    pub name: String,
    pub connection: String,
    pub active: bool,
    pub status: DomainState,
    pub cpu_percent: f64,
    pub cpu_moving_avg_percent: f64,
    pub cur_mem_percent: f64,
    pub vcpu_count: u32,
}
