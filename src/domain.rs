// Long-lived wrapper records for guests, networks, and host net devices.
// A record's uuid is its identity for the whole process lifetime; the
// backend handle underneath is replaceable.

use crate::backend::{DomainHandle, NetworkHandle};
use crate::models::{DomainSample, MetricKind};
use crate::samples::{self, SampleRing};
use crate::status::StatusTracker;
use uuid::Uuid;

pub struct Domain {
    uuid: Uuid,
    name: String,
    id: Option<i32>,
    active: bool,
    handle: Box<dyn DomainHandle>,
    pub status: StatusTracker,
    pub samples: SampleRing<DomainSample>,
    descriptor: Option<String>,
}

impl Domain {
    pub(crate) fn new(
        handle: Box<dyn DomainHandle>,
        id: Option<i32>,
        active: bool,
        history_length: usize,
    ) -> Self {
        Self {
            uuid: handle.uuid(),
            name: handle.name(),
            id,
            active,
            handle,
            status: StatusTracker::new(),
            samples: SampleRing::new(history_length),
            descriptor: None,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend id while running, None while merely defined.
    pub fn backend_id(&self) -> Option<i32> {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn handle(&self) -> &dyn DomainHandle {
        self.handle.as_ref()
    }

    /// Active/inactive transition: the old handle is released, the record
    /// (and everything hanging off it) stays.
    pub(crate) fn replace_handle(
        &mut self,
        handle: Box<dyn DomainHandle>,
        id: Option<i32>,
        active: bool,
    ) {
        self.name = handle.name();
        self.handle = handle;
        self.id = id;
        self.active = active;
    }

    pub(crate) fn invalidate_descriptor(&mut self) {
        self.descriptor = None;
    }

    /// Guest descriptor, fetched lazily and cached until the next tick
    /// invalidates it.
    pub fn descriptor(&mut self) -> Option<&str> {
        if self.descriptor.is_none() {
            match self.handle.descriptor() {
                Ok(doc) => self.descriptor = Some(doc),
                Err(e) => {
                    tracing::debug!(uuid = %self.uuid, error = %e, "descriptor fetch failed");
                    return None;
                }
            }
        }
        self.descriptor.as_deref()
    }

    pub fn latest_sample(&self) -> Option<&DomainSample> {
        self.samples.newest()
    }

    /// Zero-padded, newest-first vector of `history_length + 1` values.
    pub fn metric_vector(&self, kind: MetricKind, history_length: usize) -> Vec<f64> {
        let f: fn(&DomainSample) -> f64 = match kind {
            MetricKind::CpuPercent => |s| s.cpu_percent,
            MetricKind::CpuMovingAvgPercent => |s| s.cpu_moving_avg_percent,
            MetricKind::MemPercent => |s| s.cur_mem_percent,
            MetricKind::DiskReadRate => |s| s.disk_rd_rate_kb,
            MetricKind::DiskWriteRate => |s| s.disk_wr_rate_kb,
            MetricKind::NetRxRate => |s| s.net_rx_rate_kb,
            MetricKind::NetTxRate => |s| s.net_tx_rate_kb,
        };
        samples::metric_vector(&self.samples, history_length, f)
    }
}

pub struct Network {
    uuid: Uuid,
    name: String,
    active: bool,
    #[allow(dead_code)]
    handle: Box<dyn NetworkHandle>,
}

impl Network {
    pub(crate) fn new(handle: Box<dyn NetworkHandle>, active: bool) -> Self {
        Self {
            uuid: handle.uuid(),
            name: handle.name(),
            active,
            handle,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn replace_handle(&mut self, handle: Box<dyn NetworkHandle>, active: bool) {
        self.name = handle.name();
        self.handle = handle;
        self.active = active;
    }
}

/// Host network device, tracked by sysfs-style path.
#[derive(Debug, Clone)]
pub struct NetDevice {
    pub path: String,
    pub rx_kb: u64,
    pub tx_kb: u64,
}
