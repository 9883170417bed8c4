// Per-cycle diff between the cached inventory and live backend listings.
//
// Steady state does zero backend lookups: entries already cached under the
// same classification are matched through the by-id / by-name indices built
// from the prior cycle. Only unmatched ids/names pay a lookup, after which
// they are classified as genuinely new or merely transitioned.

use crate::backend::BackendGateway;
use crate::domain::{Domain, NetDevice, Network};
use crate::error::BackendError;
use crate::models::{EntityKind, Event};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// What one reconciliation pass changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub removed: Vec<Uuid>,
    pub added: Vec<Uuid>,
    pub started: Vec<Uuid>,
    pub stopped: Vec<Uuid>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.added.is_empty()
            && self.started.is_empty()
            && self.stopped.is_empty()
    }

    /// Emission order is fixed: removed, added, started, stopped. Consumers
    /// rely on a removal completing before a re-add under the same key.
    pub(crate) fn emit(&self, kind: EntityKind, out: &mut Vec<Event>) {
        out.extend(self.removed.iter().map(|&uuid| Event::EntityRemoved { uuid, kind }));
        out.extend(self.added.iter().map(|&uuid| Event::EntityAdded { uuid, kind }));
        out.extend(self.started.iter().map(|&uuid| Event::EntityStarted { uuid, kind }));
        out.extend(self.stopped.iter().map(|&uuid| Event::EntityStopped { uuid, kind }));
    }
}

/// Reconciles the guest map against the backend's active/inactive listings.
/// Never fails: a failed listing keeps the prior classification for that
/// category only, a failed lookup drops the candidate.
pub fn reconcile_domains(
    domains: &mut HashMap<Uuid, Domain>,
    gateway: &dyn BackendGateway,
    history_length: usize,
) -> ReconcileOutcome {
    let active_ids = match gateway.list_active_ids() {
        Ok(ids) => Some(ids),
        Err(e) => {
            warn!(error = %e, "active guest listing failed; keeping prior active set");
            None
        }
    };
    let inactive_names = match gateway.list_inactive_names() {
        Ok(names) => Some(names),
        Err(e) => {
            warn!(error = %e, "inactive guest listing failed; keeping prior inactive set");
            None
        }
    };

    // prior-cycle indices: running guests by backend id, defined-only by name
    let mut by_id: HashMap<i32, Uuid> = HashMap::new();
    let mut by_name: HashMap<String, Uuid> = HashMap::new();
    for (uuid, domain) in domains.iter() {
        match domain.backend_id() {
            Some(id) if domain.is_active() => {
                by_id.insert(id, *uuid);
            }
            _ => {
                by_name.insert(domain.name().to_string(), *uuid);
            }
        }
    }

    let mut outcome = ReconcileOutcome::default();
    let mut seen: HashSet<Uuid> = HashSet::new();

    match active_ids {
        Some(ids) => {
            for id in ids {
                if let Some(&uuid) = by_id.get(&id) {
                    seen.insert(uuid);
                    continue;
                }
                // maybe-new: unknown id, needs one lookup to classify
                let handle = match gateway.lookup_by_id(id) {
                    Ok(h) => h,
                    Err(BackendError::NotFound) => {
                        debug!(id, "guest vanished between listing and lookup");
                        continue;
                    }
                    Err(e) => {
                        warn!(id, error = %e, "guest lookup failed");
                        continue;
                    }
                };
                let uuid = handle.uuid();
                if let Some(existing) = domains.get_mut(&uuid) {
                    // transitioned inactive -> active; identity is reused
                    let was_active = existing.is_active();
                    existing.replace_handle(handle, Some(id), true);
                    if seen.insert(uuid) && !was_active {
                        outcome.started.push(uuid);
                    }
                } else {
                    domains.insert(uuid, Domain::new(handle, Some(id), true, history_length));
                    seen.insert(uuid);
                    outcome.added.push(uuid);
                    outcome.started.push(uuid);
                }
            }
        }
        None => {
            seen.extend(by_id.values().copied());
        }
    }

    match inactive_names {
        Some(names) => {
            for name in names {
                if let Some(&uuid) = by_name.get(&name) {
                    seen.insert(uuid);
                    continue;
                }
                let handle = match gateway.lookup_by_name(&name) {
                    Ok(h) => h,
                    Err(BackendError::NotFound) => {
                        debug!(%name, "guest vanished between listing and lookup");
                        continue;
                    }
                    Err(e) => {
                        warn!(%name, error = %e, "guest lookup failed");
                        continue;
                    }
                };
                let uuid = handle.uuid();
                if seen.contains(&uuid) {
                    // already matched through the active listing this cycle
                    continue;
                }
                if let Some(existing) = domains.get_mut(&uuid) {
                    // transitioned active -> inactive; identity is reused
                    let was_active = existing.is_active();
                    existing.replace_handle(handle, None, false);
                    seen.insert(uuid);
                    if was_active {
                        outcome.stopped.push(uuid);
                    }
                } else {
                    domains.insert(uuid, Domain::new(handle, None, false, history_length));
                    seen.insert(uuid);
                    outcome.added.push(uuid);
                }
            }
        }
        None => {
            seen.extend(by_name.values().copied());
        }
    }

    // absent from both listings for a full cycle: release the record
    let stale: Vec<Uuid> = domains.keys().filter(|u| !seen.contains(u)).copied().collect();
    for uuid in stale {
        domains.remove(&uuid);
        outcome.removed.push(uuid);
    }

    outcome
}

/// Networks reconcile the same way, except the backend lists both partitions
/// by name.
pub fn reconcile_networks(
    networks: &mut HashMap<Uuid, Network>,
    gateway: &dyn BackendGateway,
) -> ReconcileOutcome {
    let active_names = match gateway.list_active_network_names() {
        Ok(names) => Some(names),
        Err(e) => {
            warn!(error = %e, "active network listing failed; keeping prior active set");
            None
        }
    };
    let inactive_names = match gateway.list_inactive_network_names() {
        Ok(names) => Some(names),
        Err(e) => {
            warn!(error = %e, "inactive network listing failed; keeping prior inactive set");
            None
        }
    };

    let mut active_by_name: HashMap<String, Uuid> = HashMap::new();
    let mut inactive_by_name: HashMap<String, Uuid> = HashMap::new();
    for (uuid, net) in networks.iter() {
        if net.is_active() {
            active_by_name.insert(net.name().to_string(), *uuid);
        } else {
            inactive_by_name.insert(net.name().to_string(), *uuid);
        }
    }

    let mut outcome = ReconcileOutcome::default();
    let mut seen: HashSet<Uuid> = HashSet::new();

    reconcile_network_partition(
        gateway,
        active_names,
        &active_by_name,
        true,
        networks,
        &mut outcome,
        &mut seen,
    );
    reconcile_network_partition(
        gateway,
        inactive_names,
        &inactive_by_name,
        false,
        networks,
        &mut outcome,
        &mut seen,
    );

    let stale: Vec<Uuid> = networks.keys().filter(|u| !seen.contains(u)).copied().collect();
    for uuid in stale {
        networks.remove(&uuid);
        outcome.removed.push(uuid);
    }

    outcome
}

/// One network partition (active or inactive listing) against the prior
/// indices. Shared by both passes of `reconcile_networks`.
fn reconcile_network_partition(
    gateway: &dyn BackendGateway,
    listing: Option<Vec<String>>,
    index: &HashMap<String, Uuid>,
    active: bool,
    networks: &mut HashMap<Uuid, Network>,
    outcome: &mut ReconcileOutcome,
    seen: &mut HashSet<Uuid>,
) {
    let Some(names) = listing else {
        seen.extend(index.values().copied());
        return;
    };
    for name in names {
        if let Some(&uuid) = index.get(&name) {
            seen.insert(uuid);
            continue;
        }
        let handle = match gateway.lookup_network_by_name(&name) {
            Ok(h) => h,
            Err(BackendError::NotFound) => {
                debug!(%name, "network vanished between listing and lookup");
                continue;
            }
            Err(e) => {
                warn!(%name, error = %e, "network lookup failed");
                continue;
            }
        };
        let uuid = handle.uuid();
        if seen.contains(&uuid) {
            continue;
        }
        if let Some(existing) = networks.get_mut(&uuid) {
            let was_active = existing.is_active();
            existing.replace_handle(handle, active);
            seen.insert(uuid);
            if active && !was_active {
                outcome.started.push(uuid);
            } else if !active && was_active {
                outcome.stopped.push(uuid);
            }
        } else {
            networks.insert(uuid, Network::new(handle, active));
            seen.insert(uuid);
            outcome.added.push(uuid);
            if active {
                outcome.started.push(uuid);
            }
        }
    }
}

/// Host net devices diff by path; no staging, no events.
pub fn refresh_net_devices(devices: &mut HashMap<String, NetDevice>, gateway: &dyn BackendGateway) {
    let listed = match gateway.list_net_devices() {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "net device listing failed; keeping prior set");
            return;
        }
    };
    let mut seen: HashSet<String> = HashSet::with_capacity(listed.len());
    for info in listed {
        seen.insert(info.path.clone());
        devices
            .entry(info.path.clone())
            .and_modify(|d| {
                d.rx_kb = info.rx_kb;
                d.tx_kb = info.tx_kb;
            })
            .or_insert(NetDevice {
                path: info.path,
                rx_kb: info.rx_kb,
                tx_kb: info.tx_kb,
            });
    }
    devices.retain(|path, _| seen.contains(path));
}
