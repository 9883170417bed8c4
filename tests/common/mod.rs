// Shared test helpers

use std::sync::Arc;
use virtwatch::backend::mock::MockBackend;
use virtwatch::config::MetricsConfig;
use virtwatch::connection::Connection;
use virtwatch::models::Event;

pub const HISTORY: usize = 10;

/// Connection already activated against the given mock backend.
pub fn active_connection(backend: &MockBackend) -> Connection {
    let mut conn = Connection::new("mock:///test", HISTORY);
    conn.activate(Arc::new(backend.clone()));
    conn
}

/// Runs one cycle at a fixed timestamp with every metric category enabled.
pub fn tick(conn: &mut Connection, now_ms: u64) -> Vec<Event> {
    conn.tick_at(now_ms, &MetricsConfig::default(), HISTORY)
}

/// The reconcile event classes of a cycle, in emission order, as short tags.
/// Status/sample events are filtered out.
pub fn reconcile_tags(events: &[Event]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::EntityRemoved { .. } => Some("removed"),
            Event::EntityAdded { .. } => Some("added"),
            Event::EntityStarted { .. } => Some("started"),
            Event::EntityStopped { .. } => Some("stopped"),
            _ => None,
        })
        .collect()
}
