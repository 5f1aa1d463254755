use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

///
/// EventState
/// Ephemeral, in-memory counters for session operations.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub entities: BTreeMap<String, EntityCounters>,
    pub window_start_ms: u64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            entities: BTreeMap::new(),
            window_start_ms: now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Lookups
    pub find_calls: u64,
    pub identity_hits: u64,
    pub identity_misses: u64,

    // Hydration
    pub rows_hydrated: u64,
    pub proxies_created: u64,
    pub proxies_initialized: u64,

    // Identifier conversion
    pub values_converted: u64,

    // Writes
    pub inserts: u64,
    pub updates: u64,
    pub extra_updates: u64,
    pub deletes: u64,

    // Flush outcomes
    pub flushes: u64,
    pub flush_failures: u64,
}

///
/// EntityCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntityCounters {
    pub find_calls: u64,
    pub identity_hits: u64,
    pub rows_hydrated: u64,
    pub proxies_created: u64,
    pub proxies_initialized: u64,
    pub values_converted: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Reset all counters and restart the window.
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `window_start_ms`.
    pub counters: Option<EventState>,
    /// Per-entity counters with derived ratios.
    pub entity_counters: Vec<EntitySummary>,
}

///
/// EntitySummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntitySummary {
    pub entity: String,
    pub find_calls: u64,
    pub identity_hits: u64,
    pub rows_hydrated: u64,
    pub proxies_created: u64,
    pub proxies_initialized: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub identity_hit_ratio: f64,
}

/// Build a report over the current window.
///
/// A `window_start_ms` later than the live window yields an empty report.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub(crate) fn report_window_start(window_start_ms: Option<u64>) -> EventReport {
    let snap = with_state(Clone::clone);
    if window_start_ms.is_some_and(|start| start > snap.window_start_ms) {
        return EventReport::default();
    }

    let mut entity_counters: Vec<EntitySummary> = snap
        .entities
        .iter()
        .map(|(entity, ops)| {
            let ratio = if ops.find_calls > 0 {
                ops.identity_hits as f64 / ops.find_calls as f64
            } else {
                0.0
            };

            EntitySummary {
                entity: entity.clone(),
                find_calls: ops.find_calls,
                identity_hits: ops.identity_hits,
                rows_hydrated: ops.rows_hydrated,
                proxies_created: ops.proxies_created,
                proxies_initialized: ops.proxies_initialized,
                inserts: ops.inserts,
                updates: ops.updates,
                deletes: ops.deletes,
                identity_hit_ratio: ratio,
            }
        })
        .collect();

    // Busiest hydration first, then name.
    entity_counters.sort_by(|a, b| match b.rows_hydrated.cmp(&a.rows_hydrated) {
        Ordering::Equal => a.entity.cmp(&b.entity),
        other => other,
    });

    EventReport {
        counters: Some(snap),
        entity_counters,
    }
}
