//! Metrics sink boundary.
//!
//! Session, codec, and unit-of-work code MUST NOT touch `obs::metrics`
//! directly. All instrumentation flows through `MetricsEvent` and
//! `MetricsSink`; this module is the only bridge to the counter state.

use crate::{
    db::identity::EntityName,
    obs::metrics::{self, EntityCounters, EventReport, EventState},
};
use std::{cell::RefCell, rc::Rc};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<Rc<dyn MetricsSink>>> = const { RefCell::new(None) };
}

///
/// WriteKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteKind {
    Insert,
    Update,
    /// Follow-up update that fills a foreign key nulled to break a cycle.
    ExtraUpdate,
    Delete,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent {
    Find {
        entity: EntityName,
        identity_hit: bool,
    },
    RowsHydrated {
        entity: EntityName,
        rows: u64,
    },
    ProxyCreated {
        entity: EntityName,
    },
    ProxyInitialized {
        entity: EntityName,
    },
    Conversion {
        entity: EntityName,
        values: u64,
    },
    Write {
        kind: WriteKind,
        entity: EntityName,
        rows: u64,
    },
    FlushFinish {
        failed: bool,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent);
}

///
/// GlobalMetricsSink
/// Default thread-local sink; used whenever no scoped override is installed.
///

pub(crate) struct GlobalMetricsSink;

impl GlobalMetricsSink {
    fn entity(m: &mut EventState, entity: EntityName) -> &mut EntityCounters {
        m.entities.entry(entity.to_string()).or_default()
    }
}

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::Find {
                entity,
                identity_hit,
            } => {
                m.ops.find_calls = m.ops.find_calls.saturating_add(1);
                if identity_hit {
                    m.ops.identity_hits = m.ops.identity_hits.saturating_add(1);
                } else {
                    m.ops.identity_misses = m.ops.identity_misses.saturating_add(1);
                }

                let entry = Self::entity(m, entity);
                entry.find_calls = entry.find_calls.saturating_add(1);
                if identity_hit {
                    entry.identity_hits = entry.identity_hits.saturating_add(1);
                }
            }

            MetricsEvent::RowsHydrated { entity, rows } => {
                m.ops.rows_hydrated = m.ops.rows_hydrated.saturating_add(rows);
                let entry = Self::entity(m, entity);
                entry.rows_hydrated = entry.rows_hydrated.saturating_add(rows);
            }

            MetricsEvent::ProxyCreated { entity } => {
                m.ops.proxies_created = m.ops.proxies_created.saturating_add(1);
                let entry = Self::entity(m, entity);
                entry.proxies_created = entry.proxies_created.saturating_add(1);
            }

            MetricsEvent::ProxyInitialized { entity } => {
                m.ops.proxies_initialized = m.ops.proxies_initialized.saturating_add(1);
                let entry = Self::entity(m, entity);
                entry.proxies_initialized = entry.proxies_initialized.saturating_add(1);
            }

            MetricsEvent::Conversion { entity, values } => {
                m.ops.values_converted = m.ops.values_converted.saturating_add(values);
                let entry = Self::entity(m, entity);
                entry.values_converted = entry.values_converted.saturating_add(values);
            }

            MetricsEvent::Write { kind, entity, rows } => {
                match kind {
                    WriteKind::Insert => m.ops.inserts = m.ops.inserts.saturating_add(rows),
                    WriteKind::Update => m.ops.updates = m.ops.updates.saturating_add(rows),
                    WriteKind::ExtraUpdate => {
                        m.ops.extra_updates = m.ops.extra_updates.saturating_add(rows);
                    }
                    WriteKind::Delete => m.ops.deletes = m.ops.deletes.saturating_add(rows),
                }

                let entry = Self::entity(m, entity);
                match kind {
                    WriteKind::Insert => entry.inserts = entry.inserts.saturating_add(rows),
                    WriteKind::Update | WriteKind::ExtraUpdate => {
                        entry.updates = entry.updates.saturating_add(rows);
                    }
                    WriteKind::Delete => entry.deletes = entry.deletes.saturating_add(rows),
                }
            }

            MetricsEvent::FlushFinish { failed } => {
                m.ops.flushes = m.ops.flushes.saturating_add(1);
                if failed {
                    m.ops.flush_failures = m.ops.flush_failures.saturating_add(1);
                }
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

pub(crate) fn record(event: MetricsEvent) {
    let override_sink = SINK_OVERRIDE.with(|cell| cell.borrow().clone());
    match override_sink {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current metrics state.
///
/// `window_start_ms` filters by window start (`EventState::window_start_ms`),
/// not by per-event timestamps.
#[must_use]
pub fn metrics_report(window_start_ms: Option<u64>) -> EventReport {
    metrics::report_window_start(window_start_ms)
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a scoped metrics sink override on this thread.
pub fn with_metrics_sink<T>(sink: Rc<dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<Rc<dyn MetricsSink>>);

    impl Drop for Guard {
        fn drop(&mut self) {
            let previous = self.0.take();
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = previous;
            });
        }
    }

    let previous = SINK_OVERRIDE.with(|cell| cell.borrow_mut().replace(sink));
    let _guard = Guard(previous);

    f()
}
