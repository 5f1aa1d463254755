//! Observability: runtime counters and the sink abstraction.
//!
//! Session, codec, and unit-of-work code only emit `MetricsEvent`s; the
//! counter state behind them lives in `metrics`.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EntityCounters, EntitySummary, EventOps, EventReport, EventState};
pub use sink::{
    MetricsEvent, MetricsSink, WriteKind, metrics_report, metrics_reset_all, with_metrics_sink,
};
