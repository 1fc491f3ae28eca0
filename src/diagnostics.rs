//! Runtime diagnostics: ambient counters the tick loop accumulates.
//!
//! Grounded on the teacher's `RuntimeMetrics::collect` (a plain snapshot
//! struct built on demand from live counters, no separate collection
//! task). This crate's tick loop has two dropped-data counters worth
//! surfacing: the event queue's overflow count (§4.5) and the sum of
//! each connector's log-rate-limiter drop count (§4.6) — both quietly
//! discard data under sustained load rather than failing the tick, so
//! an operator needs a way to see that it happened.

use crate::charger::Charger;

/// On-demand snapshot of the charger's dropped-data counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    /// Events dropped because the SPSC queue was full (§4.5).
    pub event_queue_overflow_count: u32,
    /// Log lines suppressed across all connectors' leaky buckets (§4.6).
    pub log_drop_count: u32,
    /// Number of connectors currently attached.
    pub connector_count: usize,
}

impl Diagnostics {
    pub fn collect(charger: &Charger) -> Self {
        let log_drop_count = charger
            .connectors()
            .iter()
            .map(|c| c.log_drop_count())
            .sum();

        Self {
            event_queue_overflow_count: charger.event_queue_overflow_count(),
            log_drop_count,
            connector_count: charger.connector_count(),
        }
    }
}
