//! Frequency safety entry.
//!
//! Samples zero-crossings of a monitored line into a bounded sliding
//! window and derives instantaneous frequency from adjacent edges.
//! Grounded on `original_source/include/safety_entry.h` and the
//! distilled spec's §4.3 window/debounce/staleness rules.

use super::{SafetyEntry, SafetyStatus};
use crate::config::SafetyConfig;
use crate::error::Result;

/// Sliding-window capacity: the most `config.frequency_window_len` recent
/// edges are retained, up to this compile-time ceiling.
pub const WINDOW_LEN: usize = 60;

/// Monitors a zero-crossing line and reports deviations from the
/// expected mains frequency. Every tolerance/debounce/window parameter
/// comes from a [`SafetyConfig`] passed at construction, so changing the
/// configured mains frequency or debounce window doesn't require a code
/// change.
pub struct FrequencyEntry {
    name: &'static str,
    expected_hz: i16,
    tolerance_hz: i16,
    uptodate_due_ms: u64,
    debounce_ms: u64,
    min_samples: usize,
    edges_ms: heapless::Deque<u64, WINDOW_LEN>,
    now_ms: u64,
    enabled: bool,
}

impl FrequencyEntry {
    /// Build an entry from a [`SafetyConfig`]. `frequency_window_len` is
    /// clamped to `1..=WINDOW_LEN` (the deque's fixed capacity); below
    /// that many samples, `check()` reports `SamplingError` with a 3-edge
    /// margin, mirroring the original firmware's `WINDOW_LEN - 3` bound.
    pub fn new(name: &'static str, config: &SafetyConfig) -> Self {
        let window_len = config.frequency_window_len.clamp(1, WINDOW_LEN);
        Self {
            name,
            expected_hz: config.expected_frequency_hz,
            tolerance_hz: config.frequency_tolerance_hz,
            uptodate_due_ms: config.uptodate_due_ms,
            debounce_ms: config.debounce_ms,
            min_samples: window_len.saturating_sub(3).max(1),
            edges_ms: heapless::Deque::new(),
            now_ms: 0,
            enabled: false,
        }
    }

    /// Record a zero-crossing edge observed at `now_ms`. Edges closer
    /// than `debounce_ms` to the previous edge are ignored.
    pub fn on_edge(&mut self, now_ms: u64) {
        if let Some(&last) = self.edges_ms.back() {
            if now_ms.saturating_sub(last) < self.debounce_ms {
                return;
            }
        }
        if self.edges_ms.is_full() {
            self.edges_ms.pop_front();
        }
        let _ = self.edges_ms.push_back(now_ms);
    }

    /// Instantaneous frequency in Hz derived from the two most recent
    /// edges, or `None` if fewer than two edges are recorded.
    fn instantaneous_hz(&self) -> Option<f32> {
        let len = self.edges_ms.len();
        if len < 2 {
            return None;
        }
        let mut iter = self.edges_ms.iter().rev();
        let newest = *iter.next()?;
        let prior = *iter.next()?;
        let period_ms = newest.saturating_sub(prior);
        if period_ms == 0 {
            return None;
        }
        // A zero-crossing occurs twice per cycle.
        Some(1000.0 / (period_ms as f32 * 2.0))
    }
}

impl SafetyEntry for FrequencyEntry {
    fn name(&self) -> &str {
        self.name
    }

    fn enable(&mut self) -> Result<()> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        self.enabled = false;
        self.edges_ms.clear();
        Ok(())
    }

    fn advance_time(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    fn check(&mut self) -> SafetyStatus {
        let stale = match self.edges_ms.back() {
            Some(&last) => self.now_ms.saturating_sub(last) >= self.uptodate_due_ms,
            None => true,
        };
        if stale {
            return SafetyStatus::Stale;
        }
        if self.edges_ms.len() < self.min_samples {
            return SafetyStatus::SamplingError;
        }
        match self.instantaneous_hz() {
            Some(hz) => {
                let low = (self.expected_hz - self.tolerance_hz) as f32;
                let high = (self.expected_hz + self.tolerance_hz) as f32;
                if hz < low || hz > high {
                    SafetyStatus::AbnormalFrequency
                } else {
                    SafetyStatus::Ok
                }
            }
            None => SafetyStatus::SamplingError,
        }
    }

    fn frequency_chz(&self) -> Result<i32> {
        self.instantaneous_hz()
            .map(|hz| (hz * 100.0) as i32)
            .ok_or(crate::error::Error::Unsupported)
    }
}
