//! System configuration parameters.
//!
//! Tunable parameters for the charger, its connectors, the metering
//! save policy and the safety supervisor. Values can be overridden via
//! `StoragePort` persistence; see [`crate::persistence`].

use serde::{Deserialize, Serialize};

/// Charger-wide configuration, mirrors `charger_param` from the original
/// firmware's `charger.h`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChargerConfig {
    /// Maximum input current in mA.
    pub max_input_current_ma: u32,
    /// Input mains voltage in V.
    pub input_voltage: i16,
    /// Input mains frequency in Hz (50 or 60).
    pub input_frequency: i16,
    /// Maximum output current advertisable to any connector, in mA.
    pub max_output_current_ma: u32,
    /// Minimum output current advertisable to any connector, in mA.
    pub min_output_current_ma: u32,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        // Matches the host test fixture in the reference firmware
        // (`charger_default_param`): a single-phase ~7 kW reference board.
        Self {
            max_input_current_ma: 31_818,
            input_voltage: 220,
            input_frequency: 60,
            max_output_current_ma: 31_818,
            min_output_current_ma: 31_818,
        }
    }
}

impl ChargerConfig {
    /// Validate the configuration. Mirrors `charger_init`'s precondition
    /// check: any of `max_input_current_ma`, `input_voltage`,
    /// `input_frequency` being zero is `Invalid`.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.max_input_current_ma == 0 || self.input_voltage == 0 || self.input_frequency == 0
        {
            return Err(crate::error::Error::Invalid);
        }
        if self.min_output_current_ma > self.max_output_current_ma {
            return Err(crate::error::Error::Invalid);
        }
        Ok(())
    }
}

/// Per-connector configuration, mirrors `connector_param`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Maximum output current this connector may advertise, in mA.
    pub max_output_current_ma: u32,
    /// Minimum output current this connector may advertise, in mA.
    pub min_output_current_ma: u32,
    /// Input frequency this connector expects, in Hz.
    pub input_frequency: i16,
    /// Connector identifier string (distinct from the charger-assigned id).
    pub name: heapless::String<32>,
    /// Scheduling priority; higher values preferred when a charger must pick one.
    pub priority: i32,
    /// Minimum dwell in state `F` before recovery is evaluated, in seconds.
    pub ev_response_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        let mut name = heapless::String::new();
        let _ = name.push_str("connector-1");
        Self {
            max_output_current_ma: 31_818,
            min_output_current_ma: 6_000,
            input_frequency: 60,
            name,
            priority: 0,
            // Resolved Open Question (distilled spec §9 / SPEC_FULL §9): 5 s.
            ev_response_timeout_secs: 5,
        }
    }
}

/// Metering save-threshold configuration, mirrors `METERING_ENERGY_SAVE_*`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Accumulated delta (Wh) since last save that triggers a save.
    pub save_threshold_wh: u64,
    /// Elapsed time (minutes) since last save that triggers a save.
    pub save_interval_min: u32,
    /// Minimum interval between `step()` samples, in milliseconds.
    pub min_step_interval_ms: u32,
    /// Cadence, in seconds, for periodic meter snapshots while a
    /// transaction is active (`MeterValueSampleInterval`). `0` disables.
    pub sampled_interval_secs: u64,
    /// Cadence, in seconds, for wall-clock-aligned meter snapshots while
    /// a transaction is active (`ClockAlignedDataInterval`), firing only
    /// when `now_secs % interval == 0`. `0` disables.
    pub clock_aligned_interval_secs: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            save_threshold_wh: 1_000,
            save_interval_min: 5,
            min_step_interval_ms: 1_000,
            sampled_interval_secs: 60,
            clock_aligned_interval_secs: 900,
        }
    }
}

/// Safety supervisor configuration: frequency-entry tolerances and debounce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Expected line frequency in Hz.
    pub expected_frequency_hz: i16,
    /// Tolerance band around `expected_frequency_hz`, in Hz.
    pub frequency_tolerance_hz: i16,
    /// Sliding window size for zero-crossing samples.
    pub frequency_window_len: usize,
    /// Adjacent edges closer than this are ignored as bounce, in milliseconds.
    pub debounce_ms: u64,
    /// No pulse observed for this long ⇒ `Stale`, in milliseconds.
    pub uptodate_due_ms: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            expected_frequency_hz: 60,
            frequency_tolerance_hz: 3,
            frequency_window_len: 60,
            debounce_ms: 8,
            uptodate_due_ms: 500,
        }
    }
}
