//! Emergency-stop safety entry.
//!
//! Grounded on `original_source/src/safety/emergency_stop_safety.c`: a
//! user-input callback latches a pressed/released flag; `check()` reports
//! it; the entry cannot be disabled once enabled (`disable()` returns
//! `Unsupported`, matching the original's `-ENOTSUP`), and it never
//! reports a frequency.

use super::{SafetyEntry, SafetyStatus};
use crate::error::{Error, Result};

/// Polls a user-input source (button, relay contact) for an asserted
/// emergency-stop condition.
pub struct EmergencyStopEntry {
    name: &'static str,
    pressed: bool,
    enabled: bool,
}

impl EmergencyStopEntry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pressed: false,
            enabled: false,
        }
    }

    /// Called by the input driver (ISR or polling loop) when the
    /// emergency-stop line changes state.
    pub fn set_pressed(&mut self, pressed: bool) {
        self.pressed = pressed;
    }
}

impl SafetyEntry for EmergencyStopEntry {
    fn name(&self) -> &str {
        self.name
    }

    fn enable(&mut self) -> Result<()> {
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        // Matches the original: once armed, emergency stop cannot be
        // disabled through the normal safety-entry interface.
        Err(Error::Unsupported)
    }

    fn check(&mut self) -> SafetyStatus {
        if self.pressed {
            SafetyStatus::EmergencyStop
        } else {
            SafetyStatus::Ok
        }
    }
}
