//! Safety supervisor.
//!
//! A composable registry of independent hazard probes. The connector FSM
//! calls [`SafetySupervisor::check`] once per tick before evaluating pilot
//! transitions; any non-`Ok` entry forces the connector to state `F`
//! (invariant P5, "safety wins").
//!
//! Grounded on `original_source/include/safety.h` and
//! `src/safety/safety.c`: `add`/`add_and_enable`/`remove`/`check`/`iterate`
//! keep the same error semantics as the C registry, translated to the
//! crate's unified [`crate::error::Error`].

pub mod emergency_stop;
pub mod frequency;

use crate::error::{Error, Result};
use std::boxed::Box;
use std::vec::Vec;

pub use emergency_stop::EmergencyStopEntry;
pub use frequency::FrequencyEntry;

/// Status returned by a safety entry's `check()`, mirrors `safety_entry_status_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyStatus {
    /// Not yet evaluated.
    Unknown,
    /// No hazard detected.
    Ok,
    /// Derived frequency outside the expected tolerance band.
    AbnormalFrequency,
    /// Not enough samples to determine the frequency.
    SamplingError,
    /// No pulse observed for `UPTODATE_DUE`; power likely abnormal.
    Stale,
    /// User emergency-stop input is asserted.
    EmergencyStop,
}

impl SafetyStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, SafetyStatus::Ok)
    }
}

/// A polymorphic hazard probe, mirrors `safety_entry_api`.
pub trait SafetyEntry {
    /// Human-readable identifier, used for logging.
    fn name(&self) -> &str;
    /// Arm the probe. Implementations that cannot be disabled once armed
    /// (e.g. emergency stop) may still accept repeated `enable()` calls.
    fn enable(&mut self) -> Result<()>;
    /// Disarm the probe. Returns `Unsupported` if disabling is not
    /// permitted for this entry (matches `-ENOTSUP` for emergency stop).
    fn disable(&mut self) -> Result<()>;
    /// Advance the entry's notion of the current monotonic time, in
    /// milliseconds. Entries that are not time-sensitive (emergency stop)
    /// use the default no-op.
    fn advance_time(&mut self, _now_ms: u64) {}
    /// Evaluate the hazard and return its current status.
    fn check(&mut self) -> SafetyStatus;
    /// Instantaneous derived frequency in centihertz, if this entry
    /// measures one. `Unsupported` otherwise (matches `-ENOTSUP`).
    fn frequency_chz(&self) -> Result<i32> {
        Err(Error::Unsupported)
    }
}

/// Opaque identity assigned to an entry on `add`, used by `remove`.
///
/// Rust trait objects have no portable pointer-equality contract, so the
/// supervisor hands back this id instead of relying on the entry's
/// address (Design Note, distilled spec §9 "capability dispatch";
/// resolved Open Question in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SafetyEntryId(u32);

struct Slot {
    id: SafetyEntryId,
    entry: Box<dyn SafetyEntry>,
}

/// Registry of safety entries, mirrors `struct safety`.
#[derive(Default)]
pub struct SafetySupervisor {
    slots: Vec<Slot>,
    next_id: u32,
}

impl SafetySupervisor {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
        }
    }

    /// Register `entry`. Always succeeds with a fresh id (this crate has
    /// no notion of "same entry added twice" since entries are owned by
    /// value; `AlreadyPresent` is reachable only via `add_and_enable`'s
    /// C counterpart and is not otherwise constructible here).
    pub fn add(&mut self, entry: Box<dyn SafetyEntry>) -> Result<SafetyEntryId> {
        let id = SafetyEntryId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot { id, entry });
        Ok(id)
    }

    /// Register and immediately enable `entry`. On `enable()` failure,
    /// the just-added entry is rolled back (removed) and `Io` is returned,
    /// matching `safety_add_and_enable`.
    pub fn add_and_enable(&mut self, mut entry: Box<dyn SafetyEntry>) -> Result<SafetyEntryId> {
        match entry.enable() {
            Ok(()) => self.add(entry),
            Err(_) => Err(Error::Io),
        }
    }

    /// Remove the entry identified by `id`.
    pub fn remove(&mut self, id: SafetyEntryId) -> Result<()> {
        let pos = self.slots.iter().position(|s| s.id == id);
        match pos {
            Some(i) => {
                self.slots.remove(i);
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Run `check()` on every entry, invoking `on_failure` for each
    /// non-`Ok` result. Returns the count of failing entries.
    pub fn check(&mut self, mut on_failure: impl FnMut(&dyn SafetyEntry, SafetyStatus)) -> usize {
        let mut failures = 0;
        for slot in &mut self.slots {
            let status = slot.entry.check();
            if !status.is_ok() {
                failures += 1;
                on_failure(slot.entry.as_ref(), status);
            }
        }
        failures
    }

    /// Advance every entry's clock to `now_ms`, then run `check`.
    /// Time-insensitive entries (emergency stop) ignore the advance.
    pub fn check_at(
        &mut self,
        now_ms: u64,
        mut on_failure: impl FnMut(&dyn SafetyEntry, SafetyStatus),
    ) -> usize {
        for slot in &mut self.slots {
            slot.entry.advance_time(now_ms);
        }
        self.check(&mut on_failure)
    }

    /// Apply `visit` to every registered entry.
    pub fn iterate(&mut self, mut visit: impl FnMut(&mut dyn SafetyEntry)) {
        for slot in &mut self.slots {
            visit(slot.entry.as_mut());
        }
    }

    /// Disable and drop every entry. Matches `safety_destroy`'s
    /// disable-then-destroy sequence; destruction itself is handled by
    /// `Vec`'s drop once `slots` is cleared.
    pub fn destroy(&mut self) {
        for slot in &mut self.slots {
            let _ = slot.entry.disable();
        }
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEntry {
        name: &'static str,
        status: SafetyStatus,
        enable_calls: u32,
        disable_result: Result<()>,
    }

    impl StubEntry {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                status: SafetyStatus::Ok,
                enable_calls: 0,
                disable_result: Ok(()),
            }
        }

        fn failing_enable(name: &'static str) -> Self {
            Self {
                name,
                status: SafetyStatus::Ok,
                enable_calls: 0,
                disable_result: Ok(()),
            }
        }
    }

    impl SafetyEntry for StubEntry {
        fn name(&self) -> &str {
            self.name
        }

        fn enable(&mut self) -> Result<()> {
            self.enable_calls += 1;
            if self.name == "bad" {
                Err(Error::Io)
            } else {
                Ok(())
            }
        }

        fn disable(&mut self) -> Result<()> {
            self.disable_result
        }

        fn check(&mut self) -> SafetyStatus {
            self.status
        }
    }

    #[test]
    fn add_assigns_unique_ids() {
        let mut sup = SafetySupervisor::new();
        let a = sup.add(Box::new(StubEntry::ok("a"))).unwrap();
        let b = sup.add(Box::new(StubEntry::ok("b"))).unwrap();
        assert_ne!(a, b);
        assert_eq!(sup.len(), 2);
    }

    #[test]
    fn remove_missing_is_not_found() {
        let mut sup = SafetySupervisor::new();
        let a = sup.add(Box::new(StubEntry::ok("a"))).unwrap();
        sup.remove(a).unwrap();
        assert_eq!(sup.remove(a), Err(Error::NotFound));
    }

    #[test]
    fn add_and_enable_rolls_back_on_failure() {
        let mut sup = SafetySupervisor::new();
        let result = sup.add_and_enable(Box::new(StubEntry::failing_enable("bad")));
        assert_eq!(result, Err(Error::Io));
        assert!(sup.is_empty());
    }

    #[test]
    fn check_counts_failures_and_invokes_callback() {
        let mut sup = SafetySupervisor::new();
        sup.add(Box::new(StubEntry::ok("ok1"))).unwrap();
        let mut failing = StubEntry::ok("failing");
        failing.status = SafetyStatus::Stale;
        sup.add(Box::new(failing)).unwrap();

        let mut seen = Vec::new();
        let failures = sup.check(|entry, status| seen.push((entry.name().to_string(), status)));
        assert_eq!(failures, 1);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "failing");
        assert_eq!(seen[0].1, SafetyStatus::Stale);
    }

    #[test]
    fn check_all_ok_returns_zero() {
        let mut sup = SafetySupervisor::new();
        sup.add(Box::new(StubEntry::ok("a"))).unwrap();
        sup.add(Box::new(StubEntry::ok("b"))).unwrap();
        assert_eq!(sup.check(|_, _| panic!("should not fail")), 0);
    }
}
