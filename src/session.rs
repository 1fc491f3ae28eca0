//! Authentication session tuple and metering-snapshot cadence helpers for
//! the session-governed connector overlay (§4.1 "Session-governed
//! overlay").
//!
//! Grounded on `original_source/src/charger/ocpp/ocpp_connector_internal.c`:
//! `session.auth.{current,trial}`, `session.timestamp.expiry`,
//! `session.transaction_id`, `session.remote_stop`, and the two metering
//! cadences (`ocpp_connector_update_metering` /
//! `_clock_aligned`) driven by `MeterValueSampleInterval` /
//! `ClockAlignedDataInterval`.

use heapless::String;

/// Authorization identifier, mirrors `OCPP_ID_TOKEN_MAXLEN`-bounded uid
/// strings in the original firmware (21 bytes, matching the persisted
/// `id[21]` field in the §6 authorization record layout).
pub type Uid = String<21>;

/// Authenticated-and-accepted authorization context on a connector.
///
/// `current_uid` is the active session identity; `current_parent_uid` is
/// an optional parent tag (e.g. an RFID group token) authorized alongside
/// it; `trial_uid` is a tag awaiting an authorization decision from the
/// session layer above. `expiry` of `0` means "no expiry set".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub current_uid: Option<Uid>,
    pub current_parent_uid: Option<Uid>,
    pub trial_uid: Option<Uid>,
    pub expiry: u64,
    pub transaction_id: Option<u64>,
    pub remote_stop_requested: bool,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session is established once a `uid` has been accepted.
    pub fn is_established(&self) -> bool {
        self.current_uid.is_some()
    }

    /// Established and not past `expiry` (an `expiry` of `0` never expires).
    pub fn is_active(&self, now_secs: u64) -> bool {
        self.is_established() && !self.is_expired(now_secs)
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expiry != 0 && self.expiry <= now_secs
    }

    pub fn is_transaction_started(&self) -> bool {
        self.transaction_id.is_some()
    }

    /// Begin a trial authorization, replacing any previous trial.
    pub fn begin_trial(&mut self, uid: Uid) {
        self.trial_uid = Some(uid);
    }

    pub fn clear_trial(&mut self) {
        self.trial_uid = None;
    }

    /// Accept the current trial (or an externally supplied uid) as the
    /// established session identity.
    pub fn accept(&mut self, uid: Uid, parent_uid: Option<Uid>, expiry: u64) {
        self.current_uid = Some(uid);
        self.current_parent_uid = parent_uid;
        self.expiry = expiry;
        self.trial_uid = None;
    }

    /// Clear the whole session (end of transaction), matching
    /// `ocpp_connector_clear_session`'s full-struct reset.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn uid_matches(&self, uid: &str) -> bool {
        self.current_uid.as_deref() == Some(uid)
    }
}

/// Context tag distinguishing why a metering snapshot was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleContext {
    SamplePeriodic,
    SampleClock,
}

/// A single metering snapshot, taken either on the sampled cadence or the
/// clock-aligned cadence (§4.1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterSnapshot {
    pub context: SampleContext,
    pub wh: u64,
    pub watt: i32,
    pub milliamp: i32,
    pub millivolt: i32,
    pub power_factor_centi: i32,
    pub frequency_chz: i32,
}

/// Tracks the last-sampled timestamps for both metering cadences and
/// decides, each tick, whether either is due.
///
/// Grounded on `update_metering_core`/`ocpp_connector_update_metering*`:
/// the sampled cadence fires every `interval` seconds since the last
/// sample; the clock-aligned cadence fires only when `now_secs` is an
/// exact multiple of `interval`, and both require `interval != 0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeteringCadence {
    last_sampled_secs: u64,
    last_clock_aligned_secs: u64,
}

impl MeteringCadence {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if a sampled-cadence snapshot is due at `now_secs`.
    pub fn sampled_due(&mut self, now_secs: u64, interval_secs: u64) -> bool {
        if interval_secs == 0 || now_secs == self.last_sampled_secs {
            return false;
        }
        let next = self.last_sampled_secs + interval_secs;
        if now_secs < next {
            return false;
        }
        self.last_sampled_secs = now_secs;
        true
    }

    /// `true` if a clock-aligned snapshot is due at `now_secs` (i.e.
    /// `now_secs` is a multiple of `interval_secs`).
    pub fn clock_aligned_due(&mut self, now_secs: u64, interval_secs: u64) -> bool {
        if interval_secs == 0 || now_secs % interval_secs != 0 {
            return false;
        }
        if now_secs == self.last_clock_aligned_secs {
            return false;
        }
        self.last_clock_aligned_secs = now_secs;
        true
    }
}
