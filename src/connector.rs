//! Connector FSM and the `Connector` type that owns one outlet's
//! capability objects (§4.1).
//!
//! Two flavors share the same pilot-state vocabulary and event bitset:
//! free-vend (`fsm::free_vend_transition`) and session-governed
//! (`fsm::session_transition`). Both are implemented as pure functions —
//! `(current_state, inputs) -> (next_state, side_effects, events, error)`
//! — executed by [`Connector::process`], which owns the capability trait
//! objects and actually applies the side effects (Design Note, distilled
//! spec §9: "prefer a tagged-variant state plus a transition function
//! ... side effects are executed by the caller, making the transition
//! function pure and table-testable").
//!
//! Grounded on `original_source/include/charger/connector.h` (event
//! bitset, `connector_error_t`, `connector_param`) and
//! `original_source/src/charger/ocpp/ocpp_connector_internal.c` (the
//! session-governed overlay's state-to-IEC-state mapping).

use crate::error::{Error, Result};
use crate::metering::{Metering, MeteringEnergy, MeteringFacade};
use crate::pilot::{Pilot, PilotState};
use crate::safety::{SafetyStatus, SafetySupervisor};
use crate::session::{AuthSession, MeterSnapshot, MeteringCadence, SampleContext};

pub mod fsm;

use fsm::SideEffect;

bitflags::bitflags! {
    /// Bitset over observable connector facts, mirrors `connector_event_t`.
    /// Multiple bits may be set in one delivery (e.g. pilot A→F from
    /// charging emits `CHARGING_ENDED | ERROR`). A value of `0` (empty)
    /// is never delivered (§8 boundary behavior) — see
    /// [`crate::events::EventQueue::push`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConnectorEvent: u16 {
        const PLUGGED            = 0x0001;
        const UNPLUGGED          = 0x0002;
        const CHARGING_STARTED   = 0x0004;
        const CHARGING_SUSPENDED = 0x0008;
        const CHARGING_ENDED     = 0x0010;
        const ERROR              = 0x0020;
        const ERROR_RECOVERY     = 0x0040;
        const BILLING_STARTED    = 0x0080;
        const BILLING_REALTIME   = 0x0100;
        const BILLING_ENDED      = 0x0200;
        const OCCUPIED           = 0x0400;
        const UNOCCUPIED         = 0x0800;
        const AUTH_REJECTED      = 0x1000;
        const RESERVED           = 0x2000;
        const ENABLED            = 0x4000;
    }
}

/// Size-bounded deterministic event formatter (§6, `CONNECTOR_EVENT_STRING_MAXLEN
/// = 128`). Lists the set bits in declaration order, pipe-separated;
/// truncates rather than panics if the names would overflow the bound.
pub const EVENT_STRING_MAXLEN: usize = 128;

pub fn format_event(event: ConnectorEvent) -> heapless::String<EVENT_STRING_MAXLEN> {
    const NAMES: &[(ConnectorEvent, &str)] = &[
        (ConnectorEvent::PLUGGED, "PLUGGED"),
        (ConnectorEvent::UNPLUGGED, "UNPLUGGED"),
        (ConnectorEvent::CHARGING_STARTED, "CHARGING_STARTED"),
        (ConnectorEvent::CHARGING_SUSPENDED, "CHARGING_SUSPENDED"),
        (ConnectorEvent::CHARGING_ENDED, "CHARGING_ENDED"),
        (ConnectorEvent::ERROR, "ERROR"),
        (ConnectorEvent::ERROR_RECOVERY, "ERROR_RECOVERY"),
        (ConnectorEvent::BILLING_STARTED, "BILLING_STARTED"),
        (ConnectorEvent::BILLING_REALTIME, "BILLING_REALTIME"),
        (ConnectorEvent::BILLING_ENDED, "BILLING_ENDED"),
        (ConnectorEvent::OCCUPIED, "OCCUPIED"),
        (ConnectorEvent::UNOCCUPIED, "UNOCCUPIED"),
        (ConnectorEvent::AUTH_REJECTED, "AUTH_REJECTED"),
        (ConnectorEvent::RESERVED, "RESERVED"),
        (ConnectorEvent::ENABLED, "ENABLED"),
    ];

    let mut out = heapless::String::new();
    let mut first = true;
    for (bit, name) in NAMES {
        if !event.contains(*bit) {
            continue;
        }
        let sep_len = if first { 0 } else { 1 };
        if out.len() + sep_len + name.len() > EVENT_STRING_MAXLEN {
            break;
        }
        if !first {
            let _ = out.push('|');
        }
        let _ = out.push_str(name);
        first = false;
    }
    out
}

/// Connector-side fault classification, mirrors `connector_error_t`.
/// `EmergencyStop` is distinct from `EvseSide` even though both route
/// through the safety supervisor: an `EmergencyStopEntry` failure is
/// tagged `EmergencyStop`, any other safety entry failure is `EvseSide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorError {
    None,
    EvSide,
    EvseSide,
    EmergencyStop,
}

impl From<SafetyStatus> for ConnectorError {
    fn from(status: SafetyStatus) -> Self {
        match status {
            SafetyStatus::Ok | SafetyStatus::Unknown => ConnectorError::None,
            SafetyStatus::EmergencyStop => ConnectorError::EmergencyStop,
            SafetyStatus::AbnormalFrequency | SafetyStatus::SamplingError | SafetyStatus::Stale => {
                ConnectorError::EvseSide
            }
        }
    }
}

/// Immutable-after-init connector parameters, mirrors `connector_param`.
#[derive(Debug, Clone)]
pub struct ConnectorParams {
    /// Assigned by the charger on `attach`; `0` until attached.
    pub id: u8,
    pub max_output_current_ma: u32,
    pub min_output_current_ma: u32,
    pub input_frequency: i16,
    pub name: heapless::String<32>,
    pub priority: i32,
    pub ev_response_timeout_ms: u64,
}

impl From<&crate::config::ConnectorConfig> for ConnectorParams {
    fn from(cfg: &crate::config::ConnectorConfig) -> Self {
        Self {
            id: 0,
            max_output_current_ma: cfg.max_output_current_ma,
            min_output_current_ma: cfg.min_output_current_ma,
            input_frequency: cfg.input_frequency,
            name: cfg.name.clone(),
            priority: cfg.priority,
            ev_response_timeout_ms: cfg.ev_response_timeout_secs * 1_000,
        }
    }
}

/// Overlay states for the session-governed flavor (§4.1), mirrors
/// `ocpp_connector_state_t`. Mapped back to a raw [`PilotState`] for the
/// pilot driver by [`OverlayState::pilot_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Booting,
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl OverlayState {
    /// Maps each overlay state back to the raw IEC state the pilot
    /// driver is commanded into.
    ///
    /// `Reserved` is a resolved Open Question (DESIGN.md): unlike the
    /// original firmware's `ocpp_connector_map_state_to_common` (which
    /// maps `Reserved -> F`), this crate keeps the pilot at `A` for a
    /// reservation — forcing the CP line to `F` would block even a
    /// passerby from seeing the connector is simply reserved, which is a
    /// policy refusal, not an EVSE-unavailable fault.
    pub fn pilot_state(self) -> PilotState {
        match self {
            OverlayState::Booting => PilotState::E,
            OverlayState::Available | OverlayState::Reserved => PilotState::A,
            OverlayState::Preparing | OverlayState::SuspendedEV | OverlayState::Finishing => {
                PilotState::B
            }
            OverlayState::Charging => PilotState::C,
            OverlayState::SuspendedEVSE | OverlayState::Unavailable | OverlayState::Faulted => {
                PilotState::F
            }
        }
    }
}

/// Per-connector leaky-bucket log rate limiter (§4.6): capacity 10,
/// leak 2 tokens/s. Grounded on the teacher's `burster::TokenBucket`
/// usage (`src/rpc/auth.rs`); driven by an explicit `now_ms` tick
/// (rather than the teacher's global wall-clock fn pointer) to match the
/// explicit-time discipline the rest of the tick loop uses (metering,
/// frequency safety entry).
pub struct LogRateLimiter {
    tokens: f32,
    capacity: f32,
    leak_per_sec: f32,
    last_tick_ms: u64,
    dropped: u32,
}

impl LogRateLimiter {
    pub const CAPACITY: u32 = 10;
    pub const LEAK_PER_SEC: u32 = 2;

    pub fn new() -> Self {
        Self {
            tokens: Self::CAPACITY as f32,
            capacity: Self::CAPACITY as f32,
            leak_per_sec: Self::LEAK_PER_SEC as f32,
            last_tick_ms: 0,
            dropped: 0,
        }
    }

    /// Acquire one token at `now_ms`. Returns `true` if the log site may
    /// fire, `false` if it should drop the message.
    pub fn allow(&mut self, now_ms: u64) -> bool {
        let elapsed_ms = now_ms.saturating_sub(self.last_tick_ms);
        self.last_tick_ms = now_ms;
        self.tokens = (self.tokens + elapsed_ms as f32 / 1000.0 * self.leak_per_sec)
            .min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Count of log sites suppressed by this limiter since creation
    /// (diagnostics telemetry).
    pub fn dropped_count(&self) -> u32 {
        self.dropped
    }
}

impl Default for LogRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

enum FsmKind {
    FreeVend(PilotState),
    Session {
        state: OverlayState,
        session: AuthSession,
        cadence: MeteringCadence,
    },
}

/// One outlet's full runtime state: capability objects, safety registry,
/// FSM state, and the bookkeeping the tick loop needs (§3 "Connector
/// runtime state").
pub struct Connector {
    pub params: ConnectorParams,
    pilot: Box<dyn Pilot>,
    metering: MeteringFacade<Box<dyn Metering>>,
    sampled_interval_secs: u64,
    clock_aligned_interval_secs: u64,
    last_meter_snapshot: Option<MeterSnapshot>,
    safety: SafetySupervisor,
    persistence: Box<dyn crate::persistence::EnergyPersistence>,
    fsm: FsmKind,
    time_last_state_change_ms: u64,
    error: ConnectorError,
    enabled: bool,
    reserved: bool,
    log_limiter: LogRateLimiter,
}

impl Connector {
    /// Build a free-vend connector: charging starts as soon as the pilot
    /// reaches C/D, with no authentication gate.
    pub fn new_free_vend(
        params: ConnectorParams,
        pilot: Box<dyn Pilot>,
        metering: Box<dyn Metering>,
        metering_config: crate::config::MeteringConfig,
        initial_energy: MeteringEnergy,
        safety: SafetySupervisor,
        persistence: Box<dyn crate::persistence::EnergyPersistence>,
    ) -> Self {
        Self {
            params,
            pilot,
            sampled_interval_secs: metering_config.sampled_interval_secs,
            clock_aligned_interval_secs: metering_config.clock_aligned_interval_secs,
            last_meter_snapshot: None,
            metering: MeteringFacade::new(metering, metering_config, initial_energy),
            safety,
            persistence,
            fsm: FsmKind::FreeVend(PilotState::E),
            time_last_state_change_ms: 0,
            error: ConnectorError::None,
            enabled: false,
            reserved: false,
            log_limiter: LogRateLimiter::new(),
        }
    }

    /// Build a session-governed connector: transitions additionally gate
    /// on an authentication session (§4.1 "Session-governed overlay").
    pub fn new_session_governed(
        params: ConnectorParams,
        pilot: Box<dyn Pilot>,
        metering: Box<dyn Metering>,
        metering_config: crate::config::MeteringConfig,
        initial_energy: MeteringEnergy,
        safety: SafetySupervisor,
        persistence: Box<dyn crate::persistence::EnergyPersistence>,
    ) -> Self {
        Self {
            params,
            pilot,
            sampled_interval_secs: metering_config.sampled_interval_secs,
            clock_aligned_interval_secs: metering_config.clock_aligned_interval_secs,
            last_meter_snapshot: None,
            metering: MeteringFacade::new(metering, metering_config, initial_energy),
            safety,
            persistence,
            fsm: FsmKind::Session {
                state: OverlayState::Booting,
                session: AuthSession::new(),
                cadence: MeteringCadence::new(),
            },
            time_last_state_change_ms: 0,
            error: ConnectorError::None,
            enabled: false,
            reserved: false,
            log_limiter: LogRateLimiter::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.params.id
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    pub fn priority(&self) -> i32 {
        self.params.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    pub fn set_reserved(&mut self, reserved: bool) {
        self.reserved = reserved;
    }

    pub fn error(&self) -> ConnectorError {
        self.error
    }

    /// Current raw IEC pilot state, whichever flavor this connector is.
    pub fn pilot_state(&self) -> PilotState {
        match &self.fsm {
            FsmKind::FreeVend(s) => *s,
            FsmKind::Session { state, .. } => state.pilot_state(),
            // (Booting maps to E above.)
        }
    }

    /// `true` once `process()` would consider the connector selectable
    /// by `Charger::get_available` (enabled, not reserved, pilot idle).
    pub fn is_available(&self) -> bool {
        self.enabled && !self.reserved && self.pilot_state() == PilotState::A
    }

    pub fn energy(&self) -> MeteringEnergy {
        self.metering.energy()
    }

    /// Messages this connector's log site has suppressed so far
    /// (diagnostics telemetry; §4.6 leaky-bucket).
    pub fn log_drop_count(&self) -> u32 {
        self.log_limiter.dropped_count()
    }

    /// Most recent meter snapshot taken at a sampled or clock-aligned
    /// cadence boundary during an active transaction, if any has fired
    /// yet. `None` on a free-vend connector (no transaction to cadence
    /// against).
    pub fn latest_meter_snapshot(&self) -> Option<MeterSnapshot> {
        self.last_meter_snapshot
    }

    pub fn session(&self) -> Option<&AuthSession> {
        match &self.fsm {
            FsmKind::Session { session, .. } => Some(session),
            FsmKind::FreeVend(_) => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut AuthSession> {
        match &mut self.fsm {
            FsmKind::Session { session, .. } => Some(session),
            FsmKind::FreeVend(_) => None,
        }
    }

    /// Enable the connector. `E -> A` (free-vend) or `Booting ->
    /// Available` (session-governed), emitting `ENABLED`.
    pub fn enable(&mut self) -> Result<ConnectorEvent> {
        self.enabled = true;
        match &mut self.fsm {
            FsmKind::FreeVend(state) => {
                if *state == PilotState::E {
                    *state = PilotState::A;
                    self.pilot.set_current(0);
                }
            }
            FsmKind::Session { state, .. } => {
                if matches!(*state, OverlayState::Booting | OverlayState::Unavailable) {
                    *state = OverlayState::Available;
                    self.pilot.set_current(0);
                }
            }
        }
        Ok(ConnectorEvent::ENABLED)
    }

    /// Disable the connector: forces the pilot unavailable regardless of
    /// flavor (mirrors `connector_disable`).
    pub fn disable(&mut self) -> Result<()> {
        self.enabled = false;
        if self.pilot.is_supplying_power() {
            self.pilot.stop_power_supply();
        }
        self.pilot.set_state_f();
        match &mut self.fsm {
            FsmKind::FreeVend(state) => *state = PilotState::F,
            FsmKind::Session { state, .. } => *state = OverlayState::Unavailable,
        }
        Ok(())
    }

    /// Remote-start a transaction on a session-governed connector that is
    /// currently `Available` (§8 scenario 4): establishes the session
    /// immediately (pre-auth disabled — no trial/accept round trip),
    /// records `transaction_id`, and moves the connector to `Preparing`
    /// before the EV has even plugged in, emitting `OCCUPIED` rather than
    /// `PLUGGED` (that bit is reserved for the physical-plug path).
    /// `Err(Busy)` if not currently `Available`; `Err(Unsupported)` on a
    /// free-vend connector (it has no session to establish).
    pub fn remote_start(
        &mut self,
        now_ms: u64,
        transaction_id: u64,
        uid: crate::session::Uid,
    ) -> Result<ConnectorEvent> {
        match &mut self.fsm {
            FsmKind::Session { state, session, .. } => {
                if *state != OverlayState::Available {
                    return Err(Error::Busy);
                }
                session.accept(uid, None, 0);
                session.transaction_id = Some(transaction_id);
                *state = OverlayState::Preparing;
                self.time_last_state_change_ms = now_ms;
                Ok(ConnectorEvent::OCCUPIED)
            }
            FsmKind::FreeVend(_) => Err(Error::Unsupported),
        }
    }

    /// Request a remote stop of the transaction identified by
    /// `transaction_id` (§8 scenario 4). Takes effect on the next
    /// `process()` tick, which forces `Charging`/`SuspendedEV` to
    /// `Finishing` regardless of the pilot reading. `Err(NotFound)` if
    /// `transaction_id` does not match the active session.
    pub fn remote_stop(&mut self, transaction_id: u64) -> Result<()> {
        match &mut self.fsm {
            FsmKind::Session { session, .. } => {
                if session.transaction_id != Some(transaction_id) {
                    return Err(Error::NotFound);
                }
                session.remote_stop_requested = true;
                Ok(())
            }
            FsmKind::FreeVend(_) => Err(Error::Unsupported),
        }
    }

    /// Run one tick: metering step, safety check, pilot read, FSM
    /// transition, side effects, and return the event bitset produced
    /// (possibly empty — the caller should not enqueue an empty bitset,
    /// see §8).
    pub fn process(&mut self, now_ms: u64) -> Result<ConnectorEvent> {
        if !self.enabled {
            return Ok(ConnectorEvent::empty());
        }

        let persistence = &mut self.persistence;
        self.metering
            .step(now_ms, |energy| persistence.save_energy(energy));

        let mut worst_status = SafetyStatus::Ok;
        self.safety.check_at(now_ms, |_entry, status| {
            // EmergencyStop always takes precedence in the reported
            // fault classification; otherwise keep the first failure.
            if worst_status == SafetyStatus::Ok || status == SafetyStatus::EmergencyStop {
                worst_status = status;
            }
        });
        let safety_ok = worst_status == SafetyStatus::Ok;

        let pilot_state = self.pilot.read_state();
        let elapsed_ms = now_ms.saturating_sub(self.time_last_state_change_ms);

        let transition = match &self.fsm {
            FsmKind::FreeVend(state) => {
                let inputs = fsm::TickInputs {
                    pilot_state,
                    safety_ok,
                    safety_status: worst_status,
                    elapsed_since_state_change_ms: elapsed_ms,
                    ev_response_timeout_ms: self.params.ev_response_timeout_ms,
                    max_output_current_ma: self.params.max_output_current_ma,
                };
                fsm::TransitionResult::FreeVend(fsm::free_vend_transition(*state, &inputs))
            }
            FsmKind::Session {
                state, session, ..
            } => {
                let inputs = fsm::SessionTickInputs {
                    base: fsm::TickInputs {
                        pilot_state,
                        safety_ok,
                        safety_status: worst_status,
                        elapsed_since_state_change_ms: elapsed_ms,
                        ev_response_timeout_ms: self.params.ev_response_timeout_ms,
                        max_output_current_ma: self.params.max_output_current_ma,
                    },
                    session_established: session.is_active(now_ms / 1000),
                    reserved: self.reserved,
                    uid_authorized_for_reservation: true,
                    remote_stop_requested: session.remote_stop_requested,
                };
                fsm::TransitionResult::Session(fsm::session_transition(*state, &inputs))
            }
        };

        let (mut events, error, effects, state_changed) = match transition {
            fsm::TransitionResult::FreeVend(t) => {
                let changed = match &mut self.fsm {
                    FsmKind::FreeVend(state) => {
                        let changed = *state != t.next;
                        *state = t.next;
                        changed
                    }
                    FsmKind::Session { .. } => unreachable!(),
                };
                (t.events, t.error, t.effects, changed)
            }
            fsm::TransitionResult::Session(t) => {
                let changed = match &mut self.fsm {
                    FsmKind::Session { state, session, .. } => {
                        let changed = *state != t.next;
                        if t.clear_session {
                            session.clear();
                        }
                        *state = t.next;
                        changed
                    }
                    FsmKind::FreeVend(_) => unreachable!(),
                };
                (t.events, t.error, t.effects, changed)
            }
        };

        self.apply_effects(&effects);
        self.error = error;
        if state_changed {
            self.time_last_state_change_ms = now_ms;
        }

        if let FsmKind::Session { session, cadence, .. } = &mut self.fsm {
            if session.is_transaction_started() {
                let now_secs = now_ms / 1_000;
                let sampled_due = cadence.sampled_due(now_secs, self.sampled_interval_secs);
                let clock_due =
                    cadence.clock_aligned_due(now_secs, self.clock_aligned_interval_secs);
                if sampled_due || clock_due {
                    let context = if clock_due {
                        SampleContext::SampleClock
                    } else {
                        SampleContext::SamplePeriodic
                    };
                    let (watt, _var) = self.metering.device().get_power().unwrap_or((0, 0));
                    self.last_meter_snapshot = Some(MeterSnapshot {
                        context,
                        wh: self.metering.energy().wh,
                        watt,
                        milliamp: self.metering.device().get_current_ma().unwrap_or(0),
                        millivolt: self.metering.device().get_voltage_mv().unwrap_or(0),
                        power_factor_centi: self
                            .metering
                            .device()
                            .get_power_factor_centi()
                            .unwrap_or(0),
                        frequency_chz: self.metering.device().get_frequency_chz().unwrap_or(0),
                    });
                    events |= ConnectorEvent::BILLING_REALTIME;
                }
            } else {
                self.last_meter_snapshot = None;
            }
        }

        if !events.is_empty() && self.log_limiter.allow(now_ms) {
            log::debug!(
                "connector[{}] {} -> {:?} events={:?}",
                self.params.id,
                self.params.name,
                self.pilot_state(),
                events
            );
        }

        Ok(events)
    }

    fn apply_effects(&mut self, effects: &[SideEffect]) {
        for effect in effects {
            match *effect {
                SideEffect::RequestCurrent(ma) => self.pilot.set_current(ma),
                SideEffect::CloseContactor => self.pilot.start_power_supply(),
                SideEffect::OpenContactor => {
                    if self.pilot.is_supplying_power() {
                        self.pilot.stop_power_supply();
                    }
                }
                SideEffect::ForceStateF => self.pilot.set_state_f(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectorConfig, MeteringConfig};
    use crate::metering::SimulatedMetering;
    use crate::persistence::SimulatedEnergyStore;

    #[test]
    fn format_event_lists_bits_in_declaration_order() {
        let combo = ConnectorEvent::CHARGING_ENDED | ConnectorEvent::ERROR;
        assert_eq!(format_event(combo).as_str(), "CHARGING_ENDED|ERROR");
    }

    #[test]
    fn format_event_empty_is_empty_string() {
        assert_eq!(format_event(ConnectorEvent::empty()).as_str(), "");
    }

    #[test]
    fn plug_charge_unplug_scenario() {
        // Scenario 1 (§8): A -> B -> C -> A, driven via a pilot double
        // whose `read_state` we control by swapping in a new StubPilot
        // per step through a thin wrapper.
        struct Seq {
            states: std::vec::Vec<PilotState>,
            idx: usize,
            duty_target_ma: u32,
            contactor_closed: bool,
        }
        impl Pilot for Seq {
            fn read_state(&mut self) -> PilotState {
                let s = self.states[self.idx.min(self.states.len() - 1)];
                if self.idx < self.states.len() - 1 {
                    self.idx += 1;
                }
                s
            }
            fn get_duty(&self) -> u8 {
                0
            }
            fn get_target_duty(&self) -> u8 {
                0
            }
            fn set_current(&mut self, ma: u32) {
                self.duty_target_ma = ma;
            }
            fn start_power_supply(&mut self) {
                self.contactor_closed = true;
            }
            fn stop_power_supply(&mut self) {
                self.contactor_closed = false;
            }
            fn is_supplying_power(&self) -> bool {
                self.contactor_closed
            }
            fn set_state_f(&mut self) {}
        }

        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_free_vend(
            params,
            Box::new(Seq {
                states: vec![
                    PilotState::A,
                    PilotState::A,
                    PilotState::B,
                    PilotState::B,
                    PilotState::C,
                    PilotState::C,
                    PilotState::A,
                ],
                idx: 0,
                duty_target_ma: 0,
                contactor_closed: false,
            }),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();

        let mut now = 0u64;
        let mut all_events = Vec::new();
        for _ in 0..7 {
            now += 100;
            let e = connector.process(now).unwrap();
            if !e.is_empty() {
                all_events.push(e);
            }
        }

        assert!(all_events.iter().any(|e| e.contains(ConnectorEvent::PLUGGED)));
        assert!(all_events
            .iter()
            .any(|e| e.contains(ConnectorEvent::CHARGING_STARTED)));
        assert!(all_events
            .iter()
            .any(|e| e.contains(ConnectorEvent::CHARGING_ENDED)));
        assert_eq!(connector.pilot_state(), PilotState::A);
    }

    #[test]
    fn direct_a_to_c_without_b_forces_f_ev_side() {
        struct Jump {
            first: bool,
        }
        impl Pilot for Jump {
            fn read_state(&mut self) -> PilotState {
                if self.first {
                    self.first = false;
                    PilotState::A
                } else {
                    PilotState::C
                }
            }
            fn get_duty(&self) -> u8 {
                0
            }
            fn get_target_duty(&self) -> u8 {
                0
            }
            fn set_current(&mut self, _ma: u32) {}
            fn start_power_supply(&mut self) {}
            fn stop_power_supply(&mut self) {}
            fn is_supplying_power(&self) -> bool {
                false
            }
            fn set_state_f(&mut self) {}
        }

        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_free_vend(
            params,
            Box::new(Jump { first: true }),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        connector.process(0).unwrap();
        let events = connector.process(1_000).unwrap();

        assert_eq!(connector.pilot_state(), PilotState::F);
        assert_eq!(connector.error(), ConnectorError::EvSide);
        assert!(events.contains(ConnectorEvent::ERROR));
    }

    #[test]
    fn f_does_not_exit_before_timeout_even_if_safety_ok() {
        struct AlwaysA;
        impl Pilot for AlwaysA {
            fn read_state(&mut self) -> PilotState {
                PilotState::A
            }
            fn get_duty(&self) -> u8 {
                0
            }
            fn get_target_duty(&self) -> u8 {
                0
            }
            fn set_current(&mut self, _ma: u32) {}
            fn start_power_supply(&mut self) {}
            fn stop_power_supply(&mut self) {}
            fn is_supplying_power(&self) -> bool {
                false
            }
            fn set_state_f(&mut self) {}
        }

        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_free_vend(
            params,
            Box::new(AlwaysA),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        connector.disable().unwrap();
        // `disable` forces state F directly but also clears `enabled`;
        // re-enable to resume ticking while state is still F.
        connector.enabled = true;

        let events_before_timeout = connector.process(2_000).unwrap();
        assert_eq!(connector.pilot_state(), PilotState::F);
        assert!(!events_before_timeout.contains(ConnectorEvent::ERROR_RECOVERY));

        let events_after_timeout = connector.process(5_001).unwrap();
        assert_eq!(connector.pilot_state(), PilotState::A);
        assert!(events_after_timeout.contains(ConnectorEvent::ERROR_RECOVERY));
    }

    #[test]
    fn c_to_d_is_a_no_op() {
        // Supplemented scenario 8 (SPEC_FULL §8): pilot moving between C
        // and D mid-charge produces no events and keeps the contactor
        // closed.
        struct ChargingThenVentilation {
            calls: u32,
        }
        impl Pilot for ChargingThenVentilation {
            fn read_state(&mut self) -> PilotState {
                self.calls += 1;
                match self.calls {
                    1 => PilotState::B,
                    2 => PilotState::C,
                    3 => PilotState::D,
                    _ => PilotState::D,
                }
            }
            fn get_duty(&self) -> u8 {
                0
            }
            fn get_target_duty(&self) -> u8 {
                0
            }
            fn set_current(&mut self, _ma: u32) {}
            fn start_power_supply(&mut self) {}
            fn stop_power_supply(&mut self) {}
            fn is_supplying_power(&self) -> bool {
                true
            }
            fn set_state_f(&mut self) {}
        }

        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_free_vend(
            params,
            Box::new(ChargingThenVentilation { calls: 0 }),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        connector.process(0).unwrap(); // B
        connector.process(100).unwrap(); // C, ChargingStarted
        let events = connector.process(200).unwrap(); // D, no-op
        assert!(events.is_empty());
        assert_eq!(connector.pilot_state(), PilotState::D);
    }

    #[test]
    fn remote_start_then_remote_stop_scenario() {
        // Scenario 4 (spec.md §8): remote_start picks an available
        // connector, moves it to Preparing and emits Occupied ahead of
        // the physical plug; reaching C then emits ChargingStarted plus
        // BillingStarted; remote_stop forces Finishing without waiting
        // for an unplug, emitting BillingEnded plus ChargingEnded.
        struct AlwaysC;
        impl Pilot for AlwaysC {
            fn read_state(&mut self) -> PilotState {
                PilotState::C
            }
            fn get_duty(&self) -> u8 {
                0
            }
            fn get_target_duty(&self) -> u8 {
                0
            }
            fn set_current(&mut self, _ma: u32) {}
            fn start_power_supply(&mut self) {}
            fn stop_power_supply(&mut self) {}
            fn is_supplying_power(&self) -> bool {
                true
            }
            fn set_state_f(&mut self) {}
        }

        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_session_governed(
            params,
            Box::new(AlwaysC),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();

        let occupied = connector
            .remote_start(0, 42, crate::session::Uid::try_from("remote").unwrap())
            .unwrap();
        assert_eq!(occupied, ConnectorEvent::OCCUPIED);
        assert!(connector.session().unwrap().is_established());

        let events = connector.process(100).unwrap();
        assert!(events.contains(ConnectorEvent::CHARGING_STARTED));
        assert!(events.contains(ConnectorEvent::BILLING_STARTED));

        connector.remote_stop(42).unwrap();
        let events = connector.process(200).unwrap();
        assert!(events.contains(ConnectorEvent::BILLING_ENDED));
        assert!(events.contains(ConnectorEvent::CHARGING_ENDED));
        assert!(!events.contains(ConnectorEvent::UNPLUGGED));
    }

    #[test]
    fn remote_start_rejects_wrong_transaction_id_on_stop() {
        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut connector = Connector::new_session_governed(
            params,
            Box::new(crate::pilot::SimulatedPilot::new()),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        connector
            .remote_start(0, 42, crate::session::Uid::try_from("remote").unwrap())
            .unwrap();
        assert_eq!(
            connector.remote_stop(7).unwrap_err(),
            crate::error::Error::NotFound
        );
    }

    #[test]
    fn sampled_cadence_emits_billing_realtime_during_transaction() {
        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut pilot = crate::pilot::SimulatedPilot::new();
        pilot.force_state(PilotState::C);
        let mut metering_config = MeteringConfig::default();
        metering_config.sampled_interval_secs = 1;
        metering_config.clock_aligned_interval_secs = 0;
        let mut connector = Connector::new_session_governed(
            params,
            Box::new(pilot),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            metering_config,
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        connector
            .remote_start(0, 1, crate::session::Uid::try_from("remote").unwrap())
            .unwrap();
        assert!(connector.latest_meter_snapshot().is_none());

        let events = connector.process(2_000).unwrap();
        assert!(events.contains(ConnectorEvent::BILLING_REALTIME));
        let snapshot = connector.latest_meter_snapshot().unwrap();
        assert_eq!(snapshot.context, crate::session::SampleContext::SamplePeriodic);
    }

    #[test]
    fn no_meter_snapshot_without_an_active_transaction() {
        let params = ConnectorParams::from(&ConnectorConfig::default());
        let mut metering_config = MeteringConfig::default();
        metering_config.sampled_interval_secs = 1;
        let mut connector = Connector::new_session_governed(
            params,
            Box::new(crate::pilot::SimulatedPilot::new()),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            metering_config,
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            Box::new(SimulatedEnergyStore::new()),
        );
        connector.enable().unwrap();
        let events = connector.process(5_000).unwrap();
        assert!(!events.contains(ConnectorEvent::BILLING_REALTIME));
        assert!(connector.latest_meter_snapshot().is_none());
    }
}
