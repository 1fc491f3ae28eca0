//! Pure transition functions for both connector flavors.
//!
//! Each function takes the current tagged state plus a snapshot of this
//! tick's inputs and returns the next state, the side effects the caller
//! must apply (in order), and the event bitset to publish. No I/O, no
//! time reads — callers own the clock and the capability objects, which
//! is what makes these table-testable (distilled spec §9 design note).

use super::{ConnectorError, ConnectorEvent, OverlayState};
use crate::pilot::PilotState;
use crate::safety::SafetyStatus;

/// Ordered action the caller must apply after a transition is computed.
/// Order matters: closing a contactor without first committing to the
/// requested current, or opening it without first tearing down the duty
/// cycle, both violate the distilled spec's ordering guarantee (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Commit a new maximum offered current, in mA. `0` is the sentinel
    /// for "idle, no current offered" (state A duty).
    RequestCurrent(u32),
    CloseContactor,
    OpenContactor,
    ForceStateF,
}

pub const MAX_EFFECTS: usize = 3;
pub type Effects = heapless::Vec<SideEffect, MAX_EFFECTS>;

/// Per-tick snapshot shared by both FSM flavors.
pub struct TickInputs {
    pub pilot_state: PilotState,
    pub safety_ok: bool,
    pub safety_status: SafetyStatus,
    pub elapsed_since_state_change_ms: u64,
    pub ev_response_timeout_ms: u64,
    pub max_output_current_ma: u32,
}

/// Additional inputs the session-governed overlay needs on top of
/// [`TickInputs`].
pub struct SessionTickInputs {
    pub base: TickInputs,
    pub session_established: bool,
    pub reserved: bool,
    pub uid_authorized_for_reservation: bool,
    /// Set once `Connector::remote_stop` has been called for the active
    /// transaction; forces `Charging`/`SuspendedEV` to `Finishing` this
    /// tick regardless of what the pilot reads (§8 scenario 4).
    pub remote_stop_requested: bool,
}

pub struct FreeVendTransition {
    pub next: PilotState,
    pub effects: Effects,
    pub events: ConnectorEvent,
    pub error: ConnectorError,
}

pub struct SessionTransition {
    pub next: OverlayState,
    pub clear_session: bool,
    pub effects: Effects,
    pub events: ConnectorEvent,
    pub error: ConnectorError,
}

pub enum TransitionResult {
    FreeVend(FreeVendTransition),
    Session(SessionTransition),
}

/// Free-vend transition table (§4.1). Safety failure always wins and
/// forces `F` regardless of what the pilot reads this tick (P5); `F`
/// cannot be left before [`TickInputs::ev_response_timeout_ms`] has
/// elapsed even once safety recovers (§8 boundary behavior). Moving
/// between `C` and `D` while already charging is a no-op: no event, no
/// contactor or duty change (§8 scenario 8).
pub fn free_vend_transition(current: PilotState, inputs: &TickInputs) -> FreeVendTransition {
    let mut effects = Effects::new();
    let mut events = ConnectorEvent::empty();
    let mut error = ConnectorError::None;

    if !inputs.safety_ok {
        if current != PilotState::F {
            if matches!(current, PilotState::C | PilotState::D) {
                let _ = effects.push(SideEffect::OpenContactor);
            }
            let _ = effects.push(SideEffect::ForceStateF);
            events |= ConnectorEvent::ERROR;
            error = ConnectorError::from(inputs.safety_status);
        }
        return FreeVendTransition {
            next: PilotState::F,
            effects,
            events,
            error,
        };
    }

    let next = match current {
        PilotState::F => {
            if inputs.elapsed_since_state_change_ms >= inputs.ev_response_timeout_ms {
                let _ = effects.push(SideEffect::RequestCurrent(0));
                events |= ConnectorEvent::ERROR_RECOVERY;
                inputs.pilot_state
            } else {
                PilotState::F
            }
        }
        PilotState::E => inputs.pilot_state,
        PilotState::A => match inputs.pilot_state {
            PilotState::A => PilotState::A,
            PilotState::B => {
                events |= ConnectorEvent::PLUGGED;
                PilotState::B
            }
            PilotState::C | PilotState::D => {
                let _ = effects.push(SideEffect::ForceStateF);
                events |= ConnectorEvent::ERROR;
                error = ConnectorError::EvSide;
                PilotState::F
            }
            other => other,
        },
        PilotState::B => match inputs.pilot_state {
            PilotState::B => PilotState::B,
            PilotState::A => {
                events |= ConnectorEvent::UNPLUGGED;
                PilotState::A
            }
            PilotState::C | PilotState::D => {
                let _ = effects.push(SideEffect::RequestCurrent(inputs.max_output_current_ma));
                let _ = effects.push(SideEffect::CloseContactor);
                events |= ConnectorEvent::CHARGING_STARTED;
                inputs.pilot_state
            }
            other => other,
        },
        PilotState::C | PilotState::D => match inputs.pilot_state {
            PilotState::C | PilotState::D => inputs.pilot_state,
            PilotState::B => {
                let _ = effects.push(SideEffect::OpenContactor);
                let _ = effects.push(SideEffect::RequestCurrent(0));
                events |= ConnectorEvent::CHARGING_SUSPENDED;
                PilotState::B
            }
            PilotState::A => {
                let _ = effects.push(SideEffect::OpenContactor);
                let _ = effects.push(SideEffect::RequestCurrent(0));
                events |= ConnectorEvent::CHARGING_ENDED | ConnectorEvent::UNPLUGGED;
                PilotState::A
            }
            other => {
                let _ = effects.push(SideEffect::OpenContactor);
                let _ = effects.push(SideEffect::RequestCurrent(0));
                events |= ConnectorEvent::CHARGING_ENDED;
                other
            }
        },
    };

    FreeVendTransition {
        next,
        effects,
        events,
        error,
    }
}

/// Session-governed transition table, grounded on
/// `ocpp_connector_map_state_to_common` and the surrounding state-machine
/// logic in `ocpp_connector_internal.c`. Adds an authentication gate
/// between `Preparing` and `Charging`; otherwise follows the same
/// safety-wins and no-op-between-C-and-D rules as the free-vend flavor.
pub fn session_transition(current: OverlayState, inputs: &SessionTickInputs) -> SessionTransition {
    let base = &inputs.base;
    let mut effects = Effects::new();
    let mut events = ConnectorEvent::empty();
    let mut error = ConnectorError::None;

    if !base.safety_ok {
        if current != OverlayState::Faulted {
            if matches!(current, OverlayState::Charging | OverlayState::SuspendedEV) {
                let _ = effects.push(SideEffect::OpenContactor);
            }
            let _ = effects.push(SideEffect::ForceStateF);
            events |= ConnectorEvent::ERROR;
            error = ConnectorError::from(base.safety_status);
        }
        return SessionTransition {
            next: OverlayState::Faulted,
            clear_session: false,
            effects,
            events,
            error,
        };
    }

    let next = match current {
        OverlayState::Faulted => {
            if base.elapsed_since_state_change_ms >= base.ev_response_timeout_ms {
                events |= ConnectorEvent::ERROR_RECOVERY;
                OverlayState::Available
            } else {
                OverlayState::Faulted
            }
        }
        OverlayState::Booting => OverlayState::Booting,
        OverlayState::Unavailable => OverlayState::Unavailable,
        OverlayState::Available => match base.pilot_state {
            PilotState::B => {
                events |= ConnectorEvent::PLUGGED;
                OverlayState::Preparing
            }
            _ => OverlayState::Available,
        },
        OverlayState::Reserved => match base.pilot_state {
            PilotState::B if inputs.uid_authorized_for_reservation => {
                events |= ConnectorEvent::PLUGGED;
                OverlayState::Preparing
            }
            _ => OverlayState::Reserved,
        },
        OverlayState::Preparing => match base.pilot_state {
            PilotState::A => {
                events |= ConnectorEvent::UNPLUGGED | ConnectorEvent::UNOCCUPIED;
                return SessionTransition {
                    next: OverlayState::Available,
                    clear_session: true,
                    effects,
                    events,
                    error,
                };
            }
            PilotState::C | PilotState::D if inputs.session_established => {
                let _ = effects.push(SideEffect::RequestCurrent(base.max_output_current_ma));
                let _ = effects.push(SideEffect::CloseContactor);
                events |= ConnectorEvent::CHARGING_STARTED | ConnectorEvent::BILLING_STARTED;
                OverlayState::Charging
            }
            PilotState::C | PilotState::D => {
                events |= ConnectorEvent::AUTH_REJECTED;
                OverlayState::Preparing
            }
            _ => OverlayState::Preparing,
        },
        OverlayState::Charging if inputs.remote_stop_requested => {
            let _ = effects.push(SideEffect::OpenContactor);
            let _ = effects.push(SideEffect::RequestCurrent(0));
            events |= ConnectorEvent::CHARGING_ENDED | ConnectorEvent::BILLING_ENDED;
            OverlayState::Finishing
        }
        OverlayState::Charging => {
            match base.pilot_state {
                PilotState::C | PilotState::D => OverlayState::Charging,
                PilotState::B => {
                    let _ = effects.push(SideEffect::OpenContactor);
                    let _ = effects.push(SideEffect::RequestCurrent(0));
                    events |= ConnectorEvent::CHARGING_SUSPENDED;
                    OverlayState::SuspendedEV
                }
                PilotState::A => {
                    let _ = effects.push(SideEffect::OpenContactor);
                    let _ = effects.push(SideEffect::RequestCurrent(0));
                    events |= ConnectorEvent::CHARGING_ENDED
                        | ConnectorEvent::UNPLUGGED
                        | ConnectorEvent::BILLING_ENDED;
                    OverlayState::Finishing
                }
                _ => {
                    let _ = effects.push(SideEffect::OpenContactor);
                    let _ = effects.push(SideEffect::RequestCurrent(0));
                    events |= ConnectorEvent::CHARGING_ENDED | ConnectorEvent::BILLING_ENDED;
                    OverlayState::Finishing
                }
            }
        }
        OverlayState::SuspendedEV if inputs.remote_stop_requested => {
            events |= ConnectorEvent::CHARGING_ENDED | ConnectorEvent::BILLING_ENDED;
            OverlayState::Finishing
        }
        OverlayState::SuspendedEV => match base.pilot_state {
            PilotState::C | PilotState::D => {
                let _ = effects.push(SideEffect::RequestCurrent(base.max_output_current_ma));
                let _ = effects.push(SideEffect::CloseContactor);
                OverlayState::Charging
            }
            PilotState::A => {
                events |= ConnectorEvent::UNPLUGGED | ConnectorEvent::BILLING_ENDED;
                OverlayState::Finishing
            }
            _ => OverlayState::SuspendedEV,
        },
        OverlayState::SuspendedEVSE => OverlayState::SuspendedEVSE,
        OverlayState::Finishing => match base.pilot_state {
            PilotState::A => {
                events |= ConnectorEvent::UNOCCUPIED;
                return SessionTransition {
                    next: OverlayState::Available,
                    clear_session: true,
                    effects,
                    events,
                    error,
                };
            }
            _ => OverlayState::Finishing,
        },
    };

    SessionTransition {
        next,
        clear_session: false,
        effects,
        events,
        error,
    }
}
