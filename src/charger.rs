//! Charger aggregate (§4.2): owns connectors, fair per-tick scheduling,
//! event fan-out to a single subscriber.
//!
//! Grounded on `original_source/include/charger/charger.h` and
//! `original_source/tests/src/charger/charger_test.cpp` for the
//! attach/detach id-monotonicity contract and `get_by_id`/`get_by_name`
//! returning `Option` rather than an error.

use crate::config::ChargerConfig;
use crate::connector::{Connector, ConnectorEvent};
use crate::error::{Error, Result};
use crate::events::EventQueue;

/// Owns an ordered, insertion-order-preserved set of connectors and
/// drives them once per tick.
pub struct Charger {
    params: ChargerConfig,
    connectors: std::vec::Vec<Connector>,
    id_counter: u8,
    event_queue: EventQueue,
    subscriber: Option<std::boxed::Box<dyn FnMut(u8, ConnectorEvent)>>,
}

impl Charger {
    /// `Invalid` if any of `max_input_current_ma`, `input_voltage`,
    /// `input_frequency` is zero (mirrors `charger_init`).
    pub fn init(params: ChargerConfig) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            connectors: std::vec::Vec::new(),
            id_counter: 0,
            event_queue: EventQueue::new(),
            subscriber: None,
        })
    }

    pub fn params(&self) -> &ChargerConfig {
        &self.params
    }

    /// Assign the next free id and take ownership of `connector`. Ids
    /// are never reissued even after `detach`.
    pub fn attach(&mut self, mut connector: Connector) -> Result<u8> {
        if self.connectors.len() >= u8::MAX as usize {
            return Err(Error::NoSpace);
        }
        self.id_counter = self.id_counter.checked_add(1).ok_or(Error::NoSpace)?;
        let id = self.id_counter;
        connector.params.id = id;
        self.connectors.push(connector);
        Ok(id)
    }

    /// Remove and return the connector with id `id`.
    pub fn detach(&mut self, id: u8) -> Result<Connector> {
        let pos = self
            .connectors
            .iter()
            .position(|c| c.id() == id)
            .ok_or(Error::NotFound)?;
        Ok(self.connectors.remove(pos))
    }

    pub fn get_by_id(&self, id: u8) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.id() == id)
    }

    pub fn get_by_id_mut(&mut self, id: u8) -> Option<&mut Connector> {
        self.connectors.iter_mut().find(|c| c.id() == id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.name() == name)
    }

    /// First enabled, unreserved connector with an idle pilot, in
    /// insertion order.
    pub fn get_available(&self) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.is_available())
    }

    /// Number of currently-attached connectors. No normative invariant
    /// of its own beyond matching `attach`/`detach` bookkeeping.
    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    pub fn subscribe(&mut self, callback: std::boxed::Box<dyn FnMut(u8, ConnectorEvent)>) {
        self.subscriber = Some(callback);
    }

    /// Remote-start a transaction (§8 scenario 4): `connector_id = 0`
    /// picks the first available connector (`get_available`), otherwise
    /// targets that id directly. Returns the id actually started.
    pub fn remote_start(
        &mut self,
        now_ms: u64,
        connector_id: u8,
        transaction_id: u64,
        uid: crate::session::Uid,
    ) -> Result<u8> {
        let id = if connector_id == 0 {
            self.get_available().map(|c| c.id()).ok_or(Error::NotFound)?
        } else {
            connector_id
        };
        let connector = self.get_by_id_mut(id).ok_or(Error::NotFound)?;
        let event = connector.remote_start(now_ms, transaction_id, uid)?;
        if !event.is_empty() {
            self.event_queue.push(id, event);
        }
        Ok(id)
    }

    /// Remote-stop the transaction identified by `transaction_id`,
    /// wherever it is running (§8 scenario 4).
    pub fn remote_stop(&mut self, transaction_id: u64) -> Result<()> {
        let connector = self
            .connectors
            .iter_mut()
            .find(|c| c.session().and_then(|s| s.transaction_id) == Some(transaction_id))
            .ok_or(Error::NotFound)?;
        connector.remote_stop(transaction_id)
    }

    /// Drive every connector once, in insertion order, then fan out any
    /// events produced to the single subscriber. The first non-`Ok`
    /// result is remembered and returned, but every connector still
    /// runs this tick (a fault on one outlet must not starve the
    /// others).
    pub fn process(&mut self, now_ms: u64) -> Result<()> {
        let mut first_err = None;
        for connector in &mut self.connectors {
            match connector.process(now_ms) {
                Ok(events) if !events.is_empty() => {
                    self.event_queue.push(connector.id(), events);
                }
                Ok(_) => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }

        if let Some(callback) = self.subscriber.as_mut() {
            self.event_queue.drain(|id, event| callback(id, event));
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Count of events dropped this run because the event queue was
    /// full (§4.5 `EventQueueOverflow`).
    pub fn event_queue_overflow_count(&self) -> u32 {
        self.event_queue.overflow_count()
    }

    /// Attached connectors, in insertion order.
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::ConnectorParams;
    use crate::metering::{MeteringEnergy, SimulatedMetering};
    use crate::persistence::SimulatedEnergyStore;
    use crate::pilot::{Pilot, PilotState};
    use crate::safety::SafetySupervisor;

    struct StubPilot(PilotState);
    impl Pilot for StubPilot {
        fn read_state(&mut self) -> PilotState {
            self.0
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

    fn new_connector(name: &str) -> Connector {
        let mut cfg = crate::config::ConnectorConfig::default();
        cfg.name = heapless::String::new();
        let _ = cfg.name.push_str(name);
        Connector::new_free_vend(
            ConnectorParams::from(&cfg),
            std::boxed::Box::new(StubPilot(PilotState::A)),
            std::boxed::Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            crate::config::MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            std::boxed::Box::new(SimulatedEnergyStore::new()),
        )
    }

    #[test]
    fn init_rejects_invalid_params() {
        let mut cfg = ChargerConfig::default();
        cfg.input_voltage = 0;
        assert_eq!(Charger::init(cfg).unwrap_err(), Error::Invalid);
    }

    #[test]
    fn attach_ids_are_monotonic_and_never_reused() {
        let mut charger = Charger::init(ChargerConfig::default()).unwrap();
        let c1 = charger.attach(new_connector("c1")).unwrap();
        let c2 = charger.attach(new_connector("c2")).unwrap();
        let c3 = charger.attach(new_connector("c3")).unwrap();
        assert_eq!((c1, c2, c3), (1, 2, 3));

        charger.detach(c2).unwrap();
        let c4 = charger.attach(new_connector("c4")).unwrap();
        assert_eq!(c4, 4);

        charger.detach(c1).unwrap();
        charger.detach(c3).unwrap();
        charger.detach(c4).unwrap();
        let c5 = charger.attach(new_connector("c5")).unwrap();
        assert_eq!(c5, 5);
        assert_eq!(charger.connector_count(), 1);
    }

    #[test]
    fn get_by_id_and_name_return_none_when_missing() {
        let charger = Charger::init(ChargerConfig::default()).unwrap();
        assert!(charger.get_by_id(1).is_none());
        assert!(charger.get_by_name("nope").is_none());
    }

    #[test]
    fn get_available_returns_first_idle_connector_in_insertion_order() {
        let mut charger = Charger::init(ChargerConfig::default()).unwrap();
        let id1 = charger.attach(new_connector("c1")).unwrap();
        let id2 = charger.attach(new_connector("c2")).unwrap();
        charger.get_by_id_mut(id1).unwrap().enable().unwrap();
        charger.get_by_id_mut(id2).unwrap().enable().unwrap();

        let available = charger.get_available().unwrap();
        assert_eq!(available.name(), "c1");
    }

    #[test]
    fn process_fans_out_events_to_subscriber_in_insertion_order() {
        let mut charger = Charger::init(ChargerConfig::default()).unwrap();
        let mut plugged = Connector::new_free_vend(
            ConnectorParams::from(&{
                let mut cfg = crate::config::ConnectorConfig::default();
                cfg.name = heapless::String::new();
                let _ = cfg.name.push_str("plugged");
                cfg
            }),
            std::boxed::Box::new(StubPilot(PilotState::B)),
            std::boxed::Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            crate::config::MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            std::boxed::Box::new(SimulatedEnergyStore::new()),
        );
        plugged.enable().unwrap();

        let id = charger.attach(plugged).unwrap();

        let seen = std::rc::Rc::new(std::cell::RefCell::new(std::vec::Vec::new()));
        let seen_clone = seen.clone();
        charger.subscribe(std::boxed::Box::new(move |cid, event| {
            seen_clone.borrow_mut().push((cid, event));
        }));

        charger.process(100).unwrap();

        let recorded = seen.borrow();
        assert!(recorded
            .iter()
            .any(|&(cid, event)| cid == id && event.contains(ConnectorEvent::PLUGGED)));
    }

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

    fn new_session_connector(name: &str) -> Connector {
        let mut cfg = crate::config::ConnectorConfig::default();
        cfg.name = heapless::String::new();
        let _ = cfg.name.push_str(name);
        Connector::new_session_governed(
            ConnectorParams::from(&cfg),
            std::boxed::Box::new(AlwaysC),
            std::boxed::Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            crate::config::MeteringConfig::default(),
            MeteringEnergy::default(),
            SafetySupervisor::new(),
            std::boxed::Box::new(SimulatedEnergyStore::new()),
        )
    }

    #[test]
    fn remote_start_picks_first_available_connector_with_id_zero() {
        let mut charger = Charger::init(ChargerConfig::default()).unwrap();
        let id1 = charger.attach(new_session_connector("c1")).unwrap();
        charger.get_by_id_mut(id1).unwrap().enable().unwrap();

        let started = charger
            .remote_start(0, 0, 42, crate::session::Uid::try_from("remote").unwrap())
            .unwrap();
        assert_eq!(started, id1);

        charger.process(100).unwrap();
        assert_eq!(
            charger.get_by_id(id1).unwrap().pilot_state(),
            PilotState::C
        );

        charger.remote_stop(42).unwrap();
        charger.process(200).unwrap();
        assert!(charger
            .get_by_id(id1)
            .unwrap()
            .session()
            .unwrap()
            .remote_stop_requested);
    }

    #[test]
    fn remote_start_with_no_available_connector_is_not_found() {
        let mut charger = Charger::init(ChargerConfig::default()).unwrap();
        assert_eq!(
            charger
                .remote_start(0, 0, 42, crate::session::Uid::try_from("remote").unwrap())
                .unwrap_err(),
            Error::NotFound
        );
    }
}
