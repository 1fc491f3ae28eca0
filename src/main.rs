//! EVSE Connector-Control Firmware — Main Entry Point
//!
//! Hexagonal architecture: the tick loop below is the only caller of
//! [`charger::Charger::process`]; every hardware dependency (pilot duty/CP
//! reading, metering chip, NVS) is reached only through the port traits in
//! `pilot`, `metering`, and `persistence`.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │   Pilot          Metering         StoragePort      TimePort    │
//! │  (CP/PWM/relay)  (HLW8112-class)  (NvsAdapter)   (Esp32Time)   │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │       Charger — Connector FSM · SafetySupervisor         │   │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │                     Watchdog (TWDT liveness feed)               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No concrete `Pilot`/`Metering` chip driver is implemented in this crate
//! (GPIO/PWM/I²C driver internals are out of scope, §1) — the `espidf`
//! entry point below wires up the adapters that do exist (NVS, watchdog,
//! monotonic time) and is ready for a board-specific driver to attach
//! connectors once one exists. The non-`espidf` entry point is the `chg`
//! host CLI, driving a `Charger` against [`pilot::SimulatedPilot`] for
//! manual testing.
#![deny(unused_must_use)]

// ── Module declarations ───────────────────────────────────────
mod adapters;
mod charger;
mod config;
mod connector;
mod diagnostics;
mod drivers;
mod error;
mod events;
mod metering;
mod persistence;
mod pilot;
mod safety;
mod session;

#[cfg(target_os = "espidf")]
mod espidf_main {
    use crate::adapters::nvs::NvsAdapter;
    use crate::adapters::time::Esp32TimeAdapter;
    use crate::charger::Charger;
    use crate::config::ChargerConfig;
    use crate::diagnostics::Diagnostics;
    use crate::drivers::watchdog::Watchdog;
    use log::{info, warn};

    pub fn main() -> anyhow::Result<()> {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;

        info!("EVSE connector-control firmware v{}", env!("CARGO_PKG_VERSION"));

        let watchdog = Watchdog::new();
        let time_adapter = Esp32TimeAdapter::new();

        let mut nvs = match NvsAdapter::new() {
            Ok(n) => n,
            Err(e) => {
                warn!("NVS init failed ({e}), running without persistence");
                NvsAdapter::default()
            }
        };
        let _ = &mut nvs; // reserved for the energy/auth stores a board driver will attach.

        let mut charger = Charger::init(ChargerConfig::default())?;
        info!(
            "Charger initialised with {} connector(s) — no board driver is wired in this build",
            charger.connector_count()
        );

        let mut telemetry_counter: u64 = 0;
        loop {
            let now_ms = time_adapter.uptime_us() / 1_000;
            if let Err(e) = charger.process(now_ms) {
                warn!("charger.process: {e}");
            }

            telemetry_counter += 1;
            if telemetry_counter >= 10 {
                let diag = Diagnostics::collect(&charger);
                info!(
                    "diagnostics: overflow={} log_drop={} connectors={}",
                    diag.event_queue_overflow_count, diag.log_drop_count, diag.connector_count
                );
                telemetry_counter = 0;
            }
            watchdog.feed();
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod chg_cli {
    //! `chg` — an interactive host CLI for exercising a [`Charger`] without
    //! hardware, grounded on the teacher's host-simulation adapters and the
    //! distilled spec's description of this glue (§6). Not part of the core.

    use crate::charger::Charger;
    use crate::config::{ChargerConfig, ConnectorConfig, MeteringConfig};
    use crate::connector::{format_event, Connector, ConnectorParams};
    use crate::diagnostics::Diagnostics;
    use crate::metering::{MeteringEnergy, SimulatedMetering};
    use crate::persistence::SimulatedEnergyStore;
    use crate::pilot::{Pilot, PilotState, SimulatedPilot};
    use crate::safety::{EmergencyStopEntry, SafetySupervisor};
    use std::cell::RefCell;
    use std::io::{self, BufRead, Write};
    use std::rc::Rc;

    /// Forwards `Pilot` calls to a shared [`SimulatedPilot`], so the CLI can
    /// force pilot readings on a connector already owned by the `Charger`.
    struct SharedPilot(Rc<RefCell<SimulatedPilot>>);

    impl Pilot for SharedPilot {
        fn read_state(&mut self) -> PilotState {
            self.0.borrow_mut().read_state()
        }
        fn get_duty(&self) -> u8 {
            self.0.borrow().get_duty()
        }
        fn get_target_duty(&self) -> u8 {
            self.0.borrow().get_target_duty()
        }
        fn set_current(&mut self, max_output_current_ma: u32) {
            self.0.borrow_mut().set_current(max_output_current_ma);
        }
        fn start_power_supply(&mut self) {
            self.0.borrow_mut().start_power_supply();
        }
        fn stop_power_supply(&mut self) {
            self.0.borrow_mut().stop_power_supply();
        }
        fn is_supplying_power(&self) -> bool {
            self.0.borrow().is_supplying_power()
        }
        fn set_state_f(&mut self) {
            self.0.borrow_mut().set_state_f();
        }
    }

    fn new_connector(name: &str, id_hint: u8) -> (Connector, Rc<RefCell<SimulatedPilot>>) {
        let mut cfg = ConnectorConfig::default();
        cfg.name = heapless::String::new();
        let _ = cfg.name.push_str(name);
        let pilot = Rc::new(RefCell::new(SimulatedPilot::new()));

        let mut safety = SafetySupervisor::new();
        let _ = safety.add_and_enable(Box::new(EmergencyStopEntry::new("estop")));

        let connector = Connector::new_free_vend(
            ConnectorParams::from(&cfg),
            Box::new(SharedPilot(pilot.clone())),
            Box::new(SimulatedMetering::new(MeteringEnergy::default())),
            MeteringConfig::default(),
            MeteringEnergy::default(),
            safety,
            Box::new(SimulatedEnergyStore::new()),
        );
        let _ = id_hint;
        (connector, pilot)
    }

    fn parse_pilot_state(s: &str) -> Option<PilotState> {
        match s.to_ascii_uppercase().as_str() {
            "A" => Some(PilotState::A),
            "B" => Some(PilotState::B),
            "C" => Some(PilotState::C),
            "D" => Some(PilotState::D),
            "E" => Some(PilotState::E),
            "F" => Some(PilotState::F),
            _ => None,
        }
    }

    pub fn main() -> anyhow::Result<()> {
        env_logger_init();

        let mut charger = Charger::init(ChargerConfig::default())?;
        let mut pilots: Vec<(u8, Rc<RefCell<SimulatedPilot>>)> = Vec::new();

        for name in ["cp1", "cp2"] {
            let (mut connector, pilot) = new_connector(name, 0);
            connector.enable()?;
            let id = charger.attach(connector)?;
            pilots.push((id, pilot));
        }

        println!("chg — interactive EVSE connector simulator. Type 'help' for commands.");

        let mut now_ms: u64 = 0;
        let stdin = io::stdin();
        print!("chg> ");
        io::stdout().flush().ok();
        for line in stdin.lock().lines() {
            let line = line?;
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["help"] => {
                    println!("commands: show | tick [ms] | set pilot <id> <A..F> | enable <id> | disable <id> | quit");
                }
                ["show"] => {
                    for connector in charger.connectors() {
                        println!(
                            "  #{:<3} {:<12} pilot={:?} enabled={} available={}",
                            connector.id(),
                            connector.name(),
                            connector.pilot_state(),
                            connector.is_enabled(),
                            connector.is_available()
                        );
                    }
                    let diag = Diagnostics::collect(&charger);
                    println!(
                        "  diagnostics: overflow={} log_drop={}",
                        diag.event_queue_overflow_count, diag.log_drop_count
                    );
                }
                ["tick"] => now_ms = run_tick(&mut charger, now_ms, 100),
                ["tick", ms] => match ms.parse::<u64>() {
                    Ok(delta) => now_ms = run_tick(&mut charger, now_ms, delta),
                    Err(_) => println!("error: '{ms}' is not a valid millisecond count"),
                },
                ["set", "pilot", id, state] => match (id.parse::<u8>(), parse_pilot_state(state)) {
                    (Ok(id), Some(state)) => match pilots.iter().find(|(cid, _)| *cid == id) {
                        Some((_, pilot)) => {
                            pilot.borrow_mut().force_state(state);
                            println!("  connector #{id} pilot forced to {state:?}");
                        }
                        None => println!("error: no connector with id {id}"),
                    },
                    _ => println!("usage: set pilot <id> <A..F>"),
                },
                ["enable", id] => match id.parse::<u8>() {
                    Ok(id) => match charger.get_by_id_mut(id) {
                        Some(connector) => {
                            connector.enable()?;
                        }
                        None => println!("error: no connector with id {id}"),
                    },
                    Err(_) => println!("error: '{id}' is not a valid connector id"),
                },
                ["disable", id] => match id.parse::<u8>() {
                    Ok(id) => match charger.get_by_id_mut(id) {
                        Some(connector) => {
                            connector.disable()?;
                        }
                        None => println!("error: no connector with id {id}"),
                    },
                    Err(_) => println!("error: '{id}' is not a valid connector id"),
                },
                ["quit"] | ["exit"] => break,
                [] => {}
                _ => println!("unrecognised command; type 'help'"),
            }
            print!("chg> ");
            io::stdout().flush().ok();
        }
        Ok(())
    }

    fn run_tick(charger: &mut Charger, now_ms: u64, delta_ms: u64) -> u64 {
        let now_ms = now_ms + delta_ms;
        let mut emitted = Vec::new();
        charger.subscribe(Box::new(|id, event| {
            println!("  event connector #{id}: {}", format_event(event));
        }));
        if let Err(e) = charger.process(now_ms) {
            emitted.push(e);
        }
        for e in emitted {
            println!("  tick error: {e}");
        }
        now_ms
    }

    fn env_logger_init() {
        // The teacher initialises `esp_idf_logger` on-device; on host builds
        // this CLI relies on `RUST_LOG` being read by whatever `log`
        // implementation the shell has installed, or runs silently.
        let _ = log::set_max_level(log::LevelFilter::Info);
    }
}

fn main() -> anyhow::Result<()> {
    #[cfg(target_os = "espidf")]
    {
        espidf_main::main()
    }
    #[cfg(not(target_os = "espidf"))]
    {
        chg_cli::main()
    }
}
