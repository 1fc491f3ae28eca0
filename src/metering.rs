//! Metering facade.
//!
//! Polymorphic over device kind (e.g. an HLW8112-class metering chip);
//! the concrete chip driver is out of core (§1) and represented only by
//! the [`Metering`] trait. [`MeteringFacade`] implements the save-trigger
//! state machine from the original firmware's `metering_step` contract.

use crate::config::MeteringConfig;

/// Persistable cumulative energy reading, mirrors `metering_energy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MeteringEnergy {
    /// Active energy, watt-hours.
    pub wh: u64,
    /// Reactive energy, volt-ampere-reactive-hours.
    pub varh: u64,
}

/// Metering capability, consumed by [`MeteringFacade`].
///
/// All getters return engineering units matching the original firmware's
/// `metering_api` vtable (mV, mA, cHz, centidegrees, W, var, Wh, varh).
pub trait Metering {
    /// Sample one step of instantaneous readings and accumulate energy.
    /// Called at least every `MIN_INTERVAL_MS`.
    fn step(&mut self);
    fn get_voltage_mv(&self) -> crate::error::Result<i32>;
    fn get_current_ma(&self) -> crate::error::Result<i32>;
    fn get_power_factor_centi(&self) -> crate::error::Result<i32>;
    fn get_frequency_chz(&self) -> crate::error::Result<i32>;
    fn get_power(&self) -> crate::error::Result<(i32, i32)>;
    /// Runtime cumulative energy; never decreases (invariant I5).
    fn get_energy(&self) -> MeteringEnergy;
}

/// Drives the save-trigger policy on top of a [`Metering`] device.
///
/// Persistence is triggered when either the accumulated delta since the
/// last successful save reaches `save_threshold_wh`, or `save_interval_min`
/// has elapsed since the last successful save — whichever is met first.
/// The saved-reference only advances when the save callback reports
/// success (propagation policy, §7): a failed save is retried on the
/// next trigger without moving the reference.
pub struct MeteringFacade<M: Metering> {
    device: M,
    config: MeteringConfig,
    last_saved: MeteringEnergy,
    last_save_at_ms: u64,
}

impl<M: Metering> MeteringFacade<M> {
    pub fn new(device: M, config: MeteringConfig, initial_saved: MeteringEnergy) -> Self {
        Self {
            device,
            config,
            last_saved: initial_saved,
            last_save_at_ms: 0,
        }
    }

    /// Sample the device and, if a save trigger condition is met, invoke
    /// `save` with the current runtime snapshot. Returns `true` if a save
    /// was attempted and accepted.
    pub fn step(&mut self, now_ms: u64, save: impl FnOnce(MeteringEnergy) -> bool) -> bool {
        self.device.step();
        let current = self.device.get_energy();

        let delta_wh = current.wh.saturating_sub(self.last_saved.wh);
        let elapsed_ms = now_ms.saturating_sub(self.last_save_at_ms);
        let interval_ms = u64::from(self.config.save_interval_min) * 60_000;

        let should_save = delta_wh >= self.config.save_threshold_wh || elapsed_ms >= interval_ms;
        if !should_save {
            return false;
        }

        if save(current) {
            self.last_saved = current;
            self.last_save_at_ms = now_ms;
            true
        } else {
            false
        }
    }

    pub fn energy(&self) -> MeteringEnergy {
        self.device.get_energy()
    }

    pub fn device(&self) -> &M {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut M {
        &mut self.device
    }
}

impl Metering for Box<dyn Metering> {
    fn step(&mut self) {
        (**self).step()
    }
    fn get_voltage_mv(&self) -> crate::error::Result<i32> {
        (**self).get_voltage_mv()
    }
    fn get_current_ma(&self) -> crate::error::Result<i32> {
        (**self).get_current_ma()
    }
    fn get_power_factor_centi(&self) -> crate::error::Result<i32> {
        (**self).get_power_factor_centi()
    }
    fn get_frequency_chz(&self) -> crate::error::Result<i32> {
        (**self).get_frequency_chz()
    }
    fn get_power(&self) -> crate::error::Result<(i32, i32)> {
        (**self).get_power()
    }
    fn get_energy(&self) -> MeteringEnergy {
        (**self).get_energy()
    }
}

/// In-memory metering double for tests, grounded on the teacher's
/// `cfg(not(target_os = "espidf"))` simulation adapters: test code injects
/// an energy delta per `step()` call rather than sampling real hardware.
pub struct SimulatedMetering {
    energy: MeteringEnergy,
    pending_delta_wh: u64,
    voltage_mv: i32,
    current_ma: i32,
}

impl SimulatedMetering {
    pub fn new(initial: MeteringEnergy) -> Self {
        Self {
            energy: initial,
            pending_delta_wh: 0,
            voltage_mv: 230_000,
            current_ma: 0,
        }
    }

    /// Queue an energy delta to be applied on the next `step()`.
    pub fn push_delta_wh(&mut self, delta: u64) {
        self.pending_delta_wh += delta;
    }

    pub fn set_current_ma(&mut self, ma: i32) {
        self.current_ma = ma;
    }
}

impl Metering for SimulatedMetering {
    fn step(&mut self) {
        self.energy.wh += self.pending_delta_wh;
        self.pending_delta_wh = 0;
    }

    fn get_voltage_mv(&self) -> crate::error::Result<i32> {
        Ok(self.voltage_mv)
    }

    fn get_current_ma(&self) -> crate::error::Result<i32> {
        Ok(self.current_ma)
    }

    fn get_power_factor_centi(&self) -> crate::error::Result<i32> {
        Ok(100)
    }

    fn get_frequency_chz(&self) -> crate::error::Result<i32> {
        Ok(6000)
    }

    fn get_power(&self) -> crate::error::Result<(i32, i32)> {
        let watt = (self.voltage_mv / 1000) * (self.current_ma / 1000);
        Ok((watt, 0))
    }

    fn get_energy(&self) -> MeteringEnergy {
        self.energy
    }
}
