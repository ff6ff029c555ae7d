//! Simulation timing and per-core capacity.
//!
//! Nothing here is looked up globally: callers build these explicitly and
//! pass them to the estimator and splitter.

use spinn_chip::sdram::{CYCLES_PER_US, DTCM_BYTES, USABLE_SDRAM_BYTES};

/// Cores that share one chip's SDRAM in the default capacity split.
const CORES_SHARING_SDRAM: u64 = 16;

/// Simulation timing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationParameters {
    /// Simulated time per tick (microseconds)
    pub timestep_us: u32,

    /// Wall-clock slow-down factor
    pub time_scale_factor: u32,

    /// Number of ticks the simulation will run
    pub n_timesteps: u64,
}

impl Default for SimulationParameters {
    fn default() -> Self {
        Self {
            timestep_us: 1000,
            time_scale_factor: 1,
            n_timesteps: 1000,
        }
    }
}

impl SimulationParameters {
    /// Set the timestep
    #[must_use]
    pub const fn with_timestep_us(mut self, timestep_us: u32) -> Self {
        self.timestep_us = timestep_us;
        self
    }

    /// Set the time scale factor
    #[must_use]
    pub const fn with_time_scale_factor(mut self, time_scale_factor: u32) -> Self {
        self.time_scale_factor = time_scale_factor;
        self
    }

    /// Set the run length in ticks
    #[must_use]
    pub const fn with_n_timesteps(mut self, n_timesteps: u64) -> Self {
        self.n_timesteps = n_timesteps;
        self
    }

    /// Wall-clock microseconds per tick
    pub const fn real_time_per_tick_us(&self) -> u64 {
        self.timestep_us as u64 * self.time_scale_factor as u64
    }

    /// Simulated timestep in seconds
    pub fn timestep_seconds(&self) -> f64 {
        f64::from(self.timestep_us) / 1_000_000.0
    }
}

/// Capacity of one application core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLimits {
    /// SDRAM budget for the core (bytes)
    pub sdram_bytes: u64,

    /// Local data memory (bytes)
    pub dtcm_bytes: u64,

    /// Clock cycles available per tick
    pub cpu_cycles_per_tick: u64,
}

impl Default for CoreLimits {
    fn default() -> Self {
        Self::for_simulation(&SimulationParameters::default())
    }
}

impl CoreLimits {
    /// Capacity of a core running the given simulation
    ///
    /// SDRAM is split evenly between the application cores of a chip and
    /// the cycle budget scales with the real time available per tick.
    pub fn for_simulation(simulation: &SimulationParameters) -> Self {
        Self {
            sdram_bytes: u64::from(USABLE_SDRAM_BYTES) / CORES_SHARING_SDRAM,
            dtcm_bytes: u64::from(DTCM_BYTES),
            cpu_cycles_per_tick: simulation.real_time_per_tick_us() * u64::from(CYCLES_PER_US),
        }
    }

    /// Set the SDRAM budget
    #[must_use]
    pub const fn with_sdram_bytes(mut self, sdram_bytes: u64) -> Self {
        self.sdram_bytes = sdram_bytes;
        self
    }

    /// Set the DTCM budget
    #[must_use]
    pub const fn with_dtcm_bytes(mut self, dtcm_bytes: u64) -> Self {
        self.dtcm_bytes = dtcm_bytes;
        self
    }

    /// Set the cycle budget
    #[must_use]
    pub const fn with_cpu_cycles_per_tick(mut self, cpu_cycles_per_tick: u64) -> Self {
        self.cpu_cycles_per_tick = cpu_cycles_per_tick;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_budget_scales_with_time_scale_factor() {
        let fast = CoreLimits::for_simulation(&SimulationParameters::default());
        let slow = CoreLimits::for_simulation(
            &SimulationParameters::default().with_time_scale_factor(10),
        );
        assert_eq!(fast.cpu_cycles_per_tick, 200_000);
        assert_eq!(slow.cpu_cycles_per_tick, 2_000_000);
        assert_eq!(fast.sdram_bytes, slow.sdram_bytes);
    }

    #[test]
    fn timestep_in_seconds() {
        let sim = SimulationParameters::default().with_timestep_us(100);
        assert!((sim.timestep_seconds() - 0.0001).abs() < 1e-12);
    }
}
