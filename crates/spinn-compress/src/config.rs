//! Compression run configuration

use crate::compression::CompressionSettings;
use crate::transport::AppId;
use spinn_chip::program::{BIT_FIELD_COMPRESSOR_APLX, SYNAPSE_EXPANDER_APLX};
use spinn_chip::MAX_ROUTER_ENTRIES;
use spinn_partition::SimulationParameters;
use std::time::Duration;
use tracing::debug;

/// Knobs for a whole compression run
///
/// Built explicitly by the caller; nothing is read from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Application whose routing tables are installed
    pub app_id: AppId,

    /// Aim for at most this many entries per table
    pub target_length: usize,

    /// Time budget per compression attempt (microseconds)
    pub time_per_iteration_us: u32,

    /// Leave tables that already fit alone
    pub compress_only_when_needed: bool,

    /// Keep compressing tables that already fit
    pub compress_as_much_as_possible: bool,

    /// Abandon attempts that exceed the time budget
    pub use_timer_cut_off: bool,

    /// Longest wait for a launched executable to finish
    pub completion_timeout: Duration,

    /// Delay between completion polls
    pub poll_interval: Duration,

    /// Worker threads, and so the bound on device calls in flight
    pub max_in_flight: usize,

    /// Minimum redundant packets for a bitfield to be merged on the host
    pub threshold_packets: u32,

    /// Compressor executable
    pub compressor_binary: String,

    /// Synapse expander executable
    pub expander_binary: String,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            app_id: 30,
            target_length: MAX_ROUTER_ENTRIES,
            time_per_iteration_us: 100_000,
            compress_only_when_needed: true,
            compress_as_much_as_possible: false,
            use_timer_cut_off: false,
            completion_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
            max_in_flight: 8,
            threshold_packets: 1,
            compressor_binary: BIT_FIELD_COMPRESSOR_APLX.into(),
            expander_binary: SYNAPSE_EXPANDER_APLX.into(),
        }
    }
}

impl CompressionConfig {
    /// Configuration for a simulation, with the packet threshold derived
    /// from its timing
    pub fn for_simulation(simulation: &SimulationParameters) -> Self {
        let threshold_packets = calculate_threshold(simulation);
        debug!(
            "Packet threshold {} for {} us timestep x{}",
            threshold_packets, simulation.timestep_us, simulation.time_scale_factor
        );
        Self {
            threshold_packets,
            ..Self::default()
        }
    }

    /// Set the application id
    #[must_use]
    pub fn with_app_id(mut self, app_id: AppId) -> Self {
        self.app_id = app_id;
        self
    }

    /// Set the target table length
    #[must_use]
    pub fn with_target_length(mut self, target_length: usize) -> Self {
        self.target_length = target_length;
        self
    }

    /// Set the completion timeout
    #[must_use]
    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the worker count
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Set the compression flags
    #[must_use]
    pub fn with_flags(mut self, only_when_needed: bool, as_much_as_possible: bool) -> Self {
        self.compress_only_when_needed = only_when_needed;
        self.compress_as_much_as_possible = as_much_as_possible;
        self
    }

    /// Enable the per-attempt timer with the given budget
    #[must_use]
    pub fn with_timer_cut_off(mut self, time_per_iteration_us: u32) -> Self {
        self.use_timer_cut_off = true;
        self.time_per_iteration_us = time_per_iteration_us;
        self
    }

    /// Settings for one host-side table compression
    pub fn settings(&self) -> CompressionSettings {
        CompressionSettings {
            target_length: self.target_length,
            compress_only_when_needed: self.compress_only_when_needed,
            compress_as_much_as_possible: self.compress_as_much_as_possible,
            use_timer_cut_off: self.use_timer_cut_off,
            time_per_iteration: Duration::from_micros(u64::from(self.time_per_iteration_us)),
            threshold_packets: self.threshold_packets,
        }
    }

    /// Configuration for quick runs in tests
    #[cfg(test)]
    pub fn minimal() -> Self {
        Self {
            completion_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            max_in_flight: 2,
            ..Self::default()
        }
    }
}

/// Packets per tick below which a bitfield is not worth merging
///
/// One packet per millisecond of real time per tick, at least one.
pub fn calculate_threshold(simulation: &SimulationParameters) -> u32 {
    let packets = simulation.real_time_per_tick_us() / 1000;
    u32::try_from(packets).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_from_timing() {
        let sim = SimulationParameters::default();
        assert_eq!(calculate_threshold(&sim), 1);
        assert_eq!(calculate_threshold(&sim.with_time_scale_factor(10)), 10);
        assert_eq!(calculate_threshold(&sim.with_timestep_us(100)), 1);
    }

    #[test]
    fn for_simulation_sets_threshold() {
        let sim = SimulationParameters::default().with_timestep_us(5000);
        let config = CompressionConfig::for_simulation(&sim);
        assert_eq!(config.threshold_packets, 5);
        assert_eq!(config.settings().threshold_packets, 5);
        assert_eq!(config.settings().target_length, MAX_ROUTER_ENTRIES);
    }
}
