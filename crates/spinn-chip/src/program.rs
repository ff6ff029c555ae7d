//! System executables and core run states.
//!
//! The compression pipeline launches two system executables: the bitfield
//! router compressor (one core per chip) and the synaptic expander (every
//! bitfield-generating core of a chip whose SDRAM may have been borrowed).

/// Bitfield-aware on-chip routing table compressor.
pub const BIT_FIELD_COMPRESSOR_APLX: &str = "bit_field_router_compressor.aplx";

/// On-chip synaptic matrix generator.
pub const SYNAPSE_EXPANDER_APLX: &str = "synapse_expander.aplx";

/// Run state of one core as reported by the chip monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuState {
    /// Nothing loaded.
    Idle,
    /// Executable loaded, waiting for the start signal.
    Ready,
    /// Executing.
    Running,
    /// Exited normally.
    Finished,
    /// Crashed with a run-time exception.
    RunTimeException,
    /// Killed by the watchdog.
    Watchdog,
}

impl CpuState {
    /// True once the core will not change state on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::RunTimeException | Self::Watchdog)
    }

    /// True for terminal states other than a clean exit.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, Self::RunTimeException | Self::Watchdog)
    }
}
