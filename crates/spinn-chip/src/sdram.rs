//! SDRAM layout and population region identifiers.
//!
//! ```text
//! Address      Size     Purpose
//! ──────────── ──────── ──────────────────────────────────────────
//! 0x60000000   128 MB   Shared SDRAM, one per chip
//! 0x67800000     8 MB   System reserved (top of SDRAM)
//! ```
//!
//! Application data for one core is laid out as a set of numbered regions,
//! found through the region table whose base lives in the core's USER0
//! register (see [`crate::regs`]).

/// Bytes per machine word.
pub const WORD_BYTES: u32 = 4;

/// Base of the shared SDRAM on every chip.
pub const SDRAM_BASE: u32 = 0x6000_0000;

/// Total SDRAM per chip.
pub const SDRAM_BYTES: u32 = 128 * 1024 * 1024;

/// SDRAM kept back for the system.
pub const SYSTEM_RESERVED_BYTES: u32 = 8 * 1024 * 1024;

/// SDRAM the allocator can hand out on one chip.
pub const USABLE_SDRAM_BYTES: u32 = SDRAM_BYTES - SYSTEM_RESERVED_BYTES;

/// Local data memory per core.
pub const DTCM_BYTES: u32 = 64 * 1024;

/// Clock cycles per microsecond at the default core clock.
pub const CYCLES_PER_US: u32 = 200;

/// Regions of a population (neuron + synapse) core.
///
/// The discriminant is the region id used in the region table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum PopulationRegion {
    /// Simulation system header.
    System = 0,
    /// Neuron state and parameters.
    NeuronParams = 1,
    /// Synapse type parameters and ring-buffer shifts.
    SynapseParams = 2,
    /// Master population lookup table.
    PopTable = 3,
    /// Synaptic matrix rows.
    SynapticMatrix = 4,
    /// Plasticity state.
    SynapseDynamics = 5,
    /// Structural plasticity state.
    StructuralDynamics = 6,
    /// Recording buffers for neuron and synapse state.
    NeuronRecording = 7,
    /// Provenance counters.
    Provenance = 8,
    /// Profiler samples.
    Profiling = 9,
    /// Connection-builder metadata for on-chip matrix generation.
    ConnectorBuilder = 10,
    /// Direct (single synapse) matrix.
    DirectMatrix = 11,
    /// Bitfield filters.
    BitFieldFilter = 12,
    /// Bitfield builder parameters.
    BitFieldBuilder = 13,
    /// Key to atom-count map used by the bitfield compressor.
    BitFieldKeyMap = 14,
    /// Slot for the nested per-timestep recording cost.
    VariableRecording = 15,
}

impl PopulationRegion {
    /// Every region, in id order.
    pub const ALL: [Self; 16] = [
        Self::System,
        Self::NeuronParams,
        Self::SynapseParams,
        Self::PopTable,
        Self::SynapticMatrix,
        Self::SynapseDynamics,
        Self::StructuralDynamics,
        Self::NeuronRecording,
        Self::Provenance,
        Self::Profiling,
        Self::ConnectorBuilder,
        Self::DirectMatrix,
        Self::BitFieldFilter,
        Self::BitFieldBuilder,
        Self::BitFieldKeyMap,
        Self::VariableRecording,
    ];

    /// Region id.
    #[must_use]
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Short name for reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::NeuronParams => "neuron_params",
            Self::SynapseParams => "synapse_params",
            Self::PopTable => "pop_table",
            Self::SynapticMatrix => "synaptic_matrix",
            Self::SynapseDynamics => "synapse_dynamics",
            Self::StructuralDynamics => "structural_dynamics",
            Self::NeuronRecording => "neuron_recording",
            Self::Provenance => "provenance",
            Self::Profiling => "profiling",
            Self::ConnectorBuilder => "connector_builder",
            Self::DirectMatrix => "direct_matrix",
            Self::BitFieldFilter => "bitfield_filter",
            Self::BitFieldBuilder => "bitfield_builder",
            Self::BitFieldKeyMap => "bitfield_key_map",
            Self::VariableRecording => "variable_recording",
        }
    }
}
