//! Population parameters consumed by the cost model.
//!
//! These are plain values handed over by the graph layer. The neuron and
//! synapse equations are not modelled, only the sizes they imply.

use crate::connector::Projection;

/// Bytes of one fixed-point (S16.15) parameter.
const PARAM_WORD_BYTES: u64 = 4;

/// Memory and time footprint of a neuron model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeuronModel {
    /// Model name
    pub name: String,

    /// Parameters shared by every neuron (bytes)
    pub global_params_bytes: u64,

    /// State and parameters per neuron (bytes)
    pub param_bytes_per_neuron: u64,

    /// Working memory per neuron (bytes)
    pub dtcm_bytes_per_neuron: u64,

    /// Update cost per neuron per tick (cycles)
    pub cpu_cycles_per_neuron: u64,

    /// Number of synapse types (receptor channels)
    pub n_synapse_types: u32,
}

impl NeuronModel {
    /// Leaky integrate-and-fire with exponential current synapses
    pub fn lif_curr_exp() -> Self {
        // v, v_rest, r_membrane, exp_tc, i_offset, refract_count, v_reset, tau_refrac
        // + two exponential synapse states (value, decay) + threshold
        let words = 8 + 2 * 2 + 1;
        Self {
            name: "IF_curr_exp".into(),
            global_params_bytes: 0,
            param_bytes_per_neuron: words * PARAM_WORD_BYTES,
            dtcm_bytes_per_neuron: words * PARAM_WORD_BYTES,
            cpu_cycles_per_neuron: 107,
            n_synapse_types: 2,
        }
    }

    /// Izhikevich with exponential current synapses
    pub fn izhikevich() -> Self {
        // a, b, c, d, v, u, i_offset + synapse states + threshold
        let words = 7 + 2 * 2 + 1;
        Self {
            name: "Izk_curr_exp".into(),
            // timestep and its reciprocal
            global_params_bytes: 2 * PARAM_WORD_BYTES,
            param_bytes_per_neuron: words * PARAM_WORD_BYTES,
            dtcm_bytes_per_neuron: words * PARAM_WORD_BYTES,
            cpu_cycles_per_neuron: 150,
            n_synapse_types: 2,
        }
    }
}

/// One recordable variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recordable {
    /// Variable name
    pub name: String,

    /// Bits recorded per neuron per sample
    pub bits_per_neuron: u32,

    /// Ticks between samples
    pub sampling_interval: u32,
}

impl Recordable {
    /// Spike recording: one bit per neuron every tick
    pub fn spikes() -> Self {
        Self {
            name: "spikes".into(),
            bits_per_neuron: 1,
            sampling_interval: 1,
        }
    }

    /// A 32-bit state variable recorded every tick
    pub fn state(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bits_per_neuron: 32,
            sampling_interval: 1,
        }
    }

    /// Record only every `interval` ticks
    #[must_use]
    pub fn with_sampling_interval(mut self, interval: u32) -> Self {
        self.sampling_interval = interval.max(1);
        self
    }

    /// Average bytes written per tick for `n_atoms` neurons, rounded up
    pub fn bytes_per_timestep(&self, n_atoms: u32) -> u64 {
        let bits = u64::from(n_atoms) * u64::from(self.bits_per_neuron);
        let sample_bytes = bits.div_ceil(32) * 4;
        sample_bytes.div_ceil(u64::from(self.sampling_interval.max(1)))
    }
}

/// What a population records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingConfig {
    /// Neuron-side recordings
    pub neuron: Vec<Recordable>,

    /// Synapse-side recordings
    pub synapse: Vec<Recordable>,
}

impl RecordingConfig {
    /// Total recordables
    pub fn len(&self) -> usize {
        self.neuron.len() + self.synapse.len()
    }

    /// Nothing recorded
    pub fn is_empty(&self) -> bool {
        self.neuron.is_empty() && self.synapse.is_empty()
    }

    /// Every recordable, neuron side first
    pub fn iter(&self) -> impl Iterator<Item = &Recordable> {
        self.neuron.iter().chain(&self.synapse)
    }
}

/// Spike-timing-dependent plasticity sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdpParameters {
    /// Timing and weight rule parameters, including lookup tables (bytes)
    pub params_bytes: u64,

    /// Pre-synaptic trace stored in each plastic row header (bytes)
    pub pre_trace_bytes: u64,

    /// Post-synaptic trace history per neuron (bytes)
    pub post_trace_bytes_per_neuron: u64,
}

impl Default for StdpParameters {
    /// Pair-based rule with additive weights
    fn default() -> Self {
        Self {
            // two 256-entry u16 exponential tables plus weight bounds
            params_bytes: 2 * 256 * 2 + 4 * 4,
            pre_trace_bytes: 4,
            post_trace_bytes_per_neuron: 4 * 4,
        }
    }
}

/// Synapse behaviour of the population
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynapseDynamics {
    /// Fixed weights
    #[default]
    Static,

    /// Plastic weights
    Stdp(StdpParameters),

    /// Plastic weights with synaptic rewiring
    Structural {
        /// Underlying weight plasticity
        stdp: StdpParameters,
        /// Maximum synapses per post neuron
        s_max: u32,
    },
}

impl SynapseDynamics {
    /// Weights change at run time
    pub const fn is_plastic(&self) -> bool {
        !matches!(self, Self::Static)
    }

    /// Connectivity changes at run time
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural { .. })
    }

    /// Plasticity parameters, if plastic
    pub const fn stdp(&self) -> Option<&StdpParameters> {
        match self {
            Self::Static => None,
            Self::Stdp(stdp) | Self::Structural { stdp, .. } => Some(stdp),
        }
    }
}

/// An application population as the cost model sees it
#[derive(Debug, Clone, PartialEq)]
pub struct Population {
    /// Label
    pub label: String,

    /// Number of atoms
    pub n_atoms: u32,

    /// Neuron model footprint
    pub neuron: NeuronModel,

    /// Recorded variables
    pub recording: RecordingConfig,

    /// Synapse behaviour
    pub synapse_dynamics: SynapseDynamics,

    /// Projections arriving at this population
    pub incoming_projections: Vec<Projection>,

    /// Expected firing rate of pre-synaptic atoms (Hz)
    pub spikes_per_second: f64,

    /// Standard deviations above mean input used to size ring buffers
    pub ring_buffer_sigma: f64,

    /// Profiler samples to reserve (0 disables profiling)
    pub n_profile_samples: u32,
}

impl Population {
    /// Population of `n_atoms` with no projections and no recording
    pub fn new(label: impl Into<String>, n_atoms: u32, neuron: NeuronModel) -> Self {
        Self {
            label: label.into(),
            n_atoms,
            neuron,
            recording: RecordingConfig::default(),
            synapse_dynamics: SynapseDynamics::Static,
            incoming_projections: Vec::new(),
            spikes_per_second: 10.0,
            ring_buffer_sigma: 5.0,
            n_profile_samples: 0,
        }
    }

    /// Add an incoming projection
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.incoming_projections.push(projection);
        self
    }

    /// Set the synapse dynamics
    #[must_use]
    pub fn with_synapse_dynamics(mut self, dynamics: SynapseDynamics) -> Self {
        self.synapse_dynamics = dynamics;
        self
    }

    /// Set the recording configuration
    #[must_use]
    pub fn with_recording(mut self, recording: RecordingConfig) -> Self {
        self.recording = recording;
        self
    }

    /// Set the expected pre-synaptic rate
    #[must_use]
    pub fn with_spikes_per_second(mut self, rate: f64) -> Self {
        self.spikes_per_second = rate;
        self
    }

    /// Set the ring buffer sigma
    #[must_use]
    pub fn with_ring_buffer_sigma(mut self, sigma: f64) -> Self {
        self.ring_buffer_sigma = sigma;
        self
    }

    /// Reserve profiler samples
    #[must_use]
    pub fn with_profile_samples(mut self, samples: u32) -> Self {
        self.n_profile_samples = samples;
        self
    }

    /// Matrix rows of this projection use the one-word direct format
    pub fn uses_direct_matrix(&self, projection: &Projection) -> bool {
        !self.synapse_dynamics.is_plastic()
            && matches!(projection.connector, crate::connector::Connector::OneToOne)
    }
}
