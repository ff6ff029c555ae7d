//! Slice cost estimation.
//!
//! # SDRAM regions
//!
//! | Region | Depends on |
//! |--------|-----------|
//! | System, SynapseParams, Provenance, Profiling | population |
//! | NeuronParams, SynapseDynamics, DTCM, CPU | slice size |
//! | SynapticMatrix, StructuralDynamics | slice size and projections (cached per slice) |
//! | DirectMatrix, PopTable | projections |
//! | ConnectorBuilder, BitField* | projections (cached once) |
//! | NeuronRecording, VariableRecording | slice size and recording config |
//!
//! Costs are deterministic for a fixed population. Expensive parts are
//! memoised in a [`ResourceCostCache`] owned by the estimator.

use crate::cache::{CacheStats, ResourceCostCache};
use crate::config::SimulationParameters;
use crate::population::Population;
use crate::resources::{MultiRegionSdram, ResourceContainer, VariableSdram};
use crate::slice::AtomSlice;
use spinn_chip::sdram::WORD_BYTES;
use spinn_chip::PopulationRegion;
use std::sync::Arc;
use tracing::debug;

const WORD: u64 = WORD_BYTES as u64;

/// Simulation header: timer period, tick count, infinite-run flag.
pub const SYSTEM_BYTES: u64 = 3 * WORD;

/// Neuron region header: key, n_neurons, n_synapse_types, n_recordables,
/// timestep, n_steps_per_timestep, has_key, spare.
pub const NEURON_HEADER_BYTES: u64 = 8 * WORD;

/// Provenance: five system counters plus seventeen population counters.
pub const PROVENANCE_BYTES: u64 = (5 + 17) * WORD;

/// Bitfield builder parameters: region ids for master pop, matrix, filter, key map.
pub const BIT_FIELD_BUILDER_BYTES: u64 = 4 * WORD;

/// Synapse-side DTCM common to every core.
const SYNAPSE_BASE_DTCM_BYTES: u64 = 512;

/// Ring buffer slots per synapse type per neuron.
const RING_BUFFER_SLOTS: u64 = 16;

/// Bytes of one ring buffer slot.
const RING_BUFFER_SLOT_BYTES: u64 = 2;

/// Fixed cycles: timer callback plus spike processing set-up.
const BASE_CPU_CYCLES: u64 = 4000 + 10;

/// Cycles per neuron per synapse type to drain the ring buffers.
const CYCLES_PER_SYNAPSE_TYPE: u64 = 8;

/// Row header words of a static row: plastic count, fixed count, pointer.
const STATIC_ROW_HEADER_WORDS: u64 = 3;

/// Row header words of a plastic row.
const PLASTIC_ROW_HEADER_WORDS: u64 = 4;

/// Master pop table header words.
const POP_TABLE_HEADER_WORDS: u64 = 2;

/// Words per master pop table entry: key, mask, address, row length.
const POP_TABLE_ENTRY_WORDS: u64 = 4;

/// Connection builder header words.
const CONNECTION_BUILDER_HEADER_WORDS: u64 = 2;

/// Words per generated matrix description, before connector parameters.
const GENERATOR_MATRIX_WORDS: u64 = 16;

/// Structural plasticity header words.
const STRUCTURAL_HEADER_WORDS: u64 = 10;

/// Structural plasticity words per incoming projection.
const STRUCTURAL_WORDS_PER_PROJECTION: u64 = 6;

/// Highest ring-buffer left shift.
pub const MAX_RING_BUFFER_SHIFT: u32 = 16;

/// Computes and memoises the resources needed to run a slice of one population
#[derive(Debug, Clone)]
pub struct SliceCostEstimator {
    population: Arc<Population>,
    simulation: SimulationParameters,
    cache: ResourceCostCache,
}

impl SliceCostEstimator {
    /// Estimator with an empty cache
    pub fn new(population: Arc<Population>, simulation: SimulationParameters) -> Self {
        Self {
            population,
            simulation,
            cache: ResourceCostCache::new(),
        }
    }

    /// Population being costed
    pub fn population(&self) -> &Arc<Population> {
        &self.population
    }

    /// Simulation timing in use
    pub fn simulation(&self) -> &SimulationParameters {
        &self.simulation
    }

    /// Cache contents
    pub fn cache(&self) -> &ResourceCostCache {
        &self.cache
    }

    /// Computation counters
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached value
    pub fn reset(&mut self) {
        self.cache.reset();
    }

    /// Resources needed to run `slice` on one core
    pub fn cost(&mut self, slice: AtomSlice) -> ResourceContainer {
        if let Some(container) = self.cache.containers.get(&slice) {
            self.cache.stats.container_hits += 1;
            return container.clone();
        }

        let pop = Arc::clone(&self.population);
        let n = slice.n_atoms();

        let mut sdram = MultiRegionSdram::new();
        sdram.add_cost(PopulationRegion::System, SYSTEM_BYTES);
        sdram.add_cost(PopulationRegion::NeuronParams, neuron_params_bytes(&pop, n));
        sdram.add_cost(PopulationRegion::SynapseParams, synapse_params_bytes(&pop));
        if pop.synapse_dynamics.is_plastic() {
            sdram.add_cost(PopulationRegion::SynapseDynamics, synapse_dynamics_bytes(&pop, n));
        }
        if pop.synapse_dynamics.is_structural() {
            let structural = self.structural_size(slice);
            sdram.add_cost(PopulationRegion::StructuralDynamics, structural);
        }
        let matrix = self.all_syn_block_size(slice);
        sdram.add_cost(PopulationRegion::SynapticMatrix, matrix);
        sdram.add_cost(PopulationRegion::DirectMatrix, direct_matrix_bytes(&pop));
        sdram.add_cost(PopulationRegion::PopTable, pop_table_bytes(&pop));
        let builder = self.connection_builder_size();
        sdram.add_cost(PopulationRegion::ConnectorBuilder, builder);
        sdram.merge(&self.bitfield_sdram());
        sdram.add_cost(PopulationRegion::Provenance, PROVENANCE_BYTES);
        sdram.add_cost(PopulationRegion::Profiling, profiling_bytes(&pop));
        sdram.add_cost(PopulationRegion::NeuronRecording, recording_header_bytes(&pop));
        sdram.add_variable(PopulationRegion::VariableRecording, recording_sdram(&pop, n));

        let container = ResourceContainer {
            sdram,
            dtcm_bytes: dtcm_bytes(&pop, n),
            cpu_cycles: cpu_cycles(&pop, n),
        };

        debug!(
            "Costed {} slice {}: {} fixed + {}/tick SDRAM, {} DTCM, {} cycles",
            pop.label,
            slice,
            container.sdram.fixed(),
            container.sdram.per_timestep(),
            container.dtcm_bytes,
            container.cpu_cycles
        );

        self.cache.stats.container_builds += 1;
        self.cache.containers.insert(slice, container.clone());
        container
    }

    /// Synaptic matrix bytes for every incoming projection, cached per slice
    pub fn all_syn_block_size(&mut self, slice: AtomSlice) -> u64 {
        if let Some(&size) = self.cache.synaptic_blocks.get(&slice) {
            return size;
        }
        let size = synaptic_matrix_bytes(&self.population, slice.n_atoms());
        self.cache.stats.synaptic_block_builds += 1;
        self.cache.synaptic_blocks.insert(slice, size);
        size
    }

    /// Structural plasticity bytes, cached per slice (0 if not structural)
    pub fn structural_size(&mut self, slice: AtomSlice) -> u64 {
        if let Some(&size) = self.cache.structural.get(&slice) {
            return size;
        }
        let size = structural_bytes(&self.population, slice.n_atoms());
        self.cache.stats.structural_builds += 1;
        self.cache.structural.insert(slice, size);
        size
    }

    /// On-chip generator metadata bytes, computed once per population
    pub fn connection_builder_size(&mut self) -> u64 {
        if let Some(size) = self.cache.connection_builder {
            return size;
        }
        let size = connection_builder_bytes(&self.population);
        self.cache.stats.connection_builder_builds += 1;
        self.cache.connection_builder = Some(size);
        size
    }

    /// Filter, key map and builder region costs, computed once per population
    pub fn bitfield_sdram(&mut self) -> MultiRegionSdram {
        if let Some(sdram) = &self.cache.bitfield {
            return sdram.clone();
        }
        let mut sdram = MultiRegionSdram::new();
        sdram.add_cost(PopulationRegion::BitFieldFilter, bit_field_filter_bytes(&self.population));
        sdram.add_cost(PopulationRegion::BitFieldKeyMap, bit_field_key_map_bytes(&self.population));
        sdram.add_cost(PopulationRegion::BitFieldBuilder, BIT_FIELD_BUILDER_BYTES);
        self.cache.stats.bitfield_builds += 1;
        self.cache.bitfield = Some(sdram.clone());
        sdram
    }

    /// Ring buffer left shift and weight scale for each synapse type
    ///
    /// The expected input per tick is bounded at `ring_buffer_sigma`
    /// standard deviations above the Poisson mean and multiplied by the
    /// largest weight. The shift is the number of bits that bound needs.
    pub fn synaptic_scaling(&self) -> (Arc<[u32]>, Arc<[f64]>) {
        let pop = &self.population;
        let n_types = pop.neuron.n_synapse_types as usize;
        let mut mean_input = vec![0.0_f64; n_types];
        let mut max_weight = vec![0.0_f64; n_types];
        let spikes_per_tick = pop.spikes_per_second * self.simulation.timestep_seconds();

        for proj in &pop.incoming_projections {
            let Some(t) = usize::try_from(proj.synapse_type).ok().filter(|&t| t < n_types) else {
                continue;
            };
            mean_input[t] += proj.connector.expected_in_degree(proj.pre_n_atoms) * spikes_per_tick;
            max_weight[t] = max_weight[t].max(proj.weight.abs());
        }

        let shifts: Arc<[u32]> = mean_input
            .iter()
            .zip(&max_weight)
            .map(|(&mean, &weight)| {
                let bound = (mean + pop.ring_buffer_sigma * mean.sqrt()) * weight;
                if bound <= 1.0 {
                    0
                } else {
                    // bound > 1 so the ceiling is a small positive integer
                    (bound.log2().ceil() as u32).min(MAX_RING_BUFFER_SHIFT)
                }
            })
            .collect();
        let scales: Arc<[f64]> = shifts
            .iter()
            .map(|&shift| f64::from(1u32 << (MAX_RING_BUFFER_SHIFT - shift)))
            .collect();

        debug!("{} ring buffer shifts {:?}", pop.label, shifts);
        (shifts, scales)
    }
}

// ── Per-region costs ─────────────────────────────────────────────────────────

fn neuron_params_bytes(pop: &Population, n: u32) -> u64 {
    NEURON_HEADER_BYTES + pop.neuron.global_params_bytes + u64::from(n) * pop.neuron.param_bytes_per_neuron
}

fn synapse_params_bytes(pop: &Population) -> u64 {
    // n_synapse_types, n_neurons_peak, then one shift per type
    (2 + u64::from(pop.neuron.n_synapse_types)) * WORD
}

fn synapse_dynamics_bytes(pop: &Population, n: u32) -> u64 {
    pop.synapse_dynamics
        .stdp()
        .map_or(0, |stdp| stdp.params_bytes + u64::from(n) * stdp.post_trace_bytes_per_neuron)
}

fn structural_bytes(pop: &Population, n: u32) -> u64 {
    match pop.synapse_dynamics {
        crate::population::SynapseDynamics::Structural { s_max, .. } => {
            let n_proj = pop.incoming_projections.len() as u64;
            (STRUCTURAL_HEADER_WORDS + STRUCTURAL_WORDS_PER_PROJECTION * n_proj) * WORD
                + u64::from(n) * u64::from(s_max) * WORD
        }
        _ => 0,
    }
}

fn synaptic_matrix_bytes(pop: &Population, n: u32) -> u64 {
    let header_words = match pop.synapse_dynamics.stdp() {
        None => STATIC_ROW_HEADER_WORDS,
        Some(stdp) => PLASTIC_ROW_HEADER_WORDS + stdp.pre_trace_bytes.div_ceil(WORD),
    };
    pop.incoming_projections
        .iter()
        .filter(|proj| !pop.uses_direct_matrix(proj))
        .map(|proj| {
            let row_words = header_words + u64::from(proj.connector.max_row_length(n));
            u64::from(proj.pre_n_atoms) * row_words * WORD
        })
        .sum()
}

fn direct_matrix_bytes(pop: &Population) -> u64 {
    let words: u64 = pop
        .incoming_projections
        .iter()
        .filter(|proj| pop.uses_direct_matrix(proj))
        .map(|proj| u64::from(proj.pre_n_atoms))
        .sum();
    WORD + words * WORD
}

fn pop_table_bytes(pop: &Population) -> u64 {
    let entries: u64 = pop
        .incoming_projections
        .iter()
        .map(|proj| u64::from(proj.pre_vertices()))
        .sum();
    (POP_TABLE_HEADER_WORDS + POP_TABLE_ENTRY_WORDS * entries) * WORD
}

fn connection_builder_bytes(pop: &Population) -> u64 {
    let generated: Vec<_> = pop
        .incoming_projections
        .iter()
        .filter(|proj| proj.generate_on_chip)
        .collect();
    if generated.is_empty() {
        return 0;
    }
    let words: u64 = generated
        .iter()
        .map(|proj| GENERATOR_MATRIX_WORDS + proj.connector.generator_words())
        .sum();
    (CONNECTION_BUILDER_HEADER_WORDS + words) * WORD
}

fn bit_field_filter_bytes(pop: &Population) -> u64 {
    // n_filters, then per pre-vertex: key, n_words, bit words
    let words: u64 = pop
        .incoming_projections
        .iter()
        .flat_map(|proj| proj.pre_vertex_sizes())
        .map(|atoms| 2 + u64::from(atoms.div_ceil(32)))
        .sum();
    (1 + words) * WORD
}

fn bit_field_key_map_bytes(pop: &Population) -> u64 {
    let vertices: u64 = pop
        .incoming_projections
        .iter()
        .map(|proj| u64::from(proj.pre_vertices()))
        .sum();
    (1 + 2 * vertices) * WORD
}

fn profiling_bytes(pop: &Population) -> u64 {
    if pop.n_profile_samples == 0 {
        return 0;
    }
    // sample count, then (time, tag) pairs
    WORD + 2 * WORD * u64::from(pop.n_profile_samples)
}

fn recording_header_bytes(pop: &Population) -> u64 {
    // n_recordables, then (sampling interval, buffer pointer) per recordable
    WORD + 2 * WORD * pop.recording.len() as u64
}

fn recording_sdram(pop: &Population, n: u32) -> VariableSdram {
    pop.recording
        .iter()
        .map(|rec| VariableSdram::new(WORD, rec.bytes_per_timestep(n)))
        .fold(VariableSdram::default(), |acc, cost| acc + cost)
}

fn dtcm_bytes(pop: &Population, n: u32) -> u64 {
    let n = u64::from(n);
    let types = u64::from(pop.neuron.n_synapse_types);
    SYNAPSE_BASE_DTCM_BYTES
        + n * pop.neuron.dtcm_bytes_per_neuron
        + n * types * RING_BUFFER_SLOTS * RING_BUFFER_SLOT_BYTES
}

fn cpu_cycles(pop: &Population, n: u32) -> u64 {
    let n = u64::from(n);
    let types = u64::from(pop.neuron.n_synapse_types);
    BASE_CPU_CYCLES + n * pop.neuron.cpu_cycles_per_neuron + n * types * CYCLES_PER_SYNAPSE_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, Projection};
    use crate::population::{NeuronModel, Recordable, RecordingConfig, StdpParameters, SynapseDynamics};

    fn slice(lo: u32, hi: u32) -> AtomSlice {
        AtomSlice::new(lo, hi).unwrap()
    }

    fn population() -> Population {
        Population::new("target", 1000, NeuronModel::lif_curr_exp())
            .with_projection(Projection::new("a2a", 300, Connector::AllToAll))
            .with_projection(Projection::new("o2o", 1000, Connector::OneToOne).with_synapse_type(1))
            .with_recording(RecordingConfig {
                neuron: vec![Recordable::state("v")],
                synapse: vec![Recordable::state("gsyn_exc")],
            })
    }

    fn estimator(pop: Population) -> SliceCostEstimator {
        SliceCostEstimator::new(Arc::new(pop), SimulationParameters::default())
    }

    #[test]
    fn repeated_cost_is_identical_and_not_recomputed() {
        let mut est = estimator(population());
        let first = est.cost(slice(0, 100));
        let second = est.cost(slice(0, 100));
        assert_eq!(first, second);

        let stats = est.stats();
        assert_eq!(stats.container_builds, 1);
        assert_eq!(stats.container_hits, 1);
        assert_eq!(stats.synaptic_block_builds, 1);
    }

    #[test]
    fn population_singletons_computed_once() {
        let mut est = estimator(population());
        est.cost(slice(0, 100));
        est.cost(slice(100, 250));
        est.cost(slice(250, 1000));

        let stats = est.stats();
        assert_eq!(stats.container_builds, 3);
        assert_eq!(stats.connection_builder_builds, 1);
        assert_eq!(stats.bitfield_builds, 1);
        assert_eq!(stats.synaptic_block_builds, 3);
    }

    #[test]
    fn reset_forces_recompute() {
        let mut est = estimator(population());
        est.cost(slice(0, 10));
        est.reset();
        assert!(est.cache().is_empty());
        est.cost(slice(0, 10));
        assert_eq!(est.stats().container_builds, 2);
        assert_eq!(est.stats().bitfield_builds, 2);
    }

    #[test]
    fn variable_recording_is_per_tick() {
        let mut est = estimator(population());
        let cost = est.cost(slice(0, 10));
        let rec = cost.sdram.region(PopulationRegion::VariableRecording).unwrap();
        // two 32-bit recordables, one bookkeeping word each
        assert_eq!(rec, VariableSdram::new(8, 80));
    }

    #[test]
    fn one_to_one_static_uses_direct_matrix() {
        let mut est = estimator(population());
        let cost = est.cost(slice(0, 10));
        let direct = cost.sdram.region(PopulationRegion::DirectMatrix).unwrap();
        assert_eq!(direct.fixed, 4 + 1000 * 4);
        // only the all-to-all rows: 300 rows of (3 + 10) words
        assert_eq!(est.all_syn_block_size(slice(0, 10)), 300 * 13 * 4);
    }

    #[test]
    fn pop_table_counts_pre_vertices() {
        let mut est = estimator(population());
        let cost = est.cost(slice(0, 10));
        // 300 atoms -> 2 vertices, 1000 atoms -> 4 vertices
        let table = cost.sdram.region(PopulationRegion::PopTable).unwrap();
        assert_eq!(table.fixed, (2 + 4 * 6) * 4);
        let key_map = cost.sdram.region(PopulationRegion::BitFieldKeyMap).unwrap();
        assert_eq!(key_map.fixed, (1 + 2 * 6) * 4);
    }

    #[test]
    fn no_generated_projections_means_no_builder() {
        let pop = Population::new("host", 10, NeuronModel::lif_curr_exp())
            .with_projection(Projection::new("p", 10, Connector::AllToAll).with_generate_on_chip(false));
        let mut est = estimator(pop);
        assert_eq!(est.connection_builder_size(), 0);
    }

    #[test]
    fn structural_cost_only_when_structural() {
        let mut est = estimator(population());
        assert!(est.cost(slice(0, 10)).sdram.region(PopulationRegion::StructuralDynamics).is_none());

        let structural = population().with_synapse_dynamics(SynapseDynamics::Structural {
            stdp: StdpParameters::default(),
            s_max: 8,
        });
        let mut est = estimator(structural);
        let cost = est.cost(slice(0, 10));
        let region = cost.sdram.region(PopulationRegion::StructuralDynamics).unwrap();
        assert_eq!(region.fixed, (10 + 6 * 2) * 4 + 10 * 8 * 4);
        assert!(cost.sdram.region(PopulationRegion::SynapseDynamics).is_some());
    }

    #[test]
    fn plastic_rows_are_larger() {
        let mut static_est = estimator(population());
        let mut plastic_est = estimator(
            population().with_synapse_dynamics(SynapseDynamics::Stdp(StdpParameters::default())),
        );
        let s = slice(0, 50);
        assert!(plastic_est.all_syn_block_size(s) > static_est.all_syn_block_size(s));
    }

    #[test]
    fn ring_buffer_shift_bounds_input() {
        let pop = Population::new("p", 10, NeuronModel::lif_curr_exp())
            .with_projection(Projection::new("exc", 1000, Connector::AllToAll));
        let est = estimator(pop);
        let (shifts, scales) = est.synaptic_scaling();
        // mean 10 spikes/tick, bound 10 + 5 * sqrt(10) = 25.8 -> 5 bits
        assert_eq!(&*shifts, &[5, 0]);
        assert!((scales[0] - 2048.0).abs() < f64::EPSILON);
        assert!((scales[1] - 65536.0).abs() < f64::EPSILON);
    }
}
