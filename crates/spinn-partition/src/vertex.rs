//! Machine vertices: one core's share of a population.

use crate::resources::ResourceContainer;
use crate::slice::AtomSlice;
use std::sync::Arc;

/// Part of the synaptic matrix region that the synapse expander rewrites
///
/// The expander regenerates this span from connector parameters, so other
/// users may borrow it as scratch as long as the expander runs afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratableArea {
    /// Byte offset from the start of the synaptic matrix region
    pub offset: u32,

    /// Span length in bytes
    pub size: u32,
}

/// One slice of a population, as assigned to one core
#[derive(Debug, Clone, PartialEq)]
pub struct MachineVertex {
    index: usize,
    label: String,
    slice: AtomSlice,
    resources: ResourceContainer,
    ring_buffer_shifts: Arc<[u32]>,
    weight_scales: Arc<[f64]>,
    all_syn_block_size: u64,
    structural_size: u64,
    bit_field_capable: bool,
    on_chip_generatable: Option<GeneratableArea>,
}

impl MachineVertex {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        label: String,
        slice: AtomSlice,
        resources: ResourceContainer,
        ring_buffer_shifts: Arc<[u32]>,
        weight_scales: Arc<[f64]>,
        all_syn_block_size: u64,
        structural_size: u64,
        bit_field_capable: bool,
    ) -> Self {
        Self {
            index,
            label,
            slice,
            resources,
            ring_buffer_shifts,
            weight_scales,
            all_syn_block_size,
            structural_size,
            bit_field_capable,
            on_chip_generatable: None,
        }
    }

    /// Position among the vertices of the same population, from 0
    pub fn index(&self) -> usize {
        self.index
    }

    /// Label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Atoms simulated by this core
    pub fn slice(&self) -> AtomSlice {
        self.slice
    }

    /// Resources reserved for the core
    pub fn resources(&self) -> &ResourceContainer {
        &self.resources
    }

    /// Ring buffer left shift per synapse type (shared by the population)
    pub fn ring_buffer_shifts(&self) -> &Arc<[u32]> {
        &self.ring_buffer_shifts
    }

    /// Weight scale per synapse type (shared by the population)
    pub fn weight_scales(&self) -> &Arc<[f64]> {
        &self.weight_scales
    }

    /// Synaptic matrix bytes for every incoming projection
    pub fn all_syn_block_size(&self) -> u64 {
        self.all_syn_block_size
    }

    /// Structural plasticity bytes
    pub fn structural_size(&self) -> u64 {
        self.structural_size
    }

    /// The core builds bitfield filters for its incoming traffic
    pub fn bit_field_capable(&self) -> bool {
        self.bit_field_capable
    }

    /// Record the span of the synaptic matrix that is generated on chip
    pub fn set_on_chip_generatable_area(&mut self, offset: u32, size: u32) {
        self.on_chip_generatable = Some(GeneratableArea { offset, size });
    }

    /// Span of the synaptic matrix that is generated on chip
    pub fn on_chip_generatable_area(&self) -> Option<GeneratableArea> {
        self.on_chip_generatable
    }
}
