//! Placed vertices and their bitfield capability
//!
//! Whether a vertex takes part in bitfield compression is decided when the
//! graph is built. The collector only asks [`PlacedVertex::as_bitfield_capable`].

use crate::error::{TransportError, TransportResult};
use crate::transport::Transceiver;
use spinn_chip::{CoreLocation, PopulationRegion};
use spinn_partition::MachineVertex;
use std::fmt::Debug;
use std::sync::Arc;

/// A vertex placed on a core
pub trait PlacedVertex: Debug + Send + Sync {
    /// Label for logs
    fn label(&self) -> &str;

    /// Bitfield compression support, if the vertex has it
    fn as_bitfield_capable(&self) -> Option<&dyn BitFieldRoutingCompression> {
        None
    }
}

/// Device-side locations a bitfield-generating core exposes
pub trait BitFieldRoutingCompression: Debug + Send + Sync {
    /// Address of the bitfield filter region on `core`
    ///
    /// # Errors
    ///
    /// Returns error if the region table cannot be read.
    fn bit_field_base_address(&self, transceiver: &dyn Transceiver, core: CoreLocation) -> TransportResult<u32>;

    /// Address of the key to atom-count map on `core`
    ///
    /// # Errors
    ///
    /// Returns error if the region table cannot be read.
    fn key_to_atom_map_address(&self, transceiver: &dyn Transceiver, core: CoreLocation) -> TransportResult<u32>;

    /// Synaptic matrix span the synapse expander can regenerate, as
    /// `(address, size)`; `None` if there is none
    ///
    /// # Errors
    ///
    /// Returns error if the region table cannot be read.
    fn regeneratable_sdram(
        &self,
        transceiver: &dyn Transceiver,
        core: CoreLocation,
    ) -> TransportResult<Option<(u32, u32)>>;
}

/// A vertex and the core it runs on
#[derive(Debug, Clone)]
pub struct Placement {
    /// The vertex
    pub vertex: Arc<dyn PlacedVertex>,
    /// Its core
    pub location: CoreLocation,
}

impl Placement {
    /// Place `vertex` on `location`
    pub fn new(vertex: Arc<dyn PlacedVertex>, location: CoreLocation) -> Self {
        Self { vertex, location }
    }
}

impl PlacedVertex for MachineVertex {
    fn label(&self) -> &str {
        MachineVertex::label(self)
    }

    fn as_bitfield_capable(&self) -> Option<&dyn BitFieldRoutingCompression> {
        if self.bit_field_capable() {
            Some(self)
        } else {
            None
        }
    }
}

impl BitFieldRoutingCompression for MachineVertex {
    fn bit_field_base_address(&self, transceiver: &dyn Transceiver, core: CoreLocation) -> TransportResult<u32> {
        transceiver.locate_memory_region(core, PopulationRegion::BitFieldFilter.id())
    }

    fn key_to_atom_map_address(&self, transceiver: &dyn Transceiver, core: CoreLocation) -> TransportResult<u32> {
        transceiver.locate_memory_region(core, PopulationRegion::BitFieldKeyMap.id())
    }

    fn regeneratable_sdram(
        &self,
        transceiver: &dyn Transceiver,
        core: CoreLocation,
    ) -> TransportResult<Option<(u32, u32)>> {
        match self.on_chip_generatable_area() {
            Some(area) if area.size > 0 => {
                let matrix = transceiver.locate_memory_region(core, PopulationRegion::SynapticMatrix.id())?;
                let start = matrix
                    .checked_add(area.offset)
                    .filter(|start| start.checked_add(area.size).is_some())
                    .ok_or_else(|| {
                        TransportError::unexpected_response(
                            "locate_memory_region",
                            format!(
                                "synaptic matrix of {core} at 0x{matrix:08x} cannot hold {} bytes at offset {}",
                                area.size, area.offset
                            ),
                        )
                    })?;
                Ok(Some((start, area.size)))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::VirtualMachine;
    use crate::payload::{BitFieldRegion, KeyAtomMap};
    use spinn_partition::{
        Connector, CoreLimits, NeuronModel, Population, Projection, SimulationParameters, VertexSplitter,
    };

    fn vertex() -> MachineVertex {
        let sim = SimulationParameters::default();
        let population = Population::new("pop", 16, NeuronModel::lif_curr_exp())
            .with_projection(Projection::new("source", 16, Connector::AllToAll));
        let mut vertices = VertexSplitter::new(Arc::new(population), sim)
            .split(&CoreLimits::for_simulation(&sim))
            .unwrap();
        vertices.remove(0)
    }

    fn populated(vm: &VirtualMachine, core: CoreLocation) -> u32 {
        vm.write_population_core(core, &BitFieldRegion::default(), &KeyAtomMap::default(), 1024)
    }

    #[test]
    fn generatable_area_is_offset_into_matrix() {
        let vm = VirtualMachine::new();
        let core = CoreLocation::new(0, 0, 1);
        let matrix = populated(&vm, core);
        let mut vertex = vertex();
        assert_eq!(vertex.regeneratable_sdram(&vm, core).unwrap(), None);

        vertex.set_on_chip_generatable_area(256, 512);
        assert_eq!(vertex.regeneratable_sdram(&vm, core).unwrap(), Some((matrix + 256, 512)));
    }

    #[test]
    fn area_past_the_address_space_is_rejected() {
        let vm = VirtualMachine::new();
        let core = CoreLocation::new(0, 0, 1);
        populated(&vm, core);
        let mut vertex = vertex();

        vertex.set_on_chip_generatable_area(u32::MAX, 16);
        assert!(vertex.regeneratable_sdram(&vm, core).is_err());

        vertex.set_on_chip_generatable_area(0, u32::MAX);
        assert!(vertex.regeneratable_sdram(&vm, core).is_err());
    }
}
