//! Per-chip bitfield addresses and spare memory
//!
//! One pass over the placements gathers, for every chip with a
//! bitfield-generating core:
//!
//! | Map | Contents |
//! |-----|----------|
//! | `addresses` | (bitfield, key map, processor) of each such core |
//! | `spare` | reclaimable synaptic matrix spans |
//! | `targets` | the first such core met, which runs the compressor |
//! | `participating` | every such core, for the expander re-run |
//!
//! All maps follow placement order.

use crate::error::Result;
use crate::payload::BitFieldAddress;
use crate::scratch::SpareMemoryPool;
use crate::transport::Transceiver;
use crate::vertex::Placement;
use indexmap::IndexMap;
use spinn_chip::{ChipCoordinate, CoreLocation};
use tracing::{debug, info};

/// What the collector found on each chip
#[derive(Debug, Clone, Default)]
pub struct CollectedResources {
    /// Bitfield records per chip
    pub addresses: IndexMap<ChipCoordinate, Vec<BitFieldAddress>>,
    /// Spare memory per chip
    pub spare: IndexMap<ChipCoordinate, SpareMemoryPool>,
    /// Core that runs the compressor on each chip
    pub targets: IndexMap<ChipCoordinate, CoreLocation>,
    /// Bitfield-generating cores per chip
    pub participating: IndexMap<ChipCoordinate, Vec<CoreLocation>>,
}

impl CollectedResources {
    /// Compressor target of `chip`
    pub fn target(&self, chip: ChipCoordinate) -> Option<CoreLocation> {
        self.targets.get(&chip).copied()
    }
}

/// Walks placements to find bitfield data and spare memory
#[derive(Debug, Clone, Copy)]
pub struct ChipResourceCollector<'a> {
    transceiver: &'a dyn Transceiver,
}

impl<'a> ChipResourceCollector<'a> {
    /// Collector reading through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver) -> Self {
        Self { transceiver }
    }

    /// Visit every placement
    ///
    /// # Errors
    ///
    /// Returns error if a core's region table cannot be read.
    pub fn collect(&self, placements: &[Placement]) -> Result<CollectedResources> {
        let mut collected = CollectedResources::default();

        for placement in placements {
            let Some(capable) = placement.vertex.as_bitfield_capable() else {
                continue;
            };
            let core = placement.location;
            let chip = core.chip();

            let bit_field = capable.bit_field_base_address(self.transceiver, core)?;
            let key_map = capable.key_to_atom_map_address(self.transceiver, core)?;
            collected.addresses.entry(chip).or_default().push(BitFieldAddress {
                bit_field,
                key_map,
                processor: core.p,
            });

            let pool = collected.spare.entry(chip).or_default();
            if let Some((address, size)) = capable
                .regeneratable_sdram(self.transceiver, core)?
                .filter(|&(_, size)| size > 0)
            {
                debug!(
                    "{} on {} offers {} spare bytes at 0x{:08x}",
                    placement.vertex.label(),
                    core,
                    size,
                    address
                );
                pool.push(address, size);
            }

            collected.targets.entry(chip).or_insert(core);
            collected.participating.entry(chip).or_default().push(core);
        }

        info!(
            "Found {} bitfield cores on {} chips",
            collected.participating.values().map(Vec::len).sum::<usize>(),
            collected.targets.len()
        );
        Ok(collected)
    }
}
