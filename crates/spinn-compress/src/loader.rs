//! Writing compression jobs to chips
//!
//! For each chip three regions are secured first, then written, then
//! published through the target core's user registers:
//!
//! | Register | Region |
//! |----------|--------|
//! | USER1 | routing table and compressor flags |
//! | USER2 | bitfield address list |
//! | USER3 | spare memory list |
//!
//! Nothing is written until all three regions are secured, so a chip that
//! runs out of scratch is left untouched and goes to the host.

use crate::error::{CompressionError, Result};
use crate::payload::{AddressList, BitFieldAddress, CompressionInput, SpareList};
use crate::scratch::{ScratchAllocator, ScratchSource, SpareMemoryPool};
use crate::transport::{AppId, Transceiver};
use spinn_chip::regs::{ADDRESS_LIST_REGISTER, ROUTING_TABLE_REGISTER, SPARE_LIST_REGISTER};
use spinn_chip::{ChipCoordinate, CoreLocation, MulticastRoutingTable};
use tracing::debug;

/// Everything needed to load one chip
#[derive(Debug, Clone)]
pub struct ChipWork<'t> {
    /// Uncompressed table
    pub table: &'t MulticastRoutingTable,
    /// Core that will run the compressor
    pub target: CoreLocation,
    /// Bitfield records of the chip's participating cores
    pub addresses: Vec<BitFieldAddress>,
    /// Spare memory of the chip, owned by this job
    pub pool: SpareMemoryPool,
}

/// A chip ready for the compressor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedJob {
    /// Chip
    pub chip: ChipCoordinate,
    /// Core that runs the compressor
    pub target: CoreLocation,
    /// Routing table region
    pub table_address: u32,
    /// Address list region
    pub address_list_address: u32,
    /// Spare list region
    pub spare_list_address: u32,
    /// Some region came from synaptic matrix memory
    pub used_stolen_memory: bool,
}

/// A chip that will not be compressed on device
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// Chip
    pub chip: ChipCoordinate,
    /// Why
    pub error: CompressionError,
    /// Device memory may have been overwritten before the failure
    pub memory_touched: bool,
}

/// Serialises compression jobs into device memory
#[derive(Debug, Clone, Copy)]
pub struct CompressionJobLoader<'a> {
    transceiver: &'a dyn Transceiver,
    compressor_app_id: AppId,
    table_app_id: AppId,
    compress_only_when_needed: bool,
    compress_as_much_as_possible: bool,
    time_per_iteration_us: u32,
}

impl<'a> CompressionJobLoader<'a> {
    /// Loader allocating under `compressor_app_id` for tables of `table_app_id`
    pub fn new(
        transceiver: &'a dyn Transceiver,
        compressor_app_id: AppId,
        table_app_id: AppId,
        compress_only_when_needed: bool,
        compress_as_much_as_possible: bool,
        time_per_iteration_us: u32,
    ) -> Self {
        Self {
            transceiver,
            compressor_app_id,
            table_app_id,
            compress_only_when_needed,
            compress_as_much_as_possible,
            time_per_iteration_us,
        }
    }

    /// Secure, write and publish the three regions of one chip
    ///
    /// # Errors
    ///
    /// A [`LoadFailure`] whose error is [`CompressionError::OutOfScratch`]
    /// when memory runs out, or a transport error if a write fails.
    pub fn load(&self, work: ChipWork<'_>) -> std::result::Result<LoadedJob, LoadFailure> {
        let chip = work.table.chip;
        let mut pool = work.pool;
        let allocator = ScratchAllocator::new(self.transceiver, self.compressor_app_id);
        let untouched = |error| LoadFailure {
            chip,
            error,
            memory_touched: false,
        };

        let table_grant = allocator
            .allocate(chip, CompressionInput::encoded_len(work.table.len()), &mut pool)
            .map_err(untouched)?;
        let list_grant = allocator
            .allocate(chip, AddressList::encoded_len(work.addresses.len()), &mut pool)
            .map_err(untouched)?;
        // sized before encoding so the list reflects every steal above and this one
        let spare_grant = allocator
            .allocate(chip, SpareList::encoded_len(pool.len()), &mut pool)
            .map_err(untouched)?;

        let input = CompressionInput {
            app_id: u32::from(self.table_app_id),
            compress_only_when_needed: self.compress_only_when_needed,
            compress_as_much_as_possible: self.compress_as_much_as_possible,
            entries: work.table.entries.clone(),
        };
        let list = AddressList {
            entries: work.addresses,
            time_per_iteration_us: self.time_per_iteration_us,
        };
        let spare = SpareList::from_pool(&pool);

        self.publish(
            work.target,
            &[
                (table_grant.address, input.encode().as_ref()),
                (list_grant.address, list.encode().as_ref()),
                (spare_grant.address, spare.encode().as_ref()),
            ],
        )
        .map_err(|e| LoadFailure {
            chip,
            error: e.into(),
            memory_touched: true,
        })?;

        let used_stolen_memory = [table_grant, list_grant, spare_grant]
            .iter()
            .any(|g| g.source == ScratchSource::Stolen);
        debug!(
            "Loaded compression job for {} on {} (table 0x{:08x}, list 0x{:08x}, spare 0x{:08x}{})",
            chip,
            work.target,
            table_grant.address,
            list_grant.address,
            spare_grant.address,
            if used_stolen_memory { ", stolen" } else { "" }
        );

        Ok(LoadedJob {
            chip,
            target: work.target,
            table_address: table_grant.address,
            address_list_address: list_grant.address,
            spare_list_address: spare_grant.address,
            used_stolen_memory,
        })
    }

    fn publish(&self, target: CoreLocation, regions: &[(u32, &[u8]); 3]) -> crate::error::TransportResult<()> {
        let chip = target.chip();
        for &(address, data) in regions {
            self.transceiver.write_memory(chip, address, data)?;
        }
        let registers = [ROUTING_TABLE_REGISTER, ADDRESS_LIST_REGISTER, SPARE_LIST_REGISTER];
        for (&(address, _), register) in regions.iter().zip(registers) {
            self.transceiver.write_user_register(target, register, address)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::VirtualMachine;
    use spinn_chip::{Route, RoutingEntry};

    const COMPRESSOR_APP: AppId = 17;

    fn table() -> MulticastRoutingTable {
        let entries = (0..3)
            .map(|k| RoutingEntry::new(k, u32::MAX, Route::new(&[0], &[])))
            .collect();
        MulticastRoutingTable::new(ChipCoordinate::new(0, 0), entries)
    }

    fn work(table: &MulticastRoutingTable, pool: SpareMemoryPool) -> ChipWork<'_> {
        ChipWork {
            table,
            target: CoreLocation::new(0, 0, 1),
            addresses: Vec::new(),
            pool,
        }
    }

    fn read_spare_list(vm: &VirtualMachine, core: CoreLocation) -> SpareList {
        let address = vm.read_user_register(core, SPARE_LIST_REGISTER).unwrap();
        let n = vm.read_word(core.chip(), address).unwrap() as usize;
        let data = vm
            .read_memory(core.chip(), address, SpareList::encoded_len(n) as usize)
            .unwrap();
        SpareList::decode(&data).unwrap()
    }

    #[test]
    fn regions_are_published_in_user_registers() {
        let vm = VirtualMachine::new();
        let table = table();
        let loader = CompressionJobLoader::new(&vm, COMPRESSOR_APP, 30, true, false, 1000);
        let job = loader.load(work(&table, SpareMemoryPool::new())).unwrap();

        let target = job.target;
        assert_eq!(vm.read_user_register(target, ROUTING_TABLE_REGISTER).unwrap(), job.table_address);
        assert_eq!(vm.read_user_register(target, ADDRESS_LIST_REGISTER).unwrap(), job.address_list_address);
        assert_eq!(vm.read_user_register(target, SPARE_LIST_REGISTER).unwrap(), job.spare_list_address);
        assert!(!job.used_stolen_memory);

        let data = vm
            .read_memory(target.chip(), job.table_address, CompressionInput::encoded_len(3) as usize)
            .unwrap();
        let input = CompressionInput::decode(&data).unwrap();
        assert_eq!(input.app_id, 30);
        assert_eq!(input.entries, table.entries);
        assert!(read_spare_list(&vm, target).blocks.is_empty());
    }

    #[test]
    fn out_of_scratch_leaves_chip_untouched() {
        let vm = VirtualMachine::new();
        let table = table();
        vm.fail_malloc_on(table.chip);
        let loader = CompressionJobLoader::new(&vm, COMPRESSOR_APP, 30, true, false, 1000);

        let failure = loader.load(work(&table, SpareMemoryPool::new())).unwrap_err();
        assert!(matches!(failure.error, CompressionError::OutOfScratch { .. }));
        assert!(!failure.memory_touched);
        let target = CoreLocation::new(0, 0, 1);
        assert_eq!(vm.read_user_register(target, ROUTING_TABLE_REGISTER).unwrap(), 0);
    }

    #[test]
    fn spare_list_reflects_every_steal() {
        let vm = VirtualMachine::new();
        let table = table();
        vm.fail_malloc_on(table.chip);
        let base = 0x7000_0000;
        let loader = CompressionJobLoader::new(&vm, COMPRESSOR_APP, 30, true, false, 1000);

        let job = loader
            .load(work(&table, SpareMemoryPool::from_blocks([(base, 1024)])))
            .unwrap();
        assert!(job.used_stolen_memory);
        assert_eq!(job.table_address, base);

        // table 64 bytes, empty address list 8, one-block spare list 12
        let used = 64 + 8 + 12;
        assert_eq!(job.address_list_address, base + 64);
        assert_eq!(job.spare_list_address, base + 72);
        assert_eq!(read_spare_list(&vm, job.target).blocks, vec![(base + used, 1024 - used)]);
    }

    #[test]
    fn failed_write_marks_memory_touched() {
        let vm = VirtualMachine::new();
        let table = table();
        vm.fail_writes_on(table.chip);
        let loader = CompressionJobLoader::new(&vm, COMPRESSOR_APP, 30, true, false, 1000);

        let failure = loader.load(work(&table, SpareMemoryPool::new())).unwrap_err();
        assert!(matches!(failure.error, CompressionError::Transport(_)));
        assert!(failure.memory_touched);
    }
}
