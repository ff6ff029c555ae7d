// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual machine) backend
//!
//! Implements [`Transceiver`] and [`DiagnosticsProvider`] over an in-memory
//! model of the machine, so the whole compression pipeline runs without
//! hardware:
//!
//! | Device feature | Model |
//! |----------------|-------|
//! | SDRAM | sparse 4 KiB pages per chip, zero when unwritten |
//! | `malloc_sdram` | bump allocator with a per-chip capacity |
//! | User registers | ordinary memory at their mapped addresses |
//! | Router | one installed table per chip |
//! | IOBUF | tagged lines per core (`[ERROR] ...`, `[WARNING] ...`) |
//!
//! Launching the compressor runs the host compression algorithm on the
//! payloads named by the target core's registers, installs the result and
//! writes the outcome word, all before `launch` returns. Launching the
//! expander marks each core finished.
//!
//! Faults can be injected per chip or core; see the `fail_*` methods.

use crate::bitfield::read_bit_fields;
use crate::compression::{compress_with_bit_fields, CompressionSettings};
use crate::error::{CompressionError, TransportError, TransportResult};
use crate::payload::{AddressList, BitFieldRegion, CompressionInput, KeyAtomMap, SpareList};
use crate::transport::{AppId, DiagnosticsProvider, IobufLine, IobufReport, Transceiver};
use bytes::{BufMut, Bytes, BytesMut};
use spinn_chip::program::{BIT_FIELD_COMPRESSOR_APLX, SYNAPSE_EXPANDER_APLX};
use spinn_chip::regs::{
    self, ADDRESS_LIST_REGISTER, OUTCOME_REGISTER, OUTCOME_SUCCESS, REGION_TABLE_HEADER_WORDS,
    REGION_TABLE_REGISTER, ROUTING_TABLE_REGISTER, SPARE_LIST_REGISTER,
};
use spinn_chip::sdram::{SDRAM_BASE, WORD_BYTES};
use spinn_chip::{ChipCoordinate, CoreLocation, CpuState, PopulationRegion, RoutingEntry, MAX_ROUTER_ENTRIES};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const PAGE_BYTES: u32 = 4096;

/// SDRAM `malloc_sdram` may hand out per chip unless configured
pub const DEFAULT_SDRAM_CAPACITY: u32 = 1024 * 1024;

/// Lowest application id handed out
const FIRST_APP_ID: AppId = 17;

/// Outcome written by a compressor with an injected failure
pub const INJECTED_FAILURE_OUTCOME: u32 = 1;

/// Outcome written when the table cannot be made to fit
pub const TABLE_TOO_LARGE_OUTCOME: u32 = 2;

const ERROR_TAG: &str = "[ERROR] ";
const WARNING_TAG: &str = "[WARNING] ";

// ── Machine state ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ChipMemory {
    pages: HashMap<u32, Vec<u8>>,
    /// Bump pointer, relative to `SDRAM_BASE`
    next_free: u32,
    /// Bytes handed out by `malloc_sdram`
    malloc_used: u32,
    /// Share of `malloc_used` owned by each application
    malloc_by_app: HashMap<AppId, u32>,
    routes: Option<Vec<RoutingEntry>>,
}

impl ChipMemory {
    fn write(&mut self, address: u32, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            let at = address.wrapping_add(i as u32);
            let page = self
                .pages
                .entry(at / PAGE_BYTES)
                .or_insert_with(|| vec![0; PAGE_BYTES as usize]);
            page[(at % PAGE_BYTES) as usize] = byte;
        }
    }

    fn read(&self, address: u32, length: usize) -> Bytes {
        let mut out = BytesMut::with_capacity(length);
        for i in 0..length {
            let at = address.wrapping_add(i as u32);
            let byte = self
                .pages
                .get(&(at / PAGE_BYTES))
                .map_or(0, |page| page[(at % PAGE_BYTES) as usize]);
            out.put_u8(byte);
        }
        out.freeze()
    }

    /// Bump-allocate `size` bytes, word aligned
    fn reserve(&mut self, size: u32) -> u32 {
        let address = SDRAM_BASE + self.next_free;
        self.next_free += size.div_ceil(WORD_BYTES) * WORD_BYTES;
        address
    }
}

#[derive(Debug, Clone)]
struct Launch {
    binary: String,
    cores: Vec<CoreLocation>,
}

#[derive(Debug, Default)]
struct Faults {
    malloc: HashSet<ChipCoordinate>,
    writes: HashSet<ChipCoordinate>,
    compressor: HashSet<ChipCoordinate>,
    compressor_hang: HashSet<ChipCoordinate>,
    expander: HashSet<CoreLocation>,
}

#[derive(Debug, Default)]
struct MachineState {
    chips: HashMap<ChipCoordinate, ChipMemory>,
    cpu: HashMap<CoreLocation, CpuState>,
    core_apps: HashMap<CoreLocation, AppId>,
    app_ids: BTreeSet<AppId>,
    iobuf: Vec<(CoreLocation, String)>,
    launches: Vec<Launch>,
    faults: Faults,
}

impl MachineState {
    fn chip(&mut self, chip: ChipCoordinate) -> &mut ChipMemory {
        self.chips.entry(chip).or_default()
    }
}

// ── Virtual machine ──────────────────────────────────────────────────────────

/// In-memory machine
///
/// State sits behind a mutex that is never held across calls back into
/// the transport, so the backend can be driven from many worker threads.
#[derive(Debug)]
pub struct VirtualMachine {
    state: Mutex<MachineState>,
    sdram_capacity: u32,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    /// Empty machine with [`DEFAULT_SDRAM_CAPACITY`] per chip
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MachineState::default()),
            sdram_capacity: DEFAULT_SDRAM_CAPACITY,
        }
    }

    /// Set how much `malloc_sdram` may hand out per chip
    #[must_use]
    pub fn with_sdram_capacity(mut self, bytes: u32) -> Self {
        self.sdram_capacity = bytes;
        self
    }

    fn state(&self) -> MutexGuard<'_, MachineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every `malloc_sdram` on `chip`
    pub fn fail_malloc_on(&self, chip: ChipCoordinate) {
        self.state().faults.malloc.insert(chip);
    }

    /// Fail every write to `chip`
    pub fn fail_writes_on(&self, chip: ChipCoordinate) {
        self.state().faults.writes.insert(chip);
    }

    /// Make the compressor on `chip` report [`INJECTED_FAILURE_OUTCOME`]
    pub fn fail_compressor_on(&self, chip: ChipCoordinate) {
        self.state().faults.compressor.insert(chip);
    }

    /// Make the compressor on `chip` run forever
    pub fn hang_compressor_on(&self, chip: ChipCoordinate) {
        self.state().faults.compressor_hang.insert(chip);
    }

    /// Make the expander crash on `core`
    pub fn fail_expander_on(&self, core: CoreLocation) {
        self.state().faults.expander.insert(core);
    }

    /// Append a line to the I/O buffer of `core`
    pub fn log(&self, core: CoreLocation, line: impl Into<String>) {
        self.state().iobuf.push((core, line.into()));
    }

    /// Lay out a population core's bitfield data and synaptic matrix
    ///
    /// Writes the bitfield filter, key map and synaptic matrix regions,
    /// points the core's region table at them and USER0 at the table.
    /// Returns the synaptic matrix address.
    pub fn write_population_core(
        &self,
        core: CoreLocation,
        bit_fields: &BitFieldRegion,
        key_map: &KeyAtomMap,
        matrix_bytes: u32,
    ) -> u32 {
        let n_regions = PopulationRegion::ALL.len() as u32;
        let mut state = self.state();
        let memory = state.chip(core.chip());

        let table = memory.reserve((REGION_TABLE_HEADER_WORDS + n_regions) * WORD_BYTES);
        let filters = memory.reserve(bit_fields.encoded_len());
        let keys = memory.reserve(key_map.encoded_len());
        let matrix = memory.reserve(matrix_bytes);

        memory.write(filters, &bit_fields.encode());
        memory.write(keys, &key_map.encode());
        for (region, address) in [
            (PopulationRegion::BitFieldFilter, filters),
            (PopulationRegion::BitFieldKeyMap, keys),
            (PopulationRegion::SynapticMatrix, matrix),
        ] {
            memory.write(regs::region_pointer_address(table, region.id()), &address.to_le_bytes());
        }
        memory.write(
            regs::user_register_address(core.p, REGION_TABLE_REGISTER),
            &table.to_le_bytes(),
        );
        debug!(
            "Population core {}: {} filters at 0x{:08x}, matrix 0x{:08x}",
            core,
            bit_fields.filters.len(),
            filters,
            matrix
        );
        matrix
    }

    /// Table installed on `chip`
    pub fn installed_table(&self, chip: ChipCoordinate) -> Option<Vec<RoutingEntry>> {
        self.state().chips.get(&chip).and_then(|m| m.routes.clone())
    }

    /// Every core `binary` was launched on, in launch order
    pub fn launched_cores(&self, binary: &str) -> Vec<CoreLocation> {
        self.state()
            .launches
            .iter()
            .filter(|l| l.binary == binary)
            .flat_map(|l| l.cores.iter().copied())
            .collect()
    }

    /// Application ids currently reserved
    pub fn app_ids_in_use(&self) -> Vec<AppId> {
        self.state().app_ids.iter().copied().collect()
    }

    /// Bytes handed out by `malloc_sdram` on `chip`
    pub fn malloc_used(&self, chip: ChipCoordinate) -> u32 {
        self.state().chips.get(&chip).map_or(0, |m| m.malloc_used)
    }

    fn set_cpu_state(&self, core: CoreLocation, state: CpuState) {
        self.state().cpu.insert(core, state);
    }

    /// Run the compressor on `core`; returns the outcome word
    fn run_compressor(&self, core: CoreLocation) -> crate::error::Result<u32> {
        let chip = core.chip();

        let table_address = self.read_user_register(core, ROUTING_TABLE_REGISTER)?;
        let n_entries = self.read_word(chip, table_address + 3 * WORD_BYTES)? as usize;
        let input = CompressionInput::decode(&self.read_memory(
            chip,
            table_address,
            CompressionInput::encoded_len(n_entries) as usize,
        )?)?;

        let list_address = self.read_user_register(core, ADDRESS_LIST_REGISTER)?;
        let n_cores = self.read_word(chip, list_address)? as usize;
        let list = AddressList::decode(&self.read_memory(
            chip,
            list_address,
            AddressList::encoded_len(n_cores) as usize,
        )?)?;

        let spare_address = self.read_user_register(core, SPARE_LIST_REGISTER)?;
        let n_blocks = self.read_word(chip, spare_address)? as usize;
        let spare = SpareList::decode(&self.read_memory(
            chip,
            spare_address,
            SpareList::encoded_len(n_blocks) as usize,
        )?)?;

        let filters = read_bit_fields(self, chip, &list.entries)?;
        let settings = CompressionSettings {
            compress_only_when_needed: input.compress_only_when_needed,
            compress_as_much_as_possible: input.compress_as_much_as_possible,
            time_per_iteration: Duration::from_micros(u64::from(list.time_per_iteration_us)),
            ..CompressionSettings::default()
        };
        debug!(
            "Compressor on {}: {} entries, {} bitfields, {} spare blocks",
            core,
            input.entries.len(),
            filters.len(),
            spare.blocks.len()
        );

        match compress_with_bit_fields(chip, &input.entries, &filters, &settings) {
            Ok(table) => {
                let app_id = AppId::try_from(input.app_id)
                    .map_err(|_| CompressionError::invalid_payload(format!("app id {}", input.app_id)))?;
                self.load_multicast_routes(chip, &table.entries, app_id)?;
                if table.bit_fields_merged < filters.len() {
                    self.log(
                        core,
                        format!(
                            "{WARNING_TAG}merged {} of {} bitfields",
                            table.bit_fields_merged,
                            filters.len()
                        ),
                    );
                }
                Ok(OUTCOME_SUCCESS)
            }
            Err(e) => {
                self.log(core, format!("{ERROR_TAG}{e}"));
                Ok(TABLE_TOO_LARGE_OUTCOME)
            }
        }
    }

    fn launch_compressor(&self, core: CoreLocation) -> TransportResult<()> {
        let chip = core.chip();
        let (hang, fail) = {
            let state = self.state();
            (
                state.faults.compressor_hang.contains(&chip),
                state.faults.compressor.contains(&chip),
            )
        };
        if hang {
            return Ok(());
        }

        let outcome = if fail {
            self.log(core, format!("{ERROR_TAG}routing table compression failed"));
            Ok(INJECTED_FAILURE_OUTCOME)
        } else {
            self.run_compressor(core)
        };

        match outcome {
            Ok(code) => {
                self.write_user_register(core, OUTCOME_REGISTER, code)?;
                self.set_cpu_state(core, CpuState::Finished);
            }
            Err(e) => {
                self.log(core, format!("{ERROR_TAG}{e}"));
                self.set_cpu_state(core, CpuState::RunTimeException);
            }
        }
        Ok(())
    }

    fn launch_expander(&self, core: CoreLocation) {
        let crashed = self.state().faults.expander.contains(&core);
        if crashed {
            self.log(core, format!("{ERROR_TAG}synaptic matrix generation failed"));
            self.set_cpu_state(core, CpuState::RunTimeException);
        } else {
            self.set_cpu_state(core, CpuState::Finished);
        }
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

impl Transceiver for VirtualMachine {
    fn malloc_sdram(&self, chip: ChipCoordinate, size: u32, app_id: AppId) -> TransportResult<u32> {
        let capacity = self.sdram_capacity;
        let mut state = self.state();
        if state.faults.malloc.contains(&chip) {
            return Err(TransportError::invalid_parameter(
                "malloc_sdram",
                format!("{size} bytes on {chip}: allocator refused"),
            ));
        }
        let memory = state.chip(chip);
        let aligned = size.div_ceil(WORD_BYTES) * WORD_BYTES;
        if memory.malloc_used.saturating_add(aligned) > capacity {
            return Err(TransportError::invalid_parameter(
                "malloc_sdram",
                format!(
                    "{size} bytes on {chip}: {} of {capacity} bytes in use",
                    memory.malloc_used
                ),
            ));
        }
        memory.malloc_used += aligned;
        *memory.malloc_by_app.entry(app_id).or_default() += aligned;
        let address = memory.reserve(aligned);
        debug!("App {} allocated {} bytes at 0x{:08x} on {}", app_id, size, address, chip);
        Ok(address)
    }

    fn write_memory(&self, chip: ChipCoordinate, address: u32, data: &[u8]) -> TransportResult<()> {
        let mut state = self.state();
        if state.faults.writes.contains(&chip) {
            return Err(TransportError::Unreachable {
                target: chip.to_string(),
            });
        }
        state.chip(chip).write(address, data);
        Ok(())
    }

    fn read_memory(&self, chip: ChipCoordinate, address: u32, length: usize) -> TransportResult<Bytes> {
        let state = self.state();
        Ok(state
            .chips
            .get(&chip)
            .map_or_else(|| Bytes::from(vec![0u8; length]), |m| m.read(address, length)))
    }

    fn launch(&self, binary: &str, cores: &[CoreLocation], app_id: AppId) -> TransportResult<()> {
        let is_compressor = binary == BIT_FIELD_COMPRESSOR_APLX;
        if !is_compressor && binary != SYNAPSE_EXPANDER_APLX {
            return Err(TransportError::invalid_parameter(
                "launch",
                format!("no such executable: {binary}"),
            ));
        }
        {
            let mut state = self.state();
            state.launches.push(Launch {
                binary: binary.to_owned(),
                cores: cores.to_vec(),
            });
            for &core in cores {
                state.core_apps.insert(core, app_id);
                state.cpu.insert(core, CpuState::Running);
            }
        }
        info!("Launched {} on {} cores (app {})", binary, cores.len(), app_id);

        for &core in cores {
            if is_compressor {
                self.launch_compressor(core)?;
            } else {
                self.launch_expander(core);
            }
        }
        Ok(())
    }

    fn cpu_state(&self, core: CoreLocation) -> TransportResult<CpuState> {
        Ok(self.state().cpu.get(&core).copied().unwrap_or(CpuState::Idle))
    }

    fn new_app_id(&self) -> TransportResult<AppId> {
        let mut state = self.state();
        let id = (FIRST_APP_ID..=AppId::MAX)
            .find(|id| !state.app_ids.contains(id))
            .ok_or_else(|| TransportError::invalid_parameter("new_app_id", "every application id is in use"))?;
        state.app_ids.insert(id);
        Ok(id)
    }

    fn free_app_id(&self, app_id: AppId) {
        self.state().app_ids.remove(&app_id);
    }

    fn stop_application(&self, app_id: AppId) -> TransportResult<()> {
        let mut state = self.state();
        let cores: Vec<CoreLocation> = state
            .core_apps
            .iter()
            .filter(|(_, &id)| id == app_id)
            .map(|(&core, _)| core)
            .collect();
        for core in &cores {
            state.core_apps.remove(core);
            state.cpu.insert(*core, CpuState::Idle);
        }
        let mut released = 0;
        for memory in state.chips.values_mut() {
            if let Some(bytes) = memory.malloc_by_app.remove(&app_id) {
                memory.malloc_used -= bytes;
                released += bytes;
            }
        }
        debug!(
            "Stopped app {} on {} cores, released {} bytes of SDRAM",
            app_id,
            cores.len(),
            released
        );
        Ok(())
    }

    fn load_multicast_routes(
        &self,
        chip: ChipCoordinate,
        entries: &[RoutingEntry],
        app_id: AppId,
    ) -> TransportResult<()> {
        if entries.len() > MAX_ROUTER_ENTRIES {
            return Err(TransportError::invalid_parameter(
                "load_multicast_routes",
                format!("{} entries, router holds {}", entries.len(), MAX_ROUTER_ENTRIES),
            ));
        }
        self.state().chip(chip).routes = Some(entries.to_vec());
        debug!("Installed {} routes on {} for app {}", entries.len(), chip, app_id);
        Ok(())
    }
}

impl DiagnosticsProvider for VirtualMachine {
    fn extract_logs(&self, cores: &[CoreLocation]) -> IobufReport {
        let state = self.state();
        let mut report = IobufReport::default();
        for (core, line) in state.iobuf.iter().filter(|(c, _)| cores.contains(c)) {
            if let Some(message) = line.strip_prefix(ERROR_TAG) {
                report.errors.push(IobufLine {
                    core: *core,
                    message: message.to_owned(),
                });
            } else if let Some(message) = line.strip_prefix(WARNING_TAG) {
                report.warnings.push(IobufLine {
                    core: *core,
                    message: message.to_owned(),
                });
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitfield::BitField;

    #[test]
    fn memory_reads_back_and_defaults_to_zero() {
        let vm = VirtualMachine::new();
        let chip = ChipCoordinate::new(0, 0);
        vm.write_memory(chip, PAGE_BYTES - 2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(vm.read_memory(chip, PAGE_BYTES - 3, 6).unwrap().as_ref(), &[0, 1, 2, 3, 4, 0]);
        assert_eq!(vm.read_word(ChipCoordinate::new(5, 5), SDRAM_BASE).unwrap(), 0);
    }

    #[test]
    fn malloc_respects_capacity_and_faults() {
        let vm = VirtualMachine::new().with_sdram_capacity(64);
        let chip = ChipCoordinate::new(0, 0);
        let a = vm.malloc_sdram(chip, 30, 17).unwrap();
        let b = vm.malloc_sdram(chip, 30, 17).unwrap();
        assert_eq!(b - a, 32);
        assert!(vm.malloc_sdram(chip, 8, 17).unwrap_err().is_allocation_refusal());

        let other = ChipCoordinate::new(1, 0);
        vm.fail_malloc_on(other);
        assert!(vm.malloc_sdram(other, 4, 17).unwrap_err().is_allocation_refusal());
    }

    #[test]
    fn stopping_an_app_releases_its_sdram() {
        let vm = VirtualMachine::new().with_sdram_capacity(64);
        let chip = ChipCoordinate::new(0, 0);
        vm.malloc_sdram(chip, 32, 17).unwrap();
        vm.malloc_sdram(chip, 16, 18).unwrap();
        vm.malloc_sdram(ChipCoordinate::new(1, 0), 8, 17).unwrap();

        vm.stop_application(17).unwrap();
        assert_eq!(vm.malloc_used(chip), 16);
        assert_eq!(vm.malloc_used(ChipCoordinate::new(1, 0)), 0);
        // the freed bytes count against capacity no more
        vm.malloc_sdram(chip, 48, 19).unwrap();
    }

    #[test]
    fn app_ids_are_reused_after_free() {
        let vm = VirtualMachine::new();
        let a = vm.new_app_id().unwrap();
        let b = vm.new_app_id().unwrap();
        assert_ne!(a, b);
        vm.free_app_id(a);
        assert_eq!(vm.new_app_id().unwrap(), a);
        assert_eq!(vm.app_ids_in_use(), vec![a, b]);
    }

    #[test]
    fn population_core_regions_are_locatable() {
        let vm = VirtualMachine::new();
        let core = CoreLocation::new(0, 0, 3);
        let region = BitFieldRegion {
            filters: vec![BitField::from_fn(0x100, 8, |a| a < 4)],
        };
        let keys = KeyAtomMap {
            pairs: vec![(0x100, 8)],
        };
        let matrix = vm.write_population_core(core, &region, &keys, 256);

        let filters = vm
            .locate_memory_region(core, PopulationRegion::BitFieldFilter.id())
            .unwrap();
        let data = vm.read_memory(core.chip(), filters, region.encoded_len() as usize).unwrap();
        assert_eq!(BitFieldRegion::decode(&data).unwrap(), region);
        assert_eq!(
            vm.locate_memory_region(core, PopulationRegion::SynapticMatrix.id()).unwrap(),
            matrix
        );
    }

    #[test]
    fn expander_fault_crashes_and_logs() {
        let vm = VirtualMachine::new();
        let good = CoreLocation::new(0, 0, 1);
        let bad = CoreLocation::new(0, 0, 2);
        vm.fail_expander_on(bad);
        vm.launch(SYNAPSE_EXPANDER_APLX, &[good, bad], 20).unwrap();

        assert_eq!(vm.cpu_state(good).unwrap(), CpuState::Finished);
        assert_eq!(vm.cpu_state(bad).unwrap(), CpuState::RunTimeException);
        let report = vm.extract_logs(&[good, bad]);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].core, bad);

        vm.stop_application(20).unwrap();
        assert_eq!(vm.cpu_state(bad).unwrap(), CpuState::Idle);
    }

    #[test]
    fn unknown_executable_is_rejected() {
        let vm = VirtualMachine::new();
        assert!(vm.launch("other.aplx", &[CoreLocation::new(0, 0, 1)], 20).is_err());
        assert!(vm.launched_cores("other.aplx").is_empty());
    }
}
