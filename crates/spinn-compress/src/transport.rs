//! Device transport abstraction
//!
//! Every call is a blocking round-trip to a remote chip. Implementations
//! must be shareable across worker threads, so all methods take `&self`
//! and backends serialise their own state.

use crate::error::{TransportError, TransportResult};
use bytes::Bytes;
use spinn_chip::regs::{self, UserRegister};
use spinn_chip::{ChipCoordinate, CoreLocation, CpuState, RoutingEntry};
use std::fmt::{self, Debug};
use tracing::{error, warn};

/// Application identifier on the machine
pub type AppId = u8;

/// Device transport
pub trait Transceiver: Debug + Send + Sync {
    /// Allocate `size` bytes of SDRAM on `chip` for `app_id`
    ///
    /// # Errors
    ///
    /// [`TransportError::InvalidParameter`] or [`TransportError::UnexpectedResponse`]
    /// when the chip allocator cannot satisfy the request.
    fn malloc_sdram(&self, chip: ChipCoordinate, size: u32, app_id: AppId) -> TransportResult<u32>;

    /// Write `data` at `address` on `chip`
    ///
    /// # Errors
    ///
    /// Returns error if the write is not acknowledged.
    fn write_memory(&self, chip: ChipCoordinate, address: u32, data: &[u8]) -> TransportResult<()>;

    /// Read `length` bytes at `address` on `chip`
    ///
    /// # Errors
    ///
    /// Returns error if the read is not answered.
    fn read_memory(&self, chip: ChipCoordinate, address: u32, length: usize) -> TransportResult<Bytes>;

    /// Read one little-endian word
    ///
    /// # Errors
    ///
    /// Returns error if the read fails or returns short.
    fn read_word(&self, chip: ChipCoordinate, address: u32) -> TransportResult<u32> {
        let data = self.read_memory(chip, address, 4)?;
        let bytes: [u8; 4] = data.as_ref().try_into().map_err(|_| {
            TransportError::unexpected_response("read_word", format!("{} bytes returned", data.len()))
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Write one little-endian word
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn write_word(&self, chip: ChipCoordinate, address: u32, value: u32) -> TransportResult<()> {
        self.write_memory(chip, address, &value.to_le_bytes())
    }

    /// Read a user register of `core`
    ///
    /// # Errors
    ///
    /// Returns error if the read fails.
    fn read_user_register(&self, core: CoreLocation, reg: UserRegister) -> TransportResult<u32> {
        self.read_word(core.chip(), regs::user_register_address(core.p, reg))
    }

    /// Write a user register of `core`
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn write_user_register(&self, core: CoreLocation, reg: UserRegister, value: u32) -> TransportResult<()> {
        self.write_word(core.chip(), regs::user_register_address(core.p, reg), value)
    }

    /// Base address of `region` of the application on `core`
    ///
    /// USER0 points at the core's region table.
    ///
    /// # Errors
    ///
    /// Returns error if either read fails.
    fn locate_memory_region(&self, core: CoreLocation, region: u32) -> TransportResult<u32> {
        let table = self.read_user_register(core, regs::REGION_TABLE_REGISTER)?;
        self.read_word(core.chip(), regs::region_pointer_address(table, region))
    }

    /// Load and start `binary` on `cores` under `app_id`
    ///
    /// # Errors
    ///
    /// Returns error if any core cannot be loaded.
    fn launch(&self, binary: &str, cores: &[CoreLocation], app_id: AppId) -> TransportResult<()>;

    /// Current run state of `core`
    ///
    /// # Errors
    ///
    /// Returns error if the core does not answer.
    fn cpu_state(&self, core: CoreLocation) -> TransportResult<CpuState>;

    /// Reserve a fresh application id
    ///
    /// # Errors
    ///
    /// Returns error if every id is in use.
    fn new_app_id(&self) -> TransportResult<AppId>;

    /// Return an application id to the pool
    fn free_app_id(&self, app_id: AppId);

    /// Stop every core running `app_id`
    ///
    /// # Errors
    ///
    /// Returns error if the stop signal is not delivered.
    fn stop_application(&self, app_id: AppId) -> TransportResult<()>;

    /// Install `entries` into the router of `chip`
    ///
    /// # Errors
    ///
    /// Returns error if the router rejects the table.
    fn load_multicast_routes(
        &self,
        chip: ChipCoordinate,
        entries: &[RoutingEntry],
        app_id: AppId,
    ) -> TransportResult<()>;
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

/// One line of a core's I/O buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IobufLine {
    /// Core that wrote the line
    pub core: CoreLocation,
    /// Message text without its level prefix
    pub message: String,
}

impl fmt::Display for IobufLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.core, self.message)
    }
}

/// Errors and warnings extracted from core I/O buffers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IobufReport {
    /// Lines tagged as errors
    pub errors: Vec<IobufLine>,
    /// Lines tagged as warnings
    pub warnings: Vec<IobufLine>,
}

impl IobufReport {
    /// Nothing extracted
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Re-emit every line through `tracing`
    pub fn emit(&self) {
        for line in &self.warnings {
            warn!("{}", line);
        }
        for line in &self.errors {
            error!("{}", line);
        }
    }

    /// Lines as text, errors first
    pub fn lines(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|l| format!("[ERROR] {l}"))
            .chain(self.warnings.iter().map(|l| format!("[WARNING] {l}")))
            .collect()
    }

    /// Lines written by `core`, errors first
    pub fn lines_for(&self, core: CoreLocation) -> Vec<String> {
        self.errors
            .iter()
            .filter(|l| l.core == core)
            .map(|l| format!("[ERROR] {l}"))
            .chain(
                self.warnings
                    .iter()
                    .filter(|l| l.core == core)
                    .map(|l| format!("[WARNING] {l}")),
            )
            .collect()
    }
}

/// Source of post-mortem logs
pub trait DiagnosticsProvider: Debug + Send + Sync {
    /// Extract and classify the I/O buffers of `cores`
    fn extract_logs(&self, cores: &[CoreLocation]) -> IobufReport;
}
