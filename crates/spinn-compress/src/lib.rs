//! Bitfield-assisted routing table compression across a machine.
//!
//! Every chip's multicast routing table is compressed on the chip itself
//! when scratch memory can be found for the job, and on the host otherwise.
//! Bitfields recorded by population cores say which source atoms each core
//! actually needs; merging them into the table stops redundant packets at
//! the router.
//!
//! # Example
//!
//! ```
//! use spinn_chip::{ChipCoordinate, MulticastRoutingTable, Route, RoutingEntry};
//! use spinn_compress::backends::VirtualMachine;
//! use spinn_compress::{BitFieldRouterCompressor, CompressionConfig, JobState};
//!
//! let chip = ChipCoordinate::new(0, 0);
//! let entries = (0..8)
//!     .map(|k| RoutingEntry::new(k, u32::MAX, Route::new(&[1], &[])))
//!     .collect();
//! let tables = vec![MulticastRoutingTable::new(chip, entries)];
//!
//! let vm = VirtualMachine::new();
//! let report = BitFieldRouterCompressor::new(CompressionConfig::default())
//!     .run(&tables, &[], &vm, &vm)?;
//! assert_eq!(report.states[&chip], JobState::HostFallback);
//! assert!(vm.installed_table(chip).is_some());
//! # Ok::<(), spinn_compress::CompressionError>(())
//! ```
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`transport`] | Device transport and diagnostics traits |
//! | [`backends`] | Virtual machine backend |
//! | [`payload`] | Wire formats shared with the compressor executable |
//! | [`bitfield`] | Bitfield filters and reading them from a chip |
//! | [`compression`] | Table compression with bitfield merging |
//! | [`collector`] | Per-chip bitfield addresses and spare memory |
//! | [`scratch`] | Scratch allocation with spare memory stealing |
//! | [`loader`] | Writing jobs to chips |
//! | [`orchestrator`] | Running executables and their job states |
//! | [`host`] | Host fallback |
//! | [`compressor`] | The whole pipeline |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

pub mod backends;
pub mod bitfield;
pub mod collector;
pub mod compression;
pub mod compressor;
pub mod config;
mod error;
pub mod host;
pub mod loader;
pub mod orchestrator;
pub mod payload;
pub mod scratch;
pub mod transport;
pub mod vertex;

pub use collector::{ChipResourceCollector, CollectedResources};
pub use compression::{CompressedTable, CompressionSettings};
pub use compressor::{BitFieldRouterCompressor, CompressionReport};
pub use config::{calculate_threshold, CompressionConfig};
pub use error::{CompressionError, Phase, Result, TransportError, TransportResult};
pub use host::HostFallbackCompressor;
pub use loader::{CompressionJobLoader, LoadedJob};
pub use orchestrator::{CompressionOrchestrator, JobState};
pub use scratch::{ScratchAllocator, ScratchGrant, ScratchSource, SpareMemoryPool};
pub use transport::{AppId, DiagnosticsProvider, IobufReport, Transceiver};
pub use vertex::{BitFieldRoutingCompression, PlacedVertex, Placement};
