//! Silicon model for the many-core neuromorphic machine.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the machine as the mapping and compression layers see it:
//! chip and core coordinates, per-core user registers, SDRAM region
//! identifiers, multicast routing entries, and the names of the system
//! executables that run on cores.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`coords`] | Chip `(x, y)` and core `(x, y, p)` coordinates, cores per chip |
//! | [`regs`] | Per-core CPU info block and user register addresses |
//! | [`sdram`] | SDRAM layout and population region identifiers |
//! | [`router`] | Routes, multicast entries, tables, router capacity |
//! | [`program`] | System executable names and CPU run states |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod coords;
pub mod program;
pub mod regs;
pub mod router;
pub mod sdram;

pub use coords::{ChipCoordinate, CoreLocation};
pub use program::CpuState;
pub use router::{MulticastRoutingTable, Route, RoutingEntry, MAX_ROUTER_ENTRIES};
pub use sdram::PopulationRegion;
