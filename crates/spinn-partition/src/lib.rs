//! Resource-aware partitioning of neuron populations onto cores.
//!
//! A population of `n` atoms is cut into contiguous [`AtomSlice`]s, one per
//! core. Each slice is costed in SDRAM (fixed and per tick, broken down by
//! region), DTCM and CPU cycles, and the split shrinks until every slice
//! fits a core.
//!
//! # Example
//!
//! ```
//! use spinn_partition::{
//!     Connector, CoreLimits, NeuronModel, Population, Projection, SimulationParameters,
//!     VertexSplitter,
//! };
//! use std::sync::Arc;
//!
//! let pop = Population::new("exc", 1000, NeuronModel::lif_curr_exp())
//!     .with_projection(Projection::new("stim", 200, Connector::FixedProbability { probability: 0.1 }));
//! let sim = SimulationParameters::default();
//! let mut splitter = VertexSplitter::new(Arc::new(pop), sim);
//! let vertices = splitter.split(&CoreLimits::for_simulation(&sim))?;
//! assert_eq!(vertices.first().map(|v| v.slice().lo()), Some(0));
//! # Ok::<(), spinn_partition::PartitionError>(())
//! ```
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`slice`] | Half-open atom ranges |
//! | [`resources`] | Per-region SDRAM, DTCM and CPU accounting |
//! | [`population`] | Neuron model, recording and plasticity parameters |
//! | [`connector`] | Incoming projections and row-length bounds |
//! | [`estimator`] | Slice cost computation |
//! | [`cache`] | Memoised costs |
//! | [`splitter`] | Constraint checking and vertex creation |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

pub mod cache;
pub mod config;
pub mod connector;
mod error;
pub mod estimator;
pub mod population;
pub mod resources;
pub mod slice;
pub mod splitter;
pub mod vertex;

pub use cache::{CacheStats, ResourceCostCache};
pub use config::{CoreLimits, SimulationParameters};
pub use connector::{Connector, Projection};
pub use error::{PartitionError, Result};
pub use estimator::SliceCostEstimator;
pub use population::{
    NeuronModel, Population, Recordable, RecordingConfig, StdpParameters, SynapseDynamics,
};
pub use resources::{MultiRegionSdram, Overflow, ResourceContainer, VariableSdram};
pub use slice::AtomSlice;
pub use splitter::{PartitionConstraint, VertexSplitter};
pub use vertex::{GeneratableArea, MachineVertex};
