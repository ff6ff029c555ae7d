//! Splitting a population into machine vertices.
//!
//! ```text
//! Population [0, n)
//!     │  check constraints (max / fixed atoms per core only)
//!     │  atoms_per_core = fixed, or min(max, n)
//!     ▼
//! cost each slice ──► overflow? ──► shrink atoms_per_core ──┐
//!     ▲                                                      │
//!     └──────────────────────────────────────────────────────┘
//!     ▼
//! MachineVertex 0 [0, k), MachineVertex 1 [k, 2k), ...
//! ```

use crate::cache::CacheStats;
use crate::config::{CoreLimits, SimulationParameters};
use crate::error::{PartitionError, Result};
use crate::estimator::SliceCostEstimator;
use crate::population::Population;
use crate::resources::ResourceContainer;
use crate::slice::AtomSlice;
use crate::vertex::MachineVertex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Atoms per core when no constraint says otherwise.
pub const DEFAULT_MAX_ATOMS_PER_CORE: u32 = 256;

/// Constraint attached to an application vertex
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionConstraint {
    /// At most this many atoms per core
    MaxAtomsPerCore(u32),

    /// Exactly this many atoms per core (the last core may have fewer)
    FixedAtomsPerCore(u32),

    /// Place on a specific chip (and optionally core)
    ChipAndCore {
        /// Chip x
        x: u8,
        /// Chip y
        y: u8,
        /// Core, if pinned
        p: Option<u8>,
    },

    /// Partition identically to another vertex
    SameAtomsAs {
        /// Label of the other vertex
        vertex: String,
    },

    /// Any other constraint kind
    Other {
        /// Constraint name
        kind: String,
    },
}

impl PartitionConstraint {
    const fn is_supported(&self) -> bool {
        matches!(self, Self::MaxAtomsPerCore(_) | Self::FixedAtomsPerCore(_))
    }
}

impl fmt::Display for PartitionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxAtomsPerCore(n) => write!(f, "MaxVertexAtoms({n})"),
            Self::FixedAtomsPerCore(n) => write!(f, "FixedVertexAtoms({n})"),
            Self::ChipAndCore { x, y, p: Some(p) } => write!(f, "ChipAndCore({x}, {y}, {p})"),
            Self::ChipAndCore { x, y, p: None } => write!(f, "ChipAndCore({x}, {y})"),
            Self::SameAtomsAs { vertex } => write!(f, "SameAtomsAs({vertex})"),
            Self::Other { kind } => write!(f, "{kind}"),
        }
    }
}

/// Builds machine vertices for one population
#[derive(Debug, Clone)]
pub struct VertexSplitter {
    estimator: SliceCostEstimator,
    constraints: Vec<PartitionConstraint>,
    next_index: usize,
    synaptic_scaling: Option<(Arc<[u32]>, Arc<[f64]>)>,
}

impl VertexSplitter {
    /// Splitter with no constraints
    pub fn new(population: Arc<Population>, simulation: SimulationParameters) -> Self {
        Self {
            estimator: SliceCostEstimator::new(population, simulation),
            constraints: Vec::new(),
            next_index: 0,
            synaptic_scaling: None,
        }
    }

    /// Attach a constraint
    #[must_use]
    pub fn with_constraint(mut self, constraint: PartitionConstraint) -> Self {
        self.add_constraint(constraint);
        self
    }

    /// Attach a constraint; cached state is reset so the next pass sees it
    pub fn add_constraint(&mut self, constraint: PartitionConstraint) {
        debug!("{}: adding constraint {}", self.label(), constraint);
        self.constraints.push(constraint);
        self.reset();
    }

    /// Population label
    pub fn label(&self) -> &str {
        &self.estimator.population().label
    }

    /// Attached constraints
    pub fn constraints(&self) -> &[PartitionConstraint] {
        &self.constraints
    }

    /// Index the next machine vertex will get
    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Cost estimator and its cache
    pub fn estimator(&self) -> &SliceCostEstimator {
        &self.estimator
    }

    /// Cache computation counters
    pub fn cache_stats(&self) -> CacheStats {
        self.estimator.stats()
    }

    /// Reject constraints other than max or fixed atoms per core
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::UnsupportedConstraint`] naming the vertex
    /// and the first offending constraint.
    pub fn check_supported_constraints(&self) -> Result<()> {
        if let Some(bad) = self.constraints.iter().find(|c| !c.is_supported()) {
            return Err(PartitionError::unsupported_constraint(self.label(), bad.to_string()));
        }
        Ok(())
    }

    /// Resources needed to run `slice` (memoised)
    pub fn resources_used_by_atoms(&mut self, slice: AtomSlice) -> ResourceContainer {
        self.estimator.cost(slice)
    }

    /// Build the machine vertex for `slice`
    ///
    /// Ring buffer shifts and weight scales are computed on the first call
    /// and shared by every later vertex until [`reset`](Self::reset).
    pub fn create_machine_vertex(
        &mut self,
        slice: AtomSlice,
        resources: ResourceContainer,
        label: Option<String>,
    ) -> MachineVertex {
        let (shifts, scales) = match &self.synaptic_scaling {
            Some(scaling) => scaling.clone(),
            None => {
                let scaling = self.estimator.synaptic_scaling();
                self.synaptic_scaling = Some(scaling.clone());
                scaling
            }
        };

        let index = self.next_index;
        self.next_index += 1;

        let label = label.unwrap_or_else(|| format!("{}:{}:{}", self.label(), slice.lo(), slice.last()));
        let all_syn_block_size = self.estimator.all_syn_block_size(slice);
        let structural_size = self.estimator.structural_size(slice);
        let bit_field_capable = !self.estimator.population().incoming_projections.is_empty();

        debug!("Created machine vertex {} ({}) for {}", index, label, slice);

        MachineVertex::new(
            index,
            label,
            slice,
            resources,
            shifts,
            scales,
            all_syn_block_size,
            structural_size,
            bit_field_capable,
        )
    }

    /// Partition the whole population into slices that fit `limits`
    ///
    /// # Errors
    ///
    /// - [`PartitionError::UnsupportedConstraint`] for constraints other than max/fixed atoms
    /// - [`PartitionError::ConflictingConstraints`] if fixed atoms exceed max atoms or two fixed values differ
    /// - [`PartitionError::EmptyPopulation`] if the population has no atoms
    /// - [`PartitionError::SliceDoesNotFit`] if no slice size fits `limits`
    pub fn split(&mut self, limits: &CoreLimits) -> Result<Vec<MachineVertex>> {
        self.check_supported_constraints()?;

        let n_atoms = self.estimator.population().n_atoms;
        if n_atoms == 0 {
            return Err(PartitionError::EmptyPopulation {
                vertex: self.label().to_string(),
            });
        }

        let (max_atoms, fixed_atoms) = self.atoms_per_core_bounds()?;
        let n_timesteps = self.estimator.simulation().n_timesteps;
        let mut per_core = fixed_atoms.unwrap_or(max_atoms).min(n_atoms);

        let slices = loop {
            let slices = chunk(n_atoms, per_core)?;
            let overflowing = slices.iter().find_map(|&slice| {
                let cost = self.estimator.cost(slice);
                cost.overflow(limits, n_timesteps).map(|overflow| (cost, overflow))
            });

            let Some((cost, overflow)) = overflowing else {
                break slices;
            };
            if fixed_atoms.is_some() || per_core == 1 {
                return Err(PartitionError::slice_does_not_fit(
                    self.label(),
                    per_core,
                    overflow.to_string(),
                ));
            }

            let ratio = cost.shrink_ratio(limits, n_timesteps);
            // ratio < 1 here, so the product stays below per_core
            let shrunk = (f64::from(per_core) * ratio).floor() as u32;
            debug!(
                "{}: {} atoms per core overflow ({}), trying {}",
                self.label(),
                per_core,
                overflow,
                shrunk.clamp(1, per_core - 1)
            );
            per_core = shrunk.clamp(1, per_core - 1);
        };

        let vertices: Vec<_> = slices
            .into_iter()
            .map(|slice| {
                let resources = self.estimator.cost(slice);
                self.create_machine_vertex(slice, resources, None)
            })
            .collect();

        info!(
            "Split {} ({} atoms) into {} machine vertices of at most {} atoms",
            self.label(),
            n_atoms,
            vertices.len(),
            per_core
        );
        Ok(vertices)
    }

    /// Clear the index counter and every cache
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.synaptic_scaling = None;
        self.estimator.reset();
    }

    fn atoms_per_core_bounds(&self) -> Result<(u32, Option<u32>)> {
        let mut max_atoms = DEFAULT_MAX_ATOMS_PER_CORE;
        let mut explicit_max = None;
        let mut fixed: Option<u32> = None;

        for constraint in &self.constraints {
            match *constraint {
                PartitionConstraint::MaxAtomsPerCore(n) => {
                    let n = n.max(1);
                    explicit_max = Some(explicit_max.map_or(n, |m: u32| m.min(n)));
                }
                PartitionConstraint::FixedAtomsPerCore(n) => {
                    if let Some(existing) = fixed.filter(|&f| f != n) {
                        return Err(PartitionError::conflicting_constraints(
                            self.label(),
                            format!("fixed atoms per core {existing} and {n}"),
                        ));
                    }
                    if n == 0 {
                        return Err(PartitionError::conflicting_constraints(
                            self.label(),
                            "fixed atoms per core must be positive",
                        ));
                    }
                    fixed = Some(n);
                }
                _ => {}
            }
        }

        if let Some(m) = explicit_max {
            max_atoms = m;
        }
        if let Some(f) = fixed {
            if explicit_max.is_some_and(|m| f > m) {
                return Err(PartitionError::conflicting_constraints(
                    self.label(),
                    format!("fixed atoms per core {f} exceeds max atoms per core {max_atoms}"),
                ));
            }
        }
        Ok((max_atoms, fixed))
    }
}

/// Consecutive slices of `per_core` atoms covering `[0, n_atoms)`
fn chunk(n_atoms: u32, per_core: u32) -> Result<Vec<AtomSlice>> {
    (0..n_atoms.div_ceil(per_core))
        .map(|i| {
            let lo = i * per_core;
            AtomSlice::new(lo, (lo + per_core).min(n_atoms))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, Projection};
    use crate::population::NeuronModel;

    fn splitter(n_atoms: u32) -> VertexSplitter {
        let pop = Population::new("pop", n_atoms, NeuronModel::lif_curr_exp())
            .with_projection(Projection::new("in", 100, Connector::AllToAll));
        VertexSplitter::new(Arc::new(pop), SimulationParameters::default())
    }

    #[test]
    fn unsupported_constraint_names_vertex() {
        let splitter = splitter(10).with_constraint(PartitionConstraint::SameAtomsAs {
            vertex: "other".into(),
        });
        let err = splitter.check_supported_constraints().unwrap_err();
        match err {
            PartitionError::UnsupportedConstraint { vertex, constraint } => {
                assert_eq!(vertex, "pop");
                assert_eq!(constraint, "SameAtomsAs(other)");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn supported_constraints_pass() {
        let splitter = splitter(10)
            .with_constraint(PartitionConstraint::MaxAtomsPerCore(64))
            .with_constraint(PartitionConstraint::FixedAtomsPerCore(32));
        assert!(splitter.check_supported_constraints().is_ok());
    }

    #[test]
    fn indices_increase_from_zero() {
        let mut splitter = splitter(100);
        let a = AtomSlice::new(0, 50).unwrap();
        let b = AtomSlice::new(50, 100).unwrap();
        let ra = splitter.resources_used_by_atoms(a);
        let rb = splitter.resources_used_by_atoms(b);
        let va = splitter.create_machine_vertex(a, ra, None);
        let vb = splitter.create_machine_vertex(b, rb, Some("custom".into()));
        assert_eq!((va.index(), vb.index()), (0, 1));
        assert_eq!(va.label(), "pop:0:49");
        assert_eq!(vb.label(), "custom");
        assert!(Arc::ptr_eq(va.ring_buffer_shifts(), vb.ring_buffer_shifts()));
        assert_eq!(splitter.next_index(), 2);
    }

    #[test]
    fn reset_restarts_index_and_empties_cache() {
        let mut splitter = splitter(100);
        splitter.split(&CoreLimits::default()).unwrap();
        assert!(splitter.next_index() > 0);
        assert!(!splitter.estimator().cache().is_empty());

        splitter.reset();
        assert_eq!(splitter.next_index(), 0);
        assert!(splitter.estimator().cache().is_empty());
        let again = splitter.split(&CoreLimits::default()).unwrap();
        assert_eq!(again[0].index(), 0);
    }

    #[test]
    fn max_atoms_constraint_bounds_slices() {
        let mut splitter = splitter(100).with_constraint(PartitionConstraint::MaxAtomsPerCore(30));
        let vertices = splitter.split(&CoreLimits::default()).unwrap();
        let sizes: Vec<_> = vertices.iter().map(|v| v.slice().n_atoms()).collect();
        assert_eq!(sizes, vec![30, 30, 30, 10]);
    }

    #[test]
    fn shrinks_until_slices_fit() {
        let mut splitter = splitter(256);
        let limits = CoreLimits::default().with_dtcm_bytes(8 * 1024);
        let vertices = splitter.split(&limits).unwrap();
        assert!(vertices.len() > 1);
        for v in &vertices {
            assert!(v.resources().fits(&limits, 1000));
        }
    }

    #[test]
    fn fixed_above_max_conflicts() {
        let mut splitter = splitter(100)
            .with_constraint(PartitionConstraint::MaxAtomsPerCore(10))
            .with_constraint(PartitionConstraint::FixedAtomsPerCore(20));
        assert!(matches!(
            splitter.split(&CoreLimits::default()),
            Err(PartitionError::ConflictingConstraints { .. })
        ));
    }

    #[test]
    fn single_atom_too_large_fails() {
        let mut splitter = splitter(10);
        let limits = CoreLimits::default().with_dtcm_bytes(16);
        assert!(matches!(
            splitter.split(&limits),
            Err(PartitionError::SliceDoesNotFit { atoms: 1, .. })
        ));
    }

    #[test]
    fn fixed_atoms_do_not_shrink() {
        let mut splitter = splitter(100).with_constraint(PartitionConstraint::FixedAtomsPerCore(100));
        let limits = CoreLimits::default().with_dtcm_bytes(4096);
        assert!(matches!(
            splitter.split(&limits),
            Err(PartitionError::SliceDoesNotFit { atoms: 100, .. })
        ));
    }

    #[test]
    fn empty_population_is_rejected() {
        let mut splitter = splitter(0);
        assert!(matches!(
            splitter.split(&CoreLimits::default()),
            Err(PartitionError::EmptyPopulation { .. })
        ));
    }
}
