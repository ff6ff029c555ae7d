//! Resource accounting for one core.
//!
//! SDRAM is tracked per region so reports can show where memory goes:
//!
//! ```text
//! ResourceContainer
//! ├── sdram: MultiRegionSdram
//! │   ├── System            fixed
//! │   ├── NeuronParams      fixed
//! │   ├── ...
//! │   └── VariableRecording fixed + per_timestep
//! ├── dtcm_bytes
//! └── cpu_cycles (per tick)
//! ```

use crate::config::CoreLimits;
use spinn_chip::PopulationRegion;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

/// SDRAM cost with a fixed part and a part that grows with run length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct VariableSdram {
    /// Bytes needed regardless of run length
    pub fixed: u64,

    /// Bytes needed per simulated tick
    pub per_timestep: u64,
}

impl VariableSdram {
    /// Cost with both parts
    pub const fn new(fixed: u64, per_timestep: u64) -> Self {
        Self {
            fixed,
            per_timestep,
        }
    }

    /// Cost that does not depend on run length
    pub const fn constant(bytes: u64) -> Self {
        Self::new(bytes, 0)
    }

    /// Total bytes for a run of `n_timesteps`
    pub const fn total(&self, n_timesteps: u64) -> u64 {
        self.fixed + self.per_timestep * n_timesteps
    }
}

impl Add for VariableSdram {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.fixed + rhs.fixed, self.per_timestep + rhs.per_timestep)
    }
}

impl AddAssign for VariableSdram {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// SDRAM cost broken down by population region
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiRegionSdram {
    regions: BTreeMap<PopulationRegion, VariableSdram>,
}

impl MultiRegionSdram {
    /// Empty breakdown
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixed cost to a region
    pub fn add_cost(&mut self, region: PopulationRegion, bytes: u64) {
        self.add_variable(region, VariableSdram::constant(bytes));
    }

    /// Add a fixed and per-tick cost to a region
    pub fn add_variable(&mut self, region: PopulationRegion, cost: VariableSdram) {
        *self.regions.entry(region).or_default() += cost;
    }

    /// Add every region of `other` into this breakdown
    pub fn merge(&mut self, other: &Self) {
        for (&region, &cost) in &other.regions {
            self.add_variable(region, cost);
        }
    }

    /// Cost recorded for one region
    pub fn region(&self, region: PopulationRegion) -> Option<VariableSdram> {
        self.regions.get(&region).copied()
    }

    /// Iterate regions in id order
    pub fn regions(&self) -> impl Iterator<Item = (PopulationRegion, VariableSdram)> + '_ {
        self.regions.iter().map(|(&r, &c)| (r, c))
    }

    /// Sum of fixed costs
    pub fn fixed(&self) -> u64 {
        self.regions.values().map(|c| c.fixed).sum()
    }

    /// Sum of per-tick costs
    pub fn per_timestep(&self) -> u64 {
        self.regions.values().map(|c| c.per_timestep).sum()
    }

    /// Total bytes for a run of `n_timesteps`
    pub fn total(&self, n_timesteps: u64) -> u64 {
        self.fixed() + self.per_timestep() * n_timesteps
    }
}

/// A resource that exceeds a core's capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow {
    /// Which resource
    pub resource: &'static str,

    /// Amount required
    pub required: u64,

    /// Amount available
    pub available: u64,
}

impl fmt::Display for Overflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} needs {} but only {} available",
            self.resource, self.required, self.available
        )
    }
}

/// All resources one core needs to run a slice
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceContainer {
    /// SDRAM by region
    pub sdram: MultiRegionSdram,

    /// Local data memory (bytes)
    pub dtcm_bytes: u64,

    /// Clock cycles per tick
    pub cpu_cycles: u64,
}

impl ResourceContainer {
    /// First resource that does not fit `limits`, checked in SDRAM, DTCM, CPU order
    pub fn overflow(&self, limits: &CoreLimits, n_timesteps: u64) -> Option<Overflow> {
        [
            ("sdram", self.sdram.total(n_timesteps), limits.sdram_bytes),
            ("dtcm", self.dtcm_bytes, limits.dtcm_bytes),
            ("cpu", self.cpu_cycles, limits.cpu_cycles_per_tick),
        ]
        .into_iter()
        .find(|&(_, required, available)| required > available)
        .map(|(resource, required, available)| Overflow {
            resource,
            required,
            available,
        })
    }

    /// True if every resource fits `limits`
    pub fn fits(&self, limits: &CoreLimits, n_timesteps: u64) -> bool {
        self.overflow(limits, n_timesteps).is_none()
    }

    /// Smallest `available / required` over the overflowing resources
    pub(crate) fn shrink_ratio(&self, limits: &CoreLimits, n_timesteps: u64) -> f64 {
        [
            (self.sdram.total(n_timesteps), limits.sdram_bytes),
            (self.dtcm_bytes, limits.dtcm_bytes),
            (self.cpu_cycles, limits.cpu_cycles_per_tick),
        ]
        .into_iter()
        .filter(|&(required, available)| required > available)
        .map(|(required, available)| available as f64 / required as f64)
        .fold(1.0, f64::min)
    }
}

impl Add for &ResourceContainer {
    type Output = ResourceContainer;

    fn add(self, rhs: Self) -> ResourceContainer {
        let mut sdram = self.sdram.clone();
        sdram.merge(&rhs.sdram);
        ResourceContainer {
            sdram,
            dtcm_bytes: self.dtcm_bytes + rhs.dtcm_bytes,
            cpu_cycles: self.cpu_cycles + rhs.cpu_cycles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_total_scales_with_run_length() {
        let cost = VariableSdram::new(100, 8);
        assert_eq!(cost.total(0), 100);
        assert_eq!(cost.total(10), 180);
    }

    #[test]
    fn regions_accumulate() {
        let mut sdram = MultiRegionSdram::new();
        sdram.add_cost(PopulationRegion::System, 12);
        sdram.add_cost(PopulationRegion::System, 4);
        sdram.add_variable(PopulationRegion::VariableRecording, VariableSdram::new(4, 16));
        assert_eq!(sdram.region(PopulationRegion::System), Some(VariableSdram::constant(16)));
        assert_eq!(sdram.fixed(), 20);
        assert_eq!(sdram.per_timestep(), 16);
        assert_eq!(sdram.total(2), 52);
        assert_eq!(sdram.region(PopulationRegion::PopTable), None);
    }

    #[test]
    fn overflow_names_first_failing_resource() {
        let limits = CoreLimits::default()
            .with_sdram_bytes(1000)
            .with_dtcm_bytes(10)
            .with_cpu_cycles_per_tick(10);
        let mut container = ResourceContainer {
            dtcm_bytes: 20,
            cpu_cycles: 40,
            ..ResourceContainer::default()
        };
        container.sdram.add_cost(PopulationRegion::System, 100);

        let overflow = container.overflow(&limits, 0).unwrap();
        assert_eq!(overflow.resource, "dtcm");
        assert!((container.shrink_ratio(&limits, 0) - 0.25).abs() < 1e-12);
        assert!(!container.fits(&limits, 0));
    }

    #[test]
    fn containers_add_per_region() {
        let mut a = ResourceContainer::default();
        a.sdram.add_cost(PopulationRegion::SynapticMatrix, 64);
        a.dtcm_bytes = 1;
        let mut b = ResourceContainer::default();
        b.sdram.add_cost(PopulationRegion::SynapticMatrix, 36);
        b.cpu_cycles = 2;

        let sum = &a + &b;
        assert_eq!(sum.sdram.region(PopulationRegion::SynapticMatrix), Some(VariableSdram::constant(100)));
        assert_eq!((sum.dtcm_bytes, sum.cpu_cycles), (1, 2));
    }
}
