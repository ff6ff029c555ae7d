//! Memoised slice costs.
//!
//! Slices key the cache by value, so two `AtomSlice`s with the same bounds
//! share an entry. The population-wide costs (connection builder, bitfield
//! regions) are single values. Everything is dropped on [`reset`].
//!
//! [`reset`]: ResourceCostCache::reset

use crate::resources::{MultiRegionSdram, ResourceContainer};
use crate::slice::AtomSlice;
use std::collections::HashMap;

/// Counters for the expensive computations behind the cache
///
/// Counters survive [`ResourceCostCache::reset`] so a caller can see
/// that values were rebuilt after a reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Full slice costs computed
    pub container_builds: u64,
    /// Full slice costs served from the cache
    pub container_hits: u64,
    /// Synaptic matrix block sizes computed
    pub synaptic_block_builds: u64,
    /// Structural plasticity sizes computed
    pub structural_builds: u64,
    /// Connection-builder sizes computed
    pub connection_builder_builds: u64,
    /// Bitfield region costs computed
    pub bitfield_builds: u64,
}

/// Per-slice and per-population cost cache
#[derive(Debug, Clone, Default)]
pub struct ResourceCostCache {
    pub(crate) containers: HashMap<AtomSlice, ResourceContainer>,
    pub(crate) synaptic_blocks: HashMap<AtomSlice, u64>,
    pub(crate) structural: HashMap<AtomSlice, u64>,
    pub(crate) connection_builder: Option<u64>,
    pub(crate) bitfield: Option<MultiRegionSdram>,
    pub(crate) stats: CacheStats,
}

impl ResourceCostCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached full cost of `slice`
    pub fn container(&self, slice: &AtomSlice) -> Option<&ResourceContainer> {
        self.containers.get(slice)
    }

    /// Cached synaptic matrix size of `slice`
    pub fn synaptic_block(&self, slice: &AtomSlice) -> Option<u64> {
        self.synaptic_blocks.get(slice).copied()
    }

    /// Cached structural plasticity size of `slice`
    pub fn structural(&self, slice: &AtomSlice) -> Option<u64> {
        self.structural.get(slice).copied()
    }

    /// Number of slices with a cached full cost
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Nothing cached
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
            && self.synaptic_blocks.is_empty()
            && self.structural.is_empty()
            && self.connection_builder.is_none()
            && self.bitfield.is_none()
    }

    /// Computation counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop every cached value
    pub fn reset(&mut self) {
        self.containers.clear();
        self.synaptic_blocks.clear();
        self.structural.clear();
        self.connection_builder = None;
        self.bitfield = None;
    }
}
