// SPDX-License-Identifier: AGPL-3.0-only

//! Host fallback compression
//!
//! Chips that could not get scratch memory, or have no core to run the
//! compressor, are compressed here. Bitfields are read from the chip, the
//! same algorithm as on device picks what to merge, and the result is
//! installed through the ordinary route loading call.

use crate::bitfield::read_bit_fields;
use crate::compression::compress_with_bit_fields;
use crate::config::CompressionConfig;
use crate::error::{CompressionError, Phase, Result};
use crate::payload::BitFieldAddress;
use crate::transport::Transceiver;
use rayon::prelude::*;
use rayon::ThreadPool;
use spinn_chip::{ChipCoordinate, MulticastRoutingTable};
use tracing::{debug, info};

/// One chip to compress on the host
#[derive(Debug, Clone, Copy)]
pub struct HostJob<'t> {
    /// Uncompressed table
    pub table: &'t MulticastRoutingTable,
    /// Bitfield records of the chip; empty compresses without bitfields
    pub addresses: &'t [BitFieldAddress],
}

/// Outcome for one chip
#[derive(Debug, Clone)]
pub struct HostOutcome {
    /// Chip
    pub chip: ChipCoordinate,
    /// Installed entry count, or why nothing was installed
    pub result: Result<usize>,
}

/// Compresses tables off device
#[derive(Debug, Clone, Copy)]
pub struct HostFallbackCompressor<'a> {
    transceiver: &'a dyn Transceiver,
    config: &'a CompressionConfig,
}

impl<'a> HostFallbackCompressor<'a> {
    /// Compressor installing through `transceiver`
    pub fn new(transceiver: &'a dyn Transceiver, config: &'a CompressionConfig) -> Self {
        Self { transceiver, config }
    }

    /// Compress and install one table
    ///
    /// # Errors
    ///
    /// - [`CompressionError::HostCompressionFailed`] if the table cannot fit the router
    /// - [`CompressionError::Device`] if reading bitfields or installing fails
    pub fn compress(&self, job: HostJob<'_>) -> Result<usize> {
        let chip = job.table.chip;
        let filters = read_bit_fields(self.transceiver, chip, job.addresses).map_err(|e| match e {
            CompressionError::Transport(source) => CompressionError::during(Phase::HostFallback, source),
            other => other,
        })?;
        let compressed = compress_with_bit_fields(chip, &job.table.entries, &filters, &self.config.settings())?;

        self.transceiver
            .load_multicast_routes(chip, &compressed.entries, self.config.app_id)
            .map_err(|e| CompressionError::during(Phase::HostFallback, e))?;

        debug!(
            "Host compressed {}: {} -> {} entries, {} of {} bitfields merged",
            chip,
            job.table.len(),
            compressed.entries.len(),
            compressed.bit_fields_merged,
            filters.len()
        );
        Ok(compressed.entries.len())
    }

    /// Compress every job on `pool`
    pub fn run(&self, pool: &ThreadPool, jobs: &[HostJob<'_>]) -> Vec<HostOutcome> {
        if jobs.is_empty() {
            return Vec::new();
        }
        info!("Compressing {} routing tables on the host", jobs.len());
        pool.install(|| {
            jobs.par_iter()
                .map(|&job| HostOutcome {
                    chip: job.table.chip,
                    result: self.compress(job),
                })
                .collect()
        })
    }
}
