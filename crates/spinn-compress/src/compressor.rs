//! Whole-machine bitfield routing table compression
//!
//! ```text
//! collect ──► load (parallel) ──► compressor on device ──► expander re-run
//!                  │                                             │
//!                  └─ out of scratch ─────────────► host fallback ◄┘
//!                                                        │
//!                                                  fatal error, if any
//! ```
//!
//! The expander re-run and the host fallback always happen, even after an
//! on-device failure, so no core is left with a half-overwritten matrix and
//! every diverted chip still gets a table. The fatal error is returned last.

use crate::collector::{ChipResourceCollector, CollectedResources};
use crate::config::CompressionConfig;
use crate::error::{CompressionError, Phase, Result};
use crate::host::{HostFallbackCompressor, HostJob};
use crate::loader::{ChipWork, CompressionJobLoader, LoadFailure, LoadedJob};
use crate::orchestrator::{CompressionOrchestrator, JobState};
use crate::transport::{DiagnosticsProvider, Transceiver};
use crate::vertex::Placement;
use indexmap::IndexMap;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use spinn_chip::{ChipCoordinate, CoreLocation, MulticastRoutingTable};
use tracing::{debug, info, warn};

/// Outcome of a run that raised no fatal error
#[derive(Debug, Clone, Default)]
pub struct CompressionReport {
    /// Terminal state of every chip with a table
    pub states: IndexMap<ChipCoordinate, JobState>,
    /// Table size installed by the host, per diverted chip
    pub host_tables: IndexMap<ChipCoordinate, usize>,
    /// Non-fatal expander re-run failure
    pub expander_failure: Option<CompressionError>,
}

impl CompressionReport {
    /// Chips compressed on device
    pub fn on_device(&self) -> impl Iterator<Item = ChipCoordinate> + '_ {
        self.chips_in(JobState::Succeeded)
    }

    /// Chips compressed on the host
    pub fn on_host(&self) -> impl Iterator<Item = ChipCoordinate> + '_ {
        self.chips_in(JobState::HostFallback)
    }

    fn chips_in(&self, wanted: JobState) -> impl Iterator<Item = ChipCoordinate> + '_ {
        self.states
            .iter()
            .filter(move |(_, s)| **s == wanted)
            .map(|(c, _)| *c)
    }
}

/// Compresses the routing tables of every chip, using bitfields
#[derive(Debug, Clone)]
pub struct BitFieldRouterCompressor {
    config: CompressionConfig,
}

impl BitFieldRouterCompressor {
    /// Compressor with `config`
    pub fn new(config: CompressionConfig) -> Self {
        info!(
            "Bitfield router compressor: target {} entries, {} workers",
            config.target_length, config.max_in_flight
        );
        Self { config }
    }

    /// Run configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compress and install `tables`
    ///
    /// # Errors
    ///
    /// - [`CompressionError::OnDeviceCompressionFailed`] or
    ///   [`CompressionError::Unresponsive`] if a chip failed on device; the
    ///   expander re-run and host fallback have already completed
    /// - [`CompressionError::HostCompressionFailed`] if a diverted table
    ///   cannot fit the router
    /// - Transport errors while collecting bitfield addresses
    pub fn run(
        &self,
        tables: &[MulticastRoutingTable],
        placements: &[Placement],
        transceiver: &dyn Transceiver,
        diagnostics: &dyn DiagnosticsProvider,
    ) -> Result<CompressionReport> {
        let pool = self.worker_pool()?;
        let mut collected = ChipResourceCollector::new(transceiver).collect(placements)?;

        let mut report = CompressionReport {
            states: tables.iter().map(|t| (t.chip, JobState::Pending)).collect(),
            ..CompressionReport::default()
        };
        let (work, mut host_chips) = self.plan(tables, &mut collected);

        // allocation and loading
        let mut loaded: Vec<LoadedJob> = Vec::new();
        let mut touched: Vec<ChipCoordinate> = Vec::new();
        let mut compressor_app_id = None;
        if !work.is_empty() {
            let app_id = transceiver
                .new_app_id()
                .map_err(|e| CompressionError::during(Phase::OnDeviceCompression, e))?;
            compressor_app_id = Some(app_id);

            let loader = CompressionJobLoader::new(
                transceiver,
                app_id,
                self.config.app_id,
                self.config.compress_only_when_needed,
                self.config.compress_as_much_as_possible,
                self.config.time_per_iteration_us,
            );
            let outcomes: Vec<std::result::Result<LoadedJob, LoadFailure>> =
                pool.install(|| work.into_par_iter().map(|w| loader.load(w)).collect());

            for outcome in outcomes {
                match outcome {
                    Ok(job) => loaded.push(job),
                    Err(failure) => {
                        match &failure.error {
                            CompressionError::OutOfScratch { .. } => {
                                info!("{}; compressing on the host", failure.error);
                            }
                            other => warn!("Loading {} failed: {}; compressing on the host", failure.chip, other),
                        }
                        if failure.memory_touched {
                            touched.push(failure.chip);
                        }
                        host_chips.push(failure.chip);
                    }
                }
            }
        }

        // on device
        let orchestrator = CompressionOrchestrator::new(transceiver, diagnostics, &self.config);
        let mut fatal = None;
        if let Some(app_id) = compressor_app_id {
            let run = orchestrator.run_on_device(app_id, &loaded);
            report.states.extend(run.states);
            fatal = run.failure;
        }

        // matrices of every chip whose memory may have been borrowed
        let rerun: Vec<CoreLocation> = loaded
            .iter()
            .map(|j| j.chip)
            .chain(touched)
            .flat_map(|chip| collected.participating.get(&chip).cloned().unwrap_or_default())
            .collect();
        report.expander_failure = orchestrator.rerun_expander(&rerun);

        // host fallback
        let jobs: Vec<HostJob<'_>> = host_chips
            .iter()
            .filter_map(|chip| {
                let table = tables.iter().find(|t| t.chip == *chip)?;
                let addresses = collected.addresses.get(chip).map_or(&[][..], Vec::as_slice);
                Some(HostJob { table, addresses })
            })
            .collect();
        for outcome in HostFallbackCompressor::new(transceiver, &self.config).run(&pool, &jobs) {
            match outcome.result {
                Ok(len) => {
                    report.states.insert(outcome.chip, JobState::HostFallback);
                    report.host_tables.insert(outcome.chip, len);
                }
                Err(e) => {
                    report.states.insert(outcome.chip, JobState::Failed { code: None });
                    warn!("{}", e);
                    fatal.get_or_insert(e);
                }
            }
        }

        if let Some(error) = fatal {
            return Err(error);
        }
        info!(
            "Compressed {} tables: {} on device, {} on host",
            report.states.len(),
            report.on_device().count(),
            report.on_host().count()
        );
        Ok(report)
    }

    /// Split tables into on-device work and host-only chips
    fn plan<'t>(
        &self,
        tables: &'t [MulticastRoutingTable],
        collected: &mut CollectedResources,
    ) -> (Vec<ChipWork<'t>>, Vec<ChipCoordinate>) {
        let mut work = Vec::new();
        let mut host_only = Vec::new();
        for table in tables {
            match collected.target(table.chip) {
                Some(target) => work.push(ChipWork {
                    table,
                    target,
                    addresses: collected.addresses.get(&table.chip).cloned().unwrap_or_default(),
                    pool: collected.spare.swap_remove(&table.chip).unwrap_or_default(),
                }),
                None => {
                    debug!("{} has no bitfield cores; compressing on the host", table.chip);
                    host_only.push(table.chip);
                }
            }
        }
        (work, host_only)
    }

    fn worker_pool(&self) -> Result<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(self.config.max_in_flight.max(1))
            .thread_name(|i| format!("spinn-compress-{i}"))
            .build()
            .map_err(|e| CompressionError::WorkerPool { reason: e.to_string() })
    }
}
