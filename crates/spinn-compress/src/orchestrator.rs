//! Running the compressor and the synapse expander on device
//!
//! # Job states
//!
//! ```text
//! Pending ─► Running ─┬─► Succeeded       outcome register = 0
//!                     ├─► Failed { code } nonzero outcome, or crash (no code)
//!                     ├─► Unresponsive    still running at the completion timeout
//!                     └─► Aborted         polling stopped by another chip's failure
//! ```
//!
//! Chips that never reach the device end in `HostFallback`.
//!
//! # Failure policy
//!
//! Fail-fast is the only policy: the first failed or unresponsive core ends
//! polling for the whole batch. Its log is captured before the application
//! is stopped, and the application id is released whatever happens.
//! Expander failures afterwards are reported but never fatal.

use crate::config::CompressionConfig;
use crate::error::{CompressionError, Phase, TransportResult};
use crate::loader::LoadedJob;
use crate::transport::{AppId, DiagnosticsProvider, Transceiver};
use indexmap::IndexMap;
use spinn_chip::regs::{OUTCOME_REGISTER, OUTCOME_SUCCESS};
use spinn_chip::{ChipCoordinate, CoreLocation, CpuState};
use std::fmt;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Where a chip's compression ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Loaded, not launched
    Pending,
    /// Compressor launched
    Running,
    /// Compressed table installed on device
    Succeeded,
    /// Nonzero outcome; `None` if the core crashed before writing one
    Failed {
        /// Outcome word
        code: Option<u32>,
    },
    /// Did not finish within the completion timeout
    Unresponsive,
    /// Stopped by fail-fast before its outcome was read
    Aborted,
    /// Compressed on the host instead
    HostFallback,
}

impl JobState {
    /// True once the state will not change
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// True if the chip ended with a usable table
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::HostFallback)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running => f.write_str("running"),
            Self::Succeeded => f.write_str("compressed on device"),
            Self::Failed { code: Some(code) } => write!(f, "failed (outcome {code})"),
            Self::Failed { code: None } => f.write_str("failed (core crashed)"),
            Self::Unresponsive => f.write_str("unresponsive"),
            Self::Aborted => f.write_str("aborted"),
            Self::HostFallback => f.write_str("compressed on host"),
        }
    }
}

/// What one poll of a core decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    Waiting,
    Settled,
    Stop,
}

/// How a polling loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollOutcome {
    /// Every core settled
    Complete,
    /// A core asked to stop
    Stopped,
    /// These cores were still running at the deadline
    TimedOut(Vec<CoreLocation>),
}

/// Result of the on-device phase
#[derive(Debug, Clone, Default)]
pub struct OnDeviceRun {
    /// State of every loaded chip
    pub states: IndexMap<ChipCoordinate, JobState>,
    /// Fatal error, if any core failed
    pub failure: Option<CompressionError>,
}

/// Launches, polls and tears down on-device executables
#[derive(Debug, Clone, Copy)]
pub struct CompressionOrchestrator<'a> {
    transceiver: &'a dyn Transceiver,
    diagnostics: &'a dyn DiagnosticsProvider,
    config: &'a CompressionConfig,
}

impl<'a> CompressionOrchestrator<'a> {
    /// Orchestrator over `transceiver`, reading logs from `diagnostics`
    pub fn new(
        transceiver: &'a dyn Transceiver,
        diagnostics: &'a dyn DiagnosticsProvider,
        config: &'a CompressionConfig,
    ) -> Self {
        Self {
            transceiver,
            diagnostics,
            config,
        }
    }

    /// Run the compressor on the target core of every loaded chip
    ///
    /// `app_id` must be the id the jobs were loaded under; it is stopped and
    /// freed before returning.
    pub fn run_on_device(&self, app_id: AppId, jobs: &[LoadedJob]) -> OnDeviceRun {
        let mut run = OnDeviceRun {
            states: jobs.iter().map(|j| (j.chip, JobState::Pending)).collect(),
            failure: None,
        };
        if jobs.is_empty() {
            // loads that failed part way may still hold scratch under this id
            self.tear_down(app_id);
            return run;
        }

        let targets: Vec<CoreLocation> = jobs.iter().map(|j| j.target).collect();
        info!("Launching compressor on {} chips (app {})", targets.len(), app_id);
        if let Err(e) = self
            .transceiver
            .launch(&self.config.compressor_binary, &targets, app_id)
        {
            run.states.values_mut().for_each(|s| *s = JobState::Aborted);
            run.failure = Some(CompressionError::during(Phase::OnDeviceCompression, e));
            self.tear_down(app_id);
            return run;
        }
        run.states.values_mut().for_each(|s| *s = JobState::Running);

        let mut failed: Option<(CoreLocation, String)> = None;
        let outcome = self.poll(&targets, |core, state| {
            let (job_state, verdict) = self.settle_compressor(core, state);
            match verdict {
                Ok(poll) => {
                    run.states.insert(core.chip(), job_state);
                    poll
                }
                Err(reason) => {
                    run.states.insert(core.chip(), job_state);
                    failed = Some((core, reason));
                    Poll::Stop
                }
            }
        });

        run.failure = match outcome {
            PollOutcome::Complete => None,
            PollOutcome::Stopped => failed.map(|(core, reason)| {
                let log = self.capture_logs(&[core]).lines_for(core);
                CompressionError::OnDeviceCompressionFailed { core, reason, log }
            }),
            PollOutcome::TimedOut(cores) => {
                for core in &cores {
                    run.states.insert(core.chip(), JobState::Unresponsive);
                }
                let log = self.capture_logs(&cores).lines();
                cores.first().map(|&core| CompressionError::Unresponsive {
                    phase: Phase::OnDeviceCompression,
                    core,
                    timeout_ms: self.timeout_ms(),
                    log,
                })
            }
        };

        for state in run.states.values_mut() {
            if *state == JobState::Running {
                *state = JobState::Aborted;
            }
        }
        self.tear_down(app_id);

        let succeeded = run.states.values().filter(|s| **s == JobState::Succeeded).count();
        info!("On-device compression: {} of {} chips succeeded", succeeded, jobs.len());
        run
    }

    /// Re-run the synapse expander on `cores`
    ///
    /// Returns the failure, if any; it has already been logged.
    pub fn rerun_expander(&self, cores: &[CoreLocation]) -> Option<CompressionError> {
        if cores.is_empty() {
            return None;
        }
        let phase = Phase::SynapticMatrixRegeneration;
        let app_id = match self.transceiver.new_app_id() {
            Ok(id) => id,
            Err(e) => return Some(Self::report_non_fatal(CompressionError::during(phase, e))),
        };

        info!("Regenerating synaptic matrices on {} cores", cores.len());
        if let Err(e) = self
            .transceiver
            .launch(&self.config.expander_binary, cores, app_id)
        {
            self.tear_down(app_id);
            return Some(Self::report_non_fatal(CompressionError::during(phase, e)));
        }

        let mut crashed = Vec::new();
        let outcome = self.poll(cores, |core, state| match state {
            Ok(s) if s.is_error() => {
                crashed.push(core);
                Poll::Settled
            }
            Ok(s) if s.is_terminal() => Poll::Settled,
            Ok(_) => Poll::Waiting,
            Err(e) => {
                debug!("Expander state of {} unreadable: {}", core, e);
                crashed.push(core);
                Poll::Settled
            }
        });

        let failure = match outcome {
            PollOutcome::TimedOut(stuck) if crashed.is_empty() => {
                let log = self.capture_logs(&stuck).lines();
                stuck.first().map(|&core| CompressionError::Unresponsive {
                    phase,
                    core,
                    timeout_ms: self.timeout_ms(),
                    log,
                })
            }
            PollOutcome::TimedOut(stuck) => {
                crashed.extend(stuck);
                Some(self.expander_failed(crashed))
            }
            PollOutcome::Complete | PollOutcome::Stopped if !crashed.is_empty() => {
                Some(self.expander_failed(crashed))
            }
            PollOutcome::Complete | PollOutcome::Stopped => None,
        };
        self.tear_down(app_id);
        failure.map(Self::report_non_fatal)
    }

    /// Classify one core of the compressor run
    ///
    /// `Err` carries the reason the core failed.
    fn settle_compressor(
        &self,
        core: CoreLocation,
        state: TransportResult<CpuState>,
    ) -> (JobState, Result<Poll, String>) {
        match state {
            Ok(CpuState::Finished) => match self.transceiver.read_user_register(core, OUTCOME_REGISTER) {
                Ok(OUTCOME_SUCCESS) => {
                    debug!("Compressor on {} succeeded", core);
                    (JobState::Succeeded, Ok(Poll::Settled))
                }
                Ok(code) => (
                    JobState::Failed { code: Some(code) },
                    Err(format!("compressor exited with outcome {code}")),
                ),
                Err(e) => (JobState::Failed { code: None }, Err(format!("outcome unreadable: {e}"))),
            },
            Ok(s) if s.is_error() => (JobState::Failed { code: None }, Err(format!("core entered {s:?}"))),
            Ok(_) => (JobState::Running, Ok(Poll::Waiting)),
            Err(e) => (JobState::Failed { code: None }, Err(e.to_string())),
        }
    }

    /// Poll `cores` until each settles, one asks to stop, or time runs out
    fn poll(
        &self,
        cores: &[CoreLocation],
        mut settle: impl FnMut(CoreLocation, TransportResult<CpuState>) -> Poll,
    ) -> PollOutcome {
        let deadline = Instant::now() + self.config.completion_timeout;
        let mut waiting = cores.to_vec();
        loop {
            let mut still_waiting = Vec::with_capacity(waiting.len());
            for core in waiting {
                match settle(core, self.transceiver.cpu_state(core)) {
                    Poll::Waiting => still_waiting.push(core),
                    Poll::Settled => {}
                    Poll::Stop => return PollOutcome::Stopped,
                }
            }
            waiting = still_waiting;
            if waiting.is_empty() {
                return PollOutcome::Complete;
            }
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut(waiting);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    fn expander_failed(&self, cores: Vec<CoreLocation>) -> CompressionError {
        let log = self.capture_logs(&cores).lines();
        CompressionError::SynapticExpanderRerunFailed { cores, log }
    }

    fn capture_logs(&self, cores: &[CoreLocation]) -> crate::transport::IobufReport {
        let report = self.diagnostics.extract_logs(cores);
        report.emit();
        report
    }

    fn report_non_fatal(error: CompressionError) -> CompressionError {
        warn!("{}", error);
        error
    }

    fn tear_down(&self, app_id: AppId) {
        if let Err(e) = self.transceiver.stop_application(app_id) {
            warn!("Could not stop app {}: {}", app_id, e);
        }
        self.transceiver.free_app_id(app_id);
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.config.completion_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::VirtualMachine;
    use spinn_chip::program::SYNAPSE_EXPANDER_APLX;
    use std::time::Duration;

    #[test]
    fn states_describe_themselves() {
        assert_eq!(JobState::Failed { code: Some(3) }.to_string(), "failed (outcome 3)");
        assert_eq!(JobState::Failed { code: None }.to_string(), "failed (core crashed)");
        assert!(JobState::Aborted.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::HostFallback.is_success());
        assert!(!JobState::Unresponsive.is_success());
    }

    #[test]
    fn empty_run_releases_app_id_and_scratch() {
        let vm = VirtualMachine::new();
        let config = CompressionConfig::minimal();
        let orchestrator = CompressionOrchestrator::new(&vm, &vm, &config);
        let app_id = vm.new_app_id().unwrap();

        let chip = ChipCoordinate::new(0, 0);
        vm.malloc_sdram(chip, 64, app_id).unwrap();

        let run = orchestrator.run_on_device(app_id, &[]);
        assert!(run.states.is_empty());
        assert!(run.failure.is_none());
        assert!(vm.app_ids_in_use().is_empty());
        assert_eq!(vm.malloc_used(chip), 0);
        assert!(orchestrator.rerun_expander(&[]).is_none());
    }

    #[test]
    fn expander_that_never_finishes_is_unresponsive() {
        let vm = VirtualMachine::new();
        let config = CompressionConfig {
            expander_binary: SYNAPSE_EXPANDER_APLX.into(),
            completion_timeout: Duration::from_millis(20),
            ..CompressionConfig::minimal()
        };
        let orchestrator = CompressionOrchestrator::new(&vm, &vm, &config);
        let core = CoreLocation::new(0, 0, 4);

        // a core that is never launched reports idle, which is not terminal
        let outcome = orchestrator.poll(&[core], |_, state| match state {
            Ok(s) if s.is_terminal() => Poll::Settled,
            _ => Poll::Waiting,
        });
        assert_eq!(outcome, PollOutcome::TimedOut(vec![core]));

        assert!(orchestrator.rerun_expander(&[core]).is_none());
        assert_eq!(vm.launched_cores(SYNAPSE_EXPANDER_APLX), vec![core]);
        assert!(vm.app_ids_in_use().is_empty());
    }
}
