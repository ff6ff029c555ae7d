//! Error types for routing table compression

use spinn_chip::{ChipCoordinate, CoreLocation};
use std::fmt;
use thiserror::Error;

/// Result type alias for compression operations
pub type Result<T> = std::result::Result<T, CompressionError>;

/// Result type alias for device transport calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failures reported by the device transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device rejected a request argument
    #[error("{operation}: invalid parameter: {reason}")]
    InvalidParameter {
        /// Request that failed
        operation: String,
        /// Device explanation
        reason: String,
    },

    /// The device answered with something other than the expected reply
    #[error("{operation}: unexpected response: {reason}")]
    UnexpectedResponse {
        /// Request that failed
        operation: String,
        /// Device explanation
        reason: String,
    },

    /// No reply in time
    #[error("{operation}: timed out after {timeout_ms} ms")]
    Timeout {
        /// Request that failed
        operation: String,
        /// How long we waited
        timeout_ms: u64,
    },

    /// Target cannot be contacted
    #[error("{target} is unreachable")]
    Unreachable {
        /// Chip or core description
        target: String,
    },
}

impl TransportError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create an unexpected response error
    pub fn unexpected_response(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// The device allocator refused a request (as opposed to a link failure)
    pub const fn is_allocation_refusal(&self) -> bool {
        matches!(self, Self::InvalidParameter { .. } | Self::UnexpectedResponse { .. })
    }
}

/// Which part of the run an error comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Running the compressor executable on chip
    OnDeviceCompression,
    /// Re-running the synapse expander afterwards
    SynapticMatrixRegeneration,
    /// Compressing on the host
    HostFallback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnDeviceCompression => f.write_str("on-device compression"),
            Self::SynapticMatrixRegeneration => f.write_str("synaptic matrix regeneration"),
            Self::HostFallback => f.write_str("host fallback compression"),
        }
    }
}

/// Errors that can occur while compressing routing tables
#[derive(Debug, Clone, Error)]
pub enum CompressionError {
    /// Neither the device allocator nor the spare pool could provide memory
    #[error("Out of scratch memory on chip {chip}: {size} bytes requested")]
    OutOfScratch {
        /// Chip
        chip: ChipCoordinate,
        /// Bytes requested
        size: u32,
    },

    /// A core reported a nonzero outcome or crashed
    #[error("on-device compression failed on core {core}: {reason}{}", render_log(.log))]
    OnDeviceCompressionFailed {
        /// Failing core
        core: CoreLocation,
        /// What went wrong
        reason: String,
        /// Device log lines captured from the core
        log: Vec<String>,
    },

    /// A core did not finish within the completion timeout
    #[error("{phase} on core {core} did not finish within {timeout_ms} ms{}", render_log(.log))]
    Unresponsive {
        /// Phase that timed out
        phase: Phase,
        /// Core still running
        core: CoreLocation,
        /// Timeout that elapsed
        timeout_ms: u64,
        /// Device log lines captured from the core
        log: Vec<String>,
    },

    /// The synapse expander failed on some cores after compression
    #[error("synaptic matrix regeneration failed on {}{}", render_cores(.cores), render_log(.log))]
    SynapticExpanderRerunFailed {
        /// Cores whose matrix was not regenerated
        cores: Vec<CoreLocation>,
        /// Device log lines captured from those cores
        log: Vec<String>,
    },

    /// The host could not produce a table that fits the router
    #[error("host fallback compression failed for chip {chip}: {reason}")]
    HostCompressionFailed {
        /// Chip
        chip: ChipCoordinate,
        /// What went wrong
        reason: String,
    },

    /// Encoded data is malformed or truncated
    #[error("Invalid payload: {reason}")]
    InvalidPayload {
        /// What is wrong
        reason: String,
    },

    /// The worker thread pool could not be started
    #[error("Worker pool unavailable: {reason}")]
    WorkerPool {
        /// Builder error
        reason: String,
    },

    /// Device transport failure during `phase`
    #[error("{phase}: {source}")]
    Device {
        /// Phase in progress
        phase: Phase,
        /// Underlying transport error
        source: TransportError,
    },

    /// Device transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CompressionError {
    /// Create an invalid payload error
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    /// Create a host compression error
    pub fn host_failed(chip: ChipCoordinate, reason: impl Into<String>) -> Self {
        Self::HostCompressionFailed {
            chip,
            reason: reason.into(),
        }
    }

    /// Attach a phase to a transport error
    pub fn during(phase: Phase, source: TransportError) -> Self {
        Self::Device { phase, source }
    }

    /// Phase the error belongs to, where known
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::OnDeviceCompressionFailed { .. } => Some(Phase::OnDeviceCompression),
            Self::Unresponsive { phase, .. } | Self::Device { phase, .. } => Some(*phase),
            Self::SynapticExpanderRerunFailed { .. } => Some(Phase::SynapticMatrixRegeneration),
            Self::HostCompressionFailed { .. } => Some(Phase::HostFallback),
            Self::OutOfScratch { .. }
            | Self::InvalidPayload { .. }
            | Self::WorkerPool { .. }
            | Self::Transport(_) => None,
        }
    }
}

fn render_log(log: &[String]) -> String {
    if log.is_empty() {
        String::new()
    } else {
        format!("\n  {}", log.join("\n  "))
    }
}

fn render_cores(cores: &[CoreLocation]) -> String {
    let list = cores
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} core(s): {list}", cores.len())
}
