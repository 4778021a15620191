use std::fmt;
use thiserror::Error;

/// A shutdown-escape code installed by `force_return_head`/`force_return_tail`
/// (`spec.md` §4.1, §9). Sticky until the next `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReturnCode {
    /// The owning filter is stopping; see `Filter::stop` in `bpipe-core`.
    FilterStopping,
    /// The enclosing pipeline is tearing down.
    PipelineShutdown,
    /// Implementer-defined escape code.
    Custom(u32),
}

impl fmt::Display for ForceReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FilterStopping => write!(f, "filter stopping"),
            Self::PipelineShutdown => write!(f, "pipeline shutdown"),
            Self::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

/// Errors returned by blocking ring operations (`spec.md` §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    /// Recoverable: the caller should loop back and re-check its own running
    /// flag. Never returned when `timeout_us == 0` (infinite wait).
    #[error("ring operation timed out")]
    Timeout,
    /// Terminal for this ring: `stop` was called and there is nothing left to
    /// deliver (consumer side) or the ring will never drain (producer side).
    #[error("ring is stopped")]
    Stopped,
    /// Shutdown in progress; the caller must exit cleanly without retrying.
    #[error("ring force-returned: {0}")]
    ForceReturn(ForceReturnCode),
}

/// Errors returned by `RingConfig` validation at construction time.
#[derive(Debug, Clone, Error)]
pub enum RingConfigError {
    #[error("dtype must not be SampleType::Undefined")]
    UndefinedDtype,
    #[error("batch_capacity_expo must be in 1..=24, got {0}")]
    BatchCapacityExpoOutOfRange(u32),
    #[error("ring_capacity_expo must be in 2..=24, got {0}")]
    RingCapacityExpoOutOfRange(u32),
}
