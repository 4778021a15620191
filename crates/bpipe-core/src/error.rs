//! Error kinds for the filter runtime and pipeline container (`spec.md` §7).
//!
//! Property-validation errors live in [`crate::property::ValidationError`];
//! this module covers configuration, connection, lifecycle, and worker-side
//! failures, matching the teacher's split between `ChannelError` (wiring) and
//! `StreamError` (runtime) in `ringmpsc-stream`.

use crate::filter::FilterState;
use crate::property::ValidationError;
use thiserror::Error;

/// Raised by `connect`/`disconnect` (`spec.md` §4.2 "Connection model").
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("output port {port} is out of range (filter declares {n_outputs} output ports)")]
    PortOutOfRange { port: usize, n_outputs: usize },
    #[error("output port {0} already has a connected sink")]
    AlreadyConnected(usize),
    #[error("cannot modify connections while the filter is running")]
    FilterRunning,
}

/// Raised by `init`/`start`/`stop`/`deinit` (`spec.md` §4.2 lifecycle).
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("filter already initialized")]
    AlreadyInitialized,
    #[error("filter configuration rejected: {0}")]
    Config(String),
    #[error("start called on a filter in state {0:?}, expected Ready")]
    NotReady(FilterState),
    #[error("stop called on a filter in state {0:?}")]
    InvalidStopState(FilterState),
    #[error("deinit called on a filter in state {0:?}, expected Stopped")]
    NotStopped(FilterState),
    #[error("failed to spawn worker thread: {0}")]
    SpawnFailed(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Wraps a [`ValidationError`] with the filter it was raised against, matching
/// `spec.md` §4.4's requirement that pipeline start failures "carry the first
/// mismatch message" together with the filter name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("pipeline validation failed at filter '{filter}': {source}")]
pub struct PipelineValidationError {
    pub filter: String,
    #[source]
    pub source: ValidationError,
}

/// Top-level error returned by `Pipeline::start` (`spec.md` §4.4, §6 "Exit
/// status").
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] PipelineValidationError),
    #[error("pipeline contains a cycle reachable from filter '{0}'")]
    Cycle(String),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// A first-worker-failure record (`spec.md` §3.4 `worker_err`, §7 "Worker
/// error"). Write-once from the worker thread, read-only from observers.
#[derive(Debug, Clone, Error)]
#[error("{message} ({file}:{line}, code {code})")]
pub struct WorkerError {
    pub code: u16,
    pub message: String,
    pub file: &'static str,
    pub line: u32,
}

/// Builds a [`WorkerError`] capturing the call site, mirroring the
/// `debug_assert_*!` family in the teacher's `invariants.rs`: a macro that
/// closes over `file!()`/`line!()` so callers never have to thread that
/// information through by hand.
#[macro_export]
macro_rules! worker_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::WorkerError {
            code: $code,
            message: ::std::format!($($arg)*),
            file: ::std::file!(),
            line: ::std::line!(),
        }
    };
}
