//! Bounded SPSC batch ring buffer with overflow disciplines and force-return
//! shutdown.
//!
//! This crate implements exactly one subsystem: a fixed-capacity queue of
//! pre-allocated [`Batch`] slots shared between one producer thread and one
//! consumer thread. It knows nothing about filters, pipelines, or property
//! contracts — those live in `bpipe-core` and `bpipe-filters`, built on top of
//! this ring.

mod batch;
mod error;
mod ring;
mod sample;

pub use batch::{Batch, BatchStatus, Metadata};
pub use error::{ForceReturnCode, RingConfigError, RingError};
pub use ring::{HeadGuard, OverflowBehaviour, Ring, RingConfig, RingStats, TailGuard, CACHE_LINE_BYTES};
pub use sample::{SampleBuffer, SampleType};
