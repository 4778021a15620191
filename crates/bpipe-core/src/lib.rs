//! Filter worker-thread lifecycle, the property-contract engine, and the
//! pipeline container that validates a DAG of filters before starting any
//! thread.
//!
//! Built on top of `bpipe-ring`'s [`bpipe_ring::Ring`]; knows nothing about
//! any concrete filter's data-processing algorithm. Concrete filters (ramp
//! source, scaling map, tee, …) live in `bpipe-filters`.

mod error;
mod filter;
mod pipeline;
mod property;

pub use error::{ConnectionError, FilterError, PipelineError, PipelineValidationError, WorkerError};
pub use filter::{
    Filter, FilterConfig, FilterKind, FilterStats, FilterStatsInner, FilterState, GenericFilter, WorkerContext,
};
pub use pipeline::{Connection, ExternalPort, Pipeline};
pub use property::{
    propagate, validate_connection, validate_multi_input_alignment, AlignmentConstraint, BehaviorKind, Contract,
    ConstraintKind, OutputBehavior, PortConstraint, PortMask, PropertyKey, PropertyTable, PropertyValue,
    ValidationError,
};
