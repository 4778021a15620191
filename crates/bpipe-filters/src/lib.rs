//! Reference filters built on `bpipe-core`: a ramp source, a scaling map, a
//! passthrough, a tee, a synchronizer, a rebatcher, and a recorder sink.
//! None of this is part of the contract-validation or ring-scheduling core;
//! it exists to exercise it end to end.

mod map;
mod passthrough;
mod rebatcher;
mod recorder;
mod sample_io;
mod source;
mod synchronizer;
mod tee;

pub use map::{map_filter, Identity, SampleOp, Scale};
pub use passthrough::passthrough_filter;
pub use rebatcher::rebatcher_filter;
pub use recorder::{recorder_sink, Recorder};
pub use sample_io::{read_samples, write_samples};
pub use source::ramp_source;
pub use synchronizer::synchronizer_filter;
pub use tee::tee_filter;
