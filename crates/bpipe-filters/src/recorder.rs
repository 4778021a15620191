//! Recorder sink: appends every sample it receives to an in-memory buffer.
//! Zero outputs, one input. Useful as the terminal stage in tests and demos.

use crate::sample_io::read_samples;
use bpipe_core::{ConstraintKind, Contract, FilterConfig, FilterKind, GenericFilter, PropertyKey};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct RecorderState {
    samples: Vec<f64>,
    saw_complete: bool,
}

/// A shared handle onto a recorder sink's accumulated samples.
#[derive(Clone)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
}

impl Recorder {
    #[must_use]
    pub fn samples(&self) -> Vec<f64> {
        self.state.lock().unwrap().samples.clone()
    }

    #[must_use]
    pub fn saw_complete(&self) -> bool {
        self.state.lock().unwrap().saw_complete
    }
}

/// Builds a recorder sink. When `require_sample_period` is set, the filter's
/// contract rejects a connection whose upstream has not published
/// `SamplePeriodNs` (`spec.md` §8 "Property rejection").
#[must_use]
pub fn recorder_sink(name: impl Into<String>, config: FilterConfig, require_sample_period: bool) -> (GenericFilter, Recorder) {
    let state = Arc::new(Mutex::new(RecorderState::default()));
    let handle = Recorder { state: state.clone() };

    let mut contract = Contract::new();
    if require_sample_period {
        contract.constrain(0, PropertyKey::SamplePeriodNs, ConstraintKind::Exists);
    }

    let filter = GenericFilter::new(
        name,
        FilterKind::Sink,
        config,
        1,
        0,
        contract,
        Box::new(move |ctx| loop {
            if !ctx.is_running() {
                return;
            }
            let tail = match ctx.inputs[0].peek_tail(ctx.timeout_us) {
                Ok(t) => t,
                Err(bpipe_ring::RingError::Timeout) => continue,
                Err(_) => return,
            };
            if tail.batch().is_complete() {
                tail.release();
                state.lock().unwrap().saw_complete = true;
                ctx.finish();
                return;
            }
            let head_count = tail.batch().head();
            let values = read_samples(tail.batch(), head_count);
            tail.release();
            ctx.record_batch(values.len() as u64);
            state.lock().unwrap().samples.extend(values);
        }),
    );

    (filter, handle)
}
