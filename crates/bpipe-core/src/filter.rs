//! The filter worker-thread lifecycle and connection model (`spec.md` §3.4,
//! §4.2).
//!
//! `spec.md` §9 replaces the original's "base struct first member" inheritance
//! with first-class composition behind a trait. [`GenericFilter`] is that
//! composition root: every concrete filter in `bpipe-filters` is a
//! `GenericFilter` built with a worker closure, rather than its own type —
//! the "worker function pointer" §9 also calls out is a captured `FnOnce`
//! here instead.
//!
//! The `CREATED` state from `spec.md`'s lifecycle diagram has no Rust
//! representative: a constructor cannot hand back a partially-initialized
//! value, so [`GenericFilter::new`] folds `init` in and returns a filter
//! already in `Ready`. Decided in `DESIGN.md`.

use crate::error::{ConnectionError, FilterError, WorkerError};
use crate::property::{Contract, PropertyTable};
use bpipe_ring::{ForceReturnCode, Ring, RingConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Category tag for introspection only (`spec.md` §3.4 `filt_type`); it plays
/// no role in dispatch, which goes through the [`Filter`] trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Source,
    Map,
    Tee,
    Synchronizer,
    Sink,
    /// A validated [`crate::pipeline::Pipeline`] nested as a filter in an
    /// enclosing one (`spec.md` §3.5's "pipeline is a filter-shaped
    /// container").
    Pipeline,
}

/// `spec.md` §4.2's lifecycle states. `Created` is never observed on a value
/// returned from [`GenericFilter::new`]; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterState {
    Created,
    Ready,
    Running,
    Stopped,
    Destroyed,
}

/// Configuration common to all filters (`spec.md` §6).
#[derive(Debug, Clone, Copy)]
pub struct FilterConfig {
    pub timeout_us: u64,
    pub ring_config: RingConfig,
}

impl FilterConfig {
    #[must_use]
    pub fn new(ring_config: RingConfig) -> Self {
        Self { timeout_us: 0, ring_config }
    }

    #[must_use]
    pub fn with_timeout_us(mut self, timeout_us: u64) -> Self {
        self.timeout_us = timeout_us;
        self
    }
}

#[derive(Default)]
pub struct FilterStatsInner {
    samples_processed: AtomicU64,
    n_batches: AtomicU64,
    dropped_batches: AtomicU64,
}

impl FilterStatsInner {
    pub fn record_batch(&self, samples: u64) {
        self.samples_processed.fetch_add(samples, Ordering::Relaxed);
        self.n_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drops(&self, n: u64) {
        self.dropped_batches.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FilterStats {
        FilterStats {
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            n_batches: self.n_batches.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

/// `spec.md` §6 diagnostics surface: `get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub samples_processed: u64,
    pub n_batches: u64,
    pub dropped_batches: u64,
}

/// Everything a worker closure needs, handed to it by value when the worker
/// thread starts. Sink references are a snapshot taken at `start` time:
/// `spec.md` §5 requires sink arrays to be immutable once running.
pub struct WorkerContext {
    pub name: Arc<str>,
    pub inputs: Vec<Arc<Ring>>,
    pub sinks: Vec<Option<Arc<Ring>>>,
    pub timeout_us: u64,
    running: Arc<AtomicBool>,
    worker_err: Arc<Mutex<Option<WorkerError>>>,
    stats: Arc<FilterStatsInner>,
}

impl WorkerContext {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Universal obligation 5 (`spec.md` §4.2): a worker ends itself by
    /// clearing `running` and returning; it never calls `stop`.
    pub fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Universal obligation 4: records the first worker failure and ends the
    /// worker loop. Build `err` with [`crate::worker_err!`].
    pub fn fail(&self, err: WorkerError) {
        let mut slot = self.worker_err.lock().unwrap();
        if slot.is_none() {
            tracing::warn!(filter = %self.name, code = err.code, message = %err.message, "worker failed");
            *slot = Some(err);
        }
        self.finish();
    }

    pub fn record_batch(&self, samples: u64) {
        self.stats.record_batch(samples);
    }

    pub fn record_drops(&self, n: u64) {
        self.stats.record_drops(n);
    }

    /// Universal obligation 3: forwards a completion marker to every
    /// connected sink. Retries past `Timeout` (the sink may be momentarily
    /// full) but gives up cleanly if the sink itself is stopping.
    pub fn forward_completion(&self) {
        for sink in self.sinks.iter().flatten() {
            loop {
                match sink.reserve_head(self.timeout_us) {
                    Ok(mut guard) => {
                        guard.batch_mut().mark_complete();
                        guard.commit();
                        break;
                    }
                    Err(bpipe_ring::RingError::Timeout) => continue,
                    Err(_) => break,
                }
            }
        }
    }
}

type WorkerFn = Box<dyn FnOnce(WorkerContext) + Send>;

/// The polymorphic lifecycle interface `spec.md` §9 asks for in place of
/// struct-embedding inheritance. Implemented here only by [`GenericFilter`]
/// and, in `bpipe-core::pipeline`, by [`crate::pipeline::Pipeline`] itself so
/// a validated pipeline can be nested as a filter in an enclosing one.
pub trait Filter: Send {
    fn name(&self) -> &str;
    fn kind(&self) -> FilterKind;
    fn state(&self) -> FilterState;
    fn n_inputs(&self) -> usize;
    fn n_outputs(&self) -> usize;
    fn input_ring(&self, port: usize) -> Option<&Ring>;
    /// A shared handle to the same input ring, for wiring it into an
    /// upstream filter's sink slot (`spec.md` §4.2 "Connection model").
    fn input_ring_arc(&self, port: usize) -> Option<Arc<Ring>>;
    fn contract(&self) -> &Contract;
    fn input_properties(&self, port: usize) -> PropertyTable;
    fn set_input_properties(&mut self, port: usize, table: PropertyTable);
    fn output_properties(&self, port: usize) -> PropertyTable;
    fn set_output_properties(&mut self, port: usize, table: PropertyTable);
    fn connect_sink(&mut self, out_port: usize, sink: Arc<Ring>) -> Result<(), ConnectionError>;
    fn disconnect_sink(&mut self, out_port: usize) -> Result<(), ConnectionError>;
    fn start(&mut self) -> Result<(), FilterError>;
    fn stop(&mut self) -> Result<(), FilterError>;
    fn worker_err(&self) -> Option<WorkerError>;
    fn describe(&self) -> String;
    fn stats(&self) -> FilterStats;
}

/// A filter built from a set of input rings, a set of sink slots, a declared
/// [`Contract`], and a worker closure (`spec.md` §3.4, §9 redesign note 2).
pub struct GenericFilter {
    name: Arc<str>,
    kind: FilterKind,
    state: FilterState,
    timeout_us: u64,
    inputs: Vec<Arc<Ring>>,
    sinks: Vec<Option<Arc<Ring>>>,
    contract: Contract,
    input_properties: Vec<PropertyTable>,
    output_properties: Vec<PropertyTable>,
    running: Arc<AtomicBool>,
    worker_err: Arc<Mutex<Option<WorkerError>>>,
    stats: Arc<FilterStatsInner>,
    worker: Option<WorkerFn>,
    worker_handle: Option<JoinHandle<()>>,
}

impl GenericFilter {
    /// Builds a filter with `n_inputs` freshly allocated input rings (each
    /// using `config.ring_config`) and `n_outputs` empty sink slots.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: FilterKind,
        config: FilterConfig,
        n_inputs: usize,
        n_outputs: usize,
        contract: Contract,
        worker: WorkerFn,
    ) -> Self {
        let inputs = (0..n_inputs).map(|_| Arc::new(Ring::new(config.ring_config))).collect();
        Self {
            name: Arc::from(name.into().as_str()),
            kind,
            state: FilterState::Ready,
            timeout_us: config.timeout_us,
            inputs,
            sinks: vec![None; n_outputs],
            contract,
            input_properties: vec![PropertyTable::all_unknown(); n_inputs],
            output_properties: vec![PropertyTable::all_unknown(); n_outputs],
            running: Arc::new(AtomicBool::new(false)),
            worker_err: Arc::new(Mutex::new(None)),
            stats: Arc::new(FilterStatsInner::default()),
            worker: Some(worker),
            worker_handle: None,
        }
    }
}

impl Filter for GenericFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> FilterKind {
        self.kind
    }

    fn state(&self) -> FilterState {
        self.state
    }

    fn n_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn n_outputs(&self) -> usize {
        self.sinks.len()
    }

    fn input_ring(&self, port: usize) -> Option<&Ring> {
        self.inputs.get(port).map(Arc::as_ref)
    }

    fn input_ring_arc(&self, port: usize) -> Option<Arc<Ring>> {
        self.inputs.get(port).cloned()
    }

    fn contract(&self) -> &Contract {
        &self.contract
    }

    fn input_properties(&self, port: usize) -> PropertyTable {
        self.input_properties.get(port).copied().unwrap_or_else(PropertyTable::all_unknown)
    }

    fn set_input_properties(&mut self, port: usize, table: PropertyTable) {
        if let Some(slot) = self.input_properties.get_mut(port) {
            *slot = table;
        }
    }

    fn output_properties(&self, port: usize) -> PropertyTable {
        self.output_properties.get(port).copied().unwrap_or_else(PropertyTable::all_unknown)
    }

    fn set_output_properties(&mut self, port: usize, table: PropertyTable) {
        if let Some(slot) = self.output_properties.get_mut(port) {
            *slot = table;
        }
    }

    fn connect_sink(&mut self, out_port: usize, sink: Arc<Ring>) -> Result<(), ConnectionError> {
        if self.state == FilterState::Running {
            return Err(ConnectionError::FilterRunning);
        }
        let n_outputs = self.sinks.len();
        let slot = self
            .sinks
            .get_mut(out_port)
            .ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs })?;
        if slot.is_some() {
            return Err(ConnectionError::AlreadyConnected(out_port));
        }
        *slot = Some(sink);
        Ok(())
    }

    fn disconnect_sink(&mut self, out_port: usize) -> Result<(), ConnectionError> {
        if self.state == FilterState::Running {
            return Err(ConnectionError::FilterRunning);
        }
        let n_outputs = self.sinks.len();
        let slot = self
            .sinks
            .get_mut(out_port)
            .ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs })?;
        *slot = None;
        Ok(())
    }

    fn start(&mut self) -> Result<(), FilterError> {
        if self.state != FilterState::Ready {
            return Err(FilterError::NotReady(self.state));
        }
        let worker = self.worker.take().expect("GenericFilter in Ready state always still holds its worker");

        for ring in &self.inputs {
            ring.start();
        }
        self.running.store(true, Ordering::Release);

        let ctx = WorkerContext {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            sinks: self.sinks.clone(),
            timeout_us: self.timeout_us,
            running: self.running.clone(),
            worker_err: self.worker_err.clone(),
            stats: self.stats.clone(),
        };
        let thread_name = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("bpipe-{thread_name}"))
            .spawn(move || {
                let _span = tracing::info_span!("filter_worker", filter = %thread_name).entered();
                worker(ctx);
            })
            .map_err(|e| FilterError::SpawnFailed(e.to_string()))?;

        self.worker_handle = Some(handle);
        self.state = FilterState::Running;
        tracing::debug!(filter = %self.name, "filter started");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), FilterError> {
        match self.state {
            FilterState::Stopped => return Ok(()), // idempotent, spec.md §8
            FilterState::Running => {}
            other => return Err(FilterError::InvalidStopState(other)),
        }

        self.running.store(false, Ordering::Release);
        for ring in &self.inputs {
            ring.force_return_head(ForceReturnCode::FilterStopping);
            ring.force_return_tail(ForceReturnCode::FilterStopping);
            ring.stop();
        }
        for sink in self.sinks.iter().flatten() {
            sink.force_return_head(ForceReturnCode::FilterStopping);
            sink.force_return_tail(ForceReturnCode::FilterStopping);
        }

        if let Some(handle) = self.worker_handle.take() {
            handle.join().expect("worker thread panicked");
        }
        self.state = FilterState::Stopped;
        tracing::debug!(filter = %self.name, "filter stopped");
        Ok(())
    }

    fn worker_err(&self) -> Option<WorkerError> {
        self.worker_err.lock().unwrap().clone()
    }

    fn describe(&self) -> String {
        format!(
            "{:?} '{}' ({} in, {} out, timeout_us={})",
            self.kind,
            self.name,
            self.inputs.len(),
            self.sinks.len(),
            self.timeout_us
        )
    }

    fn stats(&self) -> FilterStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpipe_ring::{OverflowBehaviour, SampleType};

    fn ring_config() -> RingConfig {
        RingConfig::new(SampleType::F32, 2, 2, OverflowBehaviour::Block).unwrap()
    }

    #[test]
    fn new_filter_starts_in_ready_state() {
        let filter = GenericFilter::new(
            "noop",
            FilterKind::Sink,
            FilterConfig::new(ring_config()),
            1,
            0,
            Contract::new(),
            Box::new(|ctx| ctx.finish()),
        );
        assert_eq!(filter.state(), FilterState::Ready);
    }

    #[test]
    fn stop_is_idempotent_on_an_already_stopped_filter() {
        let mut filter = GenericFilter::new(
            "noop",
            FilterKind::Sink,
            FilterConfig::new(ring_config()),
            1,
            0,
            Contract::new(),
            Box::new(|ctx| ctx.finish()),
        );
        filter.start().unwrap();
        filter.stop().unwrap();
        assert_eq!(filter.state(), FilterState::Stopped);
        assert!(filter.stop().is_ok());
    }

    #[test]
    fn connect_sink_rejects_out_of_range_port() {
        let mut filter = GenericFilter::new(
            "noop",
            FilterKind::Source,
            FilterConfig::new(ring_config()),
            0,
            1,
            Contract::new(),
            Box::new(|ctx| ctx.finish()),
        );
        let sink_ring = Arc::new(Ring::new(ring_config()));
        assert!(matches!(
            filter.connect_sink(5, sink_ring),
            Err(ConnectionError::PortOutOfRange { .. })
        ));
    }

    #[test]
    fn connect_sink_twice_on_same_port_is_rejected() {
        let mut filter = GenericFilter::new(
            "noop",
            FilterKind::Source,
            FilterConfig::new(ring_config()),
            0,
            1,
            Contract::new(),
            Box::new(|ctx| ctx.finish()),
        );
        let a = Arc::new(Ring::new(ring_config()));
        let b = Arc::new(Ring::new(ring_config()));
        filter.connect_sink(0, a).unwrap();
        assert!(matches!(filter.connect_sink(0, b), Err(ConnectionError::AlreadyConnected(0))));
    }

    #[test]
    fn worker_failure_is_captured_and_running_cleared() {
        let mut filter = GenericFilter::new(
            "doomed",
            FilterKind::Map,
            FilterConfig::new(ring_config()),
            1,
            0,
            Contract::new(),
            Box::new(|ctx| ctx.fail(crate::worker_err!(42, "synthetic failure"))),
        );
        filter.start().unwrap();
        filter.stop().unwrap();
        let err = filter.worker_err().expect("worker_err should be set");
        assert_eq!(err.code, 42);
        assert_eq!(err.message, "synthetic failure");
    }
}
