//! The pipeline container: wiring, topological property validation, and the
//! start/stop sequencing that runs workers only after validation succeeds
//! (`spec.md` §3.5, §4.4).

use crate::error::{ConnectionError, FilterError, PipelineError, PipelineValidationError};
use crate::filter::{Filter, FilterKind, FilterStats, FilterState};
use crate::property::{validate_connection, validate_multi_input_alignment, propagate, PropertyTable};
use bpipe_ring::Ring;
use std::collections::VecDeque;
use std::sync::Arc;

/// A directed edge between two inner filters' ports (`spec.md` §3.5).
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub from_filter: usize,
    pub from_port: usize,
    pub to_filter: usize,
    pub to_port: usize,
}

/// A `{filter_index, port}` pair identifying the pipeline's own boundary, so
/// it can itself be validated as a node in an enclosing pipeline (`spec.md`
/// §3.5 "designated external-input/-output filter/port").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalPort {
    pub filter: usize,
    pub port: usize,
}

/// A DAG of filters plus the connections between them (`spec.md` §4.4).
pub struct Pipeline {
    name: Arc<str>,
    state: FilterState,
    filters: Vec<Box<dyn Filter>>,
    connections: Vec<Connection>,
    external_input: Option<ExternalPort>,
    external_output: Option<ExternalPort>,
    topo_order: Vec<usize>,
    output_properties: PropertyTable,
    /// Returned by `contract()` when no external-input filter is designated
    /// to delegate to; a nested pipeline with no declared input port simply
    /// constrains nothing.
    empty_contract: crate::property::Contract,
}

impl Pipeline {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Arc::from(name.into().as_str()),
            state: FilterState::Ready,
            filters: Vec::new(),
            connections: Vec::new(),
            external_input: None,
            external_output: None,
            topo_order: Vec::new(),
            output_properties: PropertyTable::all_unknown(),
            empty_contract: crate::property::Contract::new(),
        }
    }

    /// Adds an inner filter, returning its index for use in `connect`.
    pub fn add_filter(&mut self, filter: Box<dyn Filter>) -> usize {
        self.filters.push(filter);
        self.filters.len() - 1
    }

    /// Wires `from_filter`'s output port directly to `to_filter`'s input
    /// ring. `connect` on the underlying filters validates port bounds and
    /// slot occupancy; this method does not run property validation — that
    /// is deferred to the pipeline validator (`spec.md` §4.2 "Connection
    /// model").
    pub fn connect(
        &mut self,
        from_filter: usize,
        from_port: usize,
        to_filter: usize,
        to_port: usize,
    ) -> Result<(), ConnectionError> {
        let ring = self
            .filters
            .get(to_filter)
            .ok_or(ConnectionError::PortOutOfRange { port: to_port, n_outputs: 0 })?
            .input_ring_arc(to_port)
            .ok_or(ConnectionError::PortOutOfRange { port: to_port, n_outputs: 0 })?;
        self.filters
            .get_mut(from_filter)
            .ok_or(ConnectionError::PortOutOfRange { port: from_port, n_outputs: 0 })?
            .connect_sink(from_port, ring)?;
        self.connections.push(Connection { from_filter, from_port, to_filter, to_port });
        Ok(())
    }

    /// Designates this pipeline's own external input/output, for nestability.
    pub fn set_external_input(&mut self, filter: usize, port: usize) {
        self.external_input = Some(ExternalPort { filter, port });
    }

    pub fn set_external_output(&mut self, filter: usize, port: usize) {
        self.external_output = Some(ExternalPort { filter, port });
    }

    /// Topologically orders the inner filters from the wiring graph,
    /// rejecting cycles (`spec.md` §4.4 step 1–2, §9 redesign: topological
    /// rather than declared-array order).
    fn topological_order(&self) -> Result<Vec<usize>, PipelineError> {
        let n = self.filters.len();
        let mut in_degree = vec![0usize; n];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for c in &self.connections {
            adjacency[c.from_filter].push(c.to_filter);
            in_degree[c.to_filter] += 1;
        }

        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &next in &adjacency[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
            let name = self.filters.get(stuck).map_or("<unknown>", |f| f.name()).to_string();
            return Err(PipelineError::Cycle(name));
        }
        Ok(order)
    }

    fn connection_into(&self, to_filter: usize, to_port: usize) -> Option<&Connection> {
        self.connections.iter().find(|c| c.to_filter == to_filter && c.to_port == to_port)
    }

    /// Runs the full validation algorithm (`spec.md` §4.4 "Validation
    /// algorithm"). `external_input` supplies the property table for the
    /// pipeline's own designated external input port, if any.
    pub fn validate(&mut self, external_input: Option<PropertyTable>) -> Result<(), PipelineError> {
        let order = self.topological_order()?;

        for &i in &order {
            let n_inputs = self.filters[i].n_inputs();
            let mut input_tables = Vec::with_capacity(n_inputs);
            for port in 0..n_inputs {
                let table = if self.external_input == Some(ExternalPort { filter: i, port }) {
                    external_input.unwrap_or_else(PropertyTable::all_unknown)
                } else if let Some(conn) = self.connection_into(i, port) {
                    self.filters[conn.from_filter].output_properties(conn.from_port)
                } else {
                    PropertyTable::all_unknown()
                };
                input_tables.push(table);
            }

            let contract = self.filters[i].contract().clone();
            validate_multi_input_alignment(&input_tables, &contract).map_err(|source| {
                PipelineValidationError { filter: self.filters[i].name().to_string(), source }
            })?;
            for port in 0..n_inputs {
                validate_connection(&input_tables[port], &contract, port).map_err(|source| {
                    PipelineValidationError { filter: self.filters[i].name().to_string(), source }
                })?;
            }

            for (port, table) in input_tables.into_iter().enumerate() {
                self.filters[i].set_input_properties(port, table);
            }

            let snapshots: Vec<PropertyTable> = (0..n_inputs).map(|p| self.filters[i].input_properties(p)).collect();
            for port in 0..self.filters[i].n_outputs() {
                let out = propagate(&snapshots, &contract, port);
                self.filters[i].set_output_properties(port, out);
            }
        }

        self.output_properties = self
            .external_output
            .map(|ext| self.filters[ext.filter].output_properties(ext.port))
            .unwrap_or_else(PropertyTable::all_unknown);

        self.topo_order = order;
        Ok(())
    }

    /// Validates, then starts each filter's input rings and each filter
    /// itself in reverse dependency order (sinks first) so that downstream
    /// consumers are ready before the first upstream batch is produced
    /// (`spec.md` §4.4 "Start sequence"). On validation failure, no filter or
    /// ring is started.
    pub fn start_with_external_input(&mut self, external_input: Option<PropertyTable>) -> Result<(), PipelineError> {
        self.validate(external_input)?;
        for &i in self.topo_order.clone().iter().rev() {
            self.filters[i].start().map_err(PipelineError::Filter)?;
        }
        self.state = FilterState::Running;
        tracing::info!(pipeline = %self.name, filters = self.filters.len(), "pipeline started");
        Ok(())
    }

    /// Convenience for the common case of no designated external input.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.start_with_external_input(None)
    }

    /// Stops filters in the reverse of start order (`spec.md` §4.4 "Stop
    /// sequence"). Each `Filter::stop` force-returns its own rings and joins
    /// its worker before this loop proceeds to the next filter, so shutdown
    /// is ordered but each individual stop is itself rapid.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        for &i in &self.topo_order {
            self.filters[i].stop().map_err(PipelineError::Filter)?;
        }
        self.state = FilterState::Stopped;
        tracing::info!(pipeline = %self.name, "pipeline stopped");
        Ok(())
    }

    #[must_use]
    pub fn filters(&self) -> &[Box<dyn Filter>] {
        &self.filters
    }

    #[must_use]
    pub fn filter(&self, index: usize) -> Option<&dyn Filter> {
        self.filters.get(index).map(Box::as_ref)
    }

    /// `spec.md` §6's "get_stats" for a pipeline: the sum across inner
    /// filters, useful for a top-level smoke check without walking the tree.
    #[must_use]
    pub fn aggregate_stats(&self) -> FilterStats {
        self.filters.iter().fold(FilterStats::default(), |mut acc, f| {
            let s = f.stats();
            acc.samples_processed += s.samples_processed;
            acc.n_batches += s.n_batches;
            acc.dropped_batches += s.dropped_batches;
            acc
        })
    }

    /// `spec.md` §6: worker errors across every inner filter, keyed by name.
    #[must_use]
    pub fn worker_errors(&self) -> Vec<(String, crate::error::WorkerError)> {
        self.filters
            .iter()
            .filter_map(|f| f.worker_err().map(|e| (f.name().to_string(), e)))
            .collect()
    }
}

impl Filter for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> FilterKind {
        FilterKind::Pipeline
    }

    fn state(&self) -> FilterState {
        self.state
    }

    fn n_inputs(&self) -> usize {
        usize::from(self.external_input.is_some())
    }

    fn n_outputs(&self) -> usize {
        usize::from(self.external_output.is_some())
    }

    fn input_ring(&self, port: usize) -> Option<&Ring> {
        if port != 0 {
            return None;
        }
        let ext = self.external_input?;
        self.filters.get(ext.filter)?.input_ring(ext.port)
    }

    fn contract(&self) -> &crate::property::Contract {
        self.external_input
            .and_then(|ext| self.filters.get(ext.filter))
            .map_or(&self.empty_contract, |f| f.contract())
    }

    fn input_ring_arc(&self, port: usize) -> Option<Arc<Ring>> {
        if port != 0 {
            return None;
        }
        let ext = self.external_input?;
        self.filters.get(ext.filter)?.input_ring_arc(ext.port)
    }

    fn input_properties(&self, port: usize) -> PropertyTable {
        if port != 0 {
            return PropertyTable::all_unknown();
        }
        self.external_input
            .and_then(|ext| self.filters.get(ext.filter))
            .map_or_else(PropertyTable::all_unknown, |f| f.input_properties(0))
    }

    fn set_input_properties(&mut self, port: usize, table: PropertyTable) {
        if port != 0 {
            return;
        }
        if let Some(ext) = self.external_input {
            if let Some(f) = self.filters.get_mut(ext.filter) {
                f.set_input_properties(ext.port, table);
            }
        }
    }

    fn output_properties(&self, port: usize) -> PropertyTable {
        if port == 0 {
            self.output_properties
        } else {
            PropertyTable::all_unknown()
        }
    }

    fn set_output_properties(&mut self, _port: usize, table: PropertyTable) {
        self.output_properties = table;
    }

    fn connect_sink(&mut self, out_port: usize, sink: Arc<Ring>) -> Result<(), ConnectionError> {
        let ext = self.external_output.ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs: 0 })?;
        if out_port != 0 {
            return Err(ConnectionError::PortOutOfRange { port: out_port, n_outputs: 1 });
        }
        self.filters
            .get_mut(ext.filter)
            .ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs: 1 })?
            .connect_sink(ext.port, sink)
    }

    fn disconnect_sink(&mut self, out_port: usize) -> Result<(), ConnectionError> {
        let ext = self.external_output.ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs: 0 })?;
        self.filters
            .get_mut(ext.filter)
            .ok_or(ConnectionError::PortOutOfRange { port: out_port, n_outputs: 1 })?
            .disconnect_sink(ext.port)
    }

    fn start(&mut self) -> Result<(), FilterError> {
        Pipeline::start(self).map_err(|e| match e {
            PipelineError::Filter(fe) => fe,
            other => FilterError::Config(other.to_string()),
        })
    }

    fn stop(&mut self) -> Result<(), FilterError> {
        Pipeline::stop(self).map_err(|e| match e {
            PipelineError::Filter(fe) => fe,
            other => FilterError::Config(other.to_string()),
        })
    }

    fn worker_err(&self) -> Option<crate::error::WorkerError> {
        self.worker_errors().into_iter().next().map(|(_, e)| e)
    }

    fn describe(&self) -> String {
        format!("Pipeline '{}' ({} inner filters)", self.name, self.filters.len())
    }

    fn stats(&self) -> FilterStats {
        self.aggregate_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterConfig, GenericFilter};
    use crate::property::{BehaviorKind, ConstraintKind, PropertyKey, PropertyValue};
    use bpipe_ring::{OverflowBehaviour, SampleType};

    fn ring_config() -> bpipe_ring::RingConfig {
        bpipe_ring::RingConfig::new(SampleType::F32, 2, 2, OverflowBehaviour::Block).unwrap()
    }

    fn source_setting(key: PropertyKey, value: PropertyValue) -> Box<dyn Filter> {
        let mut contract = crate::property::Contract::new();
        contract.behave(0, key, BehaviorKind::Set(value));
        Box::new(GenericFilter::new(
            "source",
            FilterKind::Source,
            FilterConfig::new(ring_config()),
            0,
            1,
            contract,
            Box::new(|ctx| ctx.finish()),
        ))
    }

    #[test]
    fn cycle_is_rejected_before_any_filter_starts() {
        let mut pipeline = Pipeline::new("cyclic");
        let a = pipeline.add_filter(Box::new(GenericFilter::new(
            "a",
            FilterKind::Map,
            FilterConfig::new(ring_config()),
            1,
            1,
            crate::property::Contract::new(),
            Box::new(|ctx| ctx.finish()),
        )));
        let b = pipeline.add_filter(Box::new(GenericFilter::new(
            "b",
            FilterKind::Map,
            FilterConfig::new(ring_config()),
            1,
            1,
            crate::property::Contract::new(),
            Box::new(|ctx| ctx.finish()),
        )));
        pipeline.connect(a, 0, b, 0).unwrap();
        pipeline.connect(b, 0, a, 0).unwrap();
        assert!(matches!(pipeline.validate(None), Err(PipelineError::Cycle(_))));
    }

    #[test]
    fn property_rejection_reports_the_offending_filter() {
        let mut pipeline = Pipeline::new("rejecting");
        let src = pipeline.add_filter(source_setting(PropertyKey::DataType, PropertyValue::DataType(SampleType::F32)));
        let mut sink_contract = crate::property::Contract::new();
        sink_contract.constrain(0, PropertyKey::SamplePeriodNs, ConstraintKind::Exists);
        let sink = pipeline.add_filter(Box::new(GenericFilter::new(
            "sink",
            FilterKind::Sink,
            FilterConfig::new(ring_config()),
            1,
            0,
            sink_contract,
            Box::new(|ctx| ctx.finish()),
        )));
        pipeline.connect(src, 0, sink, 0).unwrap();

        let err = pipeline.validate(None).unwrap_err();
        match err {
            PipelineError::Validation(v) => assert_eq!(v.filter, "sink"),
            other => panic!("expected a validation error, got {other:?}"),
        }
    }
}
