//! Wires a ramp source through a scaling map and a tee into two recorder
//! sinks, runs it for a short while, and prints what each sink observed.

use bpipe_core::{Filter as _, FilterConfig, Pipeline};
use bpipe_filters::{map_filter, ramp_source, recorder_sink, tee_filter, Scale};
use bpipe_ring::{OverflowBehaviour, RingConfig, SampleType};
use std::time::Duration;

fn ring_config() -> RingConfig {
    RingConfig::new(SampleType::F32, 5, 4, OverflowBehaviour::Block).unwrap()
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut pipeline = Pipeline::new("demo");
    let source = ramp_source("source", FilterConfig::new(ring_config()), 1_000_000, 20);
    let scale = map_filter("scale", FilterConfig::new(ring_config()), Scale(10.0));
    let tee = tee_filter("tee", FilterConfig::new(ring_config()), 2);
    let (sink_a, recorder_a) = recorder_sink("sink_a", FilterConfig::new(ring_config()), false);
    let (sink_b, recorder_b) = recorder_sink("sink_b", FilterConfig::new(ring_config()), false);

    let source_idx = pipeline.add_filter(Box::new(source));
    let scale_idx = pipeline.add_filter(Box::new(scale));
    let tee_idx = pipeline.add_filter(Box::new(tee));
    let sink_a_idx = pipeline.add_filter(Box::new(sink_a));
    let sink_b_idx = pipeline.add_filter(Box::new(sink_b));

    pipeline.connect(source_idx, 0, scale_idx, 0).expect("wiring source to scale");
    pipeline.connect(scale_idx, 0, tee_idx, 0).expect("wiring scale to tee");
    pipeline.connect(tee_idx, 0, sink_a_idx, 0).expect("wiring tee to sink_a");
    pipeline.connect(tee_idx, 1, sink_b_idx, 0).expect("wiring tee to sink_b");

    pipeline.start().expect("pipeline validation and start");
    std::thread::sleep(Duration::from_millis(200));
    pipeline.stop().expect("pipeline stop");

    println!("sink_a: {:?} (complete={})", recorder_a.samples(), recorder_a.saw_complete());
    println!("sink_b: {:?} (complete={})", recorder_b.samples(), recorder_b.saw_complete());
    println!("aggregate stats: {:?}", pipeline.aggregate_stats());
}
