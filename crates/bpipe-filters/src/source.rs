//! Ramp source: emits `0, 1, 2, …` at a fixed sample period. Zero inputs, one
//! output. The simplest possible producer, useful for exercising every other
//! filter without external IO.

use bpipe_core::{BehaviorKind, Contract, FilterConfig, FilterKind, GenericFilter, PropertyKey, PropertyValue};
use crate::sample_io::write_samples;

/// Builds a ramp generator.
///
/// `period_ns` is the nanosecond spacing between samples; `0` means irregular
/// timing and disables the derived throughput behaviors. `max_total_samples`
/// bounds the stream; `0` means unbounded (runs until stopped).
#[must_use]
pub fn ramp_source(name: impl Into<String>, config: FilterConfig, period_ns: u64, max_total_samples: u64) -> GenericFilter {
    let dtype = config.ring_config.dtype;
    let batch_capacity = config.ring_config.batch_capacity() as u64;

    let mut contract = Contract::new();
    contract.behave(0, PropertyKey::DataType, BehaviorKind::Set(PropertyValue::DataType(dtype)));
    contract.behave(0, PropertyKey::SamplePeriodNs, BehaviorKind::Set(PropertyValue::UInt(period_ns)));
    contract.behave(0, PropertyKey::MaxTotalSamples, BehaviorKind::Set(PropertyValue::UInt(max_total_samples)));
    contract.behave(0, PropertyKey::MinBatchCapacity, BehaviorKind::Set(PropertyValue::UInt(batch_capacity)));
    contract.behave(0, PropertyKey::MaxBatchCapacity, BehaviorKind::Set(PropertyValue::UInt(batch_capacity)));
    if period_ns > 0 {
        let hz = 1_000_000_000 / period_ns;
        contract.behave(0, PropertyKey::MinThroughputHz, BehaviorKind::Set(PropertyValue::UInt(hz)));
        contract.behave(0, PropertyKey::MaxThroughputHz, BehaviorKind::Set(PropertyValue::UInt(hz)));
    }

    GenericFilter::new(
        name,
        FilterKind::Source,
        config,
        0,
        1,
        contract,
        Box::new(move |ctx| {
            let sink = match ctx.sinks[0].clone() {
                Some(s) => s,
                None => return ctx.finish(),
            };
            let mut emitted: u64 = 0;
            loop {
                if !ctx.is_running() {
                    return;
                }
                if max_total_samples > 0 && emitted >= max_total_samples {
                    ctx.forward_completion();
                    ctx.finish();
                    return;
                }
                let remaining = if max_total_samples > 0 { max_total_samples - emitted } else { batch_capacity };
                let this_batch = remaining.min(batch_capacity) as usize;
                match sink.reserve_head(ctx.timeout_us) {
                    Ok(mut guard) => {
                        let values: Vec<f64> = (0..this_batch as u64).map(|i| (emitted + i) as f64).collect();
                        guard.batch_mut().t_ns = emitted * period_ns;
                        guard.batch_mut().period_ns = period_ns;
                        write_samples(guard.batch_mut(), &values);
                        guard.commit();
                        ctx.record_batch(this_batch as u64);
                        emitted += this_batch as u64;
                    }
                    Err(bpipe_ring::RingError::Timeout) => continue,
                    Err(_) => return,
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpipe_core::Filter as _;
    use bpipe_ring::{OverflowBehaviour, RingConfig, SampleType};

    fn ring_config() -> RingConfig {
        RingConfig::new(SampleType::F32, 3, 2, OverflowBehaviour::Block).unwrap()
    }

    #[test]
    fn bounded_ramp_emits_exactly_its_budget_then_completes() {
        let mut source = ramp_source("r", FilterConfig::new(ring_config()), 1000, 5);
        let input = source.input_ring_arc(0);
        assert!(input.is_none());
        let out = bpipe_ring::Ring::new(ring_config());
        let out = std::sync::Arc::new(out);
        out.start();
        source.connect_sink(0, out.clone()).unwrap();
        source.start().unwrap();

        let mut total = 0usize;
        let mut saw_complete = false;
        while !saw_complete {
            let tail = out.peek_tail(100_000).unwrap();
            if tail.batch().is_complete() {
                saw_complete = true;
            } else {
                total += tail.batch().head();
            }
            tail.release();
        }
        assert_eq!(total, 5);
        source.stop().unwrap();
    }
}
