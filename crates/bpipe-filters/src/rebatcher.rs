//! Rebatcher: re-chunks an incoming stream into fixed-size output batches,
//! buffering partial batches internally. One input, one output.

use crate::sample_io::{read_samples, write_samples};
use bpipe_core::{BehaviorKind, Contract, FilterConfig, FilterKind, GenericFilter, PropertyKey, PropertyValue};
use std::collections::VecDeque;

#[must_use]
pub fn rebatcher_filter(name: impl Into<String>, config: FilterConfig, output_batch_size: usize) -> GenericFilter {
    let mut contract = Contract::new();
    contract.behave(0, PropertyKey::DataType, BehaviorKind::Preserve { input_port: 0 });
    contract.behave(0, PropertyKey::SamplePeriodNs, BehaviorKind::Preserve { input_port: 0 });
    contract.behave(0, PropertyKey::MinBatchCapacity, BehaviorKind::Set(PropertyValue::UInt(output_batch_size as u64)));
    contract.behave(0, PropertyKey::MaxBatchCapacity, BehaviorKind::Set(PropertyValue::UInt(output_batch_size as u64)));

    GenericFilter::new(
        name,
        FilterKind::Map,
        config,
        1,
        1,
        contract,
        Box::new(move |ctx| {
            let mut pending: VecDeque<f64> = VecDeque::new();
            let mut period_ns = 0u64;
            let mut next_t_ns = 0u64;

            // Returns `true` if the worker should abort (no sink connected, or
            // the sink's ring is gone for good) rather than retry.
            let flush_one = |ctx: &bpipe_core::WorkerContext, pending: &mut VecDeque<f64>, n: usize, t_ns: u64, period_ns: u64| -> bool {
                let chunk: Vec<f64> = pending.drain(..n).collect();
                let sink = match ctx.sinks[0].clone() {
                    Some(s) => s,
                    None => return true,
                };
                loop {
                    if !ctx.is_running() {
                        return true;
                    }
                    match sink.reserve_head(ctx.timeout_us) {
                        Ok(mut guard) => {
                            guard.batch_mut().t_ns = t_ns;
                            guard.batch_mut().period_ns = period_ns;
                            write_samples(guard.batch_mut(), &chunk);
                            guard.commit();
                            ctx.record_batch(chunk.len() as u64);
                            return false;
                        }
                        Err(bpipe_ring::RingError::Timeout) => continue,
                        Err(_) => return true,
                    }
                }
            };

            loop {
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
                    if !pending.is_empty() {
                        let n = pending.len();
                        if flush_one(&ctx, &mut pending, n, next_t_ns, period_ns) {
                            return;
                        }
                    }
                    ctx.forward_completion();
                    ctx.finish();
                    return;
                }
                let head_count = tail.batch().head();
                let values = read_samples(tail.batch(), head_count);
                if pending.is_empty() {
                    next_t_ns = tail.batch().t_ns;
                }
                period_ns = tail.batch().period_ns;
                tail.release();

                pending.extend(values);
                while pending.len() >= output_batch_size {
                    if flush_one(&ctx, &mut pending, output_batch_size, next_t_ns, period_ns) {
                        return;
                    }
                    next_t_ns += output_batch_size as u64 * period_ns;
                }
            }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpipe_core::Filter as _;
    use bpipe_ring::{OverflowBehaviour, Ring, RingConfig, SampleType};
    use std::sync::Arc;

    fn ring_config(batch_capacity_expo: u32) -> RingConfig {
        RingConfig::new(SampleType::F32, batch_capacity_expo, 3, OverflowBehaviour::Block).unwrap()
    }

    #[test]
    fn rechunks_small_input_batches_into_the_configured_output_size() {
        let mut rb = rebatcher_filter("rb", FilterConfig::new(ring_config(1)), 4);
        let input = rb.input_ring_arc(0).unwrap();
        let out = Arc::new(Ring::new(ring_config(3)));
        out.start();
        rb.connect_sink(0, out.clone()).unwrap();
        rb.start().unwrap();

        for chunk in [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]] {
            let mut head = input.reserve_head(0).unwrap();
            write_samples(head.batch_mut(), &chunk);
            head.commit();
        }
        {
            let mut head = input.reserve_head(0).unwrap();
            head.batch_mut().mark_complete();
            head.commit();
        }

        let first = out.peek_tail(1_000_000).unwrap();
        assert_eq!(read_samples(first.batch(), first.batch().head()), vec![1.0, 2.0, 3.0, 4.0]);
        first.release();

        let second = out.peek_tail(1_000_000).unwrap();
        assert_eq!(read_samples(second.batch(), second.batch().head()), vec![5.0, 6.0]);
        second.release();

        let complete = out.peek_tail(1_000_000).unwrap();
        assert!(complete.batch().is_complete());
        complete.release();

        rb.stop().unwrap();
    }
}
