//! Per-sample transform: one input, one output, same ring configuration on
//! both sides. All seven properties are `PRESERVE`d from the input.

use crate::sample_io::{read_samples, write_samples};
use bpipe_core::{BehaviorKind, Contract, FilterConfig, FilterKind, GenericFilter, PropertyKey};

/// A pure, stateless per-sample function.
pub trait SampleOp: Send + 'static {
    fn apply(&self, x: f64) -> f64;
}

/// `y = factor * x`.
pub struct Scale(pub f64);

impl SampleOp for Scale {
    fn apply(&self, x: f64) -> f64 {
        x * self.0
    }
}

/// `y = x`, used by [`crate::passthrough::passthrough_filter`].
pub struct Identity;

impl SampleOp for Identity {
    fn apply(&self, x: f64) -> f64 {
        x
    }
}

fn preserve_all_contract() -> Contract {
    let mut contract = Contract::new();
    for key in PropertyKey::ALL {
        contract.behave(0, key, BehaviorKind::Preserve { input_port: 0 });
    }
    contract
}

/// Builds a single-input, single-output filter that applies `op` to every
/// sample, carrying timing metadata through unchanged.
#[must_use]
pub fn map_filter(name: impl Into<String>, config: FilterConfig, op: impl SampleOp) -> GenericFilter {
    GenericFilter::new(
        name,
        FilterKind::Map,
        config,
        1,
        1,
        preserve_all_contract(),
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
                ctx.forward_completion();
                ctx.finish();
                return;
            }
            let head_count = tail.batch().head();
            let values = read_samples(tail.batch(), head_count);
            let t_ns = tail.batch().t_ns;
            let period_ns = tail.batch().period_ns;
            tail.release();

            let sink = match ctx.sinks[0].clone() {
                Some(s) => s,
                None => continue,
            };
            let mapped: Vec<f64> = values.iter().map(|x| op.apply(*x)).collect();
            loop {
                if !ctx.is_running() {
                    return;
                }
                match sink.reserve_head(ctx.timeout_us) {
                    Ok(mut guard) => {
                        guard.batch_mut().t_ns = t_ns;
                        guard.batch_mut().period_ns = period_ns;
                        write_samples(guard.batch_mut(), &mapped);
                        guard.commit();
                        ctx.record_batch(mapped.len() as u64);
                        break;
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
    use bpipe_ring::{OverflowBehaviour, Ring, RingConfig, SampleType};
    use std::sync::Arc;

    fn ring_config() -> RingConfig {
        RingConfig::new(SampleType::F32, 4, 2, OverflowBehaviour::Block).unwrap()
    }

    #[test]
    fn scale_multiplies_every_sample() {
        let mut m = map_filter("scale2", FilterConfig::new(ring_config()), Scale(2.0));
        let input = m.input_ring_arc(0).unwrap();
        let out = Arc::new(Ring::new(ring_config()));
        out.start();
        m.connect_sink(0, out.clone()).unwrap();
        m.start().unwrap();

        {
            let mut head = input.reserve_head(0).unwrap();
            write_samples(head.batch_mut(), &[1.0, 2.0, 3.0]);
            head.commit();
        }
        let tail = out.peek_tail(1_000_000).unwrap();
        assert_eq!(read_samples(tail.batch(), tail.batch().head()), vec![2.0, 4.0, 6.0]);
        tail.release();

        m.stop().unwrap();
    }

    /// A short finite `timeout_us` must not drop a batch when the output ring
    /// is momentarily full: the worker retries the reserve instead of moving
    /// on (`spec.md` §4.1 "Failure semantics", scenario 3 "no samples lost").
    #[test]
    fn finite_timeout_retries_a_full_output_instead_of_dropping_the_batch() {
        // Smallest legal ring is 4 slots; five single-sample batches are
        // guaranteed to overrun it and force at least one retry on the sink.
        let small_ring = RingConfig::new(SampleType::F32, 1, 2, OverflowBehaviour::Block).unwrap();
        let config = FilterConfig::new(small_ring).with_timeout_us(1_000);
        let mut m = map_filter("scale2", config, Scale(2.0));
        let input = m.input_ring_arc(0).unwrap();
        let out = Arc::new(Ring::new(small_ring));
        out.start();
        m.connect_sink(0, out.clone()).unwrap();
        m.start().unwrap();

        let producer = {
            let input = input.clone();
            std::thread::spawn(move || {
                for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
                    let mut head = input.reserve_head(0).unwrap();
                    write_samples(head.batch_mut(), &[v]);
                    head.commit();
                }
            })
        };

        // Give the producer and the map worker time to fill the output ring
        // and hit the configured timeout at least once before draining.
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut drained = Vec::new();
        for _ in 0..5 {
            let tail = out.peek_tail(1_000_000).unwrap();
            drained.extend(read_samples(tail.batch(), tail.batch().head()));
            tail.release();
        }
        assert_eq!(drained, vec![2.0, 4.0, 6.0, 8.0, 10.0]);

        producer.join().unwrap();
        m.stop().unwrap();
    }
}
