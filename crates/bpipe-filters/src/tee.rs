//! Fan-out: one input copied verbatim to every connected output.

use crate::sample_io::{read_samples, write_samples};
use bpipe_core::{BehaviorKind, Contract, FilterConfig, FilterKind, GenericFilter, PropertyKey};

#[must_use]
pub fn tee_filter(name: impl Into<String>, config: FilterConfig, n_outputs: usize) -> GenericFilter {
    let mut contract = Contract::new();
    for port in 0..n_outputs {
        for key in PropertyKey::ALL {
            contract.behave(port, key, BehaviorKind::Preserve { input_port: 0 });
        }
    }

    GenericFilter::new(
        name,
        FilterKind::Tee,
        config,
        1,
        n_outputs,
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
                ctx.forward_completion();
                ctx.finish();
                return;
            }
            let head_count = tail.batch().head();
            let values = read_samples(tail.batch(), head_count);
            let t_ns = tail.batch().t_ns;
            let period_ns = tail.batch().period_ns;
            tail.release();

            for sink in ctx.sinks.iter().flatten() {
                let copy_len = values.len().min(sink.config().batch_capacity());
                loop {
                    if !ctx.is_running() {
                        return;
                    }
                    match sink.reserve_head(ctx.timeout_us) {
                        Ok(mut guard) => {
                            guard.batch_mut().t_ns = t_ns;
                            guard.batch_mut().period_ns = period_ns;
                            write_samples(guard.batch_mut(), &values[..copy_len]);
                            guard.commit();
                            break;
                        }
                        Err(bpipe_ring::RingError::Timeout) => continue,
                        Err(_) => return,
                    }
                }
            }
            ctx.record_batch(values.len() as u64);
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
    fn every_connected_output_receives_the_same_batch() {
        let mut tee = tee_filter("split", FilterConfig::new(ring_config()), 2);
        let input = tee.input_ring_arc(0).unwrap();
        let a = Arc::new(Ring::new(ring_config()));
        let b = Arc::new(Ring::new(ring_config()));
        a.start();
        b.start();
        tee.connect_sink(0, a.clone()).unwrap();
        tee.connect_sink(1, b.clone()).unwrap();
        tee.start().unwrap();

        {
            let mut head = input.reserve_head(0).unwrap();
            write_samples(head.batch_mut(), &[1.0, 2.0]);
            head.commit();
        }
        let ta = a.peek_tail(1_000_000).unwrap();
        let tb = b.peek_tail(1_000_000).unwrap();
        assert_eq!(read_samples(ta.batch(), ta.batch().head()), vec![1.0, 2.0]);
        assert_eq!(read_samples(tb.batch(), tb.batch().head()), vec![1.0, 2.0]);
        ta.release();
        tb.release();

        tee.stop().unwrap();
    }
}
