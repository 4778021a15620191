//! Synchronizer: two inputs whose sample period must agree, round-robined
//! onto a single output. Neither input is resampled; alignment is validated,
//! not enforced at runtime.

use crate::sample_io::{read_samples, write_samples};
use bpipe_core::{BehaviorKind, Contract, ConstraintKind, FilterConfig, FilterKind, GenericFilter, PortMask, PropertyKey};

#[must_use]
pub fn synchronizer_filter(name: impl Into<String>, config: FilterConfig) -> GenericFilter {
    let mut contract = Contract::new();
    contract.align(PropertyKey::SamplePeriodNs, PortMask::of(&[0, 1]));
    contract.constrain(0, PropertyKey::SamplePeriodNs, ConstraintKind::Exists);
    contract.constrain(1, PropertyKey::SamplePeriodNs, ConstraintKind::Exists);
    contract.behave(0, PropertyKey::DataType, BehaviorKind::Preserve { input_port: 0 });
    contract.behave(0, PropertyKey::SamplePeriodNs, BehaviorKind::Preserve { input_port: 0 });

    GenericFilter::new(
        name,
        FilterKind::Synchronizer,
        config,
        2,
        1,
        contract,
        Box::new(move |ctx| {
            let mut turn = 0usize;
            loop {
                if !ctx.is_running() {
                    return;
                }
                let port = turn % 2;
                turn = turn.wrapping_add(1);
                let tail = match ctx.inputs[port].peek_tail(ctx.timeout_us) {
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
                loop {
                    if !ctx.is_running() {
                        return;
                    }
                    match sink.reserve_head(ctx.timeout_us) {
                        Ok(mut guard) => {
                            guard.batch_mut().t_ns = t_ns;
                            guard.batch_mut().period_ns = period_ns;
                            write_samples(guard.batch_mut(), &values);
                            guard.commit();
                            ctx.record_batch(values.len() as u64);
                            break;
                        }
                        Err(bpipe_ring::RingError::Timeout) => continue,
                        Err(_) => return,
                    }
                }
            }
        }),
    )
}
