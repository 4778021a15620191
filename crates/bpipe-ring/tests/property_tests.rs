//! Proptest invariants for the ring buffer, grounded in the teacher's
//! `ringmpsc::tests::property_tests` (sequence-based FIFO and bounded-count
//! checks re-expressed against batches instead of raw elements).

use bpipe_ring::{OverflowBehaviour, Ring, RingConfig, SampleType};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

proptest! {
    /// INV-RING-01: under BLOCK, every value committed by the producer is
    /// observed by the consumer, in order, exactly once.
    #[test]
    fn block_is_lossless_and_ordered(values in prop::collection::vec(0u64..1_000_000, 1..200)) {
        let cfg = RingConfig::new(SampleType::U32, 3, 2, OverflowBehaviour::Block).unwrap();
        let ring = Arc::new(Ring::new(cfg));
        ring.start();

        let producer = ring.clone();
        let expected = values.clone();
        let writer = thread::spawn(move || {
            for v in expected {
                let mut g = producer.reserve_head(0).unwrap();
                g.batch_mut().t_ns = v;
                g.commit();
            }
        });

        let mut seen = Vec::with_capacity(values.len());
        while seen.len() < values.len() {
            let tail = ring.peek_tail(0).unwrap();
            seen.push(tail.batch().t_ns);
            tail.release();
        }
        writer.join().unwrap();
        prop_assert_eq!(seen, values);
    }

    /// INV-RING-02: occupancy never exceeds the configured slot count,
    /// regardless of overflow discipline.
    #[test]
    fn occupancy_never_exceeds_slots(
        n in 1usize..500,
        expo in 2u32..6,
        discipline_idx in 0u8..3,
    ) {
        let overflow = match discipline_idx {
            0 => OverflowBehaviour::Block,
            1 => OverflowBehaviour::DropHead,
            _ => OverflowBehaviour::DropTail,
        };
        let cfg = RingConfig::new(SampleType::F32, 2, expo, overflow).unwrap();
        let ring = Ring::new(cfg);
        ring.start();

        for i in 0..n {
            // Block would deadlock single-threaded once full; only push up to
            // capacity under Block so this property stays meaningful for all
            // three disciplines without spawning a consumer thread.
            if overflow == OverflowBehaviour::Block && ring.is_full() {
                break;
            }
            let g = ring.reserve_head(0).unwrap();
            g.commit();
            prop_assert!(ring.occupancy() <= ring.slots_len());
            let _ = i;
        }
    }

    /// INV-RING-03: DROP_HEAD never loses more than one batch per overflow
    /// event, and the producer-side drop counter accounts for exactly the
    /// batches the consumer never saw.
    #[test]
    fn drop_head_counter_matches_observed_gap(total in 5usize..100) {
        let cfg = RingConfig::new(SampleType::U32, 2, 2, OverflowBehaviour::DropHead).unwrap();
        let ring = Ring::new(cfg);
        ring.start();
        let slots = ring.slots_len();

        for i in 0..total {
            let mut g = ring.reserve_head(0).unwrap();
            g.batch_mut().t_ns = i as u64;
            g.commit();
        }

        let expected_drops = total.saturating_sub(slots) as u64;
        prop_assert_eq!(ring.stats().dropped_batches, expected_drops);

        let mut remaining = 0;
        while !ring.is_empty() {
            let tail = ring.peek_tail(0).unwrap();
            remaining += 1;
            tail.release();
        }
        prop_assert_eq!(remaining, total.min(slots));
    }
}
