//! Dtype-generic sample access shared by every reference filter. Filters
//! never match on [`bpipe_ring::SampleBuffer`] directly; they go through
//! these two helpers instead.

use bpipe_ring::{Batch, SampleBuffer};

/// Reads the first `count` valid samples as `f64`, regardless of dtype.
#[must_use]
pub fn read_samples(batch: &Batch, count: usize) -> Vec<f64> {
    (0..count).map(|i| batch.buffer().sample_as_f64(i)).collect()
}

/// Writes `values` starting at index 0 and sets `head = values.len()`.
///
/// # Panics
/// Panics if `values.len()` exceeds the batch's capacity.
pub fn write_samples(batch: &mut Batch, values: &[f64]) {
    let capacity = batch.capacity();
    assert!(values.len() <= capacity, "write_samples: {} values exceed batch capacity {capacity}", values.len());
    match batch.buffer_mut() {
        SampleBuffer::F32(b) => {
            for (i, v) in values.iter().enumerate() {
                b[i] = *v as f32;
            }
        }
        SampleBuffer::I32(b) => {
            for (i, v) in values.iter().enumerate() {
                b[i] = *v as i32;
            }
        }
        SampleBuffer::U32(b) => {
            for (i, v) in values.iter().enumerate() {
                b[i] = v.max(0.0) as u32;
            }
        }
    }
    batch.set_head(values.len());
}
