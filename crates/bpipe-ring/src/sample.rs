//! The closed sample-type vocabulary (`spec.md` §3.1) and the pre-allocated,
//! runtime-tagged sample storage each batch owns.

use std::fmt;

/// Element type carried by a stream. `Undefined` is the sentinel value a
/// [`crate::RingConfig`] must never be constructed with; it exists so callers can
/// represent "not yet configured" without an `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    F32,
    I32,
    U32,
    Undefined,
}

impl SampleType {
    /// Byte width of one sample of this type. Panics on `Undefined`, which has no
    /// storage representation and must never reach a ring or batch.
    #[must_use]
    pub const fn width_bytes(self) -> usize {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::Undefined => 0,
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::F32 => "f32",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::Undefined => "undefined",
        };
        f.write_str(name)
    }
}

/// Pre-allocated, fixed-capacity sample storage for one batch slot.
///
/// The variant is chosen once when the owning [`crate::Ring`] is constructed and
/// never changes thereafter: every slot in a ring holds the same variant, at the
/// same fixed length. This is the runtime-tagged-dtype design decided in
/// `SPEC_FULL.md` §2 — the ring stays monomorphic while the dtype is still
/// checked at pipeline-validation time via [`SampleType`].
#[derive(Debug, Clone)]
pub enum SampleBuffer {
    F32(Box<[f32]>),
    I32(Box<[i32]>),
    U32(Box<[u32]>),
}

impl SampleBuffer {
    /// Allocates a zeroed buffer of `capacity` samples of the given type.
    ///
    /// # Panics
    /// Panics if `dtype` is [`SampleType::Undefined`].
    #[must_use]
    pub fn new(dtype: SampleType, capacity: usize) -> Self {
        match dtype {
            SampleType::F32 => Self::F32(vec![0.0f32; capacity].into_boxed_slice()),
            SampleType::I32 => Self::I32(vec![0i32; capacity].into_boxed_slice()),
            SampleType::U32 => Self::U32(vec![0u32; capacity].into_boxed_slice()),
            SampleType::Undefined => panic!("cannot allocate a SampleBuffer for SampleType::Undefined"),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> SampleType {
        match self {
            Self::F32(_) => SampleType::F32,
            Self::I32(_) => SampleType::I32,
            Self::U32(_) => SampleType::U32,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        match self {
            Self::F32(b) => b.len(),
            Self::I32(b) => b.len(),
            Self::U32(b) => b.len(),
        }
    }

    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Self::I32(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Self::U32(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f32_mut(&mut self) -> Option<&mut [f32]> {
        match self {
            Self::F32(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i32_mut(&mut self) -> Option<&mut [i32]> {
        match self {
            Self::I32(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32_mut(&mut self) -> Option<&mut [u32]> {
        match self {
            Self::U32(b) => Some(b),
            _ => None,
        }
    }

    /// Reads sample `i` (of the valid range) as `f64`, for code that inspects
    /// samples generically without caring about the concrete dtype (e.g. the
    /// recorder sink in `bpipe-filters`).
    #[must_use]
    pub fn sample_as_f64(&self, i: usize) -> f64 {
        match self {
            Self::F32(b) => f64::from(b[i]),
            Self::I32(b) => f64::from(b[i]),
            Self::U32(b) => f64::from(b[i]),
        }
    }
}
