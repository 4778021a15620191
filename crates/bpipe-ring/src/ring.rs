//! The bounded SPSC batch ring buffer (`spec.md` §3.3, §4.1).
//!
//! Producer and consumer hot fields are kept on separate cache lines
//! (`CacheLine<T>`, grounded in the teacher's `CacheAligned<T>` in
//! `ringmpsc_rs::ring`, adapted to the 64-byte line size `spec.md` §5 documents).
//! The fast path is lock-free; the slow path (`BLOCK`, and the DROP_HEAD
//! mid-peek fallback mandated by `spec.md` §9) parks on a `Mutex` + two
//! `Condvar`s, and force-return is a pair of sticky atomic escape slots
//! checked on entry to every blocking operation — the translation of the
//! `ShutdownState`/`ShutdownHandle` split in the teacher's
//! `ringmpsc-stream::shutdown` module into `std::sync` primitives.

use crate::batch::Batch;
use crate::error::{ForceReturnCode, RingConfigError, RingError};
use crate::sample::SampleType;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Assumed cache line size (`spec.md` §5). Producer and consumer hot fields are
/// each aligned to this boundary.
pub const CACHE_LINE_BYTES: usize = 64;

#[repr(align(64))]
struct CacheLine<T>(T);

impl<T> std::ops::Deref for CacheLine<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Overflow discipline applied by `reserve_head` when the ring is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowBehaviour {
    /// Park the producer until space is available or the ring stops.
    Block,
    /// Discard the oldest unread batch to make room; sticky `dropped_batches`
    /// counter on the producer side.
    DropHead,
    /// Discard the batch about to be written; the eventual commit is a no-op.
    /// Sticky `dropped_by_producer` counter on the consumer side.
    DropTail,
}

/// Construction-time configuration for a [`Ring`] (`spec.md` §6).
#[derive(Debug, Clone, Copy)]
pub struct RingConfig {
    pub dtype: SampleType,
    /// log2 of samples per batch.
    pub batch_capacity_expo: u32,
    /// log2 of slots in the ring.
    pub ring_capacity_expo: u32,
    pub overflow_behaviour: OverflowBehaviour,
}

impl RingConfig {
    pub fn new(
        dtype: SampleType,
        batch_capacity_expo: u32,
        ring_capacity_expo: u32,
        overflow_behaviour: OverflowBehaviour,
    ) -> Result<Self, RingConfigError> {
        if dtype == SampleType::Undefined {
            return Err(RingConfigError::UndefinedDtype);
        }
        if batch_capacity_expo == 0 || batch_capacity_expo > 24 {
            return Err(RingConfigError::BatchCapacityExpoOutOfRange(batch_capacity_expo));
        }
        if ring_capacity_expo < 2 || ring_capacity_expo > 24 {
            return Err(RingConfigError::RingCapacityExpoOutOfRange(ring_capacity_expo));
        }
        Ok(Self {
            dtype,
            batch_capacity_expo,
            ring_capacity_expo,
            overflow_behaviour,
        })
    }

    #[must_use]
    pub fn batch_capacity(&self) -> usize {
        1usize << self.batch_capacity_expo
    }

    #[must_use]
    pub fn slots(&self) -> usize {
        1usize << self.ring_capacity_expo
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            dtype: SampleType::F32,
            batch_capacity_expo: 6, // 64 samples/batch
            ring_capacity_expo: 4,  // 16 slots
            overflow_behaviour: OverflowBehaviour::Block,
        }
    }
}

/// Point-in-time stats snapshot (`spec.md` §6 diagnostics surface).
#[derive(Debug, Clone, Copy, Default)]
pub struct RingStats {
    pub total_batches: u64,
    pub dropped_batches: u64,
    pub dropped_by_producer: u64,
}

/// Sticky shutdown-escape slot, checked on entry to every blocking operation.
/// Grounded in `ringmpsc_stream::shutdown::ShutdownState` (atomic flag) plus
/// `ShutdownHandle` (the payload carried alongside it).
#[derive(Default)]
struct ForceReturnSlot {
    active: AtomicBool,
    code: Mutex<Option<ForceReturnCode>>,
}

impl ForceReturnSlot {
    fn set(&self, code: ForceReturnCode) {
        *self.code.lock().unwrap() = Some(code);
        self.active.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.active.store(false, Ordering::Release);
        *self.code.lock().unwrap() = None;
    }

    fn check(&self) -> Option<ForceReturnCode> {
        if self.active.load(Ordering::Acquire) {
            *self.code.lock().unwrap()
        } else {
            None
        }
    }
}

struct ProducerState {
    /// Monotonic write-sequence counter; slot index is `head & mask`.
    head: AtomicU64,
    total_batches: AtomicU64,
    dropped_batches: AtomicU64,
    force_return: ForceReturnSlot,
}

struct ConsumerState {
    /// Monotonic read-sequence counter; slot index is `tail & mask`.
    tail: AtomicU64,
    dropped_by_producer: AtomicU64,
    force_return: ForceReturnSlot,
    /// Set while a peeked slot is held (between `peek_tail` and
    /// `release_tail`). Consulted by the producer's DROP_HEAD path so it never
    /// discards a slot the consumer is currently reading (`spec.md` §9).
    peeking: AtomicBool,
}

/// A bounded single-producer/single-consumer queue of pre-allocated batches.
///
/// See module docs and `spec.md` §3.3/§4.1 for the full contract. A `Ring` must
/// be used by exactly one producer thread and one consumer thread; sharing
/// beyond that is undefined behaviour at the API level (not memory-unsafe, but
/// the FIFO and overflow-accounting invariants no longer hold).
pub struct Ring {
    producer: CacheLine<ProducerState>,
    consumer: CacheLine<ConsumerState>,
    slots: Box<[UnsafeCell<Batch>]>,
    mask: u64,
    config: RingConfig,
    running: AtomicBool,
    lock: Mutex<()>,
    not_empty: Condvar,
    not_full: Condvar,
    next_batch_id: AtomicU64,
}

// SAFETY: access to `slots` is governed by the head/tail sequence protocol
// below, exactly as in the upstream SPSC ring this is adapted from: the
// producer only ever touches slots in `[tail, head)` complement (the free
// region) and the consumer only ever touches `[tail, head)` (the occupied
// region); the acquire/release pair on head/tail is what makes handing either
// region to the other thread safe.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    #[must_use]
    pub fn new(config: RingConfig) -> Self {
        let slots_count = config.slots();
        let batch_capacity = config.batch_capacity();
        let slots = (0..slots_count)
            .map(|_| UnsafeCell::new(Batch::new_empty(config.dtype, batch_capacity)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            producer: CacheLine(ProducerState {
                head: AtomicU64::new(0),
                total_batches: AtomicU64::new(0),
                dropped_batches: AtomicU64::new(0),
                force_return: ForceReturnSlot::default(),
            }),
            consumer: CacheLine(ConsumerState {
                tail: AtomicU64::new(0),
                dropped_by_producer: AtomicU64::new(0),
                force_return: ForceReturnSlot::default(),
                peeking: AtomicBool::new(false),
            }),
            slots,
            mask: (slots_count as u64) - 1,
            config,
            running: AtomicBool::new(false),
            lock: Mutex::new(()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            next_batch_id: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    #[must_use]
    pub fn slots_len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears indices/stats, clears sticky force-return codes, and sets
    /// `running`. Must only be called before any producer/consumer thread is
    /// active (`spec.md` §4.1).
    pub fn start(&self) {
        self.producer.head.store(0, Ordering::Relaxed);
        self.producer.total_batches.store(0, Ordering::Relaxed);
        self.producer.dropped_batches.store(0, Ordering::Relaxed);
        self.producer.force_return.clear();
        self.consumer.tail.store(0, Ordering::Relaxed);
        self.consumer.dropped_by_producer.store(0, Ordering::Relaxed);
        self.consumer.force_return.clear();
        self.consumer.peeking.store(false, Ordering::Relaxed);
        self.next_batch_id.store(0, Ordering::Relaxed);
        self.running.store(true, Ordering::Release);
    }

    /// Clears `running` and wakes every current waiter on both condition
    /// variables so blocked `reserve_head`/`peek_tail` calls observe the
    /// change promptly.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn force_return_head(&self, code: ForceReturnCode) {
        self.producer.force_return.set(code);
        let _guard = self.lock.lock().unwrap();
        self.not_full.notify_all();
    }

    pub fn force_return_tail(&self, code: ForceReturnCode) {
        self.consumer.force_return.set(code);
        let _guard = self.lock.lock().unwrap();
        self.not_empty.notify_all();
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        let head = self.producer.head.load(Ordering::Acquire);
        let tail = self.consumer.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.slots.len()
    }

    #[must_use]
    pub fn stats(&self) -> RingStats {
        RingStats {
            total_batches: self.producer.total_batches.load(Ordering::Relaxed),
            dropped_batches: self.producer.dropped_batches.load(Ordering::Relaxed),
            dropped_by_producer: self.consumer.dropped_by_producer.load(Ordering::Relaxed),
        }
    }

    fn slot_ptr(&self, seq: u64) -> *mut Batch {
        self.slots[(seq & self.mask) as usize].get()
    }

    // -----------------------------------------------------------------
    // PRODUCER
    // -----------------------------------------------------------------

    /// Reserves the next free slot for writing (`spec.md` §4.1).
    ///
    /// `timeout_us == 0` means wait indefinitely; this is never silently
    /// downgraded to a non-blocking check.
    pub fn reserve_head(&self, timeout_us: u64) -> Result<HeadGuard<'_>, RingError> {
        if let Some(code) = self.producer.force_return.check() {
            return Err(RingError::ForceReturn(code));
        }

        let tail = self.consumer.tail.load(Ordering::Acquire);
        let head = self.producer.head.load(Ordering::Relaxed);
        if head.wrapping_sub(tail) < self.slots.len() as u64 {
            return Ok(self.make_head_guard(head, false));
        }

        match self.config.overflow_behaviour {
            OverflowBehaviour::Block => self.reserve_head_block(timeout_us),
            OverflowBehaviour::DropHead => self.reserve_head_drop_head(timeout_us),
            OverflowBehaviour::DropTail => {
                self.consumer.dropped_by_producer.fetch_add(0, Ordering::Relaxed); // accounted on commit
                Ok(self.make_head_guard(head, true))
            }
        }
    }

    fn reserve_head_drop_head(&self, timeout_us: u64) -> Result<HeadGuard<'_>, RingError> {
        // spec.md §9: never discard a slot currently held by a mid-flight
        // peek_tail; fall back to BLOCK for this single commit instead.
        if self.consumer.peeking.load(Ordering::Acquire) {
            return self.reserve_head_block(timeout_us);
        }
        let tail = self.consumer.tail.load(Ordering::Acquire);
        // Re-check under the same race window the peek flag protects: if the
        // consumer started a peek between our two loads, fall back to BLOCK.
        if self.consumer.peeking.load(Ordering::Acquire) {
            return self.reserve_head_block(timeout_us);
        }
        self.consumer.tail.store(tail.wrapping_add(1), Ordering::Release);
        self.producer.dropped_batches.fetch_add(1, Ordering::Relaxed);
        let head = self.producer.head.load(Ordering::Relaxed);
        Ok(self.make_head_guard(head, false))
    }

    fn reserve_head_block(&self, timeout_us: u64) -> Result<HeadGuard<'_>, RingError> {
        let deadline = (timeout_us > 0).then(|| Instant::now() + Duration::from_micros(timeout_us));
        let mut guard = self.lock.lock().unwrap();
        loop {
            if let Some(code) = self.producer.force_return.check() {
                return Err(RingError::ForceReturn(code));
            }
            let tail = self.consumer.tail.load(Ordering::Acquire);
            let head = self.producer.head.load(Ordering::Relaxed);
            if head.wrapping_sub(tail) < self.slots.len() as u64 {
                return Ok(self.make_head_guard(head, false));
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(RingError::Stopped);
            }
            guard = match deadline {
                None => self.not_full.wait(guard).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(RingError::Timeout);
                    }
                    let (g, result) = self.not_full.wait_timeout(guard, remaining).unwrap();
                    if result.timed_out() {
                        // Loop once more to distinguish "woken right at the
                        // deadline with fresh space" from a true timeout.
                        let tail = self.consumer.tail.load(Ordering::Acquire);
                        let head = self.producer.head.load(Ordering::Relaxed);
                        if head.wrapping_sub(tail) >= self.slots.len() as u64 {
                            return Err(RingError::Timeout);
                        }
                    }
                    g
                }
            };
        }
    }

    fn make_head_guard(&self, seq: u64, drop_on_commit: bool) -> HeadGuard<'_> {
        // SAFETY: `seq` is the producer's own head sequence; only the producer
        // ever writes to `[tail, head)`'s complement, so this slot is not
        // visible to the consumer until `commit` performs its Release store.
        let batch = unsafe { &mut *self.slot_ptr(seq) };
        batch.reset_for_reuse();
        HeadGuard {
            ring: self,
            seq,
            drop_on_commit,
            committed: false,
        }
    }

    fn commit_head(&self, seq: u64) {
        let was_empty = self.occupancy() == 0;
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        // SAFETY: same slot handed out by reserve_head/make_head_guard above.
        unsafe { (*self.slot_ptr(seq)).batch_id = batch_id };

        let new_head = seq.wrapping_add(1);
        self.producer.head.store(new_head, Ordering::Release);
        self.producer.total_batches.fetch_add(1, Ordering::Relaxed);

        if was_empty {
            let _guard = self.lock.lock().unwrap();
            self.not_empty.notify_all();
        }
    }

    // -----------------------------------------------------------------
    // CONSUMER
    // -----------------------------------------------------------------

    /// Peeks the oldest unread batch (`spec.md` §4.1). If the ring is not
    /// running and empty, returns `Stopped` rather than `Timeout`.
    pub fn peek_tail(&self, timeout_us: u64) -> Result<TailGuard<'_>, RingError> {
        if let Some(code) = self.consumer.force_return.check() {
            return Err(RingError::ForceReturn(code));
        }

        let head = self.producer.head.load(Ordering::Acquire);
        let tail = self.consumer.tail.load(Ordering::Relaxed);
        if tail != head {
            return Ok(self.make_tail_guard(tail));
        }

        if !self.running.load(Ordering::Acquire) {
            return Err(RingError::Stopped);
        }

        self.peek_tail_block(timeout_us)
    }

    fn peek_tail_block(&self, timeout_us: u64) -> Result<TailGuard<'_>, RingError> {
        let deadline = (timeout_us > 0).then(|| Instant::now() + Duration::from_micros(timeout_us));
        let mut guard = self.lock.lock().unwrap();
        loop {
            if let Some(code) = self.consumer.force_return.check() {
                return Err(RingError::ForceReturn(code));
            }
            let head = self.producer.head.load(Ordering::Acquire);
            let tail = self.consumer.tail.load(Ordering::Relaxed);
            if tail != head {
                return Ok(self.make_tail_guard(tail));
            }
            if !self.running.load(Ordering::Acquire) {
                return Err(RingError::Stopped);
            }
            guard = match deadline {
                None => self.not_empty.wait(guard).unwrap(),
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(RingError::Timeout);
                    }
                    let (g, result) = self.not_empty.wait_timeout(guard, remaining).unwrap();
                    if result.timed_out() {
                        let head = self.producer.head.load(Ordering::Acquire);
                        let tail = self.consumer.tail.load(Ordering::Relaxed);
                        if tail == head {
                            return Err(RingError::Timeout);
                        }
                    }
                    g
                }
            };
        }
    }

    fn make_tail_guard(&self, seq: u64) -> TailGuard<'_> {
        self.consumer.peeking.store(true, Ordering::Release);
        TailGuard {
            ring: self,
            seq,
            released: false,
        }
    }

    fn release_tail(&self, seq: u64) {
        let was_full = self.is_full();
        self.consumer.tail.store(seq.wrapping_add(1), Ordering::Release);
        self.consumer.peeking.store(false, Ordering::Release);
        if was_full {
            let _guard = self.lock.lock().unwrap();
            self.not_full.notify_all();
        }
    }
}

/// Zero-copy exclusive handle to a freshly reserved slot. Drop enforces, via a
/// debug assertion, that every reservation is eventually committed: a leaked
/// `HeadGuard` would deadlock the producer (`spec.md` §4.2 universal
/// obligation 1).
pub struct HeadGuard<'a> {
    ring: &'a Ring,
    seq: u64,
    drop_on_commit: bool,
    committed: bool,
}

impl<'a> std::fmt::Debug for HeadGuard<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadGuard")
            .field("seq", &self.seq)
            .field("drop_on_commit", &self.drop_on_commit)
            .field("committed", &self.committed)
            .finish()
    }
}

impl<'a> HeadGuard<'a> {
    #[must_use]
    pub fn batch_mut(&mut self) -> &mut Batch {
        // SAFETY: see `make_head_guard`.
        unsafe { &mut *self.ring.slot_ptr(self.seq) }
    }

    /// `true` if this reservation is a DROP_TAIL sentinel: the caller may
    /// still write into `batch_mut()`, but `commit()` will not publish it.
    #[must_use]
    pub fn is_drop_on_commit(&self) -> bool {
        self.drop_on_commit
    }

    pub fn commit(mut self) {
        self.committed = true;
        if self.drop_on_commit {
            self.ring.consumer.dropped_by_producer.fetch_add(1, Ordering::Relaxed);
        } else {
            self.ring.commit_head(self.seq);
        }
    }
}

impl<'a> Drop for HeadGuard<'a> {
    fn drop(&mut self) {
        debug_assert!(
            self.committed,
            "HeadGuard dropped without commit(): this leaks a reservation and will deadlock the producer"
        );
    }
}

/// Shared-read handle to the oldest unread batch. Drop enforces, via a debug
/// assertion, that every peek is eventually released (`spec.md` §4.2 universal
/// obligation 2).
pub struct TailGuard<'a> {
    ring: &'a Ring,
    seq: u64,
    released: bool,
}

impl<'a> std::fmt::Debug for TailGuard<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailGuard")
            .field("seq", &self.seq)
            .field("released", &self.released)
            .finish()
    }
}

impl<'a> TailGuard<'a> {
    #[must_use]
    pub fn batch(&self) -> &Batch {
        // SAFETY: see `make_tail_guard`; the producer will not reuse this
        // slot until `release` performs its Release store on tail.
        unsafe { &*self.ring.slot_ptr(self.seq) }
    }

    pub fn release(mut self) {
        self.released = true;
        self.ring.release_tail(self.seq);
    }
}

impl<'a> Drop for TailGuard<'a> {
    fn drop(&mut self) {
        debug_assert!(
            self.released,
            "TailGuard dropped without release(): the next peek_tail on this ring would re-read the same batch"
        );
    }
}
