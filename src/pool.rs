//! C1: thread-safe allocator of entity indices from a fixed-capacity bitset.
//!
//! One bit per slot, packed into 32-bit buckets. A set bit means "free".
//! `acquire` clears the lowest free bit it can claim with a CAS; `release`
//! sets a bit back. The allocator never blocks; `acquire` fails once every
//! bucket reports no free bits.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

const BUCKET_BITS: u32 = 32;

/// Fixed-size bitset allocator over `[0, capacity)`.
pub struct IdPool {
    buckets: Vec<AtomicU32>,
    capacity: u32,
    hint: AtomicU32,
}

impl IdPool {
    /// Creates a pool with `capacity` slots, all initially free.
    pub fn new(capacity: u32) -> Self {
        let bucket_count = (capacity + BUCKET_BITS - 1) / BUCKET_BITS;
        let mut buckets = Vec::with_capacity(bucket_count as usize);
        for i in 0..bucket_count {
            let bits_in_bucket = (capacity - i * BUCKET_BITS).min(BUCKET_BITS);
            let word = if bits_in_bucket == BUCKET_BITS {
                u32::MAX
            } else {
                (1u32 << bits_in_bucket) - 1
            };
            buckets.push(AtomicU32::new(word));
        }
        IdPool {
            buckets,
            capacity,
            hint: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Claims and returns the lowest free index, or `CapacityExceeded` if
    /// every bucket is fully claimed.
    pub fn acquire(&self) -> Result<u32> {
        let bucket_count = self.buckets.len() as u32;
        if bucket_count == 0 {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let start = self.hint.load(Ordering::Relaxed) % bucket_count;
        for offset in 0..bucket_count {
            let bucket_index = (start + offset) % bucket_count;
            let bucket = &self.buckets[bucket_index as usize];

            loop {
                let word = bucket.load(Ordering::Relaxed);
                if word == 0 {
                    break;
                }
                let bit = word.trailing_zeros();
                let cleared = word & !(1 << bit);
                match bucket.compare_exchange_weak(
                    word,
                    cleared,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        return Ok(bucket_index * BUCKET_BITS + bit);
                    }
                    Err(_) => continue,
                }
            }
        }

        Err(Error::CapacityExceeded {
            capacity: self.capacity,
        })
    }

    /// Returns `index` to the pool. A no-op if it is already free.
    pub fn release(&self, index: u32) {
        let bucket_index = index / BUCKET_BITS;
        let bit = index % BUCKET_BITS;
        if let Some(bucket) = self.buckets.get(bucket_index as usize) {
            bucket.fetch_or(1 << bit, Ordering::AcqRel);
            if bucket_index < self.hint.load(Ordering::Relaxed) {
                self.hint.store(bucket_index, Ordering::Relaxed);
            }
        }
    }

    /// `true` if `index` is currently free (for diagnostics/tests only).
    pub fn is_free(&self, index: u32) -> bool {
        let bucket_index = index / BUCKET_BITS;
        let bit = index % BUCKET_BITS;
        match self.buckets.get(bucket_index as usize) {
            Some(bucket) => bucket.load(Ordering::Relaxed) & (1 << bit) != 0,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn acquire_release_roundtrip() {
        let pool = IdPool::new(8);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(a, b);
        pool.release(a);
        assert!(pool.is_free(a));
        let c = pool.acquire().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn exhaustion_is_capacity_exceeded() {
        let pool = IdPool::new(2);
        pool.acquire().unwrap();
        pool.acquire().unwrap();
        match pool.acquire() {
            Err(Error::CapacityExceeded { capacity }) => assert_eq!(capacity, 2),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn double_release_is_noop() {
        let pool = IdPool::new(4);
        let a = pool.acquire().unwrap();
        pool.release(a);
        pool.release(a);
        assert!(pool.is_free(a));
    }

    #[test]
    fn concurrent_acquire_never_double_allocates() {
        let pool = Arc::new(IdPool::new(4096));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..512 {
                    got.push(pool.acquire().unwrap());
                }
                got
            }));
        }
        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "duplicate index allocated concurrently");
    }
}
