//! Object pooling utilities for allocation reuse.
//!
//! Per-frame structures such as recorded command lists are rebuilt every frame.
//! [`RecyclePool<T>`] keeps released values around in a cleared state so the
//! next frame reuses their allocations (e.g. `Vec` capacity) instead of
//! reallocating.
//!
//! # Example
//!
//! ```
//! use redlilium_core::pool::{Poolable, RecyclePool};
//!
//! #[derive(Debug, Default)]
//! struct Commands {
//!     data: Vec<u8>,
//! }
//!
//! impl Poolable for Commands {
//!     fn new_empty() -> Self {
//!         Self::default()
//!     }
//!     fn reset(&mut self) {
//!         self.data.clear();
//!     }
//! }
//!
//! let mut pool = RecyclePool::<Commands>::new();
//! let mut cmds = pool.acquire();
//! cmds.data.extend_from_slice(&[1, 2, 3]);
//!
//! // Recycling clears the data but keeps the Vec capacity.
//! pool.recycle(cmds);
//! let reused = pool.acquire();
//! assert!(reused.data.is_empty());
//! assert!(reused.data.capacity() >= 3);
//! ```

/// Trait for types that can be pooled and reused.
///
/// Implementors must be able to create an empty instance and clear their
/// contents while preserving allocated capacity.
pub trait Poolable {
    /// Create a new empty instance for pool initialization.
    fn new_empty() -> Self;

    /// Reset the value to an empty state, preserving allocated capacity.
    ///
    /// For example, call `Vec::clear()` rather than replacing with a new `Vec`.
    fn reset(&mut self);
}

/// A free list of cleared [`Poolable`] values.
#[derive(Debug)]
pub struct RecyclePool<T: Poolable> {
    free: Vec<T>,
    allocated: usize,
}

impl<T: Poolable> RecyclePool<T> {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            allocated: 0,
        }
    }

    /// Takes a cleared value from the pool, creating one if the pool is empty.
    pub fn acquire(&mut self) -> T {
        match self.free.pop() {
            Some(value) => value,
            None => {
                self.allocated += 1;
                log::trace!(
                    "RecyclePool<{}>: pool empty, creating entry #{}",
                    std::any::type_name::<T>(),
                    self.allocated
                );
                T::new_empty()
            }
        }
    }

    /// Resets `value` and returns it to the pool.
    pub fn recycle(&mut self, mut value: T) {
        value.reset();
        self.free.push(value);
    }

    /// Number of values currently waiting for reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total number of values ever created by this pool.
    pub fn allocated_count(&self) -> usize {
        self.allocated
    }

    /// Drops every pooled value.
    pub fn clear(&mut self) {
        if !self.free.is_empty() {
            log::debug!(
                "RecyclePool<{}>: dropping {} pooled entries",
                std::any::type_name::<T>(),
                self.free.len()
            );
        }
        self.free.clear();
    }
}

impl<T: Poolable> Default for RecyclePool<T> {
    fn default() -> Self {
        Self::new()
    }
}
