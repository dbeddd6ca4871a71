//! Kernel row cache
//!
//! The SMO solver needs whole kernel rows K(i, *) each time it updates the
//! error cache after moving a pair of multipliers. Rows are cached in an LRU
//! keyed by sample index, sized from a memory budget in bytes.

use crate::core::Result;
use crate::kernel::Kernel;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// LRU cache of full kernel rows
pub struct KernelCache {
    rows: LruCache<usize, Arc<[f64]>>,
    hits: u64,
    misses: u64,
}

impl KernelCache {
    /// Create a cache holding at most `capacity` rows
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            rows: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Create a cache for rows of `row_len` entries within `memory_bytes`.
    /// At least two rows are always kept, one per working-set variable.
    pub fn with_memory_limit(memory_bytes: usize, row_len: usize) -> Self {
        let row_bytes = (row_len * std::mem::size_of::<f64>()).max(1);
        Self::new((memory_bytes / row_bytes).max(2))
    }

    /// Get row `i`, computing it on a miss
    pub fn row<K: Kernel + ?Sized>(
        &mut self,
        kernel: &K,
        inputs: &[Vec<f64>],
        i: usize,
    ) -> Result<Arc<[f64]>> {
        if let Some(row) = self.rows.get(&i) {
            self.hits += 1;
            return Ok(Arc::clone(row));
        }
        self.misses += 1;

        let mut row = Vec::new();
        row.try_reserve_exact(inputs.len())?;
        row.extend(inputs.iter().map(|x| kernel.compute(&inputs[i], x)));
        let row: Arc<[f64]> = row.into();
        self.rows.put(i, Arc::clone(&row));
        Ok(row)
    }

    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            capacity: self.rows.cap().get(),
            size: self.rows.len(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub capacity: usize,
    pub size: usize,
}
