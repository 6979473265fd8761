//! Layer cache decorator
//!
//! Decoding a layer usually means inflating a PNG or a run-length stream.
//! Commands and encoders read layers repeatedly, so the pipeline wraps the
//! first decoded printable in a [`CachedPrintable`] that keeps the most
//! recently used layers in memory.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use super::printable::{Layer, Printable, PrintableError, Properties};

/// Default number of decoded layers kept by the pipeline
pub const DEFAULT_CACHED_LAYERS: usize = 64;

/// Hit/miss counters for a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct LayerLru {
    layers: HashMap<usize, Layer>,
    /// Least recently used index at the front
    order: VecDeque<usize>,
    stats: CacheStats,
}

impl LayerLru {
    fn get(&mut self, index: usize) -> Option<Layer> {
        let layer = self.layers.get(&index).cloned()?;
        self.touch(index);
        self.stats.hits += 1;
        Some(layer)
    }

    fn insert(&mut self, index: usize, layer: Layer, capacity: usize) {
        self.layers.insert(index, layer);
        self.touch(index);
        while self.order.len() > capacity {
            if let Some(old) = self.order.pop_front() {
                self.layers.remove(&old);
                self.stats.evictions += 1;
                tracing::trace!(layer = old, "evicted cached layer");
            }
        }
    }

    fn touch(&mut self, index: usize) {
        if let Some(pos) = self.order.iter().position(|i| *i == index) {
            self.order.remove(pos);
        }
        self.order.push_back(index);
    }
}

/// A printable whose layer reads are memoized
///
/// Properties and the layer count pass straight through. Failed reads are
/// not cached, so a retry reaches the wrapped printable again.
pub struct CachedPrintable<P> {
    inner: P,
    capacity: usize,
    lru: RefCell<LayerLru>,
}

impl<P: Printable> CachedPrintable<P> {
    /// Wraps `inner`, keeping at most `capacity` decoded layers
    pub fn new(inner: P, capacity: usize) -> Result<Self, PrintableError> {
        if capacity == 0 {
            return Err(PrintableError::InvalidCapacity(capacity));
        }

        Ok(Self {
            inner,
            capacity,
            lru: RefCell::new(LayerLru::default()),
        })
    }

    /// Number of layers currently held
    pub fn len(&self) -> usize {
        self.lru.borrow().layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached indices, least recently used first
    pub fn cached_indices(&self) -> Vec<usize> {
        self.lru.borrow().order.iter().copied().collect()
    }

    pub fn stats(&self) -> CacheStats {
        self.lru.borrow().stats
    }
}

impl<P: Printable> Printable for CachedPrintable<P> {
    fn properties(&self) -> &Properties {
        self.inner.properties()
    }

    fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
        if let Some(layer) = self.lru.borrow_mut().get(index) {
            tracing::trace!(layer = index, "layer cache hit");
            return Ok(layer);
        }

        let layer = self.inner.layer(index)?;
        tracing::trace!(layer = index, "layer cache miss");

        let mut lru = self.lru.borrow_mut();
        lru.stats.misses += 1;
        lru.insert(index, layer.clone(), self.capacity);
        Ok(layer)
    }

    fn layer_count(&self) -> usize {
        self.inner.layer_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MemoryPrintable;
    use image::{GrayImage, Luma};
    use proptest::prelude::*;
    use std::cell::Cell;

    /// Counts how often each layer is actually decoded
    struct CountingPrintable {
        inner: MemoryPrintable,
        reads: Cell<usize>,
    }

    impl CountingPrintable {
        fn new(layers: usize) -> Self {
            let images = (0..layers)
                .map(|i| {
                    let mut image = GrayImage::new(3, 3);
                    image.put_pixel((i % 3) as u32, 1, Luma([200]));
                    image.put_pixel(0, 0, Luma([i as u8]));
                    image
                })
                .collect();
            Self {
                inner: MemoryPrintable::new(Properties::default(), images),
                reads: Cell::new(0),
            }
        }
    }

    impl Printable for &CountingPrintable {
        fn properties(&self) -> &Properties {
            self.inner.properties()
        }

        fn layer(&self, index: usize) -> Result<Layer, PrintableError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.layer(index)
        }
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let source = MemoryPrintable::new(Properties::default(), vec![]);
        let err = CachedPrintable::new(source, 0).err().unwrap();

        assert!(matches!(err, PrintableError::InvalidCapacity(0)));
    }

    #[test]
    fn hit_does_not_delegate() {
        let source = CountingPrintable::new(4);
        let cached = CachedPrintable::new(&source, 2).unwrap();

        let first = cached.layer(1).unwrap();
        let second = cached.layer(1).unwrap();

        assert_eq!(first, second);
        assert_eq!(source.reads.get(), 1);
        assert_eq!(cached.stats().hits, 1);
        assert_eq!(cached.stats().misses, 1);
    }

    #[test]
    fn least_recently_used_is_evicted() {
        let source = CountingPrintable::new(5);
        let cached = CachedPrintable::new(&source, 3).unwrap();

        cached.layer(0).unwrap();
        cached.layer(1).unwrap();
        cached.layer(2).unwrap();
        // Touch 0 so 1 becomes the oldest
        cached.layer(0).unwrap();
        cached.layer(3).unwrap();

        assert_eq!(cached.cached_indices(), vec![2, 0, 3]);
        assert_eq!(cached.stats().evictions, 1);

        // 1 was evicted, so it is decoded again
        let reads = source.reads.get();
        cached.layer(1).unwrap();
        assert_eq!(source.reads.get(), reads + 1);
    }

    #[test]
    fn failed_reads_are_not_cached() {
        let source = CountingPrintable::new(2);
        let cached = CachedPrintable::new(&source, 2).unwrap();

        assert!(cached.layer(7).is_err());
        assert!(cached.is_empty());
    }

    #[test]
    fn properties_pass_through() {
        let source = CountingPrintable::new(6);
        let cached = CachedPrintable::new(&source, 2).unwrap();

        assert_eq!(cached.properties(), source.inner.properties());
        assert_eq!(cached.layer_count(), 6);
        assert_eq!(source.reads.get(), 0);
    }

    proptest! {
        #[test]
        fn cached_reads_match_direct_reads(
            capacity in 1usize..6,
            reads in proptest::collection::vec(0usize..10, 0..64),
        ) {
            let source = CountingPrintable::new(10);
            let cached = CachedPrintable::new(&source, capacity).unwrap();

            for index in reads {
                let direct = source.inner.layer(index).unwrap();
                let through_cache = cached.layer(index).unwrap();
                prop_assert_eq!(direct, through_cache);
                prop_assert!(cached.len() <= capacity);
            }
        }

        #[test]
        fn next_eviction_is_least_recently_read(
            capacity in 1usize..5,
            reads in proptest::collection::vec(0usize..8, 1..40),
        ) {
            let source = CountingPrintable::new(8);
            let cached = CachedPrintable::new(&source, capacity).unwrap();

            // Reference model: most recent read at the back
            let mut model: Vec<usize> = Vec::new();
            for index in reads {
                cached.layer(index).unwrap();
                model.retain(|i| *i != index);
                model.push(index);
                if model.len() > capacity {
                    model.remove(0);
                }
            }

            prop_assert_eq!(cached.cached_indices(), model);
        }
    }
}
