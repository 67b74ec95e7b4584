//! Allocator statistics.

/// Counters maintained by [`Kmalloc`](crate::Kmalloc).
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct KmallocStats {
    /// Pages consumed by the bootstrap tables; never returned.
    pub bootstrap_pages: usize,
    /// Allocations currently live.
    pub live_allocations: usize,
    /// Chunks currently occupied, headers included.
    pub live_chunks: usize,
    /// Heap pages currently backed by physical memory.
    pub backed_pages: usize,
    /// Highest value `backed_pages` has reached.
    pub peak_backed_pages: usize,
    /// Successful allocations since initialization.
    pub total_allocations: u64,
    /// Successful frees since initialization.
    pub total_frees: u64,
    /// Allocation requests that returned an error.
    pub failed_allocations: u64,
}

impl KmallocStats {
    pub(crate) const fn new(bootstrap_pages: usize) -> Self {
        Self {
            bootstrap_pages,
            live_allocations: 0,
            live_chunks: 0,
            backed_pages: 0,
            peak_backed_pages: 0,
            total_allocations: 0,
            total_frees: 0,
            failed_allocations: 0,
        }
    }

    pub(crate) const fn record_allocation(&mut self, chunks: usize) {
        self.live_allocations += 1;
        self.live_chunks += chunks;
        self.total_allocations += 1;
    }

    pub(crate) const fn record_free(&mut self, chunks: usize) {
        self.live_allocations -= 1;
        self.live_chunks -= chunks;
        self.total_frees += 1;
    }

    pub(crate) const fn record_failure(&mut self) {
        self.failed_allocations += 1;
    }

    pub(crate) fn page_backed(&mut self) {
        self.backed_pages += 1;
        self.peak_backed_pages = self.peak_backed_pages.max(self.backed_pages);
    }

    pub(crate) const fn page_released(&mut self) {
        self.backed_pages -= 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peak_survives_release() {
        let mut stats = KmallocStats::new(1);
        stats.page_backed();
        stats.page_backed();
        stats.page_released();
        stats.page_backed();
        stats.page_released();
        assert_eq!(stats.backed_pages, 1);
        assert_eq!(stats.peak_backed_pages, 2);
    }

    #[test]
    fn allocation_counters() {
        let mut stats = KmallocStats::new(0);
        stats.record_allocation(5);
        stats.record_allocation(4);
        stats.record_free(5);
        stats.record_failure();
        assert_eq!(stats.live_allocations, 1);
        assert_eq!(stats.live_chunks, 4);
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.total_frees, 1);
        assert_eq!(stats.failed_allocations, 1);
    }
}
