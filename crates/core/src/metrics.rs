use std::sync::atomic::{AtomicU64, Ordering};

/// Lightweight counters for pool reuse behavior.
///
/// # Example
/// ```rust
/// use vireo_core::metrics::Metrics;
///
/// let metrics = Metrics::default();
/// metrics.hit();
/// assert_eq!(metrics.hits(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Metrics {
    hits: AtomicU64,
    misses: AtomicU64,
    allocations: AtomicU64,
}

impl Metrics {
    /// Increment hit counter.
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment miss counter.
    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment allocation counter.
    pub fn alloc(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Snapshot of misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Snapshot of allocations.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

/// Increment-only session counters shared between the streamer and its
/// workers.
///
/// All increments use relaxed ordering; the counters are observability,
/// not synchronization.
///
/// # Example
/// ```rust
/// use vireo_core::metrics::StreamCounters;
///
/// let counters = StreamCounters::default();
/// counters.frame_accepted();
/// counters.frame_written(1024);
/// assert_eq!(counters.accepted_frames(), 1);
/// assert_eq!(counters.written_bytes(), 1024);
/// ```
#[derive(Debug, Default)]
pub struct StreamCounters {
    accepted_frames: AtomicU64,
    written_frames: AtomicU64,
    written_bytes: AtomicU64,
}

impl StreamCounters {
    /// Record a frame handed to the pipeline by the producer.
    pub fn frame_accepted(&self) {
        self.accepted_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame ingested by a container writer, with its payload size.
    pub fn frame_written(&self, bytes: u64) {
        self.written_frames.fetch_add(1, Ordering::Relaxed);
        self.written_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Reset all counters; only called between sessions.
    pub fn reset(&self) {
        self.accepted_frames.store(0, Ordering::Relaxed);
        self.written_frames.store(0, Ordering::Relaxed);
        self.written_bytes.store(0, Ordering::Relaxed);
    }

    /// Frames accepted by `add` so far.
    pub fn accepted_frames(&self) -> u64 {
        self.accepted_frames.load(Ordering::Relaxed)
    }

    /// Frames ingested by writers so far.
    pub fn written_frames(&self) -> u64 {
        self.written_frames.load(Ordering::Relaxed)
    }

    /// Payload bytes ingested by writers so far.
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }
}
