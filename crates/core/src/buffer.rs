use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::format::{CompressionType, PixelFormat};
use crate::metrics::Metrics;

/// Recyclable byte storage for one captured frame, with a valid sub-window.
///
/// The transforms rewrite frame data in place and shrink the valid range to
/// the bytes the codec actually produced; writers persist only that range.
/// When dropped, the storage returns to the originating [`FramePool`] so the
/// capture path never reallocates at steady state.
///
/// # Example
/// ```rust
/// use vireo_core::prelude::FramePool;
///
/// let pool = FramePool::with_capacity(2, 1024);
/// let mut data = pool.lease();
/// data.resize(16);
/// data.set_valid_range(0, 10);
/// assert_eq!(data.valid_bytes().len(), 10);
/// ```
pub struct PixelData {
    pool: Arc<PoolInner>,
    buf: Option<Vec<u8>>,
    valid: (usize, usize),
}

impl PixelData {
    /// Borrow the full backing region as an immutable slice.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    /// Borrow the full backing region as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    /// Current length of the backing region.
    pub fn len(&self) -> usize {
        self.buf.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the backing region is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure the region holds `len` bytes, zero-filling any growth.
    pub fn resize(&mut self, len: usize) {
        if let Some(buf) = self.buf.as_mut() {
            buf.resize(len, 0);
        }
        let (start, end) = self.valid;
        self.valid = (start.min(len), end.min(len));
    }

    /// Set the valid sub-window; clamped to the region length.
    pub fn set_valid_range(&mut self, start: usize, end: usize) {
        let len = self.len();
        let start = start.min(len);
        let end = end.clamp(start, len);
        self.valid = (start, end);
    }

    /// The current valid sub-window.
    pub fn valid_range(&self) -> (usize, usize) {
        self.valid
    }

    /// Borrow only the valid sub-window.
    pub fn valid_bytes(&self) -> &[u8] {
        let (start, end) = self.valid;
        self.as_slice().get(start..end).unwrap_or(&[])
    }
}

impl Drop for PixelData {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.recycle(buf);
        }
    }
}

/// Pool of reusable frame storage.
///
/// The pool is the pipeline's backpressure point: the capture side leases a
/// buffer per sensor frame and simply skips frames while the pool is dry,
/// which is why the queues downstream never need a hard capacity.
///
/// # Example
/// ```rust
/// use vireo_core::prelude::FramePool;
///
/// let pool = FramePool::with_limits(4, 1 << 20, 8);
/// let lease = pool.lease();
/// assert_eq!(lease.len(), 1 << 20);
/// ```
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
    metrics: Arc<Metrics>,
}

impl FramePool {
    /// Create a pool with `capacity` preallocated buffers of `chunk_size` bytes.
    pub fn with_capacity(capacity: usize, chunk_size: usize) -> Self {
        Self::with_limits(capacity, chunk_size, capacity)
    }

    /// Create a pool with `capacity` preallocated buffers and a maximum
    /// retained free list of `max_free`.
    pub fn with_limits(capacity: usize, chunk_size: usize, max_free: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(vec![0; chunk_size]);
        }
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                chunk_size,
                max_free,
            }),
            metrics: Arc::new(Metrics::default()),
        }
    }

    /// Acquire a buffer, allocating if the free list is empty.
    pub fn lease(&self) -> PixelData {
        let buf = self
            .inner
            .free
            .lock()
            .pop()
            .inspect(|_| self.metrics.hit())
            .unwrap_or_else(|| {
                self.metrics.miss();
                self.metrics.alloc();
                vec![0; self.inner.chunk_size]
            });
        let len = buf.len();
        PixelData {
            pool: self.inner.clone(),
            buf: Some(buf),
            valid: (0, len),
        }
    }

    /// Acquire a buffer only if one is free, without allocating.
    ///
    /// This is the call a capture callback should use: a `None` here means
    /// the pipeline is saturated and the sensor frame should be skipped.
    pub fn try_lease(&self) -> Option<PixelData> {
        let buf = self.inner.free.lock().pop()?;
        self.metrics.hit();
        let len = buf.len();
        Some(PixelData {
            pool: self.inner.clone(),
            buf: Some(buf),
            valid: (0, len),
        })
    }

    /// Access reuse counters for this pool.
    pub fn metrics(&self) -> FramePoolMetrics {
        FramePoolMetrics(self.metrics.clone())
    }
}

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    chunk_size: usize,
    max_free: usize,
}

impl PoolInner {
    fn recycle(&self, buf: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(buf);
        }
    }
}

/// Observability handle for [`FramePool`] reuse behavior.
#[derive(Clone)]
pub struct FramePoolMetrics(Arc<Metrics>);

impl FramePoolMetrics {
    pub fn hits(&self) -> u64 {
        self.0.hits()
    }

    pub fn misses(&self) -> u64 {
        self.0.misses()
    }

    pub fn allocations(&self) -> u64 {
        self.0.allocations()
    }
}

/// A captured sensor frame moving through the pipeline.
///
/// The frame owns its storage lease; ownership moves capture → transform →
/// writer through the queues, so exactly one worker can touch the bytes at
/// any time. Dropping the frame (the writer does this after ingest) returns
/// the storage to the pool.
///
/// # Example
/// ```rust
/// use vireo_core::prelude::{FramePool, PixelFormat, RawFrame};
///
/// let pool = FramePool::with_capacity(1, 64 * 48 * 2);
/// let frame = RawFrame::new(pool.lease(), 64, 48, PixelFormat::Raw10, 0);
/// assert_eq!(frame.row_stride, 80);
/// assert_eq!(frame.payload().len(), 80 * 48);
/// ```
pub struct RawFrame {
    /// Lockable byte region with a valid sub-window.
    pub data: PixelData,
    /// Width in pixels (sensor layout, Bayer; always even).
    pub width: u32,
    /// Height in pixels (always even).
    pub height: u32,
    /// Bytes per row in the current packing.
    pub row_stride: usize,
    /// Current packing of `data`.
    pub pixel_format: PixelFormat,
    /// Entropy coding applied to the payload, if any.
    pub compression_type: CompressionType,
    /// Whether the frame has been 2x binned.
    pub is_binned: bool,
    /// Whether the payload is entropy-coded.
    pub is_compressed: bool,
    /// Capture timestamp in nanoseconds; drives cross-shard reassembly.
    pub timestamp: u64,
    /// Opaque per-frame side-band (exposure, white balance, ...); passed
    /// through untouched.
    pub metadata: SmallVec<[u8; 64]>,
}

impl RawFrame {
    /// Build a frame over leased storage, sizing it for the format's
    /// natural stride and marking the whole packed image valid.
    pub fn new(
        mut data: PixelData,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        timestamp: u64,
    ) -> Self {
        let row_stride = pixel_format.natural_stride(width);
        let len = row_stride * height as usize;
        if data.len() < len {
            data.resize(len);
        }
        data.set_valid_range(0, len);
        Self {
            data,
            width,
            height,
            row_stride,
            pixel_format,
            compression_type: CompressionType::Uncompressed,
            is_binned: false,
            is_compressed: false,
            timestamp,
            metadata: SmallVec::new(),
        }
    }

    /// The bytes a writer persists for this frame.
    pub fn payload(&self) -> &[u8] {
        self.data.valid_bytes()
    }
}
