//! Core data types for the vireo RAW capture pipeline: pooled frame
//! buffers, pixel-format tags, the inter-stage queues, and session
//! counters.
//!
//! Higher layers live in `vireo-codec` (packed pixel + row codec) and
//! `vireo` (transforms, container I/O, streaming).

pub mod buffer;
pub mod format;
pub mod metrics;
pub mod queue;

pub mod prelude {
    pub use crate::buffer::{FramePool, FramePoolMetrics, PixelData, RawFrame};
    pub use crate::format::{CompressionType, PixelFormat};
    pub use crate::metrics::StreamCounters;
    pub use crate::queue::FrameQueue;
}
