//! Real-time RAW video capture pipeline.
//!
//! Vireo moves unprocessed Bayer sensor frames from a camera callback to
//! disk at 30–60 Hz: frames are optionally cropped, 2x binned, and
//! entropy-packed, then written across sharded container files alongside
//! synchronized WAV audio. Shutdown is cooperative and always leaves every
//! shard readable, sealed or not.
//!
//! The crate split mirrors the data path: `vireo-core` holds the pooled
//! buffers and queues, `vireo-codec` the bit-level packing primitives, and
//! this crate the transform, container, audio, and streaming layers.
//!
//! # Example
//! ```rust,no_run
//! use std::fs::File;
//! use vireo::prelude::*;
//!
//! let mut streamer = RawVideoStreamer::new();
//! streamer.start(StreamConfig {
//!     bin: true,
//!     enable_compression: true,
//!     num_threads: 2,
//!     outputs: vec![
//!         File::create("shard0.vraw")?,
//!         File::create("shard1.vraw")?,
//!     ],
//!     ..StreamConfig::default()
//! })?;
//!
//! // camera callback:
//! let pool = FramePool::with_capacity(8, 4000 * 3000 * 2);
//! if let Some(lease) = pool.try_lease() {
//!     let frame = RawFrame::new(lease, 4000, 3000, PixelFormat::Raw10, 0);
//!     streamer.add(frame);
//! }
//!
//! streamer.stop();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod container;
pub mod streamer;
pub mod transform;

pub mod prelude {
    pub use crate::audio::{AudioError, AudioSource, PcmRing};
    pub use crate::container::{ContainerError, ContainerReader, ContainerWriter, FrameRecord};
    pub use crate::streamer::{
        AudioOutput, PriorityHook, RawVideoStreamer, StreamConfig, StreamError,
    };
    pub use crate::transform::{FrameTransformer, TransformError};
    pub use vireo_codec::prelude::*;
    pub use vireo_core::prelude::*;
}
