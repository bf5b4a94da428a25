//! Top-level coordinator: spawns the transform and writer workers, owns
//! the audio sub-stream, and exposes the `start`/`add`/`stop` control
//! surface with its observability counters.

use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use vireo_core::prelude::*;

use crate::audio::{self, AudioSource};
use crate::container::ContainerWriter;
use crate::transform::FrameTransformer;

/// How long a transform worker sleeps on an empty queue before re-checking
/// the running flag.
pub const TRANSFORM_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(67);
/// How long a writer worker sleeps on an empty queue before re-checking
/// shutdown conditions.
pub const WRITER_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Platform capability for boosting writer-thread scheduling priority.
///
/// Invoked once on each writer thread; the default is no hook at all, and
/// nothing in the pipeline branches on whether the boost happened.
pub type PriorityHook = Arc<dyn Fn() + Send + Sync>;

/// Configuration errors reported synchronously from [`RawVideoStreamer::start`].
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("no output files supplied")]
    NoOutputs,
    #[error("crop percentage {0} out of range 0..=100")]
    CropOutOfRange(u8),
}

impl StreamError {
    /// Stable string code for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::NoOutputs => "no_outputs",
            StreamError::CropOutOfRange(_) => "crop_out_of_range",
        }
    }
}

/// Dedicated audio descriptor plus the driver capability bound to it.
pub struct AudioOutput {
    /// Destination for the WAV written once at `stop()`.
    pub file: File,
    /// Platform audio driver.
    pub source: Arc<dyn AudioSource>,
}

/// Capture session configuration, consumed by [`RawVideoStreamer::start`].
///
/// Reshaping options are fixed for the lifetime of a session; change them
/// by stopping and starting again.
pub struct StreamConfig {
    /// Percent border cropped from each horizontal edge, 0..=100.
    pub crop_width: u8,
    /// Percent border cropped from each vertical edge, 0..=100.
    pub crop_height: u8,
    /// Enable 2x Bayer-preserving binning.
    pub bin: bool,
    /// Enable the row entropy codec.
    pub enable_compression: bool,
    /// Transform worker count; clamped to a minimum of 1.
    pub num_threads: usize,
    /// One video shard per file; each spawns a writer worker.
    pub outputs: Vec<File>,
    /// Optional synchronized audio capture.
    pub audio: Option<AudioOutput>,
    /// Opaque camera description stored in every shard header.
    pub camera_metadata: Vec<u8>,
    /// Optional scheduling boost applied on each writer thread.
    pub priority_hook: Option<PriorityHook>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            crop_width: 0,
            crop_height: 0,
            bin: false,
            enable_compression: false,
            num_threads: 1,
            outputs: Vec::new(),
            audio: None,
            camera_metadata: Vec::new(),
            priority_hook: None,
        }
    }
}

struct Shared {
    running: AtomicBool,
    active_transforms: AtomicUsize,
    unprocessed: FrameQueue<RawFrame>,
    ready: FrameQueue<RawFrame>,
    counters: StreamCounters,
}

/// Streaming engine moving sensor frames from the camera callback to disk.
///
/// ```text
/// camera → add() → unprocessed → transform worker → ready → writer → shard
/// ```
///
/// # Example
/// ```rust,no_run
/// use std::fs::File;
/// use vireo::prelude::*;
///
/// let mut streamer = RawVideoStreamer::new();
/// streamer.start(StreamConfig {
///     outputs: vec![File::create("shard0.vraw")?],
///     num_threads: 2,
///     ..StreamConfig::default()
/// })?;
///
/// let pool = FramePool::with_capacity(8, 4000 * 3000 * 2);
/// let frame = RawFrame::new(pool.lease(), 4000, 3000, PixelFormat::Raw10, 0);
/// streamer.add(frame);
/// streamer.stop();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RawVideoStreamer {
    shared: Arc<Shared>,
    transform_workers: Vec<JoinHandle<()>>,
    writer_workers: Vec<JoinHandle<()>>,
    audio: Option<AudioOutput>,
    start_time: Instant,
}

impl Default for RawVideoStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl RawVideoStreamer {
    /// Create an idle streamer.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                active_transforms: AtomicUsize::new(0),
                unprocessed: FrameQueue::new(),
                ready: FrameQueue::new(),
                counters: StreamCounters::default(),
            }),
            transform_workers: Vec::new(),
            writer_workers: Vec::new(),
            audio: None,
            start_time: Instant::now(),
        }
    }

    /// Start a capture session, stopping any prior one first.
    ///
    /// Audio failure is non-fatal: the session continues without audio.
    pub fn start(&mut self, config: StreamConfig) -> Result<(), StreamError> {
        self.stop();

        let StreamConfig {
            crop_width,
            crop_height,
            bin,
            enable_compression,
            num_threads,
            outputs,
            audio,
            camera_metadata,
            priority_hook,
        } = config;

        if outputs.is_empty() {
            return Err(StreamError::NoOutputs);
        }
        for crop in [crop_width, crop_height] {
            if crop > 100 {
                return Err(StreamError::CropOutOfRange(crop));
            }
        }

        let transformer = FrameTransformer::new(crop_width, crop_height, bin, enable_compression);
        self.shared.counters.reset();
        self.shared.running.store(true, Ordering::Release);

        if let Some(audio) = audio {
            match audio
                .source
                .start(audio::SAMPLE_RATE_HZ, audio::CHANNEL_COUNT)
            {
                Ok(()) => self.audio = Some(audio),
                Err(err) => {
                    tracing::warn!(%err, "audio capture unavailable; continuing without audio")
                }
            }
        }

        let shard_count = outputs.len() as u16;
        for (index, file) in outputs.into_iter().enumerate() {
            let shared = self.shared.clone();
            let metadata = camera_metadata.clone();
            let hook = priority_hook.clone();
            self.writer_workers.push(thread::spawn(move || {
                writer_loop(
                    shared,
                    transformer,
                    file,
                    index as u16,
                    shard_count,
                    metadata,
                    hook,
                )
            }));
        }

        for _ in 0..num_threads.max(1) {
            let shared = self.shared.clone();
            self.shared
                .active_transforms
                .fetch_add(1, Ordering::Release);
            self.transform_workers
                .push(thread::spawn(move || transform_loop(shared, transformer)));
        }

        self.start_time = Instant::now();
        tracing::info!(
            shards = shard_count,
            threads = num_threads.max(1),
            bin,
            compression = enable_compression,
            "streamer started"
        );
        Ok(())
    }

    /// Hand a captured frame to the pipeline. Never blocks, never fails.
    pub fn add(&self, frame: RawFrame) {
        self.shared.unprocessed.enqueue(frame);
        self.shared.counters.frame_accepted();
    }

    /// Stop the session: flush audio, join transform workers, then join
    /// writer workers (which drain both queues and commit their shards).
    /// Idempotent and safe to call from `Drop`.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);

        if let Some(audio) = self.audio.take() {
            audio.source.stop();
            let samples = audio.source.take_captured();
            let sample_rate = audio.source.sample_rate();
            let channels = audio.source.channels();
            match audio::write_wav(BufWriter::new(audio.file), &samples, sample_rate, channels) {
                Ok(()) => tracing::info!(
                    samples = samples.len(),
                    sample_rate,
                    channels,
                    "audio flushed to wav"
                ),
                Err(err) => tracing::warn!(%err, "audio flush failed; video unaffected"),
            }
        }

        for worker in self.transform_workers.drain(..) {
            let _ = worker.join();
        }
        for worker in self.writer_workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Whether a session is active.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Producer-side frame rate since `start`.
    pub fn estimate_fps(&self) -> f32 {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        self.shared.counters.accepted_frames() as f32 / (1e-5 + elapsed)
    }

    /// Frames handed to `add` this session.
    pub fn accepted_frames(&self) -> u64 {
        self.shared.counters.accepted_frames()
    }

    /// Frames ingested by shard writers this session.
    pub fn written_frames(&self) -> u64 {
        self.shared.counters.written_frames()
    }

    /// Payload bytes ingested by shard writers this session;
    /// monotonically increasing.
    pub fn written_output_bytes(&self) -> u64 {
        self.shared.counters.written_bytes()
    }
}

impl Drop for RawVideoStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn transform_loop(shared: Arc<Shared>, transformer: FrameTransformer) {
    while shared.running.load(Ordering::Acquire) {
        let Some(mut frame) = shared.unprocessed.dequeue_timeout(TRANSFORM_DEQUEUE_TIMEOUT)
        else {
            continue;
        };
        if let Err(err) = transformer.process(&mut frame) {
            tracing::debug!(%err, timestamp = frame.timestamp, "forwarding frame untransformed");
        }
        shared.ready.enqueue(frame);
    }
    shared.active_transforms.fetch_sub(1, Ordering::Release);
}

fn writer_loop(
    shared: Arc<Shared>,
    transformer: FrameTransformer,
    file: File,
    shard_index: u16,
    shard_count: u16,
    camera_metadata: Vec<u8>,
    priority_hook: Option<PriorityHook>,
) {
    if let Some(hook) = priority_hook {
        hook();
    }

    let mut writer = match ContainerWriter::create(file, shard_index, shard_count, &camera_metadata)
    {
        Ok(writer) => writer,
        Err(err) => {
            tracing::error!(shard_index, %err, "container create failed; shard disabled");
            return;
        }
    };

    let mut healthy = true;
    loop {
        if let Some(frame) = shared.ready.dequeue_timeout(WRITER_DEQUEUE_TIMEOUT) {
            if !ingest(&mut writer, &shared, frame, shard_index) {
                healthy = false;
                break;
            }
            continue;
        }
        // Keep serving until producers are gone: transform workers exit
        // within their own dequeue timeout once the flag drops, so frames
        // in flight between the queues are never stranded.
        if !shared.running.load(Ordering::Acquire)
            && shared.active_transforms.load(Ordering::Acquire) == 0
        {
            break;
        }
    }

    if healthy {
        while let Some(frame) = shared.ready.try_dequeue() {
            if !ingest(&mut writer, &shared, frame, shard_index) {
                healthy = false;
                break;
            }
        }
    }
    if healthy {
        // Unprocessed leftovers get transformed inline on this thread.
        while let Some(mut frame) = shared.unprocessed.try_dequeue() {
            if let Err(err) = transformer.process(&mut frame) {
                tracing::debug!(%err, "forwarding frame untransformed");
            }
            if !ingest(&mut writer, &shared, frame, shard_index) {
                break;
            }
        }
    }

    if let Err(err) = writer.commit() {
        tracing::error!(shard_index, %err, "container commit failed");
    }
}

fn ingest(
    writer: &mut ContainerWriter,
    shared: &Shared,
    frame: RawFrame,
    shard_index: u16,
) -> bool {
    match writer.add(&frame) {
        Ok(bytes) => {
            shared.counters.frame_written(bytes);
            true
        }
        Err(err) => {
            tracing::error!(shard_index, %err, "frame write failed; shard stopping");
            false
        }
    }
    // `frame` drops here and its storage returns to the pool.
}
