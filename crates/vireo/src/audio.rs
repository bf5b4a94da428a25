//! Synchronized audio capture: the driver-facing capability, a push ring
//! the driver callback can feed without blocking, and the one-shot WAV
//! flush the streamer runs at `stop()`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};

/// Capture sample rate used for recording sessions.
pub const SAMPLE_RATE_HZ: u32 = 48_000;
/// Capture channel count used for recording sessions.
pub const CHANNEL_COUNT: u16 = 2;

/// Errors reported by audio sources.
///
/// Audio failures are never fatal to video: the streamer logs them and
/// keeps recording frames.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("audio device: {0}")]
    Device(String),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// Capability implemented by the platform audio driver.
///
/// The driver fills an in-memory interleaved PCM16 region between `start`
/// and `stop`; the streamer drains the whole region once at session end.
pub trait AudioSource: Send + Sync {
    /// Begin capturing at the given rate and interleaved channel count.
    fn start(&self, sample_rate: u32, channels: u16) -> Result<(), AudioError>;

    /// Stop capturing; the captured region stays available for draining.
    fn stop(&self);

    /// Drain everything captured since `start`, interleaved.
    fn take_captured(&self) -> Vec<i16>;

    /// Rate the source captured at.
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE_HZ
    }

    /// Interleaved channel count of the captured data.
    fn channels(&self) -> u16 {
        CHANNEL_COUNT
    }
}

/// Bounded interleaved PCM16 ring for driver callbacks.
///
/// `push` never blocks; when the ring is full the oldest samples fall out,
/// so a stalled consumer costs the start of the recording rather than the
/// most recent audio.
///
/// # Example
/// ```rust
/// use vireo::audio::{AudioSource, PcmRing};
///
/// let ring = PcmRing::with_capacity(4);
/// ring.start(48_000, 2).unwrap();
/// ring.push(&[1, 2, 3, 4, 5, 6]);
/// assert_eq!(ring.take_captured(), vec![3, 4, 5, 6]);
/// ```
pub struct PcmRing {
    state: Mutex<RingState>,
    capacity: usize,
}

struct RingState {
    samples: VecDeque<i16>,
    running: bool,
    sample_rate: u32,
    channels: u16,
}

impl PcmRing {
    /// Ring holding at most `capacity` interleaved samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                samples: VecDeque::with_capacity(capacity),
                running: false,
                sample_rate: SAMPLE_RATE_HZ,
                channels: CHANNEL_COUNT,
            }),
            capacity,
        }
    }

    /// Append interleaved samples from the driver callback; drops the
    /// oldest samples when over capacity. Ignored while stopped.
    pub fn push(&self, samples: &[i16]) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        for &sample in samples {
            if state.samples.len() == self.capacity {
                state.samples.pop_front();
            }
            state.samples.push_back(sample);
        }
    }
}

impl AudioSource for PcmRing {
    fn start(&self, sample_rate: u32, channels: u16) -> Result<(), AudioError> {
        let mut state = self.state.lock();
        state.samples.clear();
        state.running = true;
        state.sample_rate = sample_rate;
        state.channels = channels;
        Ok(())
    }

    fn stop(&self) {
        self.state.lock().running = false;
    }

    fn take_captured(&self) -> Vec<i16> {
        self.state.lock().samples.drain(..).collect()
    }

    fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    fn channels(&self) -> u16 {
        self.state.lock().channels
    }
}

/// Write interleaved PCM16 samples as a canonical RIFF/WAVE file.
pub fn write_wav<W: Write>(
    mut out: W,
    samples: &[i16],
    sample_rate: u32,
    channels: u16,
) -> io::Result<()> {
    let data_len = (samples.len() * 2) as u32;
    let byte_rate = sample_rate * channels as u32 * 2;
    let block_align = channels * 2;

    out.write_all(b"RIFF")?;
    out.write_all(&(36 + data_len).to_le_bytes())?;
    out.write_all(b"WAVE")?;

    out.write_all(b"fmt ")?;
    out.write_all(&16u32.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // PCM
    out.write_all(&channels.to_le_bytes())?;
    out.write_all(&sample_rate.to_le_bytes())?;
    out.write_all(&byte_rate.to_le_bytes())?;
    out.write_all(&block_align.to_le_bytes())?;
    out.write_all(&16u16.to_le_bytes())?; // bits per sample

    out.write_all(b"data")?;
    out.write_all(&data_len.to_le_bytes())?;
    for sample in samples {
        out.write_all(&sample.to_le_bytes())?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_when_full() {
        let ring = PcmRing::with_capacity(6);
        ring.start(SAMPLE_RATE_HZ, CHANNEL_COUNT).unwrap();
        ring.push(&[1, 2, 3, 4]);
        ring.push(&[5, 6, 7, 8]);
        ring.stop();
        assert_eq!(ring.take_captured(), vec![3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn ring_ignores_pushes_while_stopped() {
        let ring = PcmRing::with_capacity(8);
        ring.push(&[1, 2]);
        ring.start(SAMPLE_RATE_HZ, CHANNEL_COUNT).unwrap();
        ring.push(&[3, 4]);
        ring.stop();
        ring.push(&[5, 6]);
        assert_eq!(ring.take_captured(), vec![3, 4]);
    }

    #[test]
    fn restart_clears_previous_session() {
        let ring = PcmRing::with_capacity(8);
        ring.start(SAMPLE_RATE_HZ, CHANNEL_COUNT).unwrap();
        ring.push(&[9, 9]);
        ring.start(44_100, 1).unwrap();
        ring.push(&[1]);
        assert_eq!(ring.take_captured(), vec![1]);
        assert_eq!(ring.sample_rate(), 44_100);
        assert_eq!(ring.channels(), 1);
    }

    #[test]
    fn wav_layout_is_canonical() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX];
        let mut out = Vec::new();
        write_wav(&mut out, &samples, 48_000, 2).unwrap();

        assert_eq!(out.len(), 44 + samples.len() * 2);
        assert_eq!(&out[0..4], b"RIFF");
        assert_eq!(&out[8..12], b"WAVE");
        assert_eq!(&out[12..16], b"fmt ");
        assert_eq!(u16::from_le_bytes([out[22], out[23]]), 2); // channels
        assert_eq!(
            u32::from_le_bytes([out[24], out[25], out[26], out[27]]),
            48_000
        );
        assert_eq!(&out[36..40], b"data");
        assert_eq!(
            u32::from_le_bytes([out[40], out[41], out[42], out[43]]),
            (samples.len() * 2) as u32
        );
        assert_eq!(i16::from_le_bytes([out[46], out[47]]), 1000);
    }
}
