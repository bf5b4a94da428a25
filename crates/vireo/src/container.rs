//! Per-shard container files: an append-log of frame records sealed by a
//! trailer at `commit()`.
//!
//! All on-disk integers are little-endian fixed-width. A file without a
//! valid trailer is truncated-but-recoverable: a reader walks the frame
//! records forward and keeps everything that was fully written.

use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};

use vireo_codec::bitnzpack::decode_row;
use vireo_codec::raw::{read_raw10, read_raw12, read_raw16};
use vireo_codec::CodecError;
use vireo_core::prelude::*;

pub const CONTAINER_MAGIC: [u8; 4] = *b"VRAW";
pub const TRAILER_MAGIC: [u8; 4] = *b"VIDX";
pub const SENTINEL_MAGIC: [u8; 4] = *b"VEND";
pub const FORMAT_VERSION: u16 = 2;

const HEADER_LEN: usize = 16;
const FRAME_HEADER_LEN: usize = 32;

const FLAG_BINNED: u8 = 1 << 0;
const FLAG_COMPRESSED: u8 = 1 << 1;

/// Errors from container I/O and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a vireo container (bad magic)")]
    BadMagic,
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),
    #[error("corrupt frame record at byte {0}")]
    CorruptRecord(u64),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Append-only encoder for one video shard.
///
/// Single-threaded by design: concurrency comes from running one writer
/// per shard. `commit()` seals the file with the frame-offset index; until
/// then the file is valid-but-truncated for any reader.
pub struct ContainerWriter {
    out: BufWriter<File>,
    offsets: Vec<u64>,
    position: u64,
    shard_index: u16,
    committed: bool,
}

impl ContainerWriter {
    /// Write the container header to `file` and return the open writer.
    pub fn create(
        file: File,
        shard_index: u16,
        shard_count: u16,
        camera_metadata: &[u8],
    ) -> Result<Self, ContainerError> {
        let mut out = BufWriter::with_capacity(4 * 1024 * 1024, file);
        out.write_all(&CONTAINER_MAGIC)?;
        out.write_all(&FORMAT_VERSION.to_le_bytes())?;
        out.write_all(&shard_index.to_le_bytes())?;
        out.write_all(&shard_count.to_le_bytes())?;
        out.write_all(&0u16.to_le_bytes())?;
        out.write_all(&(camera_metadata.len() as u32).to_le_bytes())?;
        out.write_all(camera_metadata)?;

        tracing::info!(shard_index, shard_count, "container opened");
        Ok(Self {
            out,
            offsets: Vec::new(),
            position: (HEADER_LEN + camera_metadata.len()) as u64,
            shard_index,
            committed: false,
        })
    }

    /// Append one frame record; returns the payload bytes written.
    pub fn add(&mut self, frame: &RawFrame) -> Result<u64, ContainerError> {
        let payload = frame.payload();
        let mut flags = 0u8;
        if frame.is_binned {
            flags |= FLAG_BINNED;
        }
        if frame.is_compressed {
            flags |= FLAG_COMPRESSED;
        }

        self.offsets.push(self.position);
        self.out.write_all(&frame.timestamp.to_le_bytes())?;
        self.out.write_all(&frame.width.to_le_bytes())?;
        self.out.write_all(&frame.height.to_le_bytes())?;
        self.out.write_all(&(frame.row_stride as u32).to_le_bytes())?;
        self.out.write_all(&[
            frame.pixel_format.to_tag(),
            frame.compression_type.to_tag(),
            flags,
            0,
        ])?;
        self.out
            .write_all(&(frame.metadata.len() as u32).to_le_bytes())?;
        self.out.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.out.write_all(&frame.metadata)?;
        self.out.write_all(payload)?;

        self.position += (FRAME_HEADER_LEN + frame.metadata.len() + payload.len()) as u64;
        if self.offsets.len() % 100 == 0 {
            tracing::debug!(
                shard_index = self.shard_index,
                frames = self.offsets.len(),
                bytes = self.position,
                "shard progress"
            );
        }
        Ok(payload.len() as u64)
    }

    /// Frames appended so far.
    pub fn written_frames(&self) -> usize {
        self.offsets.len()
    }

    /// Seal the file with the offset index and sentinel; idempotent.
    pub fn commit(&mut self) -> Result<(), ContainerError> {
        if self.committed {
            return Ok(());
        }
        let trailer_start = self.position;
        self.out.write_all(&TRAILER_MAGIC)?;
        self.out
            .write_all(&(self.offsets.len() as u32).to_le_bytes())?;
        for offset in &self.offsets {
            self.out.write_all(&offset.to_le_bytes())?;
        }
        self.out.write_all(&trailer_start.to_le_bytes())?;
        self.out.write_all(&SENTINEL_MAGIC)?;
        self.out.flush()?;
        self.committed = true;

        tracing::info!(
            shard_index = self.shard_index,
            frames = self.offsets.len(),
            bytes = trailer_start,
            "container committed"
        );
        Ok(())
    }
}

/// One frame recovered from a container.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub row_stride: u32,
    pub pixel_format: PixelFormat,
    pub compression_type: CompressionType,
    pub is_binned: bool,
    pub is_compressed: bool,
    pub metadata: Vec<u8>,
    pub payload: Vec<u8>,
}

impl FrameRecord {
    /// Recover the frame's u16 samples (`width * height`, row-major in the
    /// container's column-split order for transformed frames).
    ///
    /// Compressed payloads decode row by row in parallel; uncompressed RAW
    /// payloads unpack through the format readers.
    pub fn decode_samples(&self) -> Result<Vec<u16>, ContainerError> {
        let width = self.width as usize;
        let height = self.height as usize;
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let mut samples = vec![0u16; width * height];

        if self.compression_type == CompressionType::BitNzPack2 {
            // Row starts are data-dependent; walk the headers once, then
            // decode rows independently.
            let mut spans = Vec::with_capacity(height);
            let mut off = 0usize;
            for _ in 0..height {
                let bits = *self
                    .payload
                    .get(off)
                    .ok_or(ContainerError::CorruptRecord(off as u64))? as usize;
                if bits > 16 {
                    return Err(ContainerError::CorruptRecord(off as u64));
                }
                let len = 1 + (width * bits).div_ceil(8);
                if off + len > self.payload.len() {
                    return Err(ContainerError::CorruptRecord(off as u64));
                }
                spans.push((off, len));
                off += len;
            }
            samples
                .par_chunks_mut(width)
                .zip(spans.par_iter())
                .try_for_each(|(row, &(off, len))| {
                    decode_row(&self.payload[off..off + len], row).map(|_| ())
                })?;
            return Ok(samples);
        }

        let stride = self.row_stride as usize;
        let read = match self.pixel_format {
            PixelFormat::Raw10 => read_raw10,
            PixelFormat::Raw12 => read_raw12,
            PixelFormat::Raw16 => read_raw16,
            PixelFormat::Yuv420 => return Err(ContainerError::CorruptRecord(0)),
        };
        if stride * height > self.payload.len() {
            return Err(ContainerError::CorruptRecord(0));
        }
        samples
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, slot) in row.iter_mut().enumerate() {
                    *slot = read(&self.payload, x, y, stride);
                }
            });
        Ok(samples)
    }
}

/// Decoder for sealed or truncated shard files.
pub struct ContainerReader {
    pub version: u16,
    pub shard_index: u16,
    pub shard_count: u16,
    pub camera_metadata: Vec<u8>,
    pub frames: Vec<FrameRecord>,
    /// True when a valid trailer sealed the file; false means the frames
    /// were recovered by forward scan of a truncated file.
    pub sealed: bool,
}

impl ContainerReader {
    /// Parse a shard file, via the trailer when sealed, forward scan when not.
    pub fn open(mut file: File) -> Result<Self, ContainerError> {
        let file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).map_err(|_| ContainerError::BadMagic)?;
        if header[0..4] != CONTAINER_MAGIC {
            return Err(ContainerError::BadMagic);
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let shard_index = u16::from_le_bytes([header[6], header[7]]);
        let shard_count = u16::from_le_bytes([header[8], header[9]]);
        let metadata_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        let mut camera_metadata = vec![0u8; metadata_len as usize];
        file.read_exact(&mut camera_metadata)?;
        let body_start = (HEADER_LEN + metadata_len as usize) as u64;

        let sealed_end = Self::locate_trailer(&mut file, file_len)?;
        let sealed = sealed_end.is_some();
        let frame_region_end = sealed_end.unwrap_or(file_len);

        let mut frames = Vec::new();
        let mut position = body_start;
        file.seek(SeekFrom::Start(position))?;
        while position + FRAME_HEADER_LEN as u64 <= frame_region_end {
            match Self::read_frame(&mut file, position, frame_region_end) {
                Ok((record, next)) => {
                    frames.push(record);
                    position = next;
                }
                // A torn tail record is expected in truncated files.
                Err(err) if !sealed => {
                    tracing::debug!(%err, position, "forward scan stopped at torn record");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(Self {
            version,
            shard_index,
            shard_count,
            camera_metadata,
            frames,
            sealed,
        })
    }

    /// Validate the 12-byte tail; `Some(trailer_start)` when sealed.
    fn locate_trailer(file: &mut File, file_len: u64) -> Result<Option<u64>, ContainerError> {
        if file_len < (HEADER_LEN + 12) as u64 {
            return Ok(None);
        }
        file.seek(SeekFrom::End(-12))?;
        let mut tail = [0u8; 12];
        file.read_exact(&mut tail)?;
        if tail[8..12] != SENTINEL_MAGIC {
            return Ok(None);
        }
        let trailer_start = u64::from_le_bytes(tail[0..8].try_into().expect("8-byte slice"));
        if trailer_start + 8 > file_len {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(trailer_start))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != TRAILER_MAGIC {
            return Ok(None);
        }
        Ok(Some(trailer_start))
    }

    fn read_frame(
        file: &mut File,
        position: u64,
        region_end: u64,
    ) -> Result<(FrameRecord, u64), ContainerError> {
        file.seek(SeekFrom::Start(position))?;
        let mut head = [0u8; FRAME_HEADER_LEN];
        file.read_exact(&mut head)?;

        let timestamp = u64::from_le_bytes(head[0..8].try_into().expect("8-byte slice"));
        let width = u32::from_le_bytes(head[8..12].try_into().expect("4-byte slice"));
        let height = u32::from_le_bytes(head[12..16].try_into().expect("4-byte slice"));
        let row_stride = u32::from_le_bytes(head[16..20].try_into().expect("4-byte slice"));
        let pixel_format = PixelFormat::from_tag(head[20])
            .ok_or(ContainerError::CorruptRecord(position))?;
        let compression_type = CompressionType::from_tag(head[21])
            .ok_or(ContainerError::CorruptRecord(position))?;
        let flags = head[22];
        let metadata_len = u32::from_le_bytes(head[24..28].try_into().expect("4-byte slice"));
        let payload_len = u32::from_le_bytes(head[28..32].try_into().expect("4-byte slice"));

        let next = position
            + FRAME_HEADER_LEN as u64
            + metadata_len as u64
            + payload_len as u64;
        if next > region_end {
            return Err(ContainerError::CorruptRecord(position));
        }

        let mut metadata = vec![0u8; metadata_len as usize];
        file.read_exact(&mut metadata)?;
        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)?;

        Ok((
            FrameRecord {
                timestamp,
                width,
                height,
                row_stride,
                pixel_format,
                compression_type,
                is_binned: flags & FLAG_BINNED != 0,
                is_compressed: flags & FLAG_COMPRESSED != 0,
                metadata,
                payload,
            },
            next,
        ))
    }
}
