//! In-place frame reshaping: crop, crop+compress, and crop+bin.
//!
//! Every operation rewrites the frame buffer it was given. This is safe for
//! the crop and bin paths because the output written at byte 0 is always
//! shorter than the input already consumed at the point it is written
//! (RAW16→RAW12 shrinks 2.0 to 1.5 bytes/pixel; binned variants fit in half
//! the rows). The non-binned compress path has no such guarantee for an
//! incompressible row, so it encodes into pooled scratch storage and copies
//! back.

use std::sync::{Mutex, OnceLock};

use vireo_codec::prelude::*;
use vireo_codec::CodecError;
use vireo_core::prelude::*;

/// Errors produced by frame transforms.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// Frame format is not one of the packed RAW layouts; the buffer is
    /// left untouched so the writer can still record it natively.
    #[error("unsupported pixel format {0}")]
    UnsupportedFormat(PixelFormat),
    /// A pack/encode primitive ran out of output space.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

type ReadFn = fn(&[u8], usize, usize, usize) -> u16;

fn reader_for(format: PixelFormat) -> Option<ReadFn> {
    match format {
        PixelFormat::Raw10 => Some(read_raw10),
        PixelFormat::Raw12 => Some(read_raw12),
        PixelFormat::Raw16 => Some(read_raw16),
        PixelFormat::Yuv420 => None,
    }
}

fn scratch_pool(min_size: usize) -> FramePool {
    static POOL: OnceLock<Mutex<(FramePool, usize)>> = OnceLock::new();
    let lock = POOL.get_or_init(|| Mutex::new((FramePool::with_limits(2, min_size, 4), min_size)));
    let mut guard = lock.lock().unwrap();
    if guard.1 < min_size {
        *guard = (FramePool::with_limits(2, min_size, 4), min_size);
    }
    guard.0.clone()
}

/// One 2x-binned output sample: separable [1,2,1]⊗[1,2,1] over the
/// like-color 3x3 neighborhood (taps at ±2), divisor 16. Left/top clamp
/// to 0; right/bottom wrap to the full frame dimension.
#[inline(always)]
fn bin_tap(
    read: ReadFn,
    data: &[u8],
    ix: usize,
    iy: usize,
    width: usize,
    height: usize,
    stride: usize,
) -> u16 {
    let xm = ix.saturating_sub(2);
    let xp = (ix + 2) % width;
    let ym = iy.saturating_sub(2);
    let yp = (iy + 2) % height;

    let p0 = read(data, xm, ym, stride);
    let p1 = read(data, ix, ym, stride) << 1;
    let p2 = read(data, xp, ym, stride);
    let p3 = read(data, xm, iy, stride) << 1;
    let p4 = read(data, ix, iy, stride) << 2;
    let p5 = read(data, xp, iy, stride) << 1;
    let p6 = read(data, xm, yp, stride);
    let p7 = read(data, ix, yp, stride) << 1;
    let p8 = read(data, xp, yp, stride);

    ((p0 as u32
        + p1 as u32
        + p2 as u32
        + p3 as u32
        + p4 as u32
        + p5 as u32
        + p6 as u32
        + p7 as u32
        + p8 as u32)
        >> 4) as u16
}

/// Stateless per-frame reshaper configured once per capture session.
///
/// Dispatch: `bin` wins over `compress`; with both off, plain crop runs.
/// RAW16 input is always crop-packed to RAW12 even at 0% crop because the
/// container never stores RAW16 uncompressed.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransformer {
    crop_width: u8,
    crop_height: u8,
    bin: bool,
    compress: bool,
}

impl FrameTransformer {
    /// Build a transformer; crop values are percent borders in 0..=100.
    pub fn new(crop_width: u8, crop_height: u8, bin: bool, compress: bool) -> Self {
        Self {
            crop_width,
            crop_height,
            bin,
            compress,
        }
    }

    /// Apply the configured operation to `frame` in place.
    ///
    /// On [`TransformError::UnsupportedFormat`] the frame is untouched;
    /// callers forward it downstream regardless.
    pub fn process(&self, frame: &mut RawFrame) -> Result<(), TransformError> {
        if reader_for(frame.pixel_format).is_none() {
            return Err(TransformError::UnsupportedFormat(frame.pixel_format));
        }
        if self.bin {
            self.crop_and_bin(frame)
        } else if self.compress {
            self.crop_and_compress(frame)
        } else {
            self.crop(frame)
        }
    }

    /// Symmetric crop border in pixels: horizontal snapped down to a
    /// multiple of 4, vertical to a multiple of 2, preserving Bayer phase.
    fn crop_offsets(&self, width: u32, height: u32) -> (usize, usize) {
        let horizontal =
            4 * ((0.5 * (self.crop_width as f64 / 100.0) * width as f64).round() as usize / 4);
        let vertical =
            2 * ((0.5 * (self.crop_height as f64 / 100.0) * height as f64).round() as usize / 2);
        (horizontal, vertical)
    }

    fn crop(&self, frame: &mut RawFrame) -> Result<(), TransformError> {
        if self.crop_width == 0
            && self.crop_height == 0
            && frame.pixel_format != PixelFormat::Raw16
        {
            return Ok(());
        }

        let (hcrop, vcrop) = self.crop_offsets(frame.width, frame.height);
        let width = frame.width as usize;
        let height = frame.height as usize;
        let cropped_w = width - 2 * hcrop;
        let cropped_h = height - 2 * vcrop;
        let ystart = vcrop;
        let yend = height - vcrop;
        let stride = frame.row_stride;
        let data = frame.data.as_mut_slice();

        let new_stride = match frame.pixel_format {
            PixelFormat::Raw10 => {
                let dst_stride = PixelFormat::Raw10.natural_stride(cropped_w as u32);
                let xoff = 10 * hcrop / 8;
                for y in ystart..yend {
                    let src = y * stride + xoff;
                    data.copy_within(src..src + dst_stride, (y - ystart) * dst_stride);
                }
                dst_stride
            }
            PixelFormat::Raw12 => {
                let dst_stride = PixelFormat::Raw12.natural_stride(cropped_w as u32);
                let xoff = 12 * hcrop / 8;
                for y in ystart..yend {
                    let src = y * stride + xoff;
                    data.copy_within(src..src + dst_stride, (y - ystart) * dst_stride);
                }
                dst_stride
            }
            PixelFormat::Raw16 => {
                // Simultaneous pack to RAW12; output trails input so the
                // in-place rewrite never clobbers unread pixels.
                let dst_stride = PixelFormat::Raw12.natural_stride(cropped_w as u32);
                let mut dst = 0;
                for y in ystart..yend {
                    let mut x = hcrop;
                    while x < width - hcrop {
                        let p0 = read_raw16(data, x, y, stride);
                        let p1 = read_raw16(data, x + 1, y, stride);
                        let group = pack_raw12_pair(p0, p1);
                        data[dst] = group[0];
                        data[dst + 1] = group[1];
                        data[dst + 2] = group[2];
                        dst += 3;
                        x += 2;
                    }
                }
                frame.pixel_format = PixelFormat::Raw12;
                dst_stride
            }
            PixelFormat::Yuv420 => unreachable!("guarded in process"),
        };

        frame.width = cropped_w as u32;
        frame.height = cropped_h as u32;
        frame.row_stride = new_stride;
        frame.is_compressed = false;
        frame.compression_type = CompressionType::Uncompressed;
        frame.data.set_valid_range(0, new_stride * cropped_h);
        Ok(())
    }

    fn crop_and_compress(&self, frame: &mut RawFrame) -> Result<(), TransformError> {
        let read = reader_for(frame.pixel_format).expect("guarded in process");
        let (hcrop, vcrop) = self.crop_offsets(frame.width, frame.height);
        let width = frame.width as usize;
        let height = frame.height as usize;
        let cropped_w = width - 2 * hcrop;
        let cropped_h = height - 2 * vcrop;
        let half = cropped_w / 2;
        let stride = frame.row_stride;

        let mut row = vec![0u16; cropped_w];
        let mut scratch = scratch_pool(encoded_capacity(cropped_w) * cropped_h).lease();
        scratch.resize(encoded_capacity(cropped_w) * cropped_h);

        let mut offset = 0;
        {
            let data = frame.data.as_slice();
            let out = scratch.as_mut_slice();
            for y in vcrop..height - vcrop {
                let mut x = hcrop;
                while x < width - hcrop {
                    // Column split: adjacent 16-bit deltas stay small and
                    // re-interleaving later keeps the Bayer mosaic intact.
                    let i = (x - hcrop) >> 1;
                    row[i] = read(data, x, y, stride);
                    row[half + i] = read(data, x + 1, y, stride);
                    x += 2;
                }
                offset += encode_row(&row, &mut out[offset..])?;
            }
        }

        if frame.data.len() < offset {
            frame.data.resize(offset);
        }
        frame.data.as_mut_slice()[..offset].copy_from_slice(&scratch.as_slice()[..offset]);

        frame.width = cropped_w as u32;
        frame.height = cropped_h as u32;
        frame.pixel_format = PixelFormat::Raw16;
        frame.row_stride = 2 * cropped_w;
        frame.is_compressed = true;
        frame.compression_type = CompressionType::BitNzPack2;
        frame.data.set_valid_range(0, offset);
        Ok(())
    }

    fn crop_and_bin(&self, frame: &mut RawFrame) -> Result<(), TransformError> {
        let source_format = frame.pixel_format;
        let read = reader_for(source_format).expect("guarded in process");
        let (hcrop, vcrop) = self.crop_offsets(frame.width, frame.height);
        let width = frame.width as usize;
        let height = frame.height as usize;
        let cropped_w = width - 2 * hcrop;
        let cropped_h = height - 2 * vcrop;
        let binned_w = cropped_w / 2;
        let binned_h = cropped_h / 2;
        let half = binned_w / 2;
        let stride = frame.row_stride;
        let xstart = hcrop;
        let xend = width - hcrop;
        let ystart = vcrop;
        let yend = height - vcrop;

        let mut row0 = vec![0u16; binned_w];
        let mut row1 = vec![0u16; binned_w];

        let data = frame.data.as_mut_slice();
        let mut offset = 0;
        let mut emitted = 0;
        let mut y = ystart;
        while y < yend && emitted < binned_h {
            let mut x = xstart;
            while x < xend {
                let out_x = (x - xstart) >> 2;
                row0[out_x] = bin_tap(read, data, x, y, width, height, stride);
                row0[half + out_x] = bin_tap(read, data, x + 1, y, width, height, stride);
                row1[out_x] = bin_tap(read, data, x, y + 1, width, height, stride);
                row1[half + out_x] = bin_tap(read, data, x + 1, y + 1, width, height, stride);
                x += 4;
            }

            for binned in [&row0, &row1] {
                if emitted == binned_h {
                    break;
                }
                if self.compress {
                    offset += encode_row(binned, &mut data[offset..])?;
                } else if source_format == PixelFormat::Raw10 {
                    offset += pack_raw10_deinterleaved(binned, &mut data[offset..])?;
                } else {
                    // RAW12 stays RAW12; RAW16 repacks to RAW12.
                    offset += pack_raw12_deinterleaved(binned, &mut data[offset..])?;
                }
                emitted += 1;
            }
            y += 4;
        }

        frame.width = binned_w as u32;
        frame.height = binned_h as u32;
        frame.is_binned = true;
        if self.compress {
            frame.pixel_format = PixelFormat::Raw16;
            frame.row_stride = 2 * binned_w;
            frame.is_compressed = true;
            frame.compression_type = CompressionType::BitNzPack2;
        } else {
            if source_format == PixelFormat::Raw16 {
                frame.pixel_format = PixelFormat::Raw12;
            }
            frame.row_stride = frame.pixel_format.natural_stride(binned_w as u32);
            frame.is_compressed = false;
            frame.compression_type = CompressionType::Uncompressed;
        }
        frame.data.set_valid_range(0, offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack spatial-order 10-bit samples row by row into a RAW10 image.
    fn build_raw10(samples: &[u16], width: usize, height: usize) -> Vec<u8> {
        let stride = 10 * width / 8;
        let mut image = vec![0u8; stride * height];
        for y in 0..height {
            let row = &samples[y * width..(y + 1) * width];
            let mut split: Vec<u16> = row.iter().step_by(2).copied().collect();
            split.extend(row.iter().skip(1).step_by(2));
            pack_raw10_deinterleaved(&split, &mut image[y * stride..(y + 1) * stride]).unwrap();
        }
        image
    }

    fn frame_from_bytes(
        bytes: &[u8],
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> RawFrame {
        let pool = FramePool::with_capacity(1, bytes.len());
        let mut frame = RawFrame::new(pool.lease(), width, height, format, 0);
        frame.data.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        frame
    }

    fn sample_at(x: usize, y: usize) -> u16 {
        ((x * 13 + y * 57) % 1021) as u16
    }

    #[test]
    fn crop_raw10_keeps_pixels_and_phase() {
        let (w, h) = (160usize, 120usize);
        let samples: Vec<u16> = (0..w * h).map(|i| sample_at(i % w, i / w)).collect();
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        let transformer = FrameTransformer::new(10, 10, false, false);
        transformer.process(&mut frame).unwrap();

        // 10% of 160 -> border 8 (multiple of 4); 10% of 120 -> border 6.
        assert_eq!(frame.width, 144);
        assert_eq!(frame.height, 108);
        assert_eq!(frame.row_stride, 180);
        assert_eq!(frame.pixel_format, PixelFormat::Raw10);
        assert_eq!(frame.compression_type, CompressionType::Uncompressed);
        assert_eq!(frame.payload().len(), 180 * 108);

        // Every cropped pixel equals the source pixel at (+8, +6); even
        // offsets keep the Bayer phase of (0, 0).
        let payload = frame.payload();
        for y in 0..108 {
            for x in 0..144 {
                assert_eq!(
                    read_raw10(payload, x, y, 180),
                    sample_at(x + 8, y + 6),
                    "pixel ({x},{y})"
                );
            }
        }
    }

    #[test]
    fn crop_raw10_zero_percent_is_noop() {
        let (w, h) = (32usize, 8usize);
        let samples: Vec<u16> = (0..w * h).map(|i| (i % 1024) as u16).collect();
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        FrameTransformer::new(0, 0, false, false)
            .process(&mut frame)
            .unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.payload(), &image[..]);
    }

    #[test]
    fn crop_raw16_always_packs_to_raw12() {
        let (w, h) = (16usize, 4usize);
        let mut image = vec![0u8; w * h * 2];
        for y in 0..h {
            for x in 0..w {
                let v = ((x * 200 + y * 7) % 4096) as u16;
                image[(y * w + x) * 2..(y * w + x) * 2 + 2].copy_from_slice(&v.to_le_bytes());
            }
        }
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw16);

        FrameTransformer::new(0, 0, false, false)
            .process(&mut frame)
            .unwrap();

        assert_eq!(frame.pixel_format, PixelFormat::Raw12);
        assert_eq!(frame.width, 16);
        assert_eq!(frame.row_stride, 24);
        let payload = frame.payload();
        for y in 0..h {
            for x in 0..w {
                let expect = ((x * 200 + y * 7) % 4096) as u16;
                assert_eq!(read_raw12(payload, x, y, 24), expect);
            }
        }
    }

    #[test]
    fn crop_and_compress_round_trips() {
        let (w, h) = (64usize, 12usize);
        let samples: Vec<u16> = (0..w * h).map(|i| sample_at(i % w, i / w)).collect();
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        FrameTransformer::new(0, 0, false, true)
            .process(&mut frame)
            .unwrap();

        assert_eq!(frame.pixel_format, PixelFormat::Raw16);
        assert_eq!(frame.compression_type, CompressionType::BitNzPack2);
        assert!(frame.is_compressed);
        assert_eq!(frame.row_stride, 2 * w);
        assert!(frame.payload().len() < w * h * 2);

        // Decode each row and undo the column split.
        let payload = frame.payload();
        let mut off = 0;
        let mut decoded = vec![0u16; w];
        for y in 0..h {
            off += decode_row(&payload[off..], &mut decoded).unwrap();
            for x in 0..w {
                let got = if x % 2 == 0 {
                    decoded[x / 2]
                } else {
                    decoded[w / 2 + x / 2]
                };
                assert_eq!(got, sample_at(x, y), "pixel ({x},{y})");
            }
        }
        assert_eq!(off, payload.len());
    }

    #[test]
    fn bin_constant_image_is_identity() {
        let (w, h) = (32usize, 16usize);
        let samples = vec![600u16; w * h];
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        FrameTransformer::new(0, 0, true, false)
            .process(&mut frame)
            .unwrap();

        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert!(frame.is_binned);
        assert_eq!(frame.pixel_format, PixelFormat::Raw10);
        assert_eq!(frame.row_stride, 20);

        // Weights sum to 16 with a >>4 divisor, so a flat field is unchanged.
        let payload = frame.payload();
        for y in 0..8 {
            for x in 0..16 {
                assert_eq!(read_raw10(payload, x, y, 20), 600, "pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn bin_matches_direct_kernel_evaluation() {
        let (w, h) = (16usize, 8usize);
        let samples: Vec<u16> = (0..w * h).map(|i| sample_at(i % w, i / w)).collect();
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        FrameTransformer::new(0, 0, true, false)
            .process(&mut frame)
            .unwrap();

        let direct = |ix: usize, iy: usize| -> u16 {
            let weights = [1u32, 2, 1, 2, 4, 2, 1, 2, 1];
            let mut sum = 0u32;
            for (k, &wgt) in weights.iter().enumerate() {
                let dx = (k % 3) as isize * 2 - 2;
                let dy = (k / 3) as isize * 2 - 2;
                let sx = if dx < 0 {
                    ix.saturating_sub(2)
                } else {
                    (ix + dx as usize) % w
                };
                let sy = if dy < 0 {
                    iy.saturating_sub(2)
                } else {
                    (iy + dy as usize) % h
                };
                sum += wgt * sample_at(sx, sy) as u32;
            }
            ((sum >> 4) & 0x3FF) as u16
        };

        let payload = frame.payload();
        let stride = frame.row_stride;
        for oy in 0..frame.height as usize {
            for ox in 0..frame.width as usize {
                // Each 4x4 source block yields a 2x2 output block; the even
                // half of a split row holds columns 4k, the odd half 4k+1.
                let iy = 4 * (oy / 2) + (oy % 2);
                let ix = 4 * (ox / 2) + (ox % 2);
                assert_eq!(
                    read_raw10(payload, ox, oy, stride),
                    direct(ix, iy),
                    "binned pixel ({ox},{oy})"
                );
            }
        }
    }

    #[test]
    fn bin_with_compression_sets_entropy_tags() {
        let (w, h) = (32usize, 16usize);
        let samples: Vec<u16> = (0..w * h).map(|i| sample_at(i % w, i / w)).collect();
        let image = build_raw10(&samples, w, h);
        let mut frame = frame_from_bytes(&image, w as u32, h as u32, PixelFormat::Raw10);

        FrameTransformer::new(0, 0, true, true)
            .process(&mut frame)
            .unwrap();

        assert_eq!(frame.width, 16);
        assert_eq!(frame.height, 8);
        assert!(frame.is_binned);
        assert!(frame.is_compressed);
        assert_eq!(frame.pixel_format, PixelFormat::Raw16);
        assert_eq!(frame.compression_type, CompressionType::BitNzPack2);
        assert_eq!(frame.row_stride, 32);

        // Payload is height' independent rows of width' samples.
        let payload = frame.payload();
        let mut off = 0;
        let mut row = vec![0u16; 16];
        for _ in 0..8 {
            off += decode_row(&payload[off..], &mut row).unwrap();
        }
        assert_eq!(off, payload.len());
    }

    #[test]
    fn unsupported_format_left_untouched() {
        let pool = FramePool::with_capacity(1, 64 * 48 * 2);
        let mut frame = RawFrame::new(pool.lease(), 64, 48, PixelFormat::Yuv420, 0);
        frame.data.as_mut_slice()[0] = 0xAB;

        let err = FrameTransformer::new(10, 10, true, true)
            .process(&mut frame)
            .unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedFormat(_)));
        assert_eq!(frame.width, 64);
        assert_eq!(frame.data.as_slice()[0], 0xAB);
        assert_eq!(frame.pixel_format, PixelFormat::Yuv420);
    }
}
