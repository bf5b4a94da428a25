use std::{fmt, str::FromStr};

/// Storage format of a packed sensor frame.
///
/// # Example
/// ```rust
/// use vireo_core::prelude::PixelFormat;
///
/// assert_eq!(PixelFormat::Raw10.bits_per_sample(), 10);
/// assert_eq!(PixelFormat::Raw10.natural_stride(4000), 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PixelFormat {
    /// MIPI-style packed 10-bit: 4 pixels share 5 bytes.
    Raw10,
    /// MIPI-style packed 12-bit: 2 pixels share 3 bytes.
    Raw12,
    /// 16-bit little-endian, 2 bytes per pixel.
    Raw16,
    /// Planar YUV 4:2:0 preview frames; carried through the pipeline untouched.
    Yuv420,
}

impl PixelFormat {
    /// Nominal sample bit depth for this format.
    pub const fn bits_per_sample(self) -> u32 {
        match self {
            PixelFormat::Raw10 => 10,
            PixelFormat::Raw12 => 12,
            PixelFormat::Raw16 => 16,
            PixelFormat::Yuv420 => 8,
        }
    }

    /// Whether this is one of the packed Bayer RAW formats the transform
    /// stage understands.
    pub const fn is_raw(self) -> bool {
        matches!(
            self,
            PixelFormat::Raw10 | PixelFormat::Raw12 | PixelFormat::Raw16
        )
    }

    /// Natural row stride in bytes for `width` pixels in this packing.
    ///
    /// `width` must satisfy the format's group alignment (4 for RAW10,
    /// 2 for RAW12); Bayer frames always do.
    pub const fn natural_stride(self, width: u32) -> usize {
        let width = width as usize;
        match self {
            PixelFormat::Raw10 => 10 * width / 8,
            PixelFormat::Raw12 => 12 * width / 8,
            PixelFormat::Raw16 => 2 * width,
            // Luma plane only; chroma planes follow at half resolution.
            PixelFormat::Yuv420 => width,
        }
    }

    /// Stable u8 tag used in container frame records.
    pub const fn to_tag(self) -> u8 {
        match self {
            PixelFormat::Raw10 => 0,
            PixelFormat::Raw12 => 1,
            PixelFormat::Raw16 => 2,
            PixelFormat::Yuv420 => 3,
        }
    }

    /// Inverse of [`PixelFormat::to_tag`].
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PixelFormat::Raw10),
            1 => Some(PixelFormat::Raw12),
            2 => Some(PixelFormat::Raw16),
            3 => Some(PixelFormat::Yuv420),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Raw10 => "raw10",
            PixelFormat::Raw12 => "raw12",
            PixelFormat::Raw16 => "raw16",
            PixelFormat::Yuv420 => "yuv420",
        };
        write!(f, "{name}")
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw10" => Ok(PixelFormat::Raw10),
            "raw12" => Ok(PixelFormat::Raw12),
            "raw16" => Ok(PixelFormat::Raw16),
            "yuv420" => Ok(PixelFormat::Yuv420),
            other => Err(format!("unknown pixel format {other:?}")),
        }
    }
}

/// Entropy coding applied to a frame's payload.
///
/// # Example
/// ```rust
/// use vireo_core::prelude::CompressionType;
///
/// assert_eq!(CompressionType::from_tag(1), Some(CompressionType::BitNzPack2));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CompressionType {
    /// Payload is the packed pixel layout itself.
    #[default]
    Uncompressed,
    /// Row-independent variable-bit-width codec over u16 samples.
    BitNzPack2,
}

impl CompressionType {
    /// Stable u8 tag used in container frame records.
    pub const fn to_tag(self) -> u8 {
        match self {
            CompressionType::Uncompressed => 0,
            CompressionType::BitNzPack2 => 1,
        }
    }

    /// Inverse of [`CompressionType::to_tag`].
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(CompressionType::Uncompressed),
            1 => Some(CompressionType::BitNzPack2),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionType::Uncompressed => write!(f, "uncompressed"),
            CompressionType::BitNzPack2 => write!(f, "bitnzpack2"),
        }
    }
}
