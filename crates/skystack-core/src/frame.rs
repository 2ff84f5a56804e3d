use std::borrow::Cow;

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Pixel format of a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    Rgb8,
    Rgb16,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Mono8 | PixelFormat::Mono16 => 1,
            PixelFormat::Rgb8 | PixelFormat::Rgb16 => 3,
        }
    }

    pub fn is_color(&self) -> bool {
        self.channels() == 3
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgb16 => 6,
        }
    }
}

/// Decoded pixel data. All internal processing is 8-bit; 16-bit sources are
/// reduced when decoded.
#[derive(Clone, Debug)]
pub enum PixelData {
    /// Shape = (height, width).
    Mono8(Array2<u8>),
    /// Shape = (height, width, 3).
    Rgb8(Array3<u8>),
}

/// An immutable snapshot of a decoded image, identified by its absolute
/// index in the source sequence.
#[derive(Clone, Debug)]
pub struct Frame {
    pub index: usize,
    pub data: PixelData,
}

impl Frame {
    pub fn mono8(index: usize, data: Array2<u8>) -> Self {
        Self {
            index,
            data: PixelData::Mono8(data),
        }
    }

    pub fn rgb8(index: usize, data: Array3<u8>) -> Self {
        Self {
            index,
            data: PixelData::Rgb8(data),
        }
    }

    pub fn width(&self) -> usize {
        match &self.data {
            PixelData::Mono8(a) => a.ncols(),
            PixelData::Rgb8(a) => a.dim().1,
        }
    }

    pub fn height(&self) -> usize {
        match &self.data {
            PixelData::Mono8(a) => a.nrows(),
            PixelData::Rgb8(a) => a.dim().0,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match &self.data {
            PixelData::Mono8(_) => PixelFormat::Mono8,
            PixelData::Rgb8(_) => PixelFormat::Rgb8,
        }
    }

    /// 8-bit grayscale view of the frame, used by all matching and scoring
    /// code. RGB frames are converted via the Rec. 601 luma weights.
    pub fn to_mono8(&self) -> Cow<'_, Array2<u8>> {
        match &self.data {
            PixelData::Mono8(a) => Cow::Borrowed(a),
            PixelData::Rgb8(a) => {
                let (h, w, _) = a.dim();
                let mut out = Array2::<u8>::zeros((h, w));
                for row in 0..h {
                    for col in 0..w {
                        let r = a[[row, col, 0]] as f32;
                        let g = a[[row, col, 1]] as f32;
                        let b = a[[row, col, 2]] as f32;
                        out[[row, col]] = (0.299 * r + 0.587 * g + 0.114 * b).round() as u8;
                    }
                }
                Cow::Owned(out)
            }
        }
    }

    /// Approximate heap footprint, used for cache accounting.
    pub fn byte_size(&self) -> usize {
        match &self.data {
            PixelData::Mono8(a) => a.len(),
            PixelData::Rgb8(a) => a.len(),
        }
    }
}

/// Static metadata reported by a frame source.
#[derive(Clone, Copy, Debug)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}
