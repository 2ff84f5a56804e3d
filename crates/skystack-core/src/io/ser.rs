use std::fs::File;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;
use ndarray::{Array2, Array3};

use crate::error::{Result, SkystackError};
use crate::frame::{Frame, PixelFormat};

pub const SER_HEADER_SIZE: usize = 178;
const SER_SIGNATURE: &[u8] = b"LUCAM-RECORDER";

// Fixed 178-byte header layout; every integer is little-endian.
//
//     0  signature "LUCAM-RECORDER"
//    14  camera series id (ignored)
//    18  color id                  22  endianness flag
//    26  width                     30  height
//    34  pixel depth (bits)        38  frame count
//    42  observer                  82  instrument
//   122  telescope                      (40-byte NUL-padded text each)
//   162  date-time                170  date-time UTC
const COLOR_ID: usize = 18;
const ENDIANNESS: usize = 22;
const WIDTH: usize = 26;
const HEIGHT: usize = 30;
const PIXEL_DEPTH: usize = 34;
const FRAME_COUNT: usize = 38;
const OBSERVER: usize = 42;
const INSTRUMENT: usize = 82;
const TELESCOPE: usize = 122;
const DATE_TIME: usize = 162;
const DATE_TIME_UTC: usize = 170;
const TEXT_FIELD_LEN: usize = 40;

fn int_field(header: &[u8], offset: usize) -> i32 {
    LittleEndian::read_i32(&header[offset..offset + 4])
}

fn long_field(header: &[u8], offset: usize) -> u64 {
    LittleEndian::read_u64(&header[offset..offset + 8])
}

/// A 40-byte NUL-padded text field, cut at the first NUL.
fn text_field(header: &[u8], offset: usize) -> String {
    let field = &header[offset..offset + TEXT_FIELD_LEN];
    let len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..len]).trim().to_string()
}

/// SER file header (178 bytes).
#[derive(Clone, Debug)]
pub struct SerHeader {
    pub color_id: i32,
    pub little_endian: bool,
    pub width: u32,
    pub height: u32,
    pub pixel_depth: u32,
    pub frame_count: u32,
    pub observer: String,
    pub instrument: String,
    pub telescope: String,
    pub date_time: u64,
    pub date_time_utc: u64,
}

impl SerHeader {
    /// Bytes per sample (1 for 8-bit, 2 for 9-16 bit).
    pub fn bytes_per_sample(&self) -> usize {
        if self.pixel_depth <= 8 {
            1
        } else {
            2
        }
    }

    /// Number of samples per pixel (1 for mono, 3 for RGB/BGR).
    pub fn samples_per_pixel(&self) -> usize {
        match self.color_id {
            100 | 101 => 3,
            _ => 1,
        }
    }

    /// Total bytes per frame.
    pub fn frame_byte_size(&self) -> usize {
        let pixels = (self.width as usize)
            .checked_mul(self.height as usize)
            .expect("image dimensions too large");
        pixels
            .checked_mul(self.bytes_per_sample() * self.samples_per_pixel())
            .expect("frame size calculation overflow")
    }

    /// Pixel format of the decoded frames.
    ///
    /// Bayer color IDs are rejected; demosaicing is not supported.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        match (self.color_id, self.pixel_depth <= 8) {
            (0, true) => Ok(PixelFormat::Mono8),
            (0, false) => Ok(PixelFormat::Mono16),
            (100 | 101, true) => Ok(PixelFormat::Rgb8),
            (100 | 101, false) => Ok(PixelFormat::Rgb16),
            (id, _) => Err(SkystackError::UnsupportedPixelFormat(format!(
                "SER color id {id}"
            ))),
        }
    }

    /// Decode and validate the fixed-layout header fields.
    fn parse(header: &[u8]) -> Result<SerHeader> {
        let width = int_field(header, WIDTH);
        let height = int_field(header, HEIGHT);
        if width <= 0 || height <= 0 {
            return Err(SkystackError::InvalidSer(format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        let pixel_depth = int_field(header, PIXEL_DEPTH);
        if !(1..=16).contains(&pixel_depth) {
            return Err(SkystackError::InvalidSer(format!(
                "invalid pixel depth {pixel_depth}"
            )));
        }
        let frame_count = int_field(header, FRAME_COUNT);
        if frame_count < 0 {
            return Err(SkystackError::InvalidSer(format!(
                "negative frame count {frame_count}"
            )));
        }

        // An endianness flag of 1 requests big-endian 16-bit samples. Every
        // other value, including the 0 most capture tools write, is read as
        // little-endian, matching how files are produced in practice.
        let little_endian = int_field(header, ENDIANNESS) != 1;

        Ok(SerHeader {
            color_id: int_field(header, COLOR_ID),
            little_endian,
            width: width as u32,
            height: height as u32,
            pixel_depth: pixel_depth as u32,
            frame_count: frame_count as u32,
            observer: text_field(header, OBSERVER),
            instrument: text_field(header, INSTRUMENT),
            telescope: text_field(header, TELESCOPE),
            date_time: long_field(header, DATE_TIME),
            date_time_utc: long_field(header, DATE_TIME_UTC),
        })
    }
}

/// Memory-mapped SER file reader.
pub struct SerReader {
    mmap: Mmap,
    pub header: SerHeader,
}

impl SerReader {
    /// Open a SER file and parse its header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let header_bytes = mmap.get(..SER_HEADER_SIZE).ok_or_else(|| {
            SkystackError::InvalidSer(format!(
                "shorter than the {SER_HEADER_SIZE}-byte header"
            ))
        })?;
        if !header_bytes.starts_with(SER_SIGNATURE) {
            return Err(SkystackError::InvalidSer(
                "not a SER recording (bad signature)".into(),
            ));
        }

        let header = SerHeader::parse(header_bytes)?;
        header.pixel_format()?;

        let payload = mmap.len() - SER_HEADER_SIZE;
        let needed = header.frame_byte_size() * header.frame_count as usize;
        if payload < needed {
            return Err(SkystackError::InvalidSer(format!(
                "payload holds {payload} bytes, {} frames need {needed}",
                header.frame_count
            )));
        }

        Ok(Self { mmap, header })
    }

    pub fn frame_count(&self) -> usize {
        self.header.frame_count as usize
    }

    /// Raw bytes of a single frame (zero-copy from the mmap).
    pub fn frame_raw(&self, index: usize) -> Result<&[u8]> {
        let total = self.frame_count();
        if index >= total {
            return Err(SkystackError::FrameIndexOutOfRange { index, total });
        }
        let offset = SER_HEADER_SIZE + index * self.header.frame_byte_size();
        Ok(&self.mmap[offset..offset + self.header.frame_byte_size()])
    }

    /// Decode a single frame to 8-bit pixel data.
    pub fn read_frame(&self, index: usize) -> Result<Frame> {
        let raw = self.frame_raw(index)?;
        let h = self.header.height as usize;
        let w = self.header.width as usize;

        if self.header.samples_per_pixel() == 1 {
            let data = decode_mono(raw, h, w, &self.header);
            Ok(Frame::mono8(index, data))
        } else {
            let data = decode_rgb(raw, h, w, &self.header);
            Ok(Frame::rgb8(index, data))
        }
    }
}

/// Reduce one sample to 8 bits.
fn sample_to_u8(raw: &[u8], idx: usize, header: &SerHeader) -> u8 {
    if header.bytes_per_sample() == 1 {
        raw[idx]
    } else {
        let pair = [raw[2 * idx], raw[2 * idx + 1]];
        let val = if header.little_endian {
            u16::from_le_bytes(pair)
        } else {
            u16::from_be_bytes(pair)
        };
        (val >> (header.pixel_depth - 8)) as u8
    }
}

fn decode_mono(raw: &[u8], h: usize, w: usize, header: &SerHeader) -> Array2<u8> {
    let mut data = Array2::<u8>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            data[[row, col]] = sample_to_u8(raw, row * w + col, header);
        }
    }
    data
}

fn decode_rgb(raw: &[u8], h: usize, w: usize, header: &SerHeader) -> Array3<u8> {
    // Color id 101 is BGR; swap to RGB channel order.
    let swap = header.color_id == 101;
    let mut data = Array3::<u8>::zeros((h, w, 3));
    for row in 0..h {
        for col in 0..w {
            let base = (row * w + col) * 3;
            for c in 0..3 {
                let src = if swap { 2 - c } else { c };
                data[[row, col, c]] = sample_to_u8(raw, base + src, header);
            }
        }
    }
    data
}
