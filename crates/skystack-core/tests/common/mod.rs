use ndarray::{Array2, Array3};
use skystack_core::frame::Frame;
use skystack_core::source::MemorySource;

/// Deterministic pseudo-random texture, locally unique so block matching has
/// an unambiguous minimum.
pub fn tex(x: i64, y: i64) -> u8 {
    let v = x.wrapping_mul(83) ^ y.wrapping_mul(157) ^ x.wrapping_mul(y) >> 3;
    v.rem_euclid(251) as u8
}

/// Frame whose content is the texture shifted by `(dx, dy)`: the feature at
/// texture coordinate `p` appears at `p + (dx, dy)`.
pub fn textured_frame(width: usize, height: usize, index: usize, dx: i32, dy: i32) -> Frame {
    let data = Array2::from_shape_fn((height, width), |(row, col)| {
        tex(col as i64 - dx as i64, row as i64 - dy as i64)
    });
    Frame::mono8(index, data)
}

/// Source of textured frames, frame `k` shifted by `shifts[k]`.
pub fn textured_source(width: usize, height: usize, shifts: &[(i32, i32)]) -> MemorySource {
    let frames = shifts
        .iter()
        .enumerate()
        .map(|(i, &(dx, dy))| textured_frame(width, height, i, dx, dy))
        .collect();
    MemorySource::new(frames).unwrap()
}

/// Source of identical constant-brightness frames.
pub fn constant_source(width: usize, height: usize, count: usize, value: u8) -> MemorySource {
    let frames = (0..count)
        .map(|i| Frame::mono8(i, Array2::from_elem((height, width), value)))
        .collect();
    MemorySource::new(frames).unwrap()
}

/// RGB source with a fixed per-channel texture, identical in every frame.
pub fn rgb_source(width: usize, height: usize, count: usize) -> MemorySource {
    let frames = (0..count)
        .map(|i| {
            let data = Array3::from_shape_fn((height, width, 3), |(row, col, c)| {
                tex(col as i64 + c as i64 * 1000, row as i64)
            });
            Frame::rgb8(i, data)
        })
        .collect();
    MemorySource::new(frames).unwrap()
}

/// Build a SER file header for 8-bit mono frames.
pub fn build_ser_header(width: u32, height: u32, num_frames: usize) -> Vec<u8> {
    build_ser_header_full(width, height, 8, num_frames, 0)
}

/// Build a SER file header with configurable bit depth and color mode.
///
/// `color_id`: 0=MONO, 8..=11=Bayer variants, 100=RGB, 101=BGR
pub fn build_ser_header_full(
    width: u32,
    height: u32,
    bit_depth: u32,
    num_frames: usize,
    color_id: i32,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(178);

    // Magic (14 bytes)
    buf.extend_from_slice(b"LUCAM-RECORDER");
    // LuID
    buf.extend_from_slice(&0i32.to_le_bytes());
    // ColorID
    buf.extend_from_slice(&color_id.to_le_bytes());
    // Endianness flag: 0, read as little-endian
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&(width as i32).to_le_bytes());
    buf.extend_from_slice(&(height as i32).to_le_bytes());
    buf.extend_from_slice(&(bit_depth as i32).to_le_bytes());
    buf.extend_from_slice(&(num_frames as i32).to_le_bytes());
    // Observer, Instrument, Telescope (40 bytes each)
    buf.extend_from_slice(&[0u8; 120]);
    // DateTime, DateTimeUTC
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());

    assert_eq!(buf.len(), 178);
    buf
}

/// Write a SER buffer to a temporary file.
pub fn write_test_ser(data: &[u8]) -> tempfile::NamedTempFile {
    use std::io::Write;
    let mut f = tempfile::NamedTempFile::new().expect("create temp file");
    f.write_all(data).expect("write SER data");
    f.flush().expect("flush");
    f
}
