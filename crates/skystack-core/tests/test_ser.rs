#[allow(dead_code)]
mod common;

use skystack_core::error::SkystackError;
use skystack_core::frame::{PixelData, PixelFormat};
use skystack_core::io::ser::SerReader;
use skystack_core::source::{CachedSource, FrameSource, SerSource};

#[test]
fn reads_mono8_frames() {
    let w = 8u32;
    let h = 6u32;
    let mut data = common::build_ser_header(w, h, 2);
    for frame in 0..2u8 {
        for i in 0..(w * h) as u8 {
            data.push(frame * 100 + i.wrapping_mul(3));
        }
    }
    let file = common::write_test_ser(&data);

    let reader = SerReader::open(file.path()).unwrap();
    assert_eq!(reader.frame_count(), 2);
    assert_eq!(reader.header.width, w);
    assert_eq!(reader.header.height, h);
    assert_eq!(reader.header.pixel_format().unwrap(), PixelFormat::Mono8);

    let frame = reader.read_frame(1).unwrap();
    let PixelData::Mono8(pixels) = &frame.data else {
        panic!("expected mono frame");
    };
    assert_eq!(pixels.dim(), (h as usize, w as usize));
    assert_eq!(pixels[[0, 0]], 100);
    assert_eq!(pixels[[0, 1]], 103);
}

#[test]
fn reduces_mono16_to_eight_bits() {
    let mut data = common::build_ser_header_full(4, 4, 12, 1, 0);
    for i in 0..16u16 {
        // 12-bit samples: value i << 4 reduces to i.
        data.extend_from_slice(&(i << 4).to_le_bytes());
    }
    let file = common::write_test_ser(&data);

    let reader = SerReader::open(file.path()).unwrap();
    assert_eq!(reader.header.pixel_format().unwrap(), PixelFormat::Mono16);
    let frame = reader.read_frame(0).unwrap();
    let PixelData::Mono8(pixels) = &frame.data else {
        panic!("expected mono frame");
    };
    for (i, &v) in pixels.iter().enumerate() {
        assert_eq!(v as usize, i);
    }
}

#[test]
fn decodes_rgb_and_swaps_bgr() {
    for (color_id, swapped) in [(100, false), (101, true)] {
        let mut data = common::build_ser_header_full(2, 1, 8, 1, color_id);
        // Two pixels: (10, 20, 30) and (40, 50, 60) in file order.
        data.extend_from_slice(&[10, 20, 30, 40, 50, 60]);
        let file = common::write_test_ser(&data);

        let reader = SerReader::open(file.path()).unwrap();
        let frame = reader.read_frame(0).unwrap();
        let PixelData::Rgb8(pixels) = &frame.data else {
            panic!("expected RGB frame");
        };
        if swapped {
            assert_eq!(pixels[[0, 0, 0]], 30);
            assert_eq!(pixels[[0, 0, 2]], 10);
        } else {
            assert_eq!(pixels[[0, 0, 0]], 10);
            assert_eq!(pixels[[0, 0, 2]], 30);
        }
        assert_eq!(pixels[[0, 1, 1]], 50);
    }
}

#[test]
fn rejects_bayer_sources() {
    let data = common::build_ser_header_full(4, 4, 8, 0, 8);
    let file = common::write_test_ser(&data);
    assert!(matches!(
        SerReader::open(file.path()).err(),
        Some(SkystackError::UnsupportedPixelFormat(_))
    ));
}

#[test]
fn rejects_truncated_files() {
    let mut data = common::build_ser_header(8, 8, 3);
    data.extend_from_slice(&vec![0u8; 8 * 8 * 2]); // only two frames present
    let file = common::write_test_ser(&data);
    assert!(matches!(
        SerReader::open(file.path()).err(),
        Some(SkystackError::InvalidSer(_))
    ));
}

#[test]
fn rejects_bad_magic() {
    let mut data = common::build_ser_header(4, 4, 1);
    data[0] = b'X';
    data.extend_from_slice(&[0u8; 16]);
    let file = common::write_test_ser(&data);
    assert!(matches!(
        SerReader::open(file.path()).err(),
        Some(SkystackError::InvalidSer(_))
    ));
}

#[test]
fn frame_index_out_of_range() {
    let mut data = common::build_ser_header(4, 4, 1);
    data.extend_from_slice(&[7u8; 16]);
    let file = common::write_test_ser(&data);
    let reader = SerReader::open(file.path()).unwrap();
    assert!(matches!(
        reader.read_frame(1).err(),
        Some(SkystackError::FrameIndexOutOfRange { index: 1, total: 1 })
    ));
}

#[test]
fn source_seeking_honours_active_flags() {
    let mut data = common::build_ser_header(4, 4, 4);
    for frame in 0..4u8 {
        data.extend_from_slice(&[frame; 16]);
    }
    let file = common::write_test_ser(&data);

    let mut source = SerSource::open(file.path()).unwrap();
    source
        .set_active_flags(vec![true, false, true, false])
        .unwrap();
    assert_eq!(source.active_count(), 2);
    assert_eq!(source.active_indices(), &[0, 2]);

    source.seek_start();
    assert_eq!(source.seek_next().unwrap(), 0);
    assert_eq!(source.seek_next().unwrap(), 2);
    assert!(matches!(
        source.seek_next().err(),
        Some(SkystackError::NoMoreImages)
    ));

    // Random access ignores activity.
    let frame = source.frame_at(1).unwrap();
    let PixelData::Mono8(pixels) = &frame.data else {
        panic!("expected mono frame");
    };
    assert_eq!(pixels[[0, 0]], 1);
}

#[test]
fn cached_source_serves_repeated_reads() {
    let mut data = common::build_ser_header(4, 4, 2);
    data.extend_from_slice(&[1u8; 16]);
    data.extend_from_slice(&[2u8; 16]);
    let file = common::write_test_ser(&data);

    let source = CachedSource::new(SerSource::open(file.path()).unwrap(), 1024 * 1024);
    let first = source.frame_at(0).unwrap();
    let again = source.frame_at(0).unwrap();
    let PixelData::Mono8(a) = &first.data else {
        panic!()
    };
    let PixelData::Mono8(b) = &again.data else {
        panic!()
    };
    assert_eq!(a, b);
    assert_eq!(source.pool().len(), 1);

    source.frame_at(1).unwrap();
    assert_eq!(source.pool().len(), 2);
}
