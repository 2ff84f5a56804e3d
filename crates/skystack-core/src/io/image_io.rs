use std::path::Path;

use image::{DynamicImage, Luma, Rgb};
use ndarray::{Array2, Array3};

use crate::error::Result;
use crate::frame::Frame;
use crate::stack::StackedImage;

/// Save a stacked composite as a 16-bit grayscale or RGB image; the format
/// follows the file extension. Values are clamped to [0, 1] before
/// quantisation.
pub fn save_stacked(image: &StackedImage, path: &Path) -> Result<()> {
    match image {
        StackedImage::Mono(data) => save_mono16(data, path),
        StackedImage::Rgb(data) => save_rgb16(data, path),
    }
}

fn save_mono16(data: &Array2<f32>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let mut pixels: Vec<u16> = Vec::with_capacity(h * w);
    for row in 0..h {
        for col in 0..w {
            pixels.push((data[[row, col]].clamp(0.0, 1.0) * 65535.0) as u16);
        }
    }
    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .expect("buffer size matches dimensions");
    img.save(path)?;
    Ok(())
}

fn save_rgb16(data: &Array3<f32>, path: &Path) -> Result<()> {
    let (h, w, _) = data.dim();
    let mut pixels: Vec<u16> = Vec::with_capacity(h * w * 3);
    for row in 0..h {
        for col in 0..w {
            for c in 0..3 {
                pixels.push((data[[row, col, c]].clamp(0.0, 1.0) * 65535.0) as u16);
            }
        }
    }
    let img = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .expect("buffer size matches dimensions");
    img.save(path)?;
    Ok(())
}

/// Load an image file as an 8-bit frame (mono for grayscale sources, RGB
/// otherwise). Used for flat fields.
pub fn load_frame(path: &Path) -> Result<Frame> {
    let img = image::open(path)?;
    match img {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            let gray = img.to_luma8();
            let (w, h) = gray.dimensions();
            let mut data = Array2::<u8>::zeros((h as usize, w as usize));
            for row in 0..h as usize {
                for col in 0..w as usize {
                    data[[row, col]] = gray.get_pixel(col as u32, row as u32).0[0];
                }
            }
            Ok(Frame::mono8(0, data))
        }
        _ => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let mut data = Array3::<u8>::zeros((h as usize, w as usize, 3));
            for row in 0..h as usize {
                for col in 0..w as usize {
                    let p = rgb.get_pixel(col as u32, row as u32);
                    for c in 0..3 {
                        data[[row, col, c]] = p.0[c];
                    }
                }
            }
            Ok(Frame::rgb8(0, data))
        }
    }
}
