use ndarray::Array2;

/// Summed-area table with a zero top row and left column, so any window sum
/// is four lookups.
fn integral_u8(src: &Array2<u8>) -> Array2<u64> {
    let (h, w) = src.dim();
    let mut sat = Array2::<u64>::zeros((h + 1, w + 1));
    for row in 0..h {
        let mut run = 0u64;
        for col in 0..w {
            run += src[[row, col]] as u64;
            sat[[row + 1, col + 1]] = sat[[row, col + 1]] + run;
        }
    }
    sat
}

fn integral_f64(src: &Array2<f32>) -> Array2<f64> {
    let (h, w) = src.dim();
    let mut sat = Array2::<f64>::zeros((h + 1, w + 1));
    for row in 0..h {
        let mut run = 0f64;
        for col in 0..w {
            run += src[[row, col]] as f64;
            sat[[row + 1, col + 1]] = sat[[row, col + 1]] + run;
        }
    }
    sat
}

/// Mean over the window `[y0, y1) x [x0, x1)` of the table's source image.
fn window_mean_u8(sat: &Array2<u64>, y0: usize, x0: usize, y1: usize, x1: usize) -> f32 {
    let sum = sat[[y1, x1]] + sat[[y0, x0]] - sat[[y0, x1]] - sat[[y1, x0]];
    sum as f32 / ((y1 - y0) * (x1 - x0)) as f32
}

fn window_mean_f64(sat: &Array2<f64>, y0: usize, x0: usize, y1: usize, x1: usize) -> f32 {
    let sum = sat[[y1, x1]] + sat[[y0, x0]] - sat[[y0, x1]] - sat[[y1, x0]];
    (sum / ((y1 - y0) * (x1 - x0)) as f64) as f32
}

/// Box blur with the given radius. Windows are truncated at the image edges
/// and normalised by the number of pixels actually covered.
pub fn box_blur(src: &Array2<u8>, radius: u32) -> Array2<f32> {
    let (h, w) = src.dim();
    let r = radius as usize;
    let sat = integral_u8(src);
    let mut out = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        let y0 = row.saturating_sub(r);
        let y1 = (row + r + 1).min(h);
        for col in 0..w {
            let x0 = col.saturating_sub(r);
            let x1 = (col + r + 1).min(w);
            out[[row, col]] = window_mean_u8(&sat, y0, x0, y1, x1);
        }
    }
    out
}

/// Box blur of an f32 image; same edge handling as [`box_blur`].
pub fn box_blur_f32(src: &Array2<f32>, radius: u32) -> Array2<f32> {
    let (h, w) = src.dim();
    let r = radius as usize;
    let sat = integral_f64(src);
    let mut out = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        let y0 = row.saturating_sub(r);
        let y1 = (row + r + 1).min(h);
        for col in 0..w {
            let x0 = col.saturating_sub(r);
            let x1 = (col + r + 1).min(w);
            out[[row, col]] = window_mean_f64(&sat, y0, x0, y1, x1);
        }
    }
    out
}

/// Per-pixel local contrast: `|raw - box_blur(raw, radius)|`.
pub fn local_contrast(src: &Array2<u8>, radius: u32) -> Array2<f32> {
    let blurred = box_blur(src, radius);
    let (h, w) = src.dim();
    let mut out = Array2::<f32>::zeros((h, w));
    for row in 0..h {
        for col in 0..w {
            out[[row, col]] = (src[[row, col]] as f32 - blurred[[row, col]]).abs();
        }
    }
    out
}
