use ndarray::Array2;

use crate::geometry::Point;

/// A tracked brightness anchor. The reference block is extracted from the
/// frame the anchor was created on and never refreshed, so the translation
/// estimate does not accumulate drift.
#[derive(Clone, Debug)]
pub struct Anchor {
    /// Position in the most recently processed frame.
    pub pos: Point,
    pub valid: bool,
    /// Absolute index of the frame the reference block was extracted from.
    pub created_at_frame: usize,
    pub(crate) block: Array2<u8>,
}

/// Pick a placement for a new anchor.
///
/// Scans non-overlapping candidate blocks of side `2*block_radius+1`.
/// Candidates whose mean brightness, scaled into [0,1] against the frame's
/// darkest and brightest pixels, falls below `brightness_threshold` are
/// rejected; the survivor with the highest pixel standard deviation wins,
/// with ties resolved in row-major scan order. When no candidate passes the
/// brightness test the contrast winner over all candidates is used, and a
/// frame smaller than one block yields its center.
pub fn suggest_anchor_position(
    image: &Array2<u8>,
    brightness_threshold: f32,
    block_radius: u32,
) -> Point {
    let (h, w) = image.dim();
    let size = (2 * block_radius + 1) as usize;
    if h < size || w < size {
        return Point::new(w as i32 / 2, h as i32 / 2);
    }

    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for &v in image.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    let range = (max - min) as f32;

    let mut best_bright: Option<(f64, Point)> = None;
    let mut best_any: Option<(f64, Point)> = None;

    let mut y = 0;
    while y + size <= h {
        let mut x = 0;
        while x + size <= w {
            let mut sum = 0u64;
            let mut sum_sq = 0u64;
            for by in y..y + size {
                for bx in x..x + size {
                    let v = image[[by, bx]] as u64;
                    sum += v;
                    sum_sq += v * v;
                }
            }
            let n = (size * size) as f64;
            let mean = sum as f64 / n;
            let stddev = (sum_sq as f64 / n - mean * mean).max(0.0).sqrt();
            let center = Point::new((x + size / 2) as i32, (y + size / 2) as i32);

            if best_any.is_none_or(|(s, _)| stddev > s) {
                best_any = Some((stddev, center));
            }
            let normalized = if range > 0.0 {
                (mean as f32 - min as f32) / range
            } else {
                0.0
            };
            if normalized >= brightness_threshold && best_bright.is_none_or(|(s, _)| stddev > s) {
                best_bright = Some((stddev, center));
            }

            x += size;
        }
        y += size;
    }

    best_bright
        .or(best_any)
        .map(|(_, p)| p)
        .unwrap_or_else(|| Point::new(w as i32 / 2, h as i32 / 2))
}
