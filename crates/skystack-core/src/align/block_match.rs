use ndarray::Array2;
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::geometry::Point;

/// Sum of absolute differences between `reference` and the same-sized window
/// of `search` whose top-left corner is at `(ty, tx)`.
fn sad_at(reference: &Array2<u8>, search: &Array2<u8>, ty: usize, tx: usize) -> u64 {
    let (bh, bw) = reference.dim();
    let mut sum = 0u64;
    for by in 0..bh {
        for bx in 0..bw {
            sum += reference[[by, bx]].abs_diff(search[[ty + by, tx + bx]]) as u64;
        }
    }
    sum
}

/// Best SAD match for one row of candidate offsets, keyed for deterministic
/// reduction: `(sad, distance to center, dy, dx)`.
fn best_in_row(
    reference: &Array2<u8>,
    search: &Array2<u8>,
    center: Point,
    radius: i32,
    dy: i32,
) -> Option<(u64, i64, i32, i32)> {
    let (bh, bw) = reference.dim();
    let (h, w) = search.dim();
    let mut best: Option<(u64, i64, i32, i32)> = None;

    for dx in -radius..=radius {
        let ty = center.y + dy - bh as i32 / 2;
        let tx = center.x + dx - bw as i32 / 2;
        // Candidates whose window leaves the image are not considered.
        if ty < 0 || tx < 0 || ty + bh as i32 > h as i32 || tx + bw as i32 > w as i32 {
            continue;
        }
        let sad = sad_at(reference, search, ty as usize, tx as usize);
        let key = (sad, (dy as i64).pow(2) + (dx as i64).pow(2), dy, dx);
        if best.is_none_or(|b| key < b) {
            best = Some(key);
        }
    }

    best
}

/// Search for the placement of `reference` inside `search` minimising the sum
/// of absolute differences, over a `(2*search_radius+1)^2` window of integer
/// offsets centred at `center`.
///
/// Returns the offset relative to `center` and the minimum SAD, or `None`
/// when no candidate window fits inside the image. Ties prefer the offset
/// closest to the center, then row-major candidate order, so a featureless
/// patch does not drift.
pub fn find_best_offset(
    reference: &Array2<u8>,
    search: &Array2<u8>,
    center: Point,
    search_radius: u32,
) -> Option<(Point, u64)> {
    let radius = search_radius as i32;
    let window = 2 * search_radius as usize + 1;
    let work = window * window * reference.len();

    let best = if work >= PARALLEL_PIXEL_THRESHOLD {
        (-radius..=radius)
            .into_par_iter()
            .filter_map(|dy| best_in_row(reference, search, center, radius, dy))
            .min()
    } else {
        (-radius..=radius)
            .filter_map(|dy| best_in_row(reference, search, center, radius, dy))
            .min()
    };

    best.map(|(sad, _, dy, dx)| (Point::new(dx, dy), sad))
}

/// Extract a square block of side `size` centred at `center`; `None` when the
/// window leaves the image.
pub fn extract_block(image: &Array2<u8>, center: Point, size: u32) -> Option<Array2<u8>> {
    let (h, w) = image.dim();
    let ty = center.y - size as i32 / 2;
    let tx = center.x - size as i32 / 2;
    if ty < 0 || tx < 0 || ty + size as i32 > h as i32 || tx + size as i32 > w as i32 {
        return None;
    }
    Some(
        image
            .slice(ndarray::s![
                ty as usize..ty as usize + size as usize,
                tx as usize..tx as usize + size as usize
            ])
            .to_owned(),
    )
}

/// Like [`extract_block`], but moves the center just enough for the window to
/// fit. Returns the adjusted center and the block. The image must be at least
/// `size` on both sides.
pub fn extract_block_clamped(image: &Array2<u8>, center: Point, size: u32) -> (Point, Array2<u8>) {
    let (h, w) = image.dim();
    let half = size as i32 / 2;
    let max_x = w as i32 - (size as i32 - half);
    let max_y = h as i32 - (size as i32 - half);
    let clamped = Point::new(center.x.clamp(half, max_x), center.y.clamp(half, max_y));
    let block = extract_block(image, clamped, size).expect("clamped window fits");
    (clamped, block)
}
