use ndarray::Array2;
use tracing::info;

use crate::error::Result;
use crate::geometry::Point;
use crate::quality::blur::{box_blur, box_blur_f32, local_contrast};
use crate::quality::QualityEstimator;
use crate::refpt::RefPointConfig;
use crate::source::FrameSource;

/// Automatic reference-point layout.
///
/// Candidates sit on a regular lattice with pitch `spacing`, clipped so each
/// point's reference block fits inside the intersection. A candidate must be
/// bright enough (neighbourhood mean, normalised against the composite's
/// min/max) and textured enough (box-blurred local contrast at
/// `structure_scale`, relative to the neighbourhood mean) to be accepted.
/// Filtering runs on the best-fragment composite so placement favours detail
/// that actually survives the seeing.
pub(crate) fn place_on_lattice<S: FrameSource>(
    quality: &QualityEstimator<'_, S>,
    config: &RefPointConfig,
) -> Result<Vec<Point>> {
    let composite = quality.best_fragment_composite()?;
    let (h, w) = composite.dim();

    let contrast = local_contrast(&composite, config.structure_scale);
    let blurred_contrast = box_blur_f32(&contrast, config.structure_scale);
    let neighbourhood_mean = box_blur(&composite, config.ref_block_size / 2);

    let (min, max) = min_max(&composite);
    let range = (max - min) as f32;

    let spacing = config.spacing.max(1) as usize;
    let margin = (config.ref_block_size as usize / 2).max(1);

    let mut accepted = Vec::new();
    let mut rejected = 0usize;

    for py in (spacing / 2..h).step_by(spacing) {
        for px in (spacing / 2..w).step_by(spacing) {
            if px < margin || py < margin || px + margin >= w || py + margin >= h {
                continue;
            }

            let mean = neighbourhood_mean[[py, px]];
            let normalized = if range > 0.0 {
                (mean - min as f32) / range
            } else {
                0.0
            };
            if normalized < config.brightness_threshold {
                rejected += 1;
                continue;
            }

            let structure = if mean > 0.0 {
                blurred_contrast[[py, px]] / mean
            } else {
                0.0
            };
            if structure < config.structure_threshold {
                rejected += 1;
                continue;
            }

            accepted.push(Point::new(px as i32, py as i32));
        }
    }

    info!(
        accepted = accepted.len(),
        rejected, "automatic reference point placement"
    );
    Ok(accepted)
}

fn min_max(image: &Array2<u8>) -> (u8, u8) {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for &v in image.iter() {
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}
