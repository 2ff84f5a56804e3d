pub mod blur;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::align::GlobalAlignment;
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{Result, SkystackError};
use crate::geometry::{Point, Rect};
use crate::quality::blur::box_blur;
use crate::source::FrameSource;
use crate::StepStatus;

/// Parameters for local-contrast quality estimation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Side of the square estimation areas, in pixels.
    pub area_size: u32,
    /// Box blur radius used to isolate high-frequency detail.
    pub detail_scale: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            area_size: 40,
            detail_scale: 3,
        }
    }
}

/// One tile of the estimation grid over the intersection.
#[derive(Clone, Debug)]
pub struct QualityArea {
    /// Tile bounds, intersection-relative. Tiles in the last row/column may
    /// be smaller than `area_size`.
    pub rect: Rect,
    pub center: Point,
    qualities: Vec<f64>,
    sum: f64,
    best_frame: usize,
    best_quality: f64,
    worst_quality: f64,
    nonzero_min: f64,
}

impl QualityArea {
    fn new(rect: Rect, num_frames: usize) -> Self {
        Self {
            rect,
            center: Point::new(
                rect.x + rect.width as i32 / 2,
                rect.y + rect.height as i32 / 2,
            ),
            qualities: vec![0.0; num_frames],
            sum: 0.0,
            best_frame: 0,
            best_quality: f64::NEG_INFINITY,
            worst_quality: f64::INFINITY,
            nonzero_min: 0.0,
        }
    }

    fn record(&mut self, ordinal: usize, quality: f64) {
        self.qualities[ordinal] = quality;
        self.sum += quality;
        if quality > self.best_quality {
            self.best_quality = quality;
            self.best_frame = ordinal;
        }
        self.worst_quality = self.worst_quality.min(quality);
        if quality > 0.0 && (self.nonzero_min == 0.0 || quality < self.nonzero_min) {
            self.nonzero_min = quality;
        }
    }

    /// Quality of this area in active frame `ordinal`.
    pub fn quality(&self, ordinal: usize) -> f64 {
        self.qualities[ordinal]
    }

    pub fn qualities(&self) -> &[f64] {
        &self.qualities
    }

    /// Ordinal of the frame where this area scored highest.
    pub fn best_frame(&self) -> usize {
        self.best_frame
    }

    pub fn best_quality(&self) -> f64 {
        self.best_quality
    }

    pub fn worst_quality(&self) -> f64 {
        self.worst_quality
    }

    /// Smallest non-zero quality recorded, or 0 when every frame scored 0.
    pub fn nonzero_min_quality(&self) -> f64 {
        self.nonzero_min
    }

    pub fn avg_quality(&self) -> f64 {
        self.sum / self.qualities.len() as f64
    }
}

/// Per-area, per-frame sharpness scoring over the stabilised intersection.
pub struct QualityEstimator<'a, S: FrameSource> {
    align: &'a GlobalAlignment<S>,
    config: QualityConfig,
    intersection: Rect,
    areas: Vec<QualityArea>,
    cols: usize,
    frame_qualities: Vec<f64>,
    cursor: usize,
    poisoned: Option<String>,
}

impl<'a, S: FrameSource> QualityEstimator<'a, S> {
    pub fn new(align: &'a GlobalAlignment<S>, config: QualityConfig) -> Result<Self> {
        if config.area_size == 0 {
            return Err(SkystackError::InvalidParameters(
                "area_size must be positive".into(),
            ));
        }
        let intersection = align.intersection().ok_or_else(|| {
            SkystackError::InvalidParameters("global alignment is not complete".into())
        })?;

        let num_frames = align.active_count();
        let size = config.area_size;
        let cols = intersection.width.div_ceil(size) as usize;
        let rows = intersection.height.div_ceil(size) as usize;

        let mut areas = Vec::with_capacity(cols * rows);
        for row in 0..rows {
            for col in 0..cols {
                let x = col as u32 * size;
                let y = row as u32 * size;
                let w = size.min(intersection.width - x);
                let h = size.min(intersection.height - y);
                areas.push(QualityArea::new(
                    Rect::new(x as i32, y as i32, w, h),
                    num_frames,
                ));
            }
        }
        info!(
            areas = areas.len(),
            cols, rows, "quality estimation grid created"
        );

        Ok(Self {
            align,
            config,
            intersection,
            areas,
            cols,
            frame_qualities: vec![0.0; num_frames],
            cursor: 0,
            poisoned: None,
        })
    }

    /// Score every area in the next stabilised frame.
    pub fn step(&mut self) -> Result<StepStatus> {
        if let Some(msg) = &self.poisoned {
            return Err(SkystackError::Poisoned(msg.clone()));
        }
        if self.cursor >= self.align.active_count() {
            return Ok(StepStatus::Done);
        }
        match self.step_inner() {
            Ok(status) => Ok(status),
            Err(e) => {
                self.poisoned = Some(e.to_string());
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<StepStatus> {
        let ordinal = self.cursor;
        let abs_idx = self.align.active_indices()[ordinal];
        let frame = self.align.source().frame_at(abs_idx)?;
        let mono = frame.to_mono8();
        let crop = stabilized_crop(&mono, self.intersection, self.align.offset(ordinal));
        let blurred = box_blur(&crop, self.config.detail_scale);

        let pixels = (self.intersection.width * self.intersection.height) as usize;
        if pixels >= PARALLEL_PIXEL_THRESHOLD {
            self.areas
                .par_iter_mut()
                .for_each(|area| area.record(ordinal, area_quality(area.rect, &crop, &blurred)));
        } else {
            for area in &mut self.areas {
                area.record(ordinal, area_quality(area.rect, &crop, &blurred));
            }
        }

        let total: f64 = self.areas.iter().map(|a| a.quality(ordinal)).sum();
        self.frame_qualities[ordinal] = total;
        debug!(frame = abs_idx, quality = total, "frame scored");

        self.cursor += 1;
        if self.cursor == self.align.active_count() {
            Ok(StepStatus::Done)
        } else {
            Ok(StepStatus::More)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.align.active_count()
    }

    pub fn intersection(&self) -> Rect {
        self.intersection
    }

    pub fn align(&self) -> &GlobalAlignment<S> {
        self.align
    }

    pub fn config(&self) -> QualityConfig {
        self.config
    }

    pub fn num_areas(&self) -> usize {
        self.areas.len()
    }

    pub fn area(&self, index: usize) -> &QualityArea {
        &self.areas[index]
    }

    pub fn areas(&self) -> &[QualityArea] {
        &self.areas
    }

    /// Index of the area containing an intersection-relative point.
    pub fn area_at(&self, p: Point) -> Option<usize> {
        if p.x < 0
            || p.y < 0
            || p.x >= self.intersection.width as i32
            || p.y >= self.intersection.height as i32
        {
            return None;
        }
        let col = p.x as usize / self.config.area_size as usize;
        let row = p.y as usize / self.config.area_size as usize;
        Some(row * self.cols + col)
    }

    /// Sum of area qualities for active frame `ordinal`.
    pub fn frame_quality(&self, ordinal: usize) -> f64 {
        self.frame_qualities[ordinal]
    }

    pub fn frame_qualities(&self) -> &[f64] {
        &self.frame_qualities
    }

    pub fn best_frame_for_area(&self, area: usize) -> usize {
        self.areas[area].best_frame()
    }

    /// Highest per-area average quality over the whole grid.
    pub fn best_avg_area_quality(&self) -> f64 {
        self.areas
            .iter()
            .map(|a| a.avg_quality())
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest strictly positive per-area average quality, or 0 when all
    /// areas average 0.
    pub fn min_nonzero_avg_area_quality(&self) -> f64 {
        let min = self
            .areas
            .iter()
            .map(|a| a.avg_quality())
            .filter(|&q| q > 0.0)
            .fold(f64::INFINITY, f64::min);
        if min.is_finite() {
            min
        } else {
            0.0
        }
    }

    /// Composite image assembled by taking, per area, the pixel tile from the
    /// frame where that area scored highest.
    pub fn best_fragment_composite(&self) -> Result<Array2<u8>> {
        let mut out = Array2::<u8>::zeros((
            self.intersection.height as usize,
            self.intersection.width as usize,
        ));

        // Group areas by their best frame so each frame is decoded once.
        let mut by_frame: Vec<Vec<usize>> = vec![Vec::new(); self.align.active_count()];
        for (i, area) in self.areas.iter().enumerate() {
            by_frame[area.best_frame()].push(i);
        }

        for (ordinal, area_indices) in by_frame.iter().enumerate() {
            if area_indices.is_empty() {
                continue;
            }
            let abs_idx = self.align.active_indices()[ordinal];
            let frame = self.align.source().frame_at(abs_idx)?;
            let mono = frame.to_mono8();
            let crop = stabilized_crop(&mono, self.intersection, self.align.offset(ordinal));
            for &ai in area_indices {
                let r = self.areas[ai].rect;
                for row in 0..r.height as usize {
                    for col in 0..r.width as usize {
                        let y = r.y as usize + row;
                        let x = r.x as usize + col;
                        out[[y, x]] = crop[[y, x]];
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Crop the stabilised view of a frame: intersection-rectangle coordinates
/// refer to the same scene region in every frame.
pub(crate) fn stabilized_crop(mono: &Array2<u8>, intersection: Rect, offset: Point) -> Array2<u8> {
    let x0 = intersection.x + offset.x;
    let y0 = intersection.y + offset.y;
    mono.slice(ndarray::s![
        y0 as usize..y0 as usize + intersection.height as usize,
        x0 as usize..x0 as usize + intersection.width as usize
    ])
    .to_owned()
}

fn area_quality(rect: Rect, raw: &Array2<u8>, blurred: &Array2<f32>) -> f64 {
    let mut sum = 0.0f64;
    for row in rect.y as usize..(rect.y as usize + rect.height as usize) {
        for col in rect.x as usize..(rect.x as usize + rect.width as usize) {
            sum += (raw[[row, col]] as f32 - blurred[[row, col]]).abs() as f64;
        }
    }
    sum
}
