mod placement;

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::align::block_match::{extract_block_clamped, find_best_offset};
use crate::consts::{REF_PT_SAD_FACTOR, REF_PT_SAD_FLOOR};
use crate::error::{Result, SkystackError};
use crate::geometry::{FloatPoint, Point, Rect};
use crate::quality::QualityEstimator;
use crate::source::FrameSource;
use crate::StepStatus;

/// Which frames may contribute to a reference point, judged by the quality
/// of the point's area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityCriterion {
    /// Keep the top `k` percent of frames, ranked by area quality.
    PercentageBest(u32),
    /// Keep frames whose area quality reaches `min + k*(max-min)/100`.
    MinRelQuality(u32),
    /// Keep the `k` best frames.
    NumberBest(u32),
}

/// Parameters for reference-point placement and per-frame alignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefPointConfig {
    /// Explicit intersection-relative positions; bypasses the placement
    /// filters. `None` lays points automatically.
    #[serde(default)]
    pub positions: Option<Vec<Point>>,
    pub criterion: QualityCriterion,
    /// Side of the square reference block, in pixels.
    pub ref_block_size: u32,
    pub search_radius: u32,
    /// Minimum normalised neighbourhood brightness for automatic placement.
    pub brightness_threshold: f32,
    /// Minimum structure score (blurred local contrast over mean brightness).
    pub structure_threshold: f32,
    /// Box blur radius for the structure score.
    pub structure_scale: u32,
    /// Lattice pitch for automatic placement, in pixels.
    pub spacing: u32,
}

impl Default for RefPointConfig {
    fn default() -> Self {
        Self {
            positions: None,
            criterion: QualityCriterion::PercentageBest(30),
            ref_block_size: 32,
            search_radius: 20,
            brightness_threshold: 0.05,
            structure_threshold: 0.05,
            structure_scale: 2,
            spacing: 40,
        }
    }
}

/// A tracked texture location. Positions are intersection-relative.
#[derive(Clone, Debug)]
pub struct RefPoint {
    /// Placement position (frame-0 scene coordinates, intersection-relative).
    pub initial_pos: Point,
    /// Index of the containing quality area.
    pub area: usize,
    positions: Vec<FloatPoint>,
    valid: Vec<bool>,
    qualifies: Vec<bool>,
    block: Array2<u8>,
    sad_threshold: Option<f64>,
}

impl RefPoint {
    /// Position in active frame `ordinal`.
    pub fn position(&self, ordinal: usize) -> FloatPoint {
        self.positions[ordinal]
    }

    pub fn is_valid(&self, ordinal: usize) -> bool {
        self.valid[ordinal]
    }

    /// Whether frame `ordinal` satisfied the quality criterion for this
    /// point's area.
    pub fn qualifies(&self, ordinal: usize) -> bool {
        self.qualifies[ordinal]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    /// Mean of the valid per-frame positions; `None` when the point was
    /// never matched and is dropped from the effective set.
    pub fn final_position(&self) -> Option<FloatPoint> {
        let mut sum = FloatPoint::default();
        let mut count = 0usize;
        for (pos, &valid) in self.positions.iter().zip(&self.valid) {
            if valid {
                sum = sum + *pos;
                count += 1;
            }
        }
        if count == 0 {
            return None;
        }
        Some(FloatPoint::new(sum.x / count as f64, sum.y / count as f64))
    }
}

/// Reference-point alignment: block-matches every point in every qualifying
/// frame and tracks per-frame positions and validity.
pub struct RefPointAlignment<'a, S: FrameSource> {
    quality: &'a QualityEstimator<'a, S>,
    config: RefPointConfig,
    points: Vec<RefPoint>,
    cursor: usize,
    poisoned: Option<String>,
}

impl<'a, S: FrameSource> RefPointAlignment<'a, S> {
    pub fn new(quality: &'a QualityEstimator<'a, S>, config: RefPointConfig) -> Result<Self> {
        if !quality.is_complete() {
            return Err(SkystackError::InvalidParameters(
                "quality estimation is not complete".into(),
            ));
        }
        if config.ref_block_size == 0 || config.search_radius == 0 {
            return Err(SkystackError::InvalidParameters(
                "ref_block_size and search_radius must be positive".into(),
            ));
        }
        let (frame_w, frame_h) = quality.align().frame_size();
        if config.ref_block_size > frame_w.min(frame_h) {
            return Err(SkystackError::InvalidParameters(format!(
                "ref_block_size {} exceeds the frame size {}x{}",
                config.ref_block_size, frame_w, frame_h
            )));
        }

        let intersection = quality.intersection();
        let local = Rect::new(0, 0, intersection.width, intersection.height);

        let positions = match &config.positions {
            Some(explicit) => {
                for &p in explicit {
                    if !local.contains(p) {
                        return Err(SkystackError::InvalidParameters(format!(
                            "reference point ({}, {}) outside the intersection",
                            p.x, p.y
                        )));
                    }
                }
                explicit.clone()
            }
            None => placement::place_on_lattice(quality, &config)?,
        };
        if positions.is_empty() {
            return Err(SkystackError::InvalidParameters(
                "no reference points could be placed".into(),
            ));
        }

        let num_frames = quality.align().active_count();
        let mut points = Vec::with_capacity(positions.len());
        for pos in positions {
            let area = quality
                .area_at(pos)
                .expect("placement keeps points inside the intersection");
            let qualifies = qualifying_frames(quality.area(area).qualities(), config.criterion);

            // Reference block comes from the best frame for the point's area.
            let best = quality.best_frame_for_area(area);
            let abs_idx = quality.align().active_indices()[best];
            let frame = quality.align().source().frame_at(abs_idx)?;
            let mono = frame.to_mono8();
            let offset = quality.align().offset(best);
            let center = Point::new(
                intersection.x + pos.x + offset.x,
                intersection.y + pos.y + offset.y,
            );
            let (_, block) = extract_block_clamped(&mono, center, config.ref_block_size);

            points.push(RefPoint {
                initial_pos: pos,
                area,
                positions: Vec::with_capacity(num_frames),
                valid: Vec::with_capacity(num_frames),
                qualifies,
                block,
                sad_threshold: None,
            });
        }
        info!(points = points.len(), "reference points initialised");

        Ok(Self {
            quality,
            config,
            points,
            cursor: 0,
            poisoned: None,
        })
    }

    /// Match every reference point against the next active frame.
    pub fn step(&mut self) -> Result<StepStatus> {
        if let Some(msg) = &self.poisoned {
            return Err(SkystackError::Poisoned(msg.clone()));
        }
        let num_frames = self.quality.align().active_count();
        if self.cursor >= num_frames {
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
        let align = self.quality.align();
        let abs_idx = align.active_indices()[ordinal];
        let frame = align.source().frame_at(abs_idx)?;
        let mono = frame.to_mono8();
        let intersection = self.quality.intersection();
        let offset = align.offset(ordinal);
        let search_radius = self.config.search_radius;

        let local = Rect::new(0, 0, intersection.width, intersection.height);
        self.points.par_iter_mut().for_each(|point| {
            let prev = match ordinal {
                0 => FloatPoint::from(point.initial_pos),
                n => point.positions[n - 1],
            };

            if !point.qualifies[ordinal] {
                point.positions.push(prev);
                point.valid.push(false);
                return;
            }

            let center = Point::new(
                intersection.x + prev.x.round() as i32 + offset.x,
                intersection.y + prev.y.round() as i32 + offset.y,
            );
            match find_best_offset(&point.block, &mono, center, search_radius) {
                None => {
                    point.positions.push(prev);
                    point.valid.push(false);
                }
                Some((delta, sad)) => {
                    let per_pixel = sad as f64 / point.block.len() as f64;
                    let threshold = *point.sad_threshold.get_or_insert(
                        (REF_PT_SAD_FACTOR * per_pixel).max(REF_PT_SAD_FLOOR),
                    );
                    let new_pos =
                        FloatPoint::new(prev.x + delta.x as f64, prev.y + delta.y as f64);
                    if per_pixel <= threshold && local.contains_f(new_pos) {
                        point.positions.push(new_pos);
                        point.valid.push(true);
                    } else {
                        point.positions.push(prev);
                        point.valid.push(false);
                    }
                }
            }
        });

        self.cursor += 1;
        if self.cursor == align.active_count() {
            let dropped = self.points.iter().filter(|p| p.valid_count() == 0).count();
            info!(dropped, "reference point alignment complete");
            Ok(StepStatus::Done)
        } else {
            Ok(StepStatus::More)
        }
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.quality.align().active_count()
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn point(&self, index: usize) -> &RefPoint {
        &self.points[index]
    }

    pub fn points(&self) -> &[RefPoint] {
        &self.points
    }

    /// Final positions, indexed like `points()`; dropped points yield `None`.
    pub fn final_positions(&self) -> Vec<Option<FloatPoint>> {
        self.points.iter().map(|p| p.final_position()).collect()
    }

    pub fn quality(&self) -> &QualityEstimator<'a, S> {
        self.quality
    }

    pub fn config(&self) -> &RefPointConfig {
        &self.config
    }
}

/// Evaluate a quality criterion over one area's per-frame qualities.
pub fn qualifying_frames(qualities: &[f64], criterion: QualityCriterion) -> Vec<bool> {
    let n = qualities.len();
    let mut flags = vec![false; n];
    match criterion {
        QualityCriterion::PercentageBest(percent) => {
            let keep = (n as f64 * percent as f64 / 100.0).ceil() as usize;
            for &i in ranked_desc(qualities).iter().take(keep.min(n)) {
                flags[i] = true;
            }
        }
        QualityCriterion::MinRelQuality(percent) => {
            let min = qualities.iter().copied().fold(f64::INFINITY, f64::min);
            let max = qualities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let threshold = min + (max - min) * percent as f64 / 100.0;
            for (i, &q) in qualities.iter().enumerate() {
                flags[i] = q >= threshold;
            }
        }
        QualityCriterion::NumberBest(count) => {
            for &i in ranked_desc(qualities).iter().take((count as usize).min(n)) {
                flags[i] = true;
            }
        }
    }
    flags
}

/// Frame ordinals sorted by quality descending, index ascending on ties.
fn ranked_desc(qualities: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..qualities.len()).collect();
    order.sort_by(|&a, &b| {
        qualities[b]
            .total_cmp(&qualities[a])
            .then(a.cmp(&b))
    });
    order
}
