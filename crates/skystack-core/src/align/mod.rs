pub mod block_match;

mod anchors;

pub use anchors::{suggest_anchor_position, Anchor};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::align::block_match::{extract_block, extract_block_clamped, find_best_offset};
use crate::consts::ANCHOR_REJECTION_SAD;
use crate::error::{Result, SkystackError};
use crate::geometry::{Point, Rect};
use crate::source::FrameSource;
use crate::StepStatus;

/// Parameters for anchor-based global alignment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlignConfig {
    /// Explicit anchor positions in frame-0 coordinates. `None` picks one
    /// automatically.
    #[serde(default)]
    pub anchors: Option<Vec<Point>>,
    /// Anchor reference block = square of side `2*block_radius+1` pixels.
    pub block_radius: u32,
    /// Block matching search radius in pixels.
    pub search_radius: u32,
    /// Minimum normalised brightness for automatic anchor placement (0-1).
    pub brightness_threshold: f32,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            anchors: None,
            block_radius: 16,
            search_radius: 8,
            brightness_threshold: 0.33,
        }
    }
}

/// Global image alignment: stabilises the frame sequence against bulk
/// translation by tracking brightness anchors via block matching.
///
/// Owns the frame source for the lifetime of the pipeline; downstream stages
/// reach frames through [`GlobalAlignment::source`].
pub struct GlobalAlignment<S: FrameSource> {
    source: S,
    config: AlignConfig,
    /// Absolute indices of the active frames, in sequence order.
    active_indices: Vec<usize>,
    /// Append-only; re-placement pushes, never removes.
    anchors: Vec<Anchor>,
    active_anchor: usize,
    /// Translation of active frame `i` relative to frame 0. `offsets[0]` is
    /// always (0,0).
    offsets: Vec<Point>,
    cursor: usize,
    frame_width: u32,
    frame_height: u32,
    intersection: Option<Rect>,
    poisoned: Option<String>,
}

impl<S: FrameSource> GlobalAlignment<S> {
    /// Loads the first active frame and places the anchors on it.
    pub fn new(mut source: S, config: AlignConfig) -> Result<Self> {
        if config.block_radius == 0 {
            return Err(SkystackError::InvalidParameters(
                "block_radius must be positive".into(),
            ));
        }
        if config.search_radius == 0 {
            return Err(SkystackError::InvalidParameters(
                "search_radius must be positive".into(),
            ));
        }

        let active_indices = source.active_indices();
        if active_indices.is_empty() {
            return Err(SkystackError::EmptySequence);
        }

        source.seek_start();
        let first_idx = source.seek_next()?;
        let first = source.current_frame()?;
        let mono = first.to_mono8().into_owned();
        let (h, w) = mono.dim();
        let frame_rect = Rect::new(0, 0, w as u32, h as u32);
        let block_size = 2 * config.block_radius + 1;

        let mut anchor_list = Vec::new();
        match &config.anchors {
            Some(positions) => {
                if positions.is_empty() {
                    return Err(SkystackError::InvalidParameters(
                        "anchor positions must not be empty".into(),
                    ));
                }
                for &pos in positions {
                    if !frame_rect.contains(pos) {
                        return Err(SkystackError::InvalidParameters(format!(
                            "anchor ({}, {}) outside the first frame",
                            pos.x, pos.y
                        )));
                    }
                    let block = extract_block(&mono, pos, block_size).ok_or_else(|| {
                        SkystackError::InvalidParameters(format!(
                            "anchor ({}, {}) too close to the frame edge for block radius {}",
                            pos.x, pos.y, config.block_radius
                        ))
                    })?;
                    anchor_list.push(Anchor {
                        pos,
                        valid: true,
                        created_at_frame: first_idx,
                        block,
                    });
                }
            }
            None => {
                let suggested =
                    suggest_anchor_position(&mono, config.brightness_threshold, config.block_radius);
                let (pos, block) = place_block(&mono, suggested, block_size);
                info!("placed automatic anchor at ({}, {})", pos.x, pos.y);
                anchor_list.push(Anchor {
                    pos,
                    valid: true,
                    created_at_frame: first_idx,
                    block,
                });
            }
        }

        let mut stage = Self {
            source,
            config,
            active_indices,
            anchors: anchor_list,
            active_anchor: 0,
            offsets: vec![Point::default()],
            cursor: 1,
            frame_width: w as u32,
            frame_height: h as u32,
            intersection: None,
            poisoned: None,
        };
        if stage.cursor == stage.active_indices.len() {
            stage.finalize()?;
        }
        Ok(stage)
    }

    /// Advance to the next active frame.
    pub fn step(&mut self) -> Result<StepStatus> {
        if let Some(msg) = &self.poisoned {
            return Err(SkystackError::Poisoned(msg.clone()));
        }
        if self.intersection.is_some() {
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
        let abs_idx = self.source.seek_next()?;
        let frame = self.source.current_frame()?;
        let mono = frame.to_mono8();
        let block_size = 2 * self.config.block_radius + 1;

        // Track every anchor that is still valid; remember each one's
        // displacement in this frame.
        let mut deltas: Vec<Option<Point>> = vec![None; self.anchors.len()];
        for (i, anchor) in self.anchors.iter_mut().enumerate() {
            if !anchor.valid {
                continue;
            }
            match find_best_offset(&anchor.block, &mono, anchor.pos, self.config.search_radius) {
                None => {
                    // Drifted off the frame: no candidate window fits.
                    anchor.valid = false;
                }
                Some((offset, sad)) => {
                    anchor.pos = anchor.pos + offset;
                    let per_pixel = sad as f64 / anchor.block.len() as f64;
                    if per_pixel > ANCHOR_REJECTION_SAD {
                        anchor.valid = false;
                    } else {
                        deltas[i] = Some(offset);
                    }
                }
            }
        }

        let prev_offset = *self.offsets.last().expect("offset list starts non-empty");
        let delta = match self.pick_active_anchor(&deltas) {
            Some(delta) => delta,
            None => {
                // Every anchor failed: place a fresh one on the current frame
                // and carry the last known offset forward unchanged.
                let suggested = suggest_anchor_position(
                    &mono,
                    self.config.brightness_threshold,
                    self.config.block_radius,
                );
                let (pos, block) = place_block(&mono, suggested, block_size);
                info!(
                    frame = abs_idx,
                    x = pos.x,
                    y = pos.y,
                    "all anchors lost, placed replacement"
                );
                self.anchors.push(Anchor {
                    pos,
                    valid: true,
                    created_at_frame: abs_idx,
                    block,
                });
                self.active_anchor = self.anchors.len() - 1;
                Point::default()
            }
        };

        let offset = prev_offset + delta;
        debug!(frame = abs_idx, dx = offset.x, dy = offset.y, "frame offset");
        self.offsets.push(offset);
        self.cursor += 1;

        if self.cursor == self.active_indices.len() {
            self.finalize()?;
            Ok(StepStatus::Done)
        } else {
            Ok(StepStatus::More)
        }
    }

    /// Displacement of the active anchor for this frame, switching to the
    /// next surviving anchor when the active one was lost.
    fn pick_active_anchor(&mut self, deltas: &[Option<Point>]) -> Option<Point> {
        if self.anchors[self.active_anchor].valid {
            if let Some(delta) = deltas[self.active_anchor] {
                return Some(delta);
            }
        }
        for (i, anchor) in self.anchors.iter().enumerate() {
            if anchor.valid {
                if let Some(delta) = deltas[i] {
                    self.active_anchor = i;
                    return Some(delta);
                }
            }
        }
        None
    }

    fn finalize(&mut self) -> Result<()> {
        let frame_rect = Rect::new(0, 0, self.frame_width, self.frame_height);
        let mut intersection = frame_rect;
        for &offset in &self.offsets {
            let translated = frame_rect.translate(Point::new(-offset.x, -offset.y));
            intersection = intersection
                .intersect(&translated)
                .ok_or(SkystackError::EmptyIntersection)?;
        }
        info!(
            x = intersection.x,
            y = intersection.y,
            width = intersection.width,
            height = intersection.height,
            "alignment complete"
        );
        self.intersection = Some(intersection);
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.intersection.is_some()
    }

    /// Intersection rectangle in frame-0 coordinates; `None` until the last
    /// step has run.
    pub fn intersection(&self) -> Option<Rect> {
        self.intersection
    }

    /// Per-frame offsets, one per processed active frame.
    pub fn offsets(&self) -> &[Point] {
        &self.offsets
    }

    /// Translation of active frame `ordinal` relative to frame 0.
    pub fn offset(&self, ordinal: usize) -> Point {
        self.offsets[ordinal]
    }

    pub fn active_indices(&self) -> &[usize] {
        &self.active_indices
    }

    pub fn active_count(&self) -> usize {
        self.active_indices.len()
    }

    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

/// Extract an anchor block, nudging the center when the suggested placement
/// sits too close to the edge. Frames smaller than one block keep the frame
/// center and a truncated block.
fn place_block(
    image: &ndarray::Array2<u8>,
    center: Point,
    block_size: u32,
) -> (Point, ndarray::Array2<u8>) {
    let (h, w) = image.dim();
    if h < block_size as usize || w < block_size as usize {
        let side = (h.min(w) as u32).max(1);
        return extract_block_clamped(image, center, side);
    }
    extract_block_clamped(image, center, block_size)
}
