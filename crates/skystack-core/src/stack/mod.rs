use ndarray::{Array2, Array3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::consts::{EPSILON, GEOMETRY_EPSILON, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{Result, SkystackError};
use crate::frame::{Frame, PixelData};
use crate::geometry::{FloatPoint, Point, Rect};
use crate::refpt::RefPointAlignment;
use crate::source::FrameSource;
use crate::triangulate::{triangulate, Triangulation};
use crate::StepStatus;

/// The final composite: unquantised floating-point pixels, channel count
/// matching the source.
#[derive(Clone, Debug)]
pub enum StackedImage {
    /// Shape = (height, width).
    Mono(Array2<f32>),
    /// Shape = (height, width, 3).
    Rgb(Array3<f32>),
}

impl StackedImage {
    pub fn width(&self) -> usize {
        match self {
            StackedImage::Mono(a) => a.ncols(),
            StackedImage::Rgb(a) => a.dim().1,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            StackedImage::Mono(a) => a.nrows(),
            StackedImage::Rgb(a) => a.dim().0,
        }
    }
}

/// Affine map sending one triangle onto another.
#[derive(Clone, Copy, Debug)]
struct AffineMap {
    j11: f64,
    j12: f64,
    j21: f64,
    j22: f64,
    origin: FloatPoint,
    target: FloatPoint,
}

impl AffineMap {
    /// The unique affine map with `src[i] -> dst[i]`. `None` when the source
    /// triangle is degenerate.
    fn between(src: [FloatPoint; 3], dst: [FloatPoint; 3]) -> Option<AffineMap> {
        let sb = src[1] - src[0];
        let sc = src[2] - src[0];
        let det = sb.x * sc.y - sc.x * sb.y;
        if det.abs() <= GEOMETRY_EPSILON {
            return None;
        }
        let db = dst[1] - dst[0];
        let dc = dst[2] - dst[0];
        Some(AffineMap {
            j11: (db.x * sc.y - dc.x * sb.y) / det,
            j12: (dc.x * sb.x - db.x * sc.x) / det,
            j21: (db.y * sc.y - dc.y * sb.y) / det,
            j22: (dc.y * sb.x - db.y * sc.x) / det,
            origin: src[0],
            target: dst[0],
        })
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let rx = x - self.origin.x;
        let ry = y - self.origin.y;
        (
            self.target.x + self.j11 * rx + self.j12 * ry,
            self.target.y + self.j21 * rx + self.j22 * ry,
        )
    }
}

/// Stacking stage: warps triangular patches of every frame back onto the
/// final reference-point positions and accumulates weighted contributions.
pub struct Stacker<'a, S: FrameSource> {
    refpts: &'a RefPointAlignment<'a, S>,
    triangulation: Triangulation,
    /// Owning triangle per intersection pixel, -1 where uncovered.
    owner: Array2<i32>,
    acc: Array3<f32>,
    weight: Array2<f32>,
    /// Per-pixel divisor `F(x,y)/mean(F)`, when a flat field was supplied.
    flat: Option<Array2<f32>>,
    color: bool,
    step_triangles: Vec<usize>,
    cursor: usize,
    poisoned: Option<String>,
}

impl<'a, S: FrameSource> Stacker<'a, S> {
    pub fn new(refpts: &'a RefPointAlignment<'a, S>, flat_field: Option<&Frame>) -> Result<Self> {
        if !refpts.is_complete() {
            return Err(SkystackError::InvalidParameters(
                "reference point alignment is not complete".into(),
            ));
        }

        let intersection = refpts.quality().intersection();
        let w = intersection.width as usize;
        let h = intersection.height as usize;
        let local = Rect::new(0, 0, intersection.width, intersection.height);

        // Dropped points keep their vertex slot but take no part in the
        // triangulation.
        let mut vertices = Vec::with_capacity(refpts.num_points());
        let mut active = Vec::with_capacity(refpts.num_points());
        for point in refpts.points() {
            match point.final_position() {
                Some(pos) => {
                    vertices.push(pos);
                    active.push(true);
                }
                None => {
                    vertices.push(FloatPoint::from(point.initial_pos));
                    active.push(false);
                }
            }
        }
        if !active.iter().any(|&a| a) {
            return Err(SkystackError::InvalidParameters(
                "all reference points were dropped".into(),
            ));
        }

        let triangulation = triangulate(&vertices, &active, local);
        let owner = assign_pixels(&triangulation, w, h);
        info!(
            triangles = triangulation.triangles().len(),
            "stacking geometry prepared"
        );

        let color = refpts
            .quality()
            .align()
            .source()
            .metadata()
            .pixel_format
            .is_color();
        let channels = if color { 3 } else { 1 };

        let flat = flat_field
            .map(|f| normalized_flat(f, intersection))
            .transpose()?;

        Ok(Self {
            refpts,
            triangulation,
            owner,
            acc: Array3::zeros((h, w, channels)),
            weight: Array2::zeros((h, w)),
            flat,
            color,
            step_triangles: Vec::new(),
            cursor: 0,
            poisoned: None,
        })
    }

    /// Warp and accumulate the next active frame.
    pub fn step(&mut self) -> Result<StepStatus> {
        if let Some(msg) = &self.poisoned {
            return Err(SkystackError::Poisoned(msg.clone()));
        }
        let num_frames = self.refpts.quality().align().active_count();
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
        let align = self.refpts.quality().align();
        let intersection = self.refpts.quality().intersection();
        let abs_idx = align.active_indices()[ordinal];
        let frame = align.source().frame_at(abs_idx)?;
        let offset = align.offset(ordinal);

        let maps = self.frame_maps(ordinal);
        self.step_triangles = maps
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.map(|_| i))
            .collect();
        debug!(
            frame = abs_idx,
            triangles = self.step_triangles.len(),
            "stacking frame"
        );

        if self.step_triangles.is_empty() {
            self.cursor += 1;
            return Ok(self.status_after_step());
        }

        let (h, w) = self.weight.dim();
        let origin_x = (intersection.x + offset.x) as f64;
        let origin_y = (intersection.y + offset.y) as f64;
        let owner = &self.owner;
        let flat = self.flat.as_ref();
        let frame_ref = &frame;

        let sample_row = |y: usize| -> Vec<Option<[f32; 3]>> {
            (0..w)
                .map(|x| {
                    let ti = owner[[y, x]];
                    if ti < 0 {
                        return None;
                    }
                    let map = maps[ti as usize]?;
                    let (sx, sy) = map.apply(x as f64, y as f64);
                    let mut px = sample_pixel(frame_ref, sy + origin_y, sx + origin_x);
                    if let Some(flat) = flat {
                        let divisor = flat[[y, x]];
                        for c in px.iter_mut() {
                            *c /= divisor;
                        }
                    }
                    Some(px)
                })
                .collect()
        };

        let rows: Vec<Vec<Option<[f32; 3]>>> = if h * w >= PARALLEL_PIXEL_THRESHOLD {
            (0..h).into_par_iter().map(sample_row).collect()
        } else {
            (0..h).map(sample_row).collect()
        };

        let channels = self.acc.dim().2;
        for (y, row) in rows.into_iter().enumerate() {
            for (x, px) in row.into_iter().enumerate() {
                if let Some(px) = px {
                    for c in 0..channels {
                        self.acc[[y, x, c]] += px[c];
                    }
                    self.weight[[y, x]] += 1.0;
                }
            }
        }

        self.cursor += 1;
        Ok(self.status_after_step())
    }

    fn status_after_step(&self) -> StepStatus {
        if self.cursor == self.refpts.quality().align().active_count() {
            StepStatus::Done
        } else {
            StepStatus::More
        }
    }

    /// Affine maps for the triangles active in this frame: all three vertices
    /// valid, super vertices following the nearest valid reference point.
    fn frame_maps(&self, ordinal: usize) -> Vec<Option<AffineMap>> {
        let points = self.refpts.points();
        let tri = &self.triangulation;

        let valid: Vec<bool> = points.iter().map(|p| p.is_valid(ordinal)).collect();
        if !valid.iter().any(|&v| v) {
            return vec![None; tri.triangles().len()];
        }

        // Super vertices carry the frame-n translation of the nearest valid
        // reference point.
        let mut super_pos = [FloatPoint::default(); 3];
        for (k, &sv) in tri.super_vertices().iter().enumerate() {
            let sv_final = tri.vertex(sv);
            let nearest = (0..points.len())
                .filter(|&i| valid[i])
                .min_by(|&i, &j| {
                    let di = tri.vertex(i).dist_sq(&sv_final);
                    let dj = tri.vertex(j).dist_sq(&sv_final);
                    di.total_cmp(&dj).then(i.cmp(&j))
                })
                .expect("at least one valid point");
            let shift = points[nearest].position(ordinal)
                - points[nearest]
                    .final_position()
                    .expect("valid point has a final position");
            super_pos[k] = sv_final + shift;
        }

        let vertex_pos = |v: usize| -> Option<FloatPoint> {
            if tri.is_super_vertex(v) {
                Some(super_pos[v - tri.num_points()])
            } else if valid[v] {
                Some(points[v].position(ordinal))
            } else {
                None
            }
        };

        tri.triangles()
            .iter()
            .map(|t| {
                let src = [tri.vertex(t[0]), tri.vertex(t[1]), tri.vertex(t[2])];
                let dst = [vertex_pos(t[0])?, vertex_pos(t[1])?, vertex_pos(t[2])?];
                AffineMap::between(src, dst)
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor == self.refpts.quality().align().active_count()
    }

    pub fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// Triangle indices processed by the most recent step.
    pub fn processed_triangles(&self) -> &[usize] {
        &self.step_triangles
    }

    /// Accumulated per-pixel weights.
    pub fn weights(&self) -> &Array2<f32> {
        &self.weight
    }

    /// Index of the triangle owning an intersection pixel, if any.
    pub fn triangle_at(&self, x: usize, y: usize) -> Option<usize> {
        let ti = self.owner[[y, x]];
        (ti >= 0).then_some(ti as usize)
    }

    /// The normalised composite: `acc/weight`, zero where no frame
    /// contributed.
    pub fn final_image(&self) -> Result<StackedImage> {
        if !self.is_complete() {
            return Err(SkystackError::InvalidParameters(
                "stacking is not complete".into(),
            ));
        }
        let (h, w, channels) = self.acc.dim();
        if self.color {
            let mut out = Array3::<f32>::zeros((h, w, channels));
            for y in 0..h {
                for x in 0..w {
                    let weight = self.weight[[y, x]];
                    if weight > 0.0 {
                        for c in 0..channels {
                            out[[y, x, c]] = self.acc[[y, x, c]] / weight;
                        }
                    }
                }
            }
            Ok(StackedImage::Rgb(out))
        } else {
            let mut out = Array2::<f32>::zeros((h, w));
            for y in 0..h {
                for x in 0..w {
                    let weight = self.weight[[y, x]];
                    if weight > 0.0 {
                        out[[y, x]] = self.acc[[y, x, 0]] / weight;
                    }
                }
            }
            Ok(StackedImage::Mono(out))
        }
    }
}

/// Assign every intersection pixel to exactly one triangle.
///
/// A pixel belongs to the triangle containing it strictly; pixels on shared
/// edges go to the lowest-index triangle with non-negative barycentric
/// coordinates, so adjacent triangles tile the plane without double counting.
fn assign_pixels(tri: &Triangulation, w: usize, h: usize) -> Array2<i32> {
    let mut owner = Array2::<i32>::from_elem((h, w), -1);
    let mut strict = Array2::<bool>::from_elem((h, w), false);

    for (ti, t) in tri.triangles().iter().enumerate() {
        let a = tri.vertex(t[0]);
        let b = tri.vertex(t[1]);
        let c = tri.vertex(t[2]);

        let x0 = a.x.min(b.x).min(c.x).floor().max(0.0) as usize;
        let x1 = (a.x.max(b.x).max(c.x).ceil() as i64).clamp(0, w as i64 - 1) as usize;
        let y0 = a.y.min(b.y).min(c.y).floor().max(0.0) as usize;
        let y1 = (a.y.max(b.y).max(c.y).ceil() as i64).clamp(0, h as i64 - 1) as usize;
        if a.x.max(b.x).max(c.x) < 0.0 || a.y.max(b.y).max(c.y) < 0.0 {
            continue;
        }

        let area2 = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if area2.abs() <= GEOMETRY_EPSILON {
            continue;
        }

        for y in y0..=y1 {
            for x in x0..=x1 {
                let p = FloatPoint::new(x as f64, y as f64);
                let l0 = ((b.x - p.x) * (c.y - p.y) - (b.y - p.y) * (c.x - p.x)) / area2;
                let l1 = ((c.x - p.x) * (a.y - p.y) - (c.y - p.y) * (a.x - p.x)) / area2;
                let l2 = ((a.x - p.x) * (b.y - p.y) - (a.y - p.y) * (b.x - p.x)) / area2;

                if l0 > GEOMETRY_EPSILON && l1 > GEOMETRY_EPSILON && l2 > GEOMETRY_EPSILON {
                    owner[[y, x]] = ti as i32;
                    strict[[y, x]] = true;
                } else if !strict[[y, x]]
                    && owner[[y, x]] < 0
                    && l0 >= -GEOMETRY_EPSILON
                    && l1 >= -GEOMETRY_EPSILON
                    && l2 >= -GEOMETRY_EPSILON
                {
                    owner[[y, x]] = ti as i32;
                }
            }
        }
    }

    owner
}

/// Bilinear sample at fractional coordinates, normalised to [0, 1]. Samples
/// outside the frame read as 0.
fn sample_pixel(frame: &Frame, y: f64, x: f64) -> [f32; 3] {
    match &frame.data {
        PixelData::Mono8(data) => {
            let v = bilinear_u8(|r, c| data.get((r, c)).copied(), data.dim(), y, x);
            [v, v, v]
        }
        PixelData::Rgb8(data) => {
            let (h, w, _) = data.dim();
            let mut out = [0.0f32; 3];
            for (c, v) in out.iter_mut().enumerate() {
                *v = bilinear_u8(|row, col| data.get((row, col, c)).copied(), (h, w), y, x);
            }
            out
        }
    }
}

fn bilinear_u8<F>(get: F, dim: (usize, usize), y: f64, x: f64) -> f32
where
    F: Fn(usize, usize) -> Option<u8>,
{
    let (h, w) = dim;
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            get(r as usize, c as usize).unwrap_or(0) as f32 / 255.0
        } else {
            0.0
        }
    };

    let v00 = sample(y0, x0);
    let v10 = sample(y0, x0 + 1);
    let v01 = sample(y0 + 1, x0);
    let v11 = sample(y0 + 1, x0 + 1);

    v00 * (1.0 - fx) * (1.0 - fy) + v10 * fx * (1.0 - fy) + v01 * (1.0 - fx) * fy + v11 * fx * fy
}

/// Flat-field divisor image: the flat's mono luminance over its mean, clipped
/// to the intersection when the flat is frame-sized. Zero flat pixels divide
/// by 1 instead.
fn normalized_flat(flat: &Frame, intersection: Rect) -> Result<Array2<f32>> {
    let mono = flat.to_mono8();
    let (h, w) = mono.dim();
    let iw = intersection.width as usize;
    let ih = intersection.height as usize;

    let crop: Array2<f32> = if (w, h) == (iw, ih) {
        mono.mapv(|v| v as f32)
    } else if intersection.x >= 0
        && intersection.y >= 0
        && intersection.right() as usize <= w
        && intersection.bottom() as usize <= h
    {
        crate::quality::stabilized_crop(&mono, intersection, Point::default()).mapv(|v| v as f32)
    } else {
        return Err(SkystackError::InvalidParameters(format!(
            "flat field is {w}x{h}, expected the intersection ({iw}x{ih}) or a full frame"
        )));
    };

    let mean = crop.mean().unwrap_or(0.0);
    if mean <= EPSILON {
        return Err(SkystackError::InvalidParameters(
            "flat field is entirely dark".into(),
        ));
    }
    Ok(crop.mapv(|v| if v <= EPSILON { 1.0 } else { v / mean }))
}
