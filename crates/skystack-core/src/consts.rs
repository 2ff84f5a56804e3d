/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Per-pixel SAD (0-255 scale) above which a tracked anchor is considered lost.
pub const ANCHOR_REJECTION_SAD: f64 = 32.0;

/// Multiplier applied to a reference point's first matched per-pixel SAD to
/// form its validity threshold.
pub const REF_PT_SAD_FACTOR: f64 = 1.5;

/// Lower bound for a reference point's per-pixel SAD threshold.
pub const REF_PT_SAD_FLOOR: f64 = 4.0;

/// How far outside the bounding rectangle the super-triangle vertices are
/// placed, as a multiple of the larger rectangle dimension.
pub const SUPER_TRIANGLE_MARGIN: f64 = 4.0;

/// Tolerance for the circumcircle and orientation predicates.
pub const GEOMETRY_EPSILON: f64 = 1e-9;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;
