use std::collections::BTreeMap;

use tracing::debug;

use crate::consts::{GEOMETRY_EPSILON, SUPER_TRIANGLE_MARGIN};
use crate::geometry::{FloatPoint, Rect};

/// Delaunay triangulation of a point set plus three enclosing super-triangle
/// vertices.
///
/// The super vertices keep the last three slots of the vertex list so the
/// triangulation covers the whole bounding rectangle; consumers must treat
/// them specially (they correspond to no reference point).
#[derive(Clone, Debug)]
pub struct Triangulation {
    vertices: Vec<FloatPoint>,
    triangles: Vec<[usize; 3]>,
    num_points: usize,
}

impl Triangulation {
    pub fn vertices(&self) -> &[FloatPoint] {
        &self.vertices
    }

    pub fn vertex(&self, index: usize) -> FloatPoint {
        self.vertices[index]
    }

    /// Triangles as vertex-index triples, counter-clockwise.
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Number of input points (vertex indices below this are points, at or
    /// above are super-triangle vertices).
    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn is_super_vertex(&self, index: usize) -> bool {
        index >= self.num_points
    }

    pub fn super_vertices(&self) -> [usize; 3] {
        [self.num_points, self.num_points + 1, self.num_points + 2]
    }
}

/// Twice the signed area of triangle `(a, b, c)`; positive when
/// counter-clockwise.
fn cross(a: FloatPoint, b: FloatPoint, c: FloatPoint) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Circumcircle test for a counter-clockwise triangle. Points on the circle
/// count as inside, which keeps the insertion cavity connected for
/// cocircular inputs such as regular lattices.
fn in_circumcircle(a: FloatPoint, b: FloatPoint, c: FloatPoint, p: FloatPoint) -> bool {
    let ax = a.x - p.x;
    let ay = a.y - p.y;
    let bx = b.x - p.x;
    let by = b.y - p.y;
    let cx = c.x - p.x;
    let cy = c.y - p.y;

    let det = (ax * ax + ay * ay) * (bx * cy - cx * by)
        - (bx * bx + by * by) * (ax * cy - cx * ay)
        + (cx * cx + cy * cy) * (ax * by - bx * ay);
    det >= -GEOMETRY_EPSILON
}

/// Incremental Bowyer-Watson triangulation of the active subset of `points`
/// inside `bounds`.
///
/// Points are inserted in lexicographic coordinate order so degenerate and
/// collinear configurations resolve deterministically. Exact duplicates after
/// the first occurrence end up in no triangle. No output triangle has zero
/// area.
pub fn triangulate(points: &[FloatPoint], active: &[bool], bounds: Rect) -> Triangulation {
    assert_eq!(points.len(), active.len());
    let n = points.len();

    // Super-triangle far outside the bounding rectangle.
    let cx = bounds.x as f64 + bounds.width as f64 / 2.0;
    let cy = bounds.y as f64 + bounds.height as f64 / 2.0;
    let m = (bounds.width.max(bounds.height) as f64).max(1.0) * SUPER_TRIANGLE_MARGIN;

    let mut vertices = points.to_vec();
    vertices.push(FloatPoint::new(cx - 3.0 * m, cy - m));
    vertices.push(FloatPoint::new(cx + 3.0 * m, cy - m));
    vertices.push(FloatPoint::new(cx, cy + 3.0 * m));

    let mut order: Vec<usize> = (0..n).filter(|&i| active[i]).collect();
    order.sort_by(|&i, &j| {
        (points[i].x, points[i].y, i)
            .partial_cmp(&(points[j].x, points[j].y, j))
            .expect("finite coordinates")
    });

    let mut triangles: Vec<[usize; 3]> = vec![[n, n + 1, n + 2]];
    let mut inserted: Vec<usize> = Vec::with_capacity(order.len());

    for &pi in &order {
        let p = vertices[pi];
        if inserted
            .iter()
            .any(|&j| vertices[j].dist_sq(&p) < GEOMETRY_EPSILON)
        {
            continue;
        }

        // Cavity: triangles whose circumcircle contains the new point.
        let mut bad = Vec::new();
        for (ti, tri) in triangles.iter().enumerate() {
            if in_circumcircle(vertices[tri[0]], vertices[tri[1]], vertices[tri[2]], p) {
                bad.push(ti);
            }
        }

        // Boundary edges appear in exactly one cavity triangle. The map is
        // ordered so the retriangulation order is deterministic.
        let mut edges: BTreeMap<(usize, usize), ((usize, usize), u32)> = BTreeMap::new();
        for &ti in &bad {
            let t = triangles[ti];
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let key = (a.min(b), a.max(b));
                let entry = edges.entry(key).or_insert(((a, b), 0));
                entry.1 += 1;
            }
        }

        for ti in bad.iter().rev() {
            triangles.swap_remove(*ti);
        }

        for ((a, b), count) in edges.values() {
            if *count != 1 {
                continue;
            }
            let (a, b) = (*a, *b);
            let area2 = cross(vertices[a], vertices[b], p);
            if area2.abs() <= GEOMETRY_EPSILON {
                continue;
            }
            if area2 > 0.0 {
                triangles.push([a, b, pi]);
            } else {
                triangles.push([b, a, pi]);
            }
        }

        inserted.push(pi);
    }

    triangles.retain(|t| cross(vertices[t[0]], vertices[t[1]], vertices[t[2]]).abs() > GEOMETRY_EPSILON);
    debug!(
        points = inserted.len(),
        triangles = triangles.len(),
        "triangulation built"
    );

    Triangulation {
        vertices,
        triangles,
        num_points: n,
    }
}
