use skystack_core::geometry::{FloatPoint, Rect};
use skystack_core::triangulate::{triangulate, Triangulation};

fn area2(a: FloatPoint, b: FloatPoint, c: FloatPoint) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn assert_all_positive_area(tri: &Triangulation) {
    for t in tri.triangles() {
        let a = area2(tri.vertex(t[0]), tri.vertex(t[1]), tri.vertex(t[2]));
        assert!(a > 0.0, "triangle {t:?} has non-positive area {a}");
    }
}

/// Whether `p` lies in triangle `t` (inclusive edges).
fn contains(tri: &Triangulation, t: [usize; 3], p: FloatPoint) -> bool {
    let a = tri.vertex(t[0]);
    let b = tri.vertex(t[1]);
    let c = tri.vertex(t[2]);
    let total = area2(a, b, c);
    let l0 = area2(p, b, c) / total;
    let l1 = area2(a, p, c) / total;
    let l2 = area2(a, b, p) / total;
    l0 >= -1e-9 && l1 >= -1e-9 && l2 >= -1e-9
}

fn grid_points(cols: usize, rows: usize, pitch: f64) -> Vec<FloatPoint> {
    let mut points = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            points.push(FloatPoint::new(
                10.0 + col as f64 * pitch,
                10.0 + row as f64 * pitch,
            ));
        }
    }
    points
}

#[test]
fn triangulates_a_square_lattice() {
    // A regular lattice is the worst case for the circumcircle predicate:
    // every cell's corners are cocircular.
    let points = grid_points(4, 4, 20.0);
    let active = vec![true; points.len()];
    let tri = triangulate(&points, &active, Rect::new(0, 0, 80, 80));

    assert_eq!(tri.vertices().len(), points.len() + 3);
    assert_eq!(tri.num_points(), points.len());
    assert_all_positive_area(&tri);

    // Every lattice point is a vertex of at least one triangle.
    for i in 0..points.len() {
        assert!(
            tri.triangles().iter().any(|t| t.contains(&i)),
            "point {i} missing from the triangulation"
        );
    }
}

#[test]
fn covers_the_whole_bounding_rectangle() {
    let points = grid_points(3, 3, 25.0);
    let active = vec![true; points.len()];
    let bounds = Rect::new(0, 0, 70, 70);
    let tri = triangulate(&points, &active, bounds);

    // Sample a dense raster: every position must fall in some triangle
    // (the super-triangle guarantees full coverage).
    for y in 0..70 {
        for x in 0..70 {
            let p = FloatPoint::new(x as f64, y as f64);
            assert!(
                tri.triangles().iter().any(|&t| contains(&tri, t, p)),
                "({x}, {y}) not covered"
            );
        }
    }
}

#[test]
fn super_vertices_are_distinguished() {
    let points = vec![
        FloatPoint::new(5.0, 5.0),
        FloatPoint::new(25.0, 7.0),
        FloatPoint::new(14.0, 28.0),
    ];
    let active = vec![true; 3];
    let tri = triangulate(&points, &active, Rect::new(0, 0, 32, 32));

    assert_eq!(tri.super_vertices(), [3, 4, 5]);
    for i in 0..3 {
        assert!(!tri.is_super_vertex(i));
    }
    for i in 3..6 {
        assert!(tri.is_super_vertex(i));
    }
    // The super vertices still appear in triangles covering the corners.
    assert!(tri
        .triangles()
        .iter()
        .any(|t| t.iter().any(|&v| tri.is_super_vertex(v))));
}

#[test]
fn collinear_points_produce_no_degenerate_triangle() {
    let points = vec![
        FloatPoint::new(10.0, 20.0),
        FloatPoint::new(20.0, 20.0),
        FloatPoint::new(30.0, 20.0),
        FloatPoint::new(40.0, 20.0),
    ];
    let active = vec![true; points.len()];
    let tri = triangulate(&points, &active, Rect::new(0, 0, 50, 40));

    assert_all_positive_area(&tri);
    for i in 0..points.len() {
        assert!(tri.triangles().iter().any(|t| t.contains(&i)));
    }
}

#[test]
fn inactive_points_are_left_out() {
    let points = grid_points(3, 3, 20.0);
    let mut active = vec![true; points.len()];
    active[4] = false; // center point dropped

    let tri = triangulate(&points, &active, Rect::new(0, 0, 60, 60));
    assert!(
        tri.triangles().iter().all(|t| !t.contains(&4)),
        "dropped point must not appear in any triangle"
    );
    // The slot is still present in the vertex list.
    assert_eq!(tri.vertices().len(), points.len() + 3);
}

#[test]
fn duplicate_points_keep_one_site() {
    let points = vec![
        FloatPoint::new(10.0, 10.0),
        FloatPoint::new(10.0, 10.0),
        FloatPoint::new(30.0, 12.0),
        FloatPoint::new(18.0, 30.0),
    ];
    let active = vec![true; points.len()];
    let tri = triangulate(&points, &active, Rect::new(0, 0, 40, 40));

    assert_all_positive_area(&tri);
    let uses_both = tri.triangles().iter().any(|t| t.contains(&0))
        && tri.triangles().iter().any(|t| t.contains(&1));
    assert!(!uses_both, "coincident sites must collapse to one vertex");
}
