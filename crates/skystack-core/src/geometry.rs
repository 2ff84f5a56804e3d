use std::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

/// Integer 2D position or translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Real-valued 2D position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FloatPoint {
    pub x: f64,
    pub y: f64,
}

impl FloatPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dist_sq(&self, other: &FloatPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl From<Point> for FloatPoint {
    fn from(p: Point) -> Self {
        Self {
            x: p.x as f64,
            y: p.y as f64,
        }
    }
}

impl Add for FloatPoint {
    type Output = FloatPoint;

    fn add(self, rhs: FloatPoint) -> FloatPoint {
        FloatPoint::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for FloatPoint {
    type Output = FloatPoint;

    fn sub(self, rhs: FloatPoint) -> FloatPoint {
        FloatPoint::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Axis-aligned rectangle with integer origin and unsigned extents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    pub fn contains_f(&self, p: FloatPoint) -> bool {
        p.x >= self.x as f64
            && p.x < self.right() as f64
            && p.y >= self.y as f64
            && p.y < self.bottom() as f64
    }

    /// Intersection of two rectangles; `None` when they do not overlap.
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    pub fn translate(&self, d: Point) -> Rect {
        Rect::new(self.x + d.x, self.y + d.y, self.width, self.height)
    }
}
