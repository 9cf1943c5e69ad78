use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle. `x`, `y` are the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(_x: f32, _y: f32, _width: f32, _height: f32) -> Self {
        Rect {
            x: _x,
            y: _y,
            width: _width,
            height: _height,
        }
    }
    /// Builds rectangle from `[x1, y1, x2, y2]` corners (the detector's native layout)
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }
    pub fn right(&self) -> f32 {
        self.x + self.width
    }
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
    pub fn center(&self) -> Point {
        Point::new(self.x + 0.5 * self.width, self.y + 0.5 * self.height)
    }
    /// Zero, negative or non-finite extent
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }
    /// Clips rectangle to `[0, width] x [0, height]`. Result may be degenerate.
    pub fn clip_to(&self, width: f32, height: f32) -> Rect {
        let x1 = self.x.clamp(0.0, width);
        let y1 = self.y.clamp(0.0, height);
        let x2 = self.right().clamp(0.0, width);
        let y2 = self.bottom().clamp(0.0, height);
        Rect::from_corners(x1, y1, x2, y2)
    }
    /// Inclusive containment test
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(_x: f32, _y: f32) -> Self {
        Point { x: _x, y: _y }
    }
    /// Linear interpolation towards `other`, `t` in [0, 1]
    pub fn lerp(&self, other: &Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

pub fn euclidean_distance(p1: &Point, p2: &Point) -> f32 {
    let x_squared = (p1.x - p2.x).powi(2);
    let y_squared = (p1.y - p2.y).powi(2);
    f32::sqrt(x_squared + y_squared)
}

/// Intersection over Union of two rectangles. Returns 0.0 when union is empty.
pub fn iou(a: &Rect, b: &Rect) -> f32 {
    let x1 = f32::max(a.x, b.x);
    let y1 = f32::max(a.y, b.y);
    let x2 = f32::min(a.right(), b.right());
    let y2 = f32::min(a.bottom(), b.bottom());

    let intersection = f32::max(0.0, x2 - x1) * f32::max(0.0, y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let p1 = Point::new(341.0, 264.0);
        let p2 = Point::new(421.0, 427.0);
        let ans = euclidean_distance(&p1, &p2);
        assert!((ans - 181.57367).abs() < 1e-3);
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 0.0, 10.0, 10.0);
        // 50 / 150
        assert!((iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(iou(&a, &a), 1.0);
        let far = Rect::new(100.0, 100.0, 10.0, 10.0);
        assert_eq!(iou(&a, &far), 0.0);
        let empty = Rect::default();
        assert_eq!(iou(&empty, &empty), 0.0);
    }

    #[test]
    fn test_clip_and_degenerate() {
        let r = Rect::from_corners(-20.0, 10.0, 50.0, 2000.0);
        let clipped = r.clip_to(1920.0, 1080.0);
        assert_eq!(clipped, Rect::from_corners(0.0, 10.0, 50.0, 1080.0));
        assert!(!clipped.is_degenerate());

        let outside = Rect::new(2000.0, 10.0, 30.0, 30.0).clip_to(1920.0, 1080.0);
        assert!(outside.is_degenerate());
        assert!(Rect::new(f32::NAN, 0.0, 1.0, 1.0).is_degenerate());
    }

    #[test]
    fn test_contains_inclusive() {
        let r = Rect::from_corners(100.0, 50.0, 400.0, 250.0);
        assert!(r.contains(&Point::new(100.0, 50.0)));
        assert!(r.contains(&Point::new(400.0, 250.0)));
        assert!(!r.contains(&Point::new(400.1, 250.0)));
    }
}
