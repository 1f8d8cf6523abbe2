//! Detection geometry types

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind reported when the detection service omits one
pub const DEFAULT_CODE_KIND: &str = "QRCODE";

/// 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Exponential moving average step: `alpha * self + (1 - alpha) * previous`
    pub fn blend(self, previous: Point, alpha: f32) -> Point {
        Point {
            x: alpha * self.x + (1.0 - alpha) * previous.x,
            y: alpha * self.y + (1.0 - alpha) * previous.y,
        }
    }

    pub fn scale(self, sx: f32, sy: f32) -> Point {
        Point {
            x: self.x * sx,
            y: self.y * sy,
        }
    }

    pub fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Point { x, y }
    }
}

/// Axis-aligned bounding rectangle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingRect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Smallest rectangle enclosing every point, `None` for an empty slice
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Corners clockwise from the top-left
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.x + self.width, self.y),
            Point::new(self.x + self.width, self.y + self.height),
            Point::new(self.x, self.y + self.height),
        ]
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn scale(&self, sx: f32, sy: f32) -> BoundingRect {
        BoundingRect::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }
}

/// A code reported by the detection service for one frame.
///
/// `id` is the decoded payload and doubles as the code's identity across
/// detection cycles. The polygon is closed implicitly (last vertex connects
/// back to the first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCode {
    pub id: String,
    pub kind: String,
    pub polygon: Vec<Point>,
    pub bounding_rect: BoundingRect,
}

impl DetectedCode {
    /// Build a code, validating the polygon
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        polygon: Vec<Point>,
        bounding_rect: BoundingRect,
    ) -> Result<Self> {
        validate_polygon(&polygon)?;
        if !bounding_rect.is_finite() {
            return Err(Error::InvalidGeometry("bounding rect has non-finite values".to_string()));
        }
        Ok(Self {
            id: id.into(),
            kind: kind.into(),
            polygon,
            bounding_rect,
        })
    }

    /// Build a code whose bounding rect is derived from the polygon
    pub fn from_polygon(id: impl Into<String>, kind: impl Into<String>, polygon: Vec<Point>) -> Result<Self> {
        validate_polygon(&polygon)?;
        let rect = BoundingRect::from_points(&polygon)
            .ok_or_else(|| Error::InvalidGeometry("empty polygon".to_string()))?;
        Self::new(id, kind, polygon, rect)
    }

    pub fn centroid(&self) -> Point {
        centroid(&self.polygon)
    }

    /// Same code with geometry scaled per axis
    pub fn scaled(&self, sx: f32, sy: f32) -> DetectedCode {
        DetectedCode {
            id: self.id.clone(),
            kind: self.kind.clone(),
            polygon: self.polygon.iter().map(|p| p.scale(sx, sy)).collect(),
            bounding_rect: self.bounding_rect.scale(sx, sy),
        }
    }
}

/// Arithmetic mean of the vertices
pub fn centroid(points: &[Point]) -> Point {
    if points.is_empty() {
        return Point::default();
    }
    let n = points.len() as f32;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

fn validate_polygon(polygon: &[Point]) -> Result<()> {
    if polygon.len() < 3 {
        return Err(Error::InvalidGeometry(format!(
            "polygon needs at least 3 points, got {}",
            polygon.len()
        )));
    }
    if polygon.iter().any(|p| !p.is_finite()) {
        return Err(Error::InvalidGeometry("polygon has non-finite coordinates".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(offset: f32) -> Vec<Point> {
        vec![
            Point::new(offset, offset),
            Point::new(offset + 10.0, offset),
            Point::new(offset + 10.0, offset + 10.0),
            Point::new(offset, offset + 10.0),
        ]
    }

    #[test]
    fn test_blend_matches_weighted_sum() {
        let blended = Point::new(5.0, 5.0).blend(Point::new(0.0, 0.0), 0.3);
        assert!((blended.x - 1.5).abs() < 1e-6);
        assert!((blended.y - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_rect_from_points() {
        let rect = BoundingRect::from_points(&square(5.0)).unwrap();
        assert_eq!(rect, BoundingRect::new(5.0, 5.0, 10.0, 10.0));
        assert!(BoundingRect::from_points(&[]).is_none());
    }

    #[test]
    fn test_rect_corners_round_trip() {
        let rect = BoundingRect::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(BoundingRect::from_points(&rect.corners()), Some(rect));
    }

    #[test]
    fn test_code_from_polygon_derives_rect() {
        let code = DetectedCode::from_polygon("A", DEFAULT_CODE_KIND, square(0.0)).unwrap();
        assert_eq!(code.bounding_rect.area(), 100.0);
        assert_eq!(code.centroid(), Point::new(5.0, 5.0));
    }

    #[test]
    fn test_code_rejects_short_polygon() {
        let result = DetectedCode::from_polygon("A", "QRCODE", vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]);
        assert!(matches!(result, Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn test_code_rejects_nan() {
        let mut polygon = square(0.0);
        polygon[2].x = f32::NAN;
        assert!(DetectedCode::from_polygon("A", "QRCODE", polygon).is_err());
    }

    #[test]
    fn test_scaled_code() {
        let code = DetectedCode::from_polygon("A", "QRCODE", square(0.0)).unwrap();
        let scaled = code.scaled(2.0, 0.5);
        assert_eq!(scaled.polygon[2], Point::new(20.0, 5.0));
        assert_eq!(scaled.bounding_rect, BoundingRect::new(0.0, 0.0, 20.0, 5.0));
        assert_eq!(scaled.id, "A");
    }
}
