//! Basic geometric types for zone layout analysis

use serde::{Deserialize, Serialize};

/// A point in 2D page space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
}

impl Point {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Origin point (0, 0)
    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Rotate this point around `center` by `degrees`
    pub fn rotate_around(&self, center: Point, degrees: f64) -> Self {
        let radians = degrees.to_radians();
        let (sin, cos) = radians.sin_cos();
        let dx = self.x - center.x;
        let dy = self.y - center.y;
        Self {
            x: center.x + dx * cos - dy * sin,
            y: center.y + dx * sin + dy * cos,
        }
    }
}

/// An axis-aligned rectangle defined by two corners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    /// Minimum corner
    pub lower_left: Point,
    /// Maximum corner
    pub upper_right: Point,
}

impl Rectangle {
    /// Create a new rectangle from two points
    pub fn new(lower_left: Point, upper_right: Point) -> Self {
        Self {
            lower_left,
            upper_right,
        }
    }

    /// Create a rectangle from position and size
    pub fn from_position_and_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            lower_left: Point::new(x, y),
            upper_right: Point::new(x + width, y + height),
        }
    }

    /// Get the width
    pub fn width(&self) -> f64 {
        self.upper_right.x - self.lower_left.x
    }

    /// Get the height
    pub fn height(&self) -> f64 {
        self.upper_right.y - self.lower_left.y
    }

    /// Get the area
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Get the center point
    pub fn center(&self) -> Point {
        Point::new(
            (self.lower_left.x + self.upper_right.x) / 2.0,
            (self.lower_left.y + self.upper_right.y) / 2.0,
        )
    }

    /// Intersection with another rectangle, if they overlap with positive area
    pub fn intersection(&self, other: &Rectangle) -> Option<Rectangle> {
        let min_x = self.lower_left.x.max(other.lower_left.x);
        let min_y = self.lower_left.y.max(other.lower_left.y);
        let max_x = self.upper_right.x.min(other.upper_right.x);
        let max_y = self.upper_right.y.min(other.upper_right.y);

        if max_x > min_x && max_y > min_y {
            Some(Rectangle::new(
                Point::new(min_x, min_y),
                Point::new(max_x, max_y),
            ))
        } else {
            None
        }
    }

    /// Area shared with another rectangle (0.0 when disjoint or only touching)
    pub fn intersection_area(&self, other: &Rectangle) -> f64 {
        self.intersection(other).map_or(0.0, |r| r.area())
    }

    /// Whether `other` lies entirely within this rectangle
    pub fn contains(&self, other: &Rectangle) -> bool {
        other.lower_left.x >= self.lower_left.x
            && other.lower_left.y >= self.lower_left.y
            && other.upper_right.x <= self.upper_right.x
            && other.upper_right.y <= self.upper_right.y
    }

    /// Smallest rectangle covering both
    pub fn union(&self, other: &Rectangle) -> Rectangle {
        Rectangle::new(
            Point::new(
                self.lower_left.x.min(other.lower_left.x),
                self.lower_left.y.min(other.lower_left.y),
            ),
            Point::new(
                self.upper_right.x.max(other.upper_right.x),
                self.upper_right.y.max(other.upper_right.y),
            ),
        )
    }

    /// Shortest edge-to-edge distance to another rectangle (0.0 when touching)
    pub fn gap_to(&self, other: &Rectangle) -> f64 {
        let dx = (other.lower_left.x - self.upper_right.x)
            .max(self.lower_left.x - other.upper_right.x)
            .max(0.0);
        let dy = (other.lower_left.y - self.upper_right.y)
            .max(self.lower_left.y - other.upper_right.y)
            .max(0.0);
        (dx * dx + dy * dy).sqrt()
    }

    /// Axis-aligned bounds of this rectangle rotated around its center
    pub fn rotated_bounds(&self, degrees: f64) -> Rectangle {
        if degrees % 360.0 == 0.0 {
            return *self;
        }

        let center = self.center();
        let corners = [
            self.lower_left,
            Point::new(self.upper_right.x, self.lower_left.y),
            self.upper_right,
            Point::new(self.lower_left.x, self.upper_right.y),
        ];

        let rotated: Vec<Point> = corners
            .iter()
            .map(|p| p.rotate_around(center, degrees))
            .collect();

        let min_x = rotated.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = rotated.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = rotated.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = rotated.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);

        Rectangle::new(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }
}
