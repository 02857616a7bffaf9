//! Grid geometry for vertical setting.
//!
//! Lines advance in -x (columns run right to left) and characters advance
//! in -y within a line (top to bottom). The sign convention is load-bearing:
//! it is what makes the first line the rightmost one.

use core::ops::{Add, Mul, Sub};
use serde::{Deserialize, Serialize};

/// Three-component vector used for positions, rotations and box corners.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    /// All-zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Build a vector from components.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Axis-aligned glyph box reported by the renderer.
///
/// Boxes are in the glyph's local frame with its rotation already applied,
/// so `min.y..=max.y` is the extent along the line direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GlyphBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl GlyphBounds {
    /// Build bounds from two corners.
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box center.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Position of grid address `(line_index, column_index)`.
///
/// Returns `(-line_spacing * line_index, -chr_spacing * column_index)`.
pub fn grid_to_position(
    line_spacing: f32,
    chr_spacing: f32,
    line_index: usize,
    column_index: usize,
) -> (f32, f32) {
    (
        -line_spacing * line_index as f32,
        -chr_spacing * column_index as f32,
    )
}

/// Offset that reflects a glyph's box center through the cell origin.
///
/// A centered comma or period moved by `-2 * center` ends up with its visual
/// mass in the upper-right quadrant of its cell.
pub fn punctuation_offset(bbox_center: Vec3) -> Vec3 {
    bbox_center * -2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_follows_right_to_left_top_to_bottom_signs() {
        for (ls, cs) in [(0.0, 0.0), (1.0, 1.0), (1.2, 0.5), (3.5, 0.25)] {
            for i in 0..6usize {
                for j in 0..6usize {
                    let (x, y) = grid_to_position(ls, cs, i, j);
                    assert_eq!(x, -ls * i as f32);
                    assert_eq!(y, -cs * j as f32);
                }
            }
        }
    }

    #[test]
    fn origin_cell_is_at_zero() {
        assert_eq!(grid_to_position(1.2, 1.0, 0, 0), (-0.0, -0.0));
    }

    #[test]
    fn punctuation_offset_reflects_center() {
        let offset = punctuation_offset(Vec3::new(0.1, 0.2, 0.0));
        assert_eq!(offset, Vec3::new(-0.2, -0.4, -0.0));
        let moved = Vec3::new(0.1, 0.2, 0.0) + offset;
        assert_eq!(moved, Vec3::new(-0.1, -0.2, 0.0));
    }

    #[test]
    fn bounds_center() {
        let bounds = GlyphBounds::new(Vec3::new(-0.5, -1.0, 0.0), Vec3::new(0.5, 3.0, 0.0));
        assert_eq!(bounds.center(), Vec3::new(0.0, 1.0, 0.0));
    }
}
