//! 2D geometry operations for navmesh space
//!
//! This module provides the bounding rectangle, the float/fixed-point mapping
//! derived from it, polygon planes and the exact integer line intersection
//! used by the wall-crossing tests. Horizontal operations work on the XZ plane
//! (Y-up coordinate system) with the Z axis stored in the `y` lane of 2D
//! vectors.

use glam::{IVec2, Vec2, Vec3};

use crate::math::{round_to_fixed, FP_RANGE};
use crate::{Error, Result};

/// Axis-aligned rectangle on the XZ plane
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Bounds2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Bounds2 {
    /// Creates a rectangle containing a single point
    pub fn from_point(p: Vec2) -> Self {
        Self { min: p, max: p }
    }

    /// Builds the bounding rectangle of a set of 3D points, projected onto XZ
    pub fn from_points_xz<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Vec3>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::from_point(Vec2::new(first.x, first.z));
        for p in iter {
            bounds.expand_to(Vec2::new(p.x, p.z));
        }
        Some(bounds)
    }

    /// Grows the rectangle to include the point
    #[inline]
    pub fn expand_to(&mut self, p: Vec2) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    #[inline]
    pub fn contains(&self, p: Vec2) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }
}

/// Affine mapping between world XZ floats and fixed-point mesh coordinates.
///
/// Computed once from a mesh's bounding rectangle so that the rectangle spans
/// `0..=FP_RANGE` on both axes.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct FixedMapping {
    pub to_fixed_scale: Vec2,
    pub to_fixed_offset: Vec2,
    pub to_float_scale: Vec2,
    pub to_float_offset: Vec2,
}

impl Default for FixedMapping {
    fn default() -> Self {
        Self {
            to_fixed_scale: Vec2::ONE,
            to_fixed_offset: Vec2::ZERO,
            to_float_scale: Vec2::ONE,
            to_float_offset: Vec2::ZERO,
        }
    }
}

impl FixedMapping {
    /// Derives the mapping from a bounding rectangle
    pub fn from_bounds(bounds: &Bounds2) -> Result<Self> {
        let size = bounds.size();
        if !(size.x > 0.0 && size.y > 0.0) || !size.is_finite() {
            return Err(Error::InvalidMesh(format!(
                "bounding rectangle has no area: {size:?}"
            )));
        }

        let range = FP_RANGE as f32;
        Ok(Self {
            to_fixed_scale: Vec2::splat(range) / size,
            to_fixed_offset: -bounds.min,
            to_float_scale: size / range,
            to_float_offset: bounds.min,
        })
    }

    /// World XZ position to fixed point, rounded to the nearest unit
    #[inline]
    pub fn to_fixed(&self, p: Vec2) -> IVec2 {
        round_to_fixed((p + self.to_fixed_offset) * self.to_fixed_scale)
    }

    /// Fixed point position back to world XZ
    #[inline]
    pub fn to_float(&self, p: IVec2) -> Vec2 {
        Vec2::new(p.x as f32, p.y as f32) * self.to_float_scale + self.to_float_offset
    }

    /// Velocities only scale, they are not offset
    #[inline]
    pub fn vel_to_fixed(&self, v: Vec2) -> IVec2 {
        round_to_fixed(v * self.to_fixed_scale)
    }

    #[inline]
    pub fn vel_to_float(&self, v: IVec2) -> Vec2 {
        Vec2::new(v.x as f32, v.y as f32) * self.to_float_scale
    }

    /// Size of one fixed-point unit in world units, per axis
    #[inline]
    pub fn unit_size(&self) -> Vec2 {
        self.to_float_scale
    }
}

/// Plane in Hessian normal form, `normal.dot(p) == d`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Fits a plane through a polygon using Newell's method.
    ///
    /// Returns the plane with a unit normal and the unnormalized Newell vector,
    /// whose length is twice the polygon area. `None` for degenerate input.
    pub fn from_newell(points: &[Vec3]) -> Option<(Self, Vec3)> {
        if points.len() < 3 {
            return None;
        }

        let mut n = Vec3::ZERO;
        let mut centroid = Vec3::ZERO;
        for (i, a) in points.iter().enumerate() {
            let b = points[(i + 1) % points.len()];
            n.x += (a.y - b.y) * (a.z + b.z);
            n.y += (a.z - b.z) * (a.x + b.x);
            n.z += (a.x - b.x) * (a.y + b.y);
            centroid += *a;
        }
        centroid /= points.len() as f32;

        let normal = n.try_normalize()?;
        Some((Self::new(normal, normal.dot(centroid)), n))
    }

    /// Returns the same plane facing the opposite way
    pub fn flipped(&self) -> Self {
        Self::new(-self.normal, -self.d)
    }

    /// Height of the plane along the vertical line through (x, z).
    ///
    /// `None` for vertical planes.
    pub fn height_at(&self, x: f32, z: f32) -> Option<f32> {
        if self.normal.y.abs() <= f32::EPSILON {
            return None;
        }
        Some((self.d - self.normal.x * x - self.normal.z * z) / self.normal.y)
    }
}

/// Intersects two infinite lines using integer math only.
///
/// Each line is given by two points. Returns `None` for parallel lines. The
/// result is rounded to the nearest fixed-point unit. Products are widened to
/// 128 bits so segments reaching well outside `FP_RANGE` cannot overflow.
pub fn lines_intersect_integer(
    from_a: IVec2,
    to_a: IVec2,
    from_b: IVec2,
    to_b: IVec2,
) -> Option<IVec2> {
    let (x1, y1) = (from_a.x as i128, from_a.y as i128);
    let (x2, y2) = (to_a.x as i128, to_a.y as i128);
    let (x3, y3) = (from_b.x as i128, from_b.y as i128);
    let (x4, y4) = (to_b.x as i128, to_b.y as i128);

    // a1 x + b1 y + c1 = 0
    let a1 = y2 - y1;
    let b1 = x1 - x2;
    let c1 = x2 * y1 - x1 * y2;

    let a2 = y4 - y3;
    let b2 = x3 - x4;
    let c2 = x4 * y3 - x3 * y4;

    let denom = a1 * b2 - a2 * b1;
    if denom == 0 {
        return None;
    }

    // round instead of truncate
    let offset = (denom / 2).abs();
    let round_div = |num: i128| -> i128 {
        if num < 0 {
            (num - offset) / denom
        } else {
            (num + offset) / denom
        }
    };

    let x = round_div(b1 * c2 - b2 * c1);
    let y = round_div(a2 * c1 - a1 * c2);
    Some(IVec2::new(
        x.clamp(i32::MIN as i128, i32::MAX as i128) as i32,
        y.clamp(i32::MIN as i128, i32::MAX as i128) as i32,
    ))
}

/// Closest point to `p` on the segment `a..b`
pub fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Shortest distance between the segments `p0..p1` and `q0..q1`
pub fn closest_distance_between_segments(p0: Vec3, p1: Vec3, q0: Vec3, q1: Vec3) -> f32 {
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= f32::EPSILON && e <= f32::EPSILON {
        (0.0, 0.0)
    } else if a <= f32::EPSILON {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= f32::EPSILON {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            // parallel segments: any s works, start from p0
            let s = if denom > f32::EPSILON {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t = (b * s + f) / e;
            if t < 0.0 {
                ((-c / a).clamp(0.0, 1.0), 0.0)
            } else if t > 1.0 {
                (((b - c) / a).clamp(0.0, 1.0), 1.0)
            } else {
                (s, t)
            }
        }
    };

    (p0 + d1 * s).distance(q0 + d2 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let pts = [
            Vec3::new(1.0, 5.0, -2.0),
            Vec3::new(-3.0, 0.0, 4.0),
            Vec3::new(0.0, 9.0, 0.0),
        ];
        let b = Bounds2::from_points_xz(pts.iter()).unwrap();
        assert_eq!(b.min, Vec2::new(-3.0, -2.0));
        assert_eq!(b.max, Vec2::new(1.0, 4.0));
        assert!(b.contains(Vec2::new(0.0, 0.0)));
        assert!(!b.contains(Vec2::new(2.0, 0.0)));
        assert!(Bounds2::from_points_xz(std::iter::empty::<&Vec3>()).is_none());
    }

    #[test]
    fn test_mapping_spans_fixed_range() {
        let b = Bounds2 {
            min: Vec2::new(-10.0, 2.0),
            max: Vec2::new(10.0, 6.0),
        };
        let m = FixedMapping::from_bounds(&b).unwrap();
        assert_eq!(m.to_fixed(b.min), IVec2::ZERO);
        assert_eq!(m.to_fixed(b.max), IVec2::splat(FP_RANGE));
        let back = m.to_float(IVec2::splat(FP_RANGE));
        assert!((back - b.max).abs().max_element() < 1e-4);
    }

    #[test]
    fn test_mapping_round_trip_within_one_unit() {
        let b = Bounds2 {
            min: Vec2::new(0.0, 0.0),
            max: Vec2::new(37.5, 12.25),
        };
        let m = FixedMapping::from_bounds(&b).unwrap();
        let unit = m.unit_size();
        for i in 0..50 {
            let t = i as f32 / 49.0;
            let p = Vec2::new(37.5 * t, 12.25 * (1.0 - t));
            let back = m.to_float(m.to_fixed(p));
            assert!((back.x - p.x).abs() <= unit.x);
            assert!((back.y - p.y).abs() <= unit.y);
        }
    }

    #[test]
    fn test_degenerate_bounds_rejected() {
        let b = Bounds2 {
            min: Vec2::new(0.0, 0.0),
            max: Vec2::new(5.0, 0.0),
        };
        assert!(FixedMapping::from_bounds(&b).is_err());
    }

    #[test]
    fn test_velocity_mapping_ignores_offset() {
        let b = Bounds2 {
            min: Vec2::new(100.0, 100.0),
            max: Vec2::new(101.0, 101.0),
        };
        let m = FixedMapping::from_bounds(&b).unwrap();
        assert_eq!(m.vel_to_fixed(Vec2::ZERO), IVec2::ZERO);
        assert_eq!(m.vel_to_fixed(Vec2::new(1.0, 0.0)), IVec2::new(FP_RANGE, 0));
    }

    #[test]
    fn test_newell_plane() {
        let quad = [
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 2.0),
            Vec3::new(2.0, 1.0, 2.0),
            Vec3::new(2.0, 1.0, 0.0),
        ];
        let (plane, n) = Plane::from_newell(&quad).unwrap();
        assert!((plane.normal.y.abs() - 1.0).abs() < 1e-6);
        // |n| is twice the area
        assert!((n.length() * 0.5 - 4.0).abs() < 1e-5);
        assert!((plane.height_at(0.5, 0.5).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sloped_plane_height() {
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 0.0),
        ];
        let (plane, _) = Plane::from_newell(&tri).unwrap();
        assert!((plane.height_at(0.5, 0.2).unwrap() - 0.5).abs() < 1e-5);
        assert!((plane.height_at(0.25, 0.9).unwrap() - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_segment_distances() {
        // crossing at right angles, one unit apart vertically
        let d = closest_distance_between_segments(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!((d - 1.0).abs() < 1e-6);

        // parallel, end to end
        let d = closest_distance_between_segments(
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(3.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
        );
        assert!((d - 2.0).abs() < 1e-6);

        // degenerate first segment
        let d = closest_distance_between_segments(
            Vec3::new(0.5, 0.0, 2.0),
            Vec3::new(0.5, 0.0, 2.0),
            Vec3::ZERO,
            Vec3::X,
        );
        assert!((d - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_lines_intersect_integer() {
        let hit = lines_intersect_integer(
            IVec2::new(0, 0),
            IVec2::new(10, 0),
            IVec2::new(5, -5),
            IVec2::new(5, 5),
        );
        assert_eq!(hit, Some(IVec2::new(5, 0)));

        let parallel = lines_intersect_integer(
            IVec2::new(0, 0),
            IVec2::new(10, 0),
            IVec2::new(0, 1),
            IVec2::new(10, 1),
        );
        assert_eq!(parallel, None);
    }

    #[test]
    fn test_lines_intersect_large_coordinates() {
        let hit = lines_intersect_integer(
            IVec2::new(0, 0),
            IVec2::new(FP_RANGE, FP_RANGE),
            IVec2::new(0, FP_RANGE),
            IVec2::new(FP_RANGE, 0),
        )
        .unwrap();
        // 32767.5 rounds away from zero
        assert_eq!(hit, IVec2::new(32768, 32768));
    }

    #[test]
    fn test_closest_point_on_segment() {
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 0.0, 0.0);
        assert_eq!(closest_point_on_segment(Vec3::new(5.0, 0.0, 3.0), a, b), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(closest_point_on_segment(Vec3::new(-5.0, 0.0, 3.0), a, b), a);
        assert_eq!(closest_point_on_segment(Vec3::new(15.0, 0.0, 3.0), a, b), b);
    }
}
