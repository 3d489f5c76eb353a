//! Fixed-point math for navmesh space
//!
//! Horizontal positions inside a mesh are stored as `IVec2` in the range
//! `0..=FP_RANGE`. Containment and crossing tests use exact 64-bit integer
//! cross products; lengths and angles go through floating point.

use glam::{IVec2, Vec2};

/// Extent of the fixed-point coordinate range on each axis
pub const FP_RANGE: i32 = 65535;

/// Integer vector helpers for fixed-point navmesh coordinates
pub trait FixedPoint: Copy {
    /// 2D cross product widened to 64 bits
    fn cross_i64(self, other: Self) -> i64;
    /// Squared length widened to 64 bits
    fn length_squared_i64(self) -> i64;
    /// Length as a float
    fn lengthf(self) -> f32;
    /// Distance to another point as a float
    fn distancef_to(self, other: Self) -> f32;
    /// Dot product of the two vectors after normalizing both.
    ///
    /// Returns 0.0 when either vector is zero.
    fn dot_normalized(self, other: Self) -> f32;
    /// Rescales the vector to the given length, truncating towards zero
    fn normalized_to_scale(self, scale: f32) -> Self;
    /// Multiplies by a float factor, truncating towards zero
    fn scaled(self, factor: f32) -> Self;
    /// Converts to a float vector
    fn to_f32(self) -> Vec2;
}

impl FixedPoint for IVec2 {
    #[inline]
    fn cross_i64(self, other: Self) -> i64 {
        (self.x as i64) * (other.y as i64) - (self.y as i64) * (other.x as i64)
    }

    #[inline]
    fn length_squared_i64(self) -> i64 {
        (self.x as i64) * (self.x as i64) + (self.y as i64) * (self.y as i64)
    }

    #[inline]
    fn lengthf(self) -> f32 {
        (self.length_squared_i64() as f64).sqrt() as f32
    }

    #[inline]
    fn distancef_to(self, other: Self) -> f32 {
        (other - self).lengthf()
    }

    fn dot_normalized(self, other: Self) -> f32 {
        let a = self.to_f32().normalize_or_zero();
        let b = other.to_f32().normalize_or_zero();
        a.dot(b)
    }

    fn normalized_to_scale(self, scale: f32) -> Self {
        let v = self.to_f32().normalize_or_zero() * scale;
        IVec2::new(v.x as i32, v.y as i32)
    }

    #[inline]
    fn scaled(self, factor: f32) -> Self {
        IVec2::new(
            (self.x as f32 * factor) as i32,
            (self.y as f32 * factor) as i32,
        )
    }

    #[inline]
    fn to_f32(self) -> Vec2 {
        Vec2::new(self.x as f32, self.y as f32)
    }
}

/// Converts a float vector to fixed point by rounding each axis
#[inline]
pub fn round_to_fixed(v: Vec2) -> IVec2 {
    IVec2::new(v.x.round() as i32, v.y.round() as i32)
}

/// Returns true when two float vectors are equal within a small absolute tolerance
#[inline]
pub fn is_equal_approx(a: Vec2, b: Vec2) -> bool {
    const CMP_EPSILON: f32 = 0.00001;
    (a - b).abs().max_element() <= CMP_EPSILON
}

/// Moves `from` one unit per axis towards `to`
#[inline]
pub fn step_towards(from: IVec2, to: IVec2) -> IVec2 {
    from + (to - from).signum()
}
