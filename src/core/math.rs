//! Vector and Quaternion Math
//!
//! Small `f32` vector types for movement simulation and rendering.
//! Operations are written out component by component so that the client and
//! the server evaluate the exact same floating-point expression sequence.

use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};
use serde::{Serialize, Deserialize};

/// Dot products above this are treated as "same orientation" by slerp,
/// which then falls back to normalized lerp.
const SLERP_LINEAR_THRESHOLD: f32 = 0.9995;

// =============================================================================
// VEC2
// =============================================================================

/// 2D input axis (x = strafe, y = forward).
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
}

impl Vec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Debug for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec2({:.3}, {:.3})", self.x, self.y)
    }
}

// =============================================================================
// VEC3
// =============================================================================

/// 3D position. Y is up; movement happens on the X/Z plane.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component (up)
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Scale by a scalar.
    #[inline]
    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Linear interpolation, `t` is not clamped.
    ///
    /// Uses the `a*(1-t) + b*t` form so that `t == 0` yields `self` and
    /// `t == 1` yields `other` exactly.
    #[inline]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let s = 1.0 - t;
        Self::new(
            self.x * s + other.x * t,
            self.y * s + other.y * t,
            self.z * s + other.z * t,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, s: f32) -> Self {
        self.scale(s)
    }
}

impl fmt::Debug for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec3({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

// =============================================================================
// QUAT
// =============================================================================

/// Rotation quaternion, stored (and sent) in w, x, y, z order.
#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// Scalar part
    pub w: f32,
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// No rotation
    pub const IDENTITY: Self = Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    /// Create from raw components.
    #[inline]
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Rotation about the up (Y) axis by `degrees`.
    pub fn from_yaw_degrees(degrees: f32) -> Self {
        let half = degrees.to_radians() * 0.5;
        Self::new(half.cos(), 0.0, half.sin(), 0.0)
    }

    /// Heading about the up axis in degrees, normalized to [0, 360).
    pub fn yaw_degrees(self) -> f32 {
        let siny = 2.0 * (self.w * self.y + self.z * self.x);
        let cosy = 1.0 - 2.0 * (self.x * self.x + self.y * self.y);
        normalize_degrees(siny.atan2(cosy).to_degrees())
    }

    /// Four-component dot product.
    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.w * other.w + self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Quaternion length.
    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Normalize to unit length. Returns identity for a zero quaternion.
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0.0 {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
    }

    #[inline]
    fn scale(self, s: f32) -> Self {
        Self::new(self.w * s, self.x * s, self.y * s, self.z * s)
    }

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.w + other.w, self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Spherical linear interpolation along the shortest arc.
    ///
    /// `t` is not clamped; values past 1 continue along the same great
    /// circle, which extrapolation relies on.
    pub fn slerp(self, other: Self, t: f32) -> Self {
        let mut end = other;
        let mut cos_theta = self.dot(other);

        // Take the short way around.
        if cos_theta < 0.0 {
            end = other.scale(-1.0);
            cos_theta = -cos_theta;
        }

        if cos_theta > SLERP_LINEAR_THRESHOLD {
            return self.scale(1.0 - t).add(end.scale(t)).normalize();
        }

        let theta = cos_theta.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        self.scale(a).add(end.scale(b))
    }

    /// Angle in degrees between two orientations.
    pub fn angle_to(self, other: Self) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        (2.0 * d.acos()).to_degrees()
    }
}

impl fmt::Debug for Quat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quat(w={:.3}, {:.3}, {:.3}, {:.3})", self.w, self.x, self.y, self.z)
    }
}

/// Wrap an angle in degrees into [0, 360).
#[inline]
pub fn normalize_degrees(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs.
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_lerp_endpoints_exact() {
        let a = Vec3::new(0.1, 0.2, 0.3);
        let b = Vec3::new(0.7, -4.9, 13.37);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn test_lerp_extrapolates() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, 0.0, 0.0);
        let c = a.lerp(b, 1.5);
        assert!((c.x - 15.0).abs() < EPS);
    }

    #[test]
    fn test_yaw_roundtrip() {
        for deg in [0.0f32, 45.0, 90.0, 179.0, 270.0, 359.0] {
            let q = Quat::from_yaw_degrees(deg);
            assert!((q.yaw_degrees() - deg).abs() < 1e-3, "yaw {} -> {}", deg, q.yaw_degrees());
        }
    }

    #[test]
    fn test_normalize_degrees() {
        assert_eq!(normalize_degrees(0.0), 0.0);
        assert!((normalize_degrees(-90.0) - 270.0).abs() < EPS);
        assert!((normalize_degrees(450.0) - 90.0).abs() < EPS);
        assert!(normalize_degrees(-1e-9) < 360.0);
    }

    #[test]
    fn test_slerp_halfway() {
        let a = Quat::from_yaw_degrees(0.0);
        let b = Quat::from_yaw_degrees(90.0);
        let mid = a.slerp(b, 0.5);
        assert!((mid.yaw_degrees() - 45.0).abs() < 1e-3);
        assert!((mid.length() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_slerp_short_path() {
        let a = Quat::from_yaw_degrees(350.0);
        let b = Quat::from_yaw_degrees(10.0);
        let mid = a.slerp(b, 0.5);
        let yaw = mid.yaw_degrees();
        assert!(yaw < 1e-2 || yaw > 359.99, "expected ~0 degrees, got {}", yaw);
    }

    #[test]
    fn test_slerp_extrapolates_past_one() {
        let a = Quat::from_yaw_degrees(0.0);
        let b = Quat::from_yaw_degrees(30.0);
        let c = a.slerp(b, 2.0);
        assert!((c.yaw_degrees() - 60.0).abs() < 1e-2);
    }
}
