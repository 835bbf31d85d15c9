//! Small math helpers shared by the geometry generators and the OBJ loader.
//!
//! Vector work goes through `cgmath`; the functions here cover the few
//! scalar and frame computations that `cgmath` does not provide directly.

use cgmath::{InnerSpace, Vector3};

/// Squared length below which a vector is treated as zero.
pub const DEGENERATE_EPSILON: f32 = 1e-12;

/// Largest power of two that is less than or equal to `value` (at least 1).
pub fn power_of_two_below(value: u32) -> u32 {
    if value <= 1 {
        return 1;
    }
    1 << (31 - value.leading_zeros())
}

/// Normalizes `v`, returning `None` for (near) zero-length input.
pub fn try_normalize(v: Vector3<f32>) -> Option<Vector3<f32>> {
    let len2 = v.magnitude2();
    if len2 <= DEGENERATE_EPSILON || !len2.is_finite() {
        None
    } else {
        Some(v / len2.sqrt())
    }
}

/// Counter-clockwise face normal of the triangle `(a, b, c)`.
///
/// Returns `None` when the triangle has no area.
pub fn triangle_normal(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>) -> Option<Vector3<f32>> {
    try_normalize((b - a).cross(c - a))
}

/// Orthonormal frame around an axis direction
///
/// `normal` is the axis itself. `tangent` and `bitangent` span the plane
/// perpendicular to it. The frame is derived from the world-up reference
/// `(0, 1, 0)`, falling back to `(1, 0, 0)` when the axis is parallel to it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    pub tangent: Vector3<f32>,
    pub bitangent: Vector3<f32>,
    pub normal: Vector3<f32>,
}

impl Frame {
    pub fn from_axis(axis: Vector3<f32>) -> Self {
        let normal = try_normalize(axis).unwrap_or(Vector3::unit_y());
        let reference = if normal.dot(Vector3::unit_y()).abs() > 1.0 - 1e-6 {
            Vector3::unit_x()
        } else {
            Vector3::unit_y()
        };
        let bitangent = reference.cross(normal).normalize();
        let tangent = normal.cross(bitangent);

        Self {
            tangent,
            bitangent,
            normal,
        }
    }

    /// Point on the circle of `radius` around `center` at `angle` radians.
    pub fn circle_point(&self, center: Vector3<f32>, angle: f32, radius: f32) -> Vector3<f32> {
        center + (self.tangent * angle.cos() + self.bitangent * angle.sin()) * radius
    }
}

/// Axis-aligned bounding box over a set of points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    /// Bounding box of `points`, or `None` when there are none.
    pub fn from_points<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = Vector3<f32>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        Some(iter.fold(
            Self {
                min: first,
                max: first,
            },
            |acc, p| Self {
                min: Vector3::new(acc.min.x.min(p.x), acc.min.y.min(p.y), acc.min.z.min(p.z)),
                max: Vector3::new(acc.max.x.max(p.x), acc.max.y.max(p.y), acc.max.z.max(p.z)),
            },
        ))
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vector3<f32> {
        (self.max - self.min) * 0.5
    }

    /// Largest of the three half extents.
    pub fn max_half_extent(&self) -> f32 {
        let h = self.half_extents();
        h.x.max(h.y).max(h.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_of_two_below() {
        assert_eq!(power_of_two_below(0), 1);
        assert_eq!(power_of_two_below(1), 1);
        assert_eq!(power_of_two_below(5), 4);
        assert_eq!(power_of_two_below(64), 64);
        assert_eq!(power_of_two_below(1000), 512);
    }

    #[test]
    fn test_frame_is_orthonormal() {
        for axis in [
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, -3.0, 0.0),
            Vector3::new(1.0, 2.0, -0.5),
        ] {
            let frame = Frame::from_axis(axis);
            assert!((frame.tangent.magnitude() - 1.0).abs() < 1e-5);
            assert!((frame.bitangent.magnitude() - 1.0).abs() < 1e-5);
            assert!(frame.tangent.dot(frame.normal).abs() < 1e-5);
            assert!(frame.bitangent.dot(frame.normal).abs() < 1e-5);
            assert!(frame.tangent.dot(frame.bitangent).abs() < 1e-5);
        }
    }

    #[test]
    fn test_degenerate_triangle_has_no_normal() {
        let p = Vector3::new(1.0, 1.0, 1.0);
        assert!(triangle_normal(p, p, p).is_none());

        let n = triangle_normal(
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert!((n.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_aabb() {
        let aabb = Aabb::from_points([
            Vector3::new(-1.0, 0.0, 2.0),
            Vector3::new(3.0, -2.0, 4.0),
        ])
        .unwrap();
        assert_eq!(aabb.center(), Vector3::new(1.0, -1.0, 3.0));
        assert_eq!(aabb.max_half_extent(), 2.0);
        assert!(Aabb::from_points(std::iter::empty()).is_none());
    }
}
