//! Axis-aligned bounding boxes.

use crate::{Point3, Transform, Vec3};

/// Axis-aligned bounding box in 3D.
///
/// An empty box has `min = +inf` and `max = -inf` so that it is the identity
/// element for [`Aabb::union`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Point3,
    /// Maximum corner.
    pub max: Point3,
}

impl Aabb {
    /// Create an AABB from min and max corners.
    pub fn new(min: Point3, max: Point3) -> Self {
        Self { min, max }
    }

    /// Create an empty (inverted) AABB suitable for expansion.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
        }
    }

    /// Smallest box containing every point.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.include_point(p);
        }
        aabb
    }

    /// Expand this AABB to include a point.
    pub fn include_point(&mut self, p: &Point3) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// Expand this AABB to enclose `other`.
    pub fn merge(&mut self, other: &Aabb) {
        self.min.x = self.min.x.min(other.min.x);
        self.min.y = self.min.y.min(other.min.y);
        self.min.z = self.min.z.min(other.min.z);
        self.max.x = self.max.x.max(other.max.x);
        self.max.y = self.max.y.max(other.max.y);
        self.max.z = self.max.z.max(other.max.z);
    }

    /// Smallest box enclosing both `self` and `other`.
    pub fn union(&self, other: &Aabb) -> Aabb {
        let mut out = *self;
        out.merge(other);
        out
    }

    /// True if `min <= max` on every axis.
    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    /// Size along each axis.
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Center point.
    pub fn center(&self) -> Point3 {
        nalgebra::center(&self.min, &self.max)
    }

    /// Surface area; zero for empty or inverted boxes.
    pub fn surface_area(&self) -> f32 {
        if !self.is_valid() {
            return 0.0;
        }
        let d = self.extent();
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Widen every axis thinner than `pad` by `pad` on both sides.
    ///
    /// Flat boxes (an axis-aligned triangle, a planar instance) would
    /// otherwise have zero thickness along one axis.
    pub fn pad_degenerate(&mut self, pad: f32) {
        for axis in 0..3 {
            if self.max[axis] - self.min[axis] < pad {
                self.min[axis] -= pad;
                self.max[axis] += pad;
            }
        }
    }

    /// The eight corners of the box.
    pub fn corners(&self) -> [Point3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Point3::new(lo.x, lo.y, lo.z),
            Point3::new(hi.x, lo.y, lo.z),
            Point3::new(lo.x, hi.y, lo.z),
            Point3::new(lo.x, lo.y, hi.z),
            Point3::new(hi.x, hi.y, lo.z),
            Point3::new(hi.x, lo.y, hi.z),
            Point3::new(lo.x, hi.y, hi.z),
            Point3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// World-space box of this box under `transform`.
    ///
    /// Transforms all eight corners and takes the component-wise min/max;
    /// transforming only `min` and `max` is wrong as soon as the transform
    /// rotates.
    pub fn transformed(&self, transform: &Transform) -> Aabb {
        let mut out = Aabb::empty();
        for corner in &self.corners() {
            out.include_point(&transform.apply_point(corner));
        }
        out
    }

    /// True if `other` lies inside `self`, allowing `tolerance` of slack on
    /// every face.
    pub fn contains_aabb(&self, other: &Aabb, tolerance: f32) -> bool {
        (0..3).all(|axis| {
            other.min[axis] >= self.min[axis] - tolerance
                && other.max[axis] <= self.max[axis] + tolerance
        })
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_4;

    fn unit_box() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_empty_is_union_identity() {
        let b = unit_box();
        assert_eq!(Aabb::empty().union(&b), b);
        assert!(!Aabb::empty().is_valid());
        assert_eq!(Aabb::empty().surface_area(), 0.0);
    }

    #[test]
    fn test_surface_area() {
        let b = Aabb::new(Point3::origin(), Point3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(b.surface_area(), 22.0);
    }

    #[test]
    fn test_pad_degenerate_only_touches_flat_axes() {
        let mut b = Aabb::new(Point3::new(0.0, 0.0, 2.0), Point3::new(1.0, 1.0, 2.0));
        b.pad_degenerate(1e-3);
        assert_eq!(b.min.x, 0.0);
        assert_eq!(b.max.y, 1.0);
        assert_relative_eq!(b.min.z, 2.0 - 1e-3);
        assert_relative_eq!(b.max.z, 2.0 + 1e-3);
    }

    #[test]
    fn test_transformed_rotation_uses_all_corners() {
        // A unit cube rotated 45 degrees about Z spans sqrt(2) in X.
        let t = Transform::rotation_z(FRAC_PI_4);
        let w = unit_box().transformed(&t);
        assert_relative_eq!(w.extent().x, 2.0_f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(w.extent().y, 2.0_f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(w.extent().z, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_transformed_translation() {
        let w = unit_box().transformed(&Transform::translation(10.0, 0.0, 0.0));
        assert_relative_eq!(w.min, Point3::new(10.0, 0.0, 0.0));
        assert_relative_eq!(w.max, Point3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn test_contains_with_tolerance() {
        let outer = unit_box();
        let inner = Aabb::new(Point3::new(-1e-6, 0.2, 0.2), Point3::new(0.5, 0.5, 0.5));
        assert!(!outer.contains_aabb(&inner, 0.0));
        assert!(outer.contains_aabb(&inner, 1e-5));
    }
}
