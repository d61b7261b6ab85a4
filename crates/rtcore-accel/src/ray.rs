//! Ray representation and the ray-box slab test.

use rtcore_math::{Aabb, Point3, Vec3};

/// Default lower bound on accepted hit distances; keeps secondary rays from
/// re-hitting the surface they start on.
pub const DEFAULT_T_MIN: f32 = 0.001;

/// Direction components smaller than this get a huge finite reciprocal.
const INV_DIR_EPSILON: f32 = 1e-9;
const INV_DIR_CLAMP: f32 = 1e9;

/// A ray `origin + t * direction` restricted to `t in [t_min, t_max]`.
///
/// The direction is not normalized. Rays built from a unit direction report
/// `t` as a distance; rays mapped into a scaled instance keep the scale so
/// that `t` stays comparable with the world-space ray.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// Origin point of the ray.
    pub origin: Point3,
    /// Direction of travel.
    pub direction: Vec3,
    /// Reciprocal direction; near-zero components are clamped to `±1e9`.
    pub inv_direction: Vec3,
    /// Per-axis direction sign: 0 if non-negative, 1 if negative.
    pub dir_sign: [usize; 3],
    /// Smallest accepted hit distance.
    pub t_min: f32,
    /// Largest accepted hit distance.
    pub t_max: f32,
}

impl Ray {
    /// Create a ray with the default range `[0.001, f32::MAX]`.
    pub fn new(origin: Point3, direction: Vec3) -> Self {
        Self::with_range(origin, direction, DEFAULT_T_MIN, f32::MAX)
    }

    /// Create a ray accepting hits in `[t_min, t_max]`.
    ///
    /// # Panics
    ///
    /// Panics if origin or direction are not finite, or the range is not
    /// `0 <= t_min <= t_max`.
    pub fn with_range(origin: Point3, direction: Vec3, t_min: f32, t_max: f32) -> Self {
        assert!(
            origin.coords.iter().all(|c| c.is_finite()),
            "ray origin must be finite"
        );
        assert!(
            direction.iter().all(|c| c.is_finite()),
            "ray direction must be finite"
        );
        assert!(t_min >= 0.0, "ray t_min must be non-negative");
        assert!(t_min <= t_max, "ray t_min must be <= t_max");

        let inv_direction = direction.map(safe_recip);
        let dir_sign = [
            (inv_direction.x < 0.0) as usize,
            (inv_direction.y < 0.0) as usize,
            (inv_direction.z < 0.0) as usize,
        ];
        Self {
            origin,
            direction,
            inv_direction,
            dir_sign,
            t_min,
            t_max,
        }
    }

    /// Evaluate the ray at parameter `t`: `origin + t * direction`.
    #[inline]
    pub fn at(&self, t: f32) -> Point3 {
        debug_assert!(t.is_finite(), "ray parameter must be finite");
        self.origin + self.direction * t
    }

    /// True if origin and direction are finite and the range is ordered.
    pub fn is_valid(&self) -> bool {
        self.origin.coords.iter().all(|c| c.is_finite())
            && self.direction.iter().all(|c| c.is_finite())
            && self.t_min <= self.t_max
    }

    /// Test ray-AABB intersection using the slab method.
    ///
    /// Returns `Some((t_entry, t_exit))` when the ray's forward half-line
    /// crosses the box. `t_entry` is clamped to zero for origins inside the
    /// box. The ray's own `[t_min, t_max]` range is not applied here.
    #[inline]
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let bounds = [aabb.min, aabb.max];

        let tx1 = (bounds[self.dir_sign[0]].x - self.origin.x) * self.inv_direction.x;
        let tx2 = (bounds[1 - self.dir_sign[0]].x - self.origin.x) * self.inv_direction.x;

        let mut t_min = tx1;
        let mut t_max = tx2;

        let ty1 = (bounds[self.dir_sign[1]].y - self.origin.y) * self.inv_direction.y;
        let ty2 = (bounds[1 - self.dir_sign[1]].y - self.origin.y) * self.inv_direction.y;

        t_min = t_min.max(ty1);
        t_max = t_max.min(ty2);

        let tz1 = (bounds[self.dir_sign[2]].z - self.origin.z) * self.inv_direction.z;
        let tz2 = (bounds[1 - self.dir_sign[2]].z - self.origin.z) * self.inv_direction.z;

        t_min = t_min.max(tz1);
        t_max = t_max.min(tz2);

        if t_max >= t_min.max(0.0) {
            Some((t_min.max(0.0), t_max))
        } else {
            None
        }
    }
}

#[inline]
fn safe_recip(d: f32) -> f32 {
    if d.abs() < INV_DIR_EPSILON {
        if d.is_sign_negative() {
            -INV_DIR_CLAMP
        } else {
            INV_DIR_CLAMP
        }
    } else {
        1.0 / d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let p = ray.at(5.0);
        assert!((p.x - 5.0).abs() < 1e-6);
        assert!(p.y.abs() < 1e-6);
        assert!(p.z.abs() < 1e-6);
    }

    #[test]
    fn test_defaults_and_inverse_clamp() {
        let ray = Ray::new(Point3::origin(), Vec3::new(0.0, -0.0, 2.0));
        assert_eq!(ray.t_min, DEFAULT_T_MIN);
        assert_eq!(ray.t_max, f32::MAX);
        assert_eq!(ray.inv_direction.x, 1e9);
        assert_eq!(ray.inv_direction.y, -1e9);
        assert_eq!(ray.inv_direction.z, 0.5);
        assert_eq!(ray.dir_sign, [0, 1, 0]);
        assert!(ray.is_valid());
    }

    #[test]
    fn test_ray_aabb_hit() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box()).unwrap();
        assert!((t_min - 5.0).abs() < 1e-5);
        assert!((t_max - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_ray_aabb_miss() {
        let ray = Ray::new(Point3::new(-5.0, 5.0, 5.0), Vec3::new(1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box()).is_none());
    }

    #[test]
    fn test_ray_inside_aabb() {
        let ray = Ray::new(Point3::new(0.5, 0.5, 0.5), Vec3::new(1.0, 0.0, 0.0));
        let (t_min, t_max) = ray.intersect_aabb(&unit_box()).unwrap();
        assert_eq!(t_min, 0.0);
        assert!((t_max - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ray_aabb_behind() {
        let ray = Ray::new(Point3::new(-5.0, 0.5, 0.5), Vec3::new(-1.0, 0.0, 0.0));
        assert!(ray.intersect_aabb(&unit_box()).is_none());
    }

    #[test]
    fn test_ray_aabb_flat_box() {
        // Zero-thickness box hit head-on along its thin axis.
        let flat = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 0.0));
        let ray = Ray::new(Point3::new(0.5, 0.5, 3.0), Vec3::new(0.0, 0.0, -1.0));
        let (t_min, t_max) = ray.intersect_aabb(&flat).unwrap();
        assert!((t_min - 3.0).abs() < 1e-6);
        assert!((t_max - 3.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "t_min must be <= t_max")]
    fn test_inverted_range_panics() {
        let _ = Ray::with_range(Point3::origin(), Vec3::x(), 2.0, 1.0);
    }
}
