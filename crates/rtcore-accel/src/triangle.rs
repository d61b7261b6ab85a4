//! Triangle primitive and Möller–Trumbore ray intersection.

use rtcore_math::{Aabb, Point3, Transform, Vec3};

use crate::bvh::Primitive;
use crate::intersection::Intersection;
use crate::ray::Ray;

/// Layer mask matching every layer.
pub const ALL_LAYERS: u32 = u32::MAX;

/// Rays whose determinant falls below this are parallel to the face.
const PARALLEL_EPSILON: f32 = 1e-8;
/// Squared edge length below which an edge counts as collapsed.
const DEGENERATE_EDGE_SQ: f32 = 1e-16;

/// A triangle with precomputed edges and face normal.
///
/// The edges and normal are derived from the vertices at construction and
/// kept in sync by [`Triangle::set_vertices`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    v0: Point3,
    v1: Point3,
    v2: Point3,
    edge1: Vec3,
    edge2: Vec3,
    normal: Vec3,
    /// Stable id reported in [`Intersection::prim_id`]; survives BVH reordering.
    pub id: u32,
    /// Visibility layer bits.
    pub layers: u32,
}

impl Triangle {
    /// Create a triangle visible on all layers.
    ///
    /// # Panics
    ///
    /// Panics if a vertex is not finite or all three vertices coincide.
    pub fn new(v0: Point3, v1: Point3, v2: Point3, id: u32) -> Self {
        Self::with_layers(v0, v1, v2, id, ALL_LAYERS)
    }

    /// Create a triangle on the given layers.
    pub fn with_layers(v0: Point3, v1: Point3, v2: Point3, id: u32, layers: u32) -> Self {
        let mut tri = Self {
            v0,
            v1,
            v2,
            edge1: Vec3::zeros(),
            edge2: Vec3::zeros(),
            normal: Vec3::zeros(),
            id,
            layers,
        };
        tri.set_vertices(v0, v1, v2);
        tri
    }

    /// Replace the vertices and recompute edges and normal.
    ///
    /// The owning BVH must be refit afterwards.
    pub fn set_vertices(&mut self, v0: Point3, v1: Point3, v2: Point3) {
        assert!(
            [v0, v1, v2]
                .iter()
                .all(|p| p.coords.iter().all(|c| c.is_finite())),
            "triangle vertices must be finite"
        );
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        assert!(
            edge1.norm_squared() > DEGENERATE_EDGE_SQ || edge2.norm_squared() > DEGENERATE_EDGE_SQ,
            "degenerate triangle {}: both edges are near-zero length",
            self.id
        );
        self.v0 = v0;
        self.v1 = v1;
        self.v2 = v2;
        self.edge1 = edge1;
        self.edge2 = edge2;
        // Collinear vertices give a zero normal rather than NaN.
        self.normal = edge1
            .cross(&edge2)
            .try_normalize(f32::MIN_POSITIVE)
            .unwrap_or_else(Vec3::zeros);
    }

    /// Copy of this triangle with every vertex mapped through `transform`.
    pub fn transformed(&self, transform: &Transform) -> Self {
        let mut out = *self;
        out.set_vertices(
            transform.apply_point(&self.v0),
            transform.apply_point(&self.v1),
            transform.apply_point(&self.v2),
        );
        out
    }

    /// The three vertices.
    pub fn vertices(&self) -> [Point3; 3] {
        [self.v0, self.v1, self.v2]
    }

    /// `v1 - v0`.
    pub fn edge1(&self) -> Vec3 {
        self.edge1
    }

    /// `v2 - v0`.
    pub fn edge2(&self) -> Vec3 {
        self.edge2
    }

    /// Unit face normal, or zero for a collinear triangle.
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// Intersect `ray` with this triangle.
    ///
    /// Updates `out` and returns true only if the hit lies in
    /// `[ray.t_min, ray.t_max]` and strictly closer than `out.t`.
    #[inline]
    pub fn intersect(&self, ray: &Ray, out: &mut Intersection) -> bool {
        debug_assert!(out.t >= 0.0, "intersection t must be non-negative");
        let pvec = ray.direction.cross(&self.edge2);
        let det = self.edge1.dot(&pvec);
        if det.abs() < PARALLEL_EPSILON {
            return false;
        }
        let inv_det = 1.0 / det;

        let tvec = ray.origin - self.v0;
        let u = tvec.dot(&pvec) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return false;
        }

        let qvec = tvec.cross(&self.edge1);
        let v = ray.direction.dot(&qvec) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return false;
        }

        let t = self.edge2.dot(&qvec) * inv_det;
        if t < ray.t_min || t > ray.t_max {
            return false;
        }

        if t < out.t {
            out.t = t;
            out.position = ray.at(t);
            out.normal = self.normal;
            out.u = u;
            out.v = v;
            out.prim_id = self.id;
            out.hit_layers = self.layers;
            return true;
        }
        false
    }
}

impl Primitive for Triangle {
    fn bounds(&self) -> Aabb {
        Aabb::from_points(&[self.v0, self.v1, self.v2])
    }

    fn centroid(&self) -> Point3 {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    fn layers(&self) -> u32 {
        self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_triangle() -> Triangle {
        Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            42,
        )
    }

    #[test]
    fn test_hit_head_on() {
        let tri = unit_triangle();
        let ray = Ray::new(Point3::new(0.25, 0.25, 10.0), Vec3::new(0.0, 0.0, -1.0));
        let mut hit = Intersection::default();
        assert!(tri.intersect(&ray, &mut hit));
        assert_relative_eq!(hit.t, 10.0);
        assert_relative_eq!(hit.normal, Vec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(hit.position, Point3::new(0.25, 0.25, 0.0));
        assert_relative_eq!(hit.u, 0.25);
        assert_relative_eq!(hit.v, 0.25);
        assert_eq!(hit.prim_id, 42);
        assert_eq!(hit.hit_layers, ALL_LAYERS);
    }

    #[test]
    fn test_miss_pointing_away() {
        let tri = unit_triangle();
        let ray = Ray::new(Point3::new(0.25, 0.25, 10.0), Vec3::new(0.0, 0.0, 1.0));
        let mut hit = Intersection::default();
        assert!(!tri.intersect(&ray, &mut hit));
        assert!(!hit.hit());
    }

    #[test]
    fn test_parallel_ray_misses() {
        let tri = unit_triangle();
        let ray = Ray::new(Point3::new(-1.0, 0.25, 0.0), Vec3::new(1.0, 0.0, 0.0));
        let mut hit = Intersection::default();
        assert!(!tri.intersect(&ray, &mut hit));
    }

    #[test]
    fn test_outside_barycentric_range() {
        let tri = unit_triangle();
        let ray = Ray::new(Point3::new(0.8, 0.8, 1.0), Vec3::new(0.0, 0.0, -1.0));
        let mut hit = Intersection::default();
        assert!(!tri.intersect(&ray, &mut hit));
    }

    #[test]
    fn test_respects_ray_range() {
        let tri = unit_triangle();
        let ray = Ray::with_range(
            Point3::new(0.25, 0.25, 10.0),
            Vec3::new(0.0, 0.0, -1.0),
            0.0,
            5.0,
        );
        let mut hit = Intersection::default();
        assert!(!tri.intersect(&ray, &mut hit));
    }

    #[test]
    fn test_only_closer_hits_update() {
        let tri = unit_triangle();
        let ray = Ray::new(Point3::new(0.25, 0.25, 10.0), Vec3::new(0.0, 0.0, -1.0));
        let mut hit = Intersection {
            t: 3.0,
            prim_id: 1,
            ..Default::default()
        };
        assert!(!tri.intersect(&ray, &mut hit));
        assert_eq!(hit.prim_id, 1);
    }

    #[test]
    fn test_collinear_triangle_has_zero_normal() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            0,
        );
        assert_eq!(tri.normal(), Vec3::zeros());
        let ray = Ray::new(Point3::new(0.5, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0));
        let mut hit = Intersection::default();
        assert!(!tri.intersect(&ray, &mut hit));
    }

    #[test]
    #[should_panic(expected = "degenerate triangle")]
    fn test_point_triangle_panics() {
        let p = Point3::new(1.0, 1.0, 1.0);
        let _ = Triangle::new(p, p, p, 0);
    }

    #[test]
    fn test_bounds_and_centroid() {
        let tri = unit_triangle();
        let b = tri.bounds();
        assert_eq!(b.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.max, Point3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(tri.centroid(), Point3::new(1.0 / 3.0, 1.0 / 3.0, 0.0));
    }

    #[test]
    fn test_transformed_keeps_id_and_layers() {
        let tri = Triangle::with_layers(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            5,
            0b10,
        );
        let moved = tri.transformed(&Transform::translation(0.0, 0.0, 2.0));
        assert_eq!(moved.id, 5);
        assert_eq!(moved.layers, 0b10);
        assert_relative_eq!(moved.vertices()[0], Point3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(moved.normal(), tri.normal());
    }
}
