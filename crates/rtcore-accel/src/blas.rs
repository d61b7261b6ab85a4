//! Bottom-level acceleration structure: one mesh and its BVH.

use log::warn;
use rtcore_math::Aabb;

use crate::brute;
use crate::bvh::{Bvh, Primitive};
use crate::config::BvhConfig;
use crate::intersection::Intersection;
use crate::ray::Ray;
use crate::stats::{NoStats, StatsSink};
use crate::triangle::{Triangle, ALL_LAYERS};

/// A mesh in object space together with its BVH.
///
/// Triangles are added first, then [`MeshBlas::build`] is called. Queries on
/// an unbuilt mesh fall back to a linear scan.
#[derive(Debug, Clone, Default)]
pub struct MeshBlas {
    id: u32,
    triangles: Vec<Triangle>,
    bvh: Bvh,
}

impl MeshBlas {
    /// Empty mesh with the given id.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Unbuilt mesh over `triangles`.
    pub fn from_triangles(id: u32, triangles: Vec<Triangle>) -> Self {
        Self {
            id,
            triangles,
            bvh: Bvh::new(),
        }
    }

    /// Stable mesh id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Append a triangle. Drops the BVH; call [`MeshBlas::build`] again.
    pub fn push_triangle(&mut self, tri: Triangle) {
        self.triangles.push(tri);
        self.bvh.clear();
    }

    /// Triangles in BVH order (reordered by the last build).
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Mutable triangles for deformation. The count cannot change; reordering
    /// them breaks the BVH. Call [`MeshBlas::refit`] after moving vertices.
    pub fn triangles_mut(&mut self) -> &mut [Triangle] {
        &mut self.triangles
    }

    /// Build the BVH with default settings. Reorders the triangles.
    ///
    /// An empty mesh stays unbuilt.
    pub fn build(&mut self) {
        self.build_with_config(BvhConfig::default());
    }

    /// Build the BVH with explicit settings. Reorders the triangles.
    pub fn build_with_config(&mut self, config: BvhConfig) {
        if self.triangles.is_empty() {
            warn!("mesh {} has no triangles; leaving it unbuilt", self.id);
            self.bvh.clear();
            return;
        }
        self.bvh.build_with_config(&mut self.triangles, config);
    }

    /// Refit the BVH to the current vertex positions.
    pub fn refit(&mut self) {
        self.bvh.refit(&self.triangles);
    }

    /// Drop every triangle and the BVH.
    pub fn clear(&mut self) {
        self.triangles.clear();
        self.bvh.clear();
    }

    /// True once the BVH is built.
    pub fn is_built(&self) -> bool {
        self.bvh.is_built()
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// The mesh BVH.
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Object-space bounds: the BVH root when built, otherwise the union of
    /// the triangle bounds (empty for an empty mesh).
    pub fn object_bounds(&self) -> Aabb {
        if let Some(bounds) = self.bvh.root_bounds() {
            return bounds;
        }
        self.triangles
            .iter()
            .fold(Aabb::empty(), |acc, tri| acc.union(&tri.bounds()))
    }

    /// Closest hit on any layer.
    pub fn cast_ray(&self, ray: &Ray) -> Intersection {
        self.cast_ray_with(ray, ALL_LAYERS, &mut NoStats)
    }

    /// Closest hit among triangles matching `query_mask`.
    pub fn cast_ray_masked(&self, ray: &Ray, query_mask: u32) -> Intersection {
        self.cast_ray_with(ray, query_mask, &mut NoStats)
    }

    /// Closest hit with stats.
    pub fn cast_ray_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        if self.bvh.is_built() {
            self.bvh.cast_ray_with(ray, &self.triangles, query_mask, stats)
        } else {
            brute::cast_ray_with(ray, &self.triangles, query_mask, stats)
        }
    }

    /// True if anything on any layer is hit.
    pub fn any_hit(&self, ray: &Ray) -> bool {
        self.any_hit_with(ray, ALL_LAYERS, &mut NoStats)
    }

    /// True if any triangle matching `query_mask` is hit.
    pub fn any_hit_masked(&self, ray: &Ray, query_mask: u32) -> bool {
        self.any_hit_with(ray, query_mask, &mut NoStats)
    }

    /// Any-hit query with stats.
    pub fn any_hit_with<S: StatsSink>(&self, ray: &Ray, query_mask: u32, stats: &mut S) -> bool {
        if self.bvh.is_built() {
            self.bvh.any_hit_with(ray, &self.triangles, query_mask, stats)
        } else {
            brute::any_hit_with(ray, &self.triangles, query_mask, stats)
        }
    }

    /// Trace one to four rays on any layer as a packet.
    pub fn cast_ray_packet4(&self, rays: &[Ray], results: &mut [Intersection]) {
        self.cast_ray_packet4_with(rays, ALL_LAYERS, results, &mut NoStats);
    }

    /// Trace one to four rays as a packet into `results[..rays.len()]`.
    ///
    /// Unbuilt meshes trace each ray on its own.
    pub fn cast_ray_packet4_with<S: StatsSink>(
        &self,
        rays: &[Ray],
        query_mask: u32,
        results: &mut [Intersection],
        stats: &mut S,
    ) {
        if self.bvh.is_built() {
            self.bvh
                .cast_ray_packet4_with(rays, &self.triangles, query_mask, results, stats);
        } else {
            assert!(results.len() >= rays.len(), "not enough result slots");
            for (ray, result) in rays.iter().zip(results.iter_mut()) {
                *result = brute::cast_ray_with(ray, &self.triangles, query_mask, stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rtcore_math::{Point3, Vec3};

    fn quad(z: f32, first_id: u32) -> [Triangle; 2] {
        [
            Triangle::new(
                Point3::new(0.0, 0.0, z),
                Point3::new(1.0, 0.0, z),
                Point3::new(0.0, 1.0, z),
                first_id,
            ),
            Triangle::new(
                Point3::new(1.0, 0.0, z),
                Point3::new(1.0, 1.0, z),
                Point3::new(0.0, 1.0, z),
                first_id + 1,
            ),
        ]
    }

    fn layered_mesh() -> MeshBlas {
        let mut mesh = MeshBlas::new(3);
        for i in 0..8 {
            for tri in quad(i as f32, 2 * i) {
                mesh.push_triangle(tri);
            }
        }
        mesh
    }

    #[test]
    fn test_unbuilt_and_built_agree() {
        let mut mesh = layered_mesh();
        let ray = Ray::new(Point3::new(0.2, 0.3, 20.0), Vec3::new(0.0, 0.0, -1.0));
        let slow = mesh.cast_ray(&ray);
        assert!(!mesh.is_built());
        mesh.build();
        assert!(mesh.is_built());
        let fast = mesh.cast_ray(&ray);
        assert_eq!(slow.prim_id, fast.prim_id);
        assert_eq!(fast.prim_id, 14);
        assert_relative_eq!(fast.t, 13.0);
        assert!(mesh.any_hit(&ray));
    }

    #[test]
    fn test_push_invalidates_build() {
        let mut mesh = layered_mesh();
        mesh.build();
        mesh.push_triangle(quad(50.0, 100)[0]);
        assert!(!mesh.is_built());
        let ray = Ray::new(Point3::new(0.2, 0.3, 60.0), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(mesh.cast_ray(&ray).prim_id, 100);
    }

    #[test]
    fn test_empty_mesh_stays_unbuilt() {
        let mut mesh = MeshBlas::new(0);
        mesh.build();
        assert!(!mesh.is_built());
        assert!(!mesh.object_bounds().is_valid());
        let ray = Ray::new(Point3::origin(), Vec3::z());
        assert!(!mesh.cast_ray(&ray).hit());
    }

    #[test]
    fn test_refit_after_deform() {
        let mut mesh = layered_mesh();
        mesh.build();
        for tri in mesh.triangles_mut() {
            let [a, b, c] = tri.vertices();
            let up = Vec3::new(0.0, 0.0, 100.0);
            tri.set_vertices(a + up, b + up, c + up);
        }
        mesh.refit();
        mesh.bvh().validate(mesh.triangles()).unwrap();
        let bounds = mesh.object_bounds();
        assert!(bounds.min.z > 99.0);
        let ray = Ray::new(Point3::new(0.2, 0.3, 200.0), Vec3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(mesh.cast_ray(&ray).t, 93.0, epsilon = 1e-4);
    }

    #[test]
    fn test_packet_on_unbuilt_mesh() {
        let mesh = layered_mesh();
        let rays = [
            Ray::new(Point3::new(0.2, 0.3, 20.0), Vec3::new(0.0, 0.0, -1.0)),
            Ray::new(Point3::new(5.0, 5.0, 20.0), Vec3::new(0.0, 0.0, -1.0)),
        ];
        let mut results = [Intersection::default(); 2];
        mesh.cast_ray_packet4(&rays, &mut results);
        assert!(results[0].hit());
        assert!(!results[1].hit());
    }

    #[test]
    fn test_clear() {
        let mut mesh = layered_mesh();
        mesh.build();
        mesh.clear();
        assert_eq!(mesh.triangle_count(), 0);
        assert!(!mesh.is_built());
    }
}
