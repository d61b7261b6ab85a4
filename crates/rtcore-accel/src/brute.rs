//! Linear-scan ray queries over a triangle slice.
//!
//! O(N) per ray. Serves unbuilt meshes and acts as the reference the BVH
//! is checked against.

use crate::intersection::Intersection;
use crate::ray::Ray;
use crate::stats::{NoStats, StatsSink};
use crate::triangle::{Triangle, ALL_LAYERS};

/// Closest hit among all triangles.
pub fn cast_ray(ray: &Ray, tris: &[Triangle]) -> Intersection {
    cast_ray_with(ray, tris, ALL_LAYERS, &mut NoStats)
}

/// Closest hit among triangles whose layers intersect `query_mask`.
pub fn cast_ray_with<S: StatsSink>(
    ray: &Ray,
    tris: &[Triangle],
    query_mask: u32,
    stats: &mut S,
) -> Intersection {
    let mut closest = Intersection::default();
    stats.ray_cast(1);
    for tri in tris {
        if tri.layers & query_mask == 0 {
            continue;
        }
        stats.tri_test();
        tri.intersect(ray, &mut closest);
    }
    if closest.hit() {
        stats.hit();
    }
    closest
}

/// True if any triangle is hit.
pub fn any_hit(ray: &Ray, tris: &[Triangle]) -> bool {
    any_hit_with(ray, tris, ALL_LAYERS, &mut NoStats)
}

/// True if any triangle whose layers intersect `query_mask` is hit.
pub fn any_hit_with<S: StatsSink>(
    ray: &Ray,
    tris: &[Triangle],
    query_mask: u32,
    stats: &mut S,
) -> bool {
    stats.ray_cast(1);
    let mut scratch = Intersection::default();
    for tri in tris {
        if tri.layers & query_mask == 0 {
            continue;
        }
        stats.tri_test();
        if tri.intersect(ray, &mut scratch) {
            stats.hit();
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::RayStats;
    use rtcore_math::{Point3, Vec3};

    fn stacked() -> Vec<Triangle> {
        // Three parallel triangles at z = 0, 1, 2.
        (0..3)
            .map(|i| {
                let z = i as f32;
                Triangle::with_layers(
                    Point3::new(-1.0, -1.0, z),
                    Point3::new(1.0, -1.0, z),
                    Point3::new(0.0, 1.0, z),
                    i,
                    1 << i,
                )
            })
            .collect()
    }

    #[test]
    fn test_nearest_of_many() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let mut stats = RayStats::default();
        let hit = cast_ray_with(&ray, &stacked(), ALL_LAYERS, &mut stats);
        assert_eq!(hit.prim_id, 2);
        assert!((hit.t - 3.0).abs() < 1e-6);
        assert_eq!(stats.tri_tests, 3);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_mask_skips_layers() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let hit = cast_ray_with(&ray, &stacked(), 0b001, &mut NoStats);
        assert_eq!(hit.prim_id, 0);
        assert_eq!(hit.hit_layers, 0b001);
        assert!(!any_hit_with(&ray, &stacked(), 0b1000, &mut NoStats));
    }

    #[test]
    fn test_any_hit_stops_early() {
        let ray = Ray::new(Point3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, -1.0));
        let mut stats = RayStats::default();
        assert!(any_hit_with(&ray, &stacked(), ALL_LAYERS, &mut stats));
        assert_eq!(stats.tri_tests, 1);
        assert!(!any_hit(
            &Ray::new(Point3::new(5.0, 5.0, 5.0), Vec3::new(0.0, 0.0, -1.0)),
            &stacked()
        ));
    }

    #[test]
    fn test_empty_slice_misses() {
        let ray = Ray::new(Point3::origin(), Vec3::x());
        assert!(!cast_ray(&ray, &[]).hit());
    }
}
