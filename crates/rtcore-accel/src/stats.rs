//! Performance counters for ray queries.
//!
//! Every query is generic over a [`StatsSink`]. Passing [`NoStats`] compiles
//! the counting away entirely; passing a [`RayStats`] records how the query
//! spent its time.
//!
//! Rough reading of the numbers: brute force tests about `triangle_count`
//! triangles per ray, a healthy BVH tests 5 to 20.

use std::ops::AddAssign;

/// Receiver for traversal events.
pub trait StatsSink {
    /// `n` rays entered a traversal.
    fn ray_cast(&mut self, n: u64);
    /// One ray-triangle test was performed.
    fn tri_test(&mut self);
    /// One BVH node was popped and processed.
    fn node_visited(&mut self);
    /// One ray reported a hit.
    fn hit(&mut self);
}

/// Sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStats;

impl StatsSink for NoStats {
    #[inline(always)]
    fn ray_cast(&mut self, _n: u64) {}
    #[inline(always)]
    fn tri_test(&mut self) {}
    #[inline(always)]
    fn node_visited(&mut self) {}
    #[inline(always)]
    fn hit(&mut self) {}
}

/// Accumulated traversal counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayStats {
    /// Rays traced (a two-level query counts the world ray and each BLAS sub-ray).
    pub rays_cast: u64,
    /// Ray-triangle intersection tests.
    pub tri_tests: u64,
    /// BVH nodes popped from the traversal stack.
    pub bvh_nodes_visited: u64,
    /// Rays that found at least one intersection.
    pub hits: u64,
}

impl RayStats {
    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Average triangle tests per ray.
    pub fn avg_tri_tests_per_ray(&self) -> f32 {
        if self.rays_cast == 0 {
            return 0.0;
        }
        self.tri_tests as f32 / self.rays_cast as f32
    }

    /// Average BVH nodes visited per ray.
    pub fn avg_nodes_per_ray(&self) -> f32 {
        if self.rays_cast == 0 {
            return 0.0;
        }
        self.bvh_nodes_visited as f32 / self.rays_cast as f32
    }

    /// Hit rate as a percentage (0 to 100).
    pub fn hit_rate_percent(&self) -> f32 {
        if self.rays_cast == 0 {
            return 0.0;
        }
        100.0 * self.hits as f32 / self.rays_cast as f32
    }
}

impl StatsSink for RayStats {
    #[inline]
    fn ray_cast(&mut self, n: u64) {
        self.rays_cast += n;
    }
    #[inline]
    fn tri_test(&mut self) {
        self.tri_tests += 1;
    }
    #[inline]
    fn node_visited(&mut self) {
        self.bvh_nodes_visited += 1;
    }
    #[inline]
    fn hit(&mut self) {
        self.hits += 1;
    }
}

impl AddAssign for RayStats {
    fn add_assign(&mut self, other: Self) {
        self.rays_cast += other.rays_cast;
        self.tri_tests += other.tri_tests;
        self.bvh_nodes_visited += other.bvh_nodes_visited;
        self.hits += other.hits;
    }
}
