//! Placement of a BLAS in the world.

use rtcore_math::{Aabb, Transform};

use crate::intersection::Intersection;
use crate::ray::Ray;
use crate::triangle::ALL_LAYERS;

/// One placed copy of a mesh.
///
/// Holds the object-to-world transform, its cached inverse and the
/// world-space bounds. Many instances may share one BLAS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlasInstance {
    /// Mesh this instance places.
    pub blas_id: u32,
    /// Stable instance id, reported in [`Intersection::instance_id`].
    pub instance_id: u32,
    /// Visibility layer bits of the whole instance.
    pub layers: u32,
    transform: Transform,
    inv_transform: Transform,
    world_bounds: Aabb,
}

impl BlasInstance {
    /// Place mesh `blas_id` (with object bounds `object_bounds`) in the world.
    ///
    /// # Panics
    ///
    /// Panics if `transform` is not finite or not invertible.
    pub fn new(instance_id: u32, blas_id: u32, transform: Transform, object_bounds: &Aabb) -> Self {
        let mut inst = Self {
            blas_id,
            instance_id,
            layers: ALL_LAYERS,
            transform: Transform::identity(),
            inv_transform: Transform::identity(),
            world_bounds: Aabb::empty(),
        };
        inst.set_transform(transform, object_bounds);
        inst
    }

    /// Replace the transform, refreshing the cached inverse and world bounds.
    pub fn set_transform(&mut self, transform: Transform, object_bounds: &Aabb) {
        assert!(transform.is_finite(), "instance transform must be finite");
        let Some(inv) = transform.inverse() else {
            panic!("instance {} transform is not invertible", self.instance_id);
        };
        self.transform = transform;
        self.inv_transform = inv;
        self.world_bounds = self.compute_world_bounds(object_bounds);
    }

    /// Recompute world bounds after the mesh itself changed.
    pub fn update_world_bounds(&mut self, object_bounds: &Aabb) {
        self.world_bounds = self.compute_world_bounds(object_bounds);
    }

    /// Object-to-world transform.
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// World-to-object transform.
    pub fn inv_transform(&self) -> &Transform {
        &self.inv_transform
    }

    /// World-space bounds.
    pub fn world_bounds(&self) -> &Aabb {
        &self.world_bounds
    }

    /// World-space box around `object_bounds` under this instance's
    /// transform, from all eight corners.
    pub fn compute_world_bounds(&self, object_bounds: &Aabb) -> Aabb {
        if !object_bounds.is_valid() {
            return Aabb::empty();
        }
        object_bounds.transformed(&self.transform)
    }

    /// Map a world ray into object space.
    ///
    /// The direction is not renormalized, so `t` along the object ray equals
    /// `t` along the world ray.
    pub fn transform_ray_to_object(&self, world_ray: &Ray) -> Ray {
        Ray::with_range(
            self.inv_transform.apply_point(&world_ray.origin),
            self.inv_transform.apply_vec(&world_ray.direction),
            world_ray.t_min,
            world_ray.t_max,
        )
    }

    /// Map an object-space hit back to world space and tag it with this
    /// instance. Misses are left alone.
    pub fn transform_hit_to_world(&self, hit: &mut Intersection) {
        if !hit.hit() {
            return;
        }
        hit.position = self.transform.apply_point(&hit.position);
        hit.normal = self.transform.apply_normal(&hit.normal);
        hit.instance_id = self.instance_id;
    }
}
