//! Two-level scene: a table of meshes, their instances and a top-level BVH
//! over the instances' world bounds.
//!
//! Lifecycle: add meshes and fill them, build them, add instances, then
//! [`SceneTlas::build_tlas`]. When only transforms change, update them with
//! [`SceneTlas::set_instance_transform`] and call [`SceneTlas::refit_tlas`].
//! Adding a mesh or an instance, or touching a mesh through
//! [`SceneTlas::mesh_mut`], drops the built state until the next
//! `build_tlas`; in between, queries scan every instance. Deformation that
//! keeps the triangle count goes through [`SceneTlas::mesh_triangles_mut`]
//! and [`SceneTlas::refit_mesh`] instead.

use std::time::Instant;

use log::{debug, warn};
use rtcore_math::{Aabb, Point3, Transform};

use crate::blas::MeshBlas;
use crate::bvh::{Bvh, BvhNode, Primitive};
use crate::instance::BlasInstance;
use crate::intersection::Intersection;
use crate::ray::Ray;
use crate::stats::{NoStats, StatsSink};
use crate::triangle::{Triangle, ALL_LAYERS};

/// Top-level BVH leaf entry standing in for one instance.
#[derive(Debug, Clone, Copy)]
struct InstanceProxy {
    instance: u32,
    bounds: Aabb,
    layers: u32,
}

impl InstanceProxy {
    fn of(inst: &BlasInstance) -> Self {
        Self {
            instance: inst.instance_id,
            bounds: *inst.world_bounds(),
            layers: inst.layers,
        }
    }
}

impl Primitive for InstanceProxy {
    fn bounds(&self) -> Aabb {
        self.bounds
    }

    fn centroid(&self) -> Point3 {
        self.bounds.center()
    }

    fn layers(&self) -> u32 {
        self.layers
    }
}

/// Scene of instanced meshes.
#[derive(Debug, Clone, Default)]
pub struct SceneTlas {
    meshes: Vec<MeshBlas>,
    instances: Vec<BlasInstance>,
    proxies: Vec<InstanceProxy>,
    bvh: Bvh,
    built: bool,
}

impl SceneTlas {
    /// Empty scene.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- Meshes ----

    /// Add an empty mesh and return its id.
    pub fn add_mesh(&mut self) -> u32 {
        let id = self.meshes.len() as u32;
        self.meshes.push(MeshBlas::new(id));
        self.built = false;
        id
    }

    /// Mesh by id.
    ///
    /// # Panics
    ///
    /// Panics if `blas_id` is out of range.
    pub fn mesh(&self, blas_id: u32) -> &MeshBlas {
        self.check_mesh(blas_id);
        &self.meshes[blas_id as usize]
    }

    /// Mutable mesh by id. The caller may change its triangle set, so the
    /// top level is dropped until the next [`SceneTlas::build_tlas`].
    pub fn mesh_mut(&mut self, blas_id: u32) -> &mut MeshBlas {
        self.check_mesh(blas_id);
        self.built = false;
        &mut self.meshes[blas_id as usize]
    }

    /// Vertices of one mesh for in-place deformation. Keeps the built state;
    /// follow with [`SceneTlas::refit_mesh`] and [`SceneTlas::refit_tlas`].
    pub fn mesh_triangles_mut(&mut self, blas_id: u32) -> &mut [Triangle] {
        self.check_mesh(blas_id);
        self.meshes[blas_id as usize].triangles_mut()
    }

    /// All meshes, indexed by id.
    pub fn meshes(&self) -> &[MeshBlas] {
        &self.meshes
    }

    /// Build one mesh's BVH.
    pub fn build_blas(&mut self, blas_id: u32) {
        self.check_mesh(blas_id);
        self.meshes[blas_id as usize].build();
    }

    /// Build every unbuilt, non-empty mesh.
    pub fn build_all_blas(&mut self) {
        for mesh in &mut self.meshes {
            if !mesh.is_built() && mesh.triangle_count() > 0 {
                mesh.build();
            }
        }
    }

    /// Refit a deformed mesh and refresh the world bounds of every instance
    /// placing it. The top level still needs [`SceneTlas::refit_tlas`].
    pub fn refit_mesh(&mut self, blas_id: u32) {
        self.check_mesh(blas_id);
        self.meshes[blas_id as usize].refit();
        let bounds = self.meshes[blas_id as usize].object_bounds();
        for inst in self.instances.iter_mut().filter(|i| i.blas_id == blas_id) {
            inst.update_world_bounds(&bounds);
        }
    }

    // ---- Instances ----

    /// Place mesh `blas_id` with `transform` and return the instance id.
    ///
    /// # Panics
    ///
    /// Panics if the mesh does not exist or has no triangles, or if the
    /// transform is not invertible.
    pub fn add_instance(&mut self, blas_id: u32, transform: Transform) -> u32 {
        let mesh = self.mesh(blas_id);
        assert!(
            mesh.triangle_count() > 0,
            "add_instance: mesh {blas_id} has no triangles"
        );
        let bounds = mesh.object_bounds();
        let id = self.instances.len() as u32;
        self.instances
            .push(BlasInstance::new(id, blas_id, transform, &bounds));
        self.built = false;
        id
    }

    /// Move an instance. The top-level tree is not updated; call
    /// [`SceneTlas::refit_tlas`] or [`SceneTlas::build_tlas`] afterwards.
    pub fn set_instance_transform(&mut self, instance_id: u32, transform: Transform) {
        self.check_instance(instance_id);
        let inst = &mut self.instances[instance_id as usize];
        let bounds = self.meshes[inst.blas_id as usize].object_bounds();
        inst.set_transform(transform, &bounds);
    }

    /// Change an instance's layer bits. Subtree masks in the top-level tree
    /// catch up on the next refit or build.
    pub fn set_instance_layers(&mut self, instance_id: u32, layers: u32) {
        self.check_instance(instance_id);
        self.instances[instance_id as usize].layers = layers;
    }

    /// Instance by id.
    pub fn instance(&self, instance_id: u32) -> &BlasInstance {
        self.check_instance(instance_id);
        &self.instances[instance_id as usize]
    }

    /// All instances, indexed by id.
    pub fn instances(&self) -> &[BlasInstance] {
        &self.instances
    }

    // ---- Top level ----

    /// Build the top-level tree. Instance world bounds are recomputed from
    /// the current mesh bounds first.
    ///
    /// # Panics
    ///
    /// Panics if an instance references a mesh that is not built.
    pub fn build_tlas(&mut self) {
        for inst in &self.instances {
            assert!(
                self.meshes[inst.blas_id as usize].is_built(),
                "build_tlas: instance {} references unbuilt mesh {}",
                inst.instance_id,
                inst.blas_id
            );
        }
        if self.instances.is_empty() {
            warn!("building a TLAS over zero instances; every query will miss");
        }

        let start = Instant::now();
        self.refresh_world_bounds();
        self.proxies = self.instances.iter().map(InstanceProxy::of).collect();
        self.bvh.build(&mut self.proxies);
        self.built = true;
        debug!(
            "built TLAS: {} instances over {} meshes, {} nodes in {:?}",
            self.instances.len(),
            self.meshes.len(),
            self.bvh.node_count(),
            start.elapsed()
        );
    }

    /// Refit the top-level tree to moved instances. O(instances).
    ///
    /// Only valid while instance membership is unchanged since the last
    /// [`SceneTlas::build_tlas`]; does nothing when the scene is not built.
    pub fn refit_tlas(&mut self) {
        if !self.built {
            warn!("refit_tlas called before build_tlas; ignoring");
            return;
        }
        self.refresh_world_bounds();
        for proxy in &mut self.proxies {
            let inst = &self.instances[proxy.instance as usize];
            proxy.bounds = *inst.world_bounds();
            proxy.layers = inst.layers;
        }
        self.bvh.refit(&self.proxies);
        debug!("refit TLAS over {} instances", self.proxies.len());
    }

    /// True after `build_tlas` until a mesh or instance is added or a mesh
    /// is handed out through [`SceneTlas::mesh_mut`].
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Top-level node array (leaf ranges index the internal instance order).
    pub fn tlas_nodes(&self) -> &[BvhNode] {
        self.bvh.nodes()
    }

    /// Instance ids in top-level leaf order.
    pub fn tlas_instance_order(&self) -> Vec<u32> {
        self.proxies.iter().map(|p| p.instance).collect()
    }

    /// Number of meshes.
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Number of instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Triangles across all meshes (each mesh counted once).
    pub fn total_triangle_count(&self) -> usize {
        self.meshes.iter().map(MeshBlas::triangle_count).sum()
    }

    /// Remove every mesh and instance.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    // ---- Queries ----

    /// Closest world-space hit on any layer.
    pub fn cast_ray(&self, ray: &Ray) -> Intersection {
        self.cast_ray_with(ray, ALL_LAYERS, &mut NoStats)
    }

    /// Closest world-space hit among instances and triangles matching
    /// `query_mask`.
    pub fn cast_ray_masked(&self, ray: &Ray, query_mask: u32) -> Intersection {
        self.cast_ray_with(ray, query_mask, &mut NoStats)
    }

    /// Closest world-space hit with stats. Falls back to scanning every
    /// instance when the top level is not built.
    pub fn cast_ray_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        if !self.built {
            return self.cast_ray_brute_with(ray, query_mask, stats);
        }
        debug_assert!(ray.is_valid(), "invalid ray: {ray:?}");
        stats.ray_cast(1);

        let mut closest = Intersection::default();
        self.bvh
            .walk_nearest(ray, query_mask, &mut closest, stats, |range, closest, stats| {
                for proxy in &self.proxies[range] {
                    let inst = &self.instances[proxy.instance as usize];
                    match ray.intersect_aabb(inst.world_bounds()) {
                        Some((t_entry, _)) if t_entry <= closest.t => {}
                        _ => continue,
                    }
                    self.intersect_instance(inst, ray, query_mask, closest, stats);
                }
            });

        if closest.hit() {
            stats.hit();
        }
        closest
    }

    /// Closest hit by testing every instance in id order. Gives the same
    /// answer as [`SceneTlas::cast_ray_with`] on a built scene.
    pub fn cast_ray_brute_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        stats.ray_cast(1);
        let mut closest = Intersection::default();
        for inst in &self.instances {
            self.intersect_instance(inst, ray, query_mask, &mut closest, stats);
        }
        if closest.hit() {
            stats.hit();
        }
        closest
    }

    /// True if anything on any layer is hit.
    pub fn any_hit(&self, ray: &Ray) -> bool {
        self.any_hit_with(ray, ALL_LAYERS, &mut NoStats)
    }

    /// True if anything matching `query_mask` is hit.
    pub fn any_hit_masked(&self, ray: &Ray, query_mask: u32) -> bool {
        self.any_hit_with(ray, query_mask, &mut NoStats)
    }

    /// Any-hit query with stats.
    pub fn any_hit_with<S: StatsSink>(&self, ray: &Ray, query_mask: u32, stats: &mut S) -> bool {
        if !self.built {
            return self.any_hit_brute_with(ray, query_mask, stats);
        }
        debug_assert!(ray.is_valid(), "invalid ray: {ray:?}");
        stats.ray_cast(1);

        let occluded = self.bvh.walk_any(ray, query_mask, stats, |range, stats| {
            self.proxies[range].iter().any(|proxy| {
                let inst = &self.instances[proxy.instance as usize];
                self.occludes(inst, ray, query_mask, stats)
            })
        });
        if occluded {
            stats.hit();
        }
        occluded
    }

    /// Any-hit by testing every instance in id order.
    pub fn any_hit_brute_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> bool {
        stats.ray_cast(1);
        let occluded = self
            .instances
            .iter()
            .any(|inst| self.occludes(inst, ray, query_mask, stats));
        if occluded {
            stats.hit();
        }
        occluded
    }

    /// Query one instance's mesh and keep the hit if it beats `closest`.
    fn intersect_instance<S: StatsSink>(
        &self,
        inst: &BlasInstance,
        ray: &Ray,
        query_mask: u32,
        closest: &mut Intersection,
        stats: &mut S,
    ) {
        if inst.layers & query_mask == 0 {
            return;
        }
        let mut obj_ray = inst.transform_ray_to_object(ray);
        obj_ray.t_max = ray.t_max.min(closest.t);

        let mesh = &self.meshes[inst.blas_id as usize];
        let mut hit = mesh.cast_ray_with(&obj_ray, query_mask, stats);
        if hit.hit() && hit.t < closest.t {
            inst.transform_hit_to_world(&mut hit);
            *closest = hit;
        }
    }

    fn occludes<S: StatsSink>(
        &self,
        inst: &BlasInstance,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> bool {
        if inst.layers & query_mask == 0 {
            return false;
        }
        let obj_ray = inst.transform_ray_to_object(ray);
        self.meshes[inst.blas_id as usize].any_hit_with(&obj_ray, query_mask, stats)
    }

    fn refresh_world_bounds(&mut self) {
        for inst in &mut self.instances {
            let bounds = self.meshes[inst.blas_id as usize].object_bounds();
            inst.update_world_bounds(&bounds);
        }
    }

    fn check_mesh(&self, blas_id: u32) {
        assert!(
            (blas_id as usize) < self.meshes.len(),
            "mesh id {blas_id} out of range ({} meshes)",
            self.meshes.len()
        );
    }

    fn check_instance(&self, instance_id: u32) {
        assert!(
            (instance_id as usize) < self.instances.len(),
            "instance id {instance_id} out of range ({} instances)",
            self.instances.len()
        );
    }
}
