//! Flat, `Pod` buffers for uploading acceleration structures to a GPU.
//!
//! Layouts follow std430 so the structs can be copied straight into storage
//! buffers with [`bytemuck::cast_slice`].
//!
//! Node encoding matches [`BvhNode`] after the depth-first relayout:
//! `count == 0` marks an internal node whose left child is the next node and
//! whose right child is `left_first`; otherwise `left_first` is the first
//! triangle of the leaf. Indices are local to their mesh. A shader adds the
//! owning instance's `node_offset` / `triangle_offset`.

use bytemuck::{Pod, Zeroable};
use rtcore_math::Transform;

use crate::blas::MeshBlas;
use crate::bvh::BvhNode;
use crate::error::{AccelError, Result};
use crate::ray::Ray;
use crate::tlas::SceneTlas;
use crate::triangle::Triangle;

/// Maximum BVH nodes across all meshes (128 MiB of 32-byte nodes).
pub const MAX_GPU_NODES: usize = 1 << 22;

/// Maximum triangles across all meshes (128 MiB of 64-byte triangles).
pub const MAX_GPU_TRIANGLES: usize = 1 << 21;

/// Maximum instances in one scene.
pub const MAX_GPU_INSTANCES: usize = 1 << 16;

/// GPU BVH node, 32 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuBvhNode {
    /// AABB min.
    pub bounds_min: [f32; 3],
    /// Right child (internal) or first triangle (leaf).
    pub left_first: u32,
    /// AABB max.
    pub bounds_max: [f32; 3],
    /// Triangle count; zero for internal nodes.
    pub count: u32,
}

impl From<&BvhNode> for GpuBvhNode {
    fn from(node: &BvhNode) -> Self {
        Self {
            bounds_min: node.bounds.min.coords.into(),
            left_first: node.left_first,
            bounds_max: node.bounds.max.coords.into(),
            count: node.count,
        }
    }
}

/// GPU triangle, 64 bytes. `id` and `layers` fill what would otherwise be
/// padding after `v0` and `edge1`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuTriangle {
    /// First vertex.
    pub v0: [f32; 3],
    /// Stable triangle id.
    pub id: u32,
    /// `v1 - v0`.
    pub edge1: [f32; 3],
    /// Visibility layer bits.
    pub layers: u32,
    /// `v2 - v0`.
    pub edge2: [f32; 3],
    /// Padding.
    pub _pad0: f32,
    /// Unit geometric normal.
    pub normal: [f32; 3],
    /// Padding.
    pub _pad1: f32,
}

impl From<&Triangle> for GpuTriangle {
    fn from(tri: &Triangle) -> Self {
        Self {
            v0: tri.vertices()[0].coords.into(),
            id: tri.id,
            edge1: tri.edge1().into(),
            layers: tri.layers,
            edge2: tri.edge2().into(),
            _pad0: 0.0,
            normal: tri.normal().into(),
            _pad1: 0.0,
        }
    }
}

/// GPU ray, 32 bytes. The shader derives the reciprocal direction itself.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuRay {
    /// Origin.
    pub origin: [f32; 3],
    /// Far clip.
    pub t_max: f32,
    /// Direction.
    pub direction: [f32; 3],
    /// Near clip.
    pub t_min: f32,
}

impl From<&Ray> for GpuRay {
    fn from(ray: &Ray) -> Self {
        Self {
            origin: ray.origin.coords.into(),
            t_max: ray.t_max,
            direction: ray.direction.into(),
            t_min: ray.t_min,
        }
    }
}

/// GPU instance record, 112 bytes.
///
/// Transforms are stored as three row vectors `[m0, m1, m2, t]`, so a point
/// maps as `dot(row.xyz, p) + row.w`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    /// World-to-object rows.
    pub world_to_object: [[f32; 4]; 3],
    /// Object-to-world rows.
    pub object_to_world: [[f32; 4]; 3],
    /// First node of this instance's mesh in the scene node buffer.
    pub node_offset: u32,
    /// First triangle of this instance's mesh in the scene triangle buffer.
    pub triangle_offset: u32,
    /// Visibility layer bits.
    pub layers: u32,
    /// Instance id reported on hits.
    pub instance_id: u32,
}

fn affine_rows(t: &Transform) -> [[f32; 4]; 3] {
    let mut rows = [[0.0; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        *row = [t.basis[(r, 0)], t.basis[(r, 1)], t.basis[(r, 2)], t.origin[r]];
    }
    rows
}

fn check_capacity(what: &'static str, count: usize, max: usize) -> Result<()> {
    if count > max {
        return Err(AccelError::CapacityExceeded { what, count, max });
    }
    Ok(())
}

/// One mesh prepared for upload.
#[derive(Debug, Clone, Default)]
pub struct GpuMeshBuffers {
    /// Nodes in depth-first order. Empty for an unbuilt mesh.
    pub nodes: Vec<GpuBvhNode>,
    /// Subtree layer mask of each node, parallel to `nodes`.
    pub node_masks: Vec<u32>,
    /// Triangles in BVH leaf order.
    pub triangles: Vec<GpuTriangle>,
}

impl GpuMeshBuffers {
    /// Pack a mesh and its BVH.
    pub fn from_blas(mesh: &MeshBlas) -> Result<Self> {
        let nodes = mesh.bvh().nodes();
        check_capacity("BVH nodes", nodes.len(), MAX_GPU_NODES)?;
        check_capacity("triangles", mesh.triangle_count(), MAX_GPU_TRIANGLES)?;
        Ok(Self {
            nodes: nodes.iter().map(GpuBvhNode::from).collect(),
            node_masks: nodes.iter().map(|n| n.subtree_layer_mask).collect(),
            triangles: mesh.triangles().iter().map(GpuTriangle::from).collect(),
        })
    }
}

/// A whole two-level scene prepared for upload.
#[derive(Debug, Clone, Default)]
pub struct GpuSceneBuffers {
    /// Top-level nodes. Leaf ranges index `instances`.
    pub tlas_nodes: Vec<GpuBvhNode>,
    /// Subtree layer mask of each top-level node.
    pub tlas_node_masks: Vec<u32>,
    /// Instances in top-level leaf order.
    pub instances: Vec<GpuInstance>,
    /// Every mesh's nodes, concatenated in mesh id order.
    pub blas_nodes: Vec<GpuBvhNode>,
    /// Subtree layer mask of each entry in `blas_nodes`.
    pub blas_node_masks: Vec<u32>,
    /// Every mesh's triangles, concatenated in mesh id order.
    pub triangles: Vec<GpuTriangle>,
}

impl GpuSceneBuffers {
    /// Pack a built scene.
    ///
    /// # Panics
    ///
    /// Panics if the scene's top level is not built.
    pub fn from_scene(scene: &SceneTlas) -> Result<Self> {
        assert!(scene.is_built(), "GPU packing needs a built scene");
        check_capacity("instances", scene.instance_count(), MAX_GPU_INSTANCES)?;

        let node_total: usize = scene.meshes().iter().map(|m| m.bvh().node_count()).sum();
        check_capacity("BVH nodes", node_total + scene.tlas_nodes().len(), MAX_GPU_NODES)?;
        check_capacity("triangles", scene.total_triangle_count(), MAX_GPU_TRIANGLES)?;

        let mut out = Self {
            blas_nodes: Vec::with_capacity(node_total),
            blas_node_masks: Vec::with_capacity(node_total),
            triangles: Vec::with_capacity(scene.total_triangle_count()),
            ..Default::default()
        };

        // (node_offset, triangle_offset) per mesh id.
        let mut offsets = Vec::with_capacity(scene.mesh_count());
        for mesh in scene.meshes() {
            offsets.push((out.blas_nodes.len() as u32, out.triangles.len() as u32));
            let packed = GpuMeshBuffers::from_blas(mesh)?;
            out.blas_nodes.extend(packed.nodes);
            out.blas_node_masks.extend(packed.node_masks);
            out.triangles.extend(packed.triangles);
        }

        let tlas = scene.tlas_nodes();
        out.tlas_nodes = tlas.iter().map(GpuBvhNode::from).collect();
        out.tlas_node_masks = tlas.iter().map(|n| n.subtree_layer_mask).collect();
        out.instances = scene
            .tlas_instance_order()
            .into_iter()
            .map(|id| {
                let inst = scene.instance(id);
                let (node_offset, triangle_offset) = offsets[inst.blas_id as usize];
                GpuInstance {
                    world_to_object: affine_rows(inst.inv_transform()),
                    object_to_world: affine_rows(inst.transform()),
                    node_offset,
                    triangle_offset,
                    layers: inst.layers,
                    instance_id: inst.instance_id,
                }
            })
            .collect();
        Ok(out)
    }
}
