//! Hit records returned by ray queries.

use rtcore_math::{Point3, Vec3};

/// Sentinel id stored in [`Intersection::prim_id`] and
/// [`Intersection::instance_id`] when nothing was hit.
pub const NO_HIT: u32 = u32::MAX;

/// Closest intersection found by a query.
///
/// The default value is the miss sentinel: `t = f32::MAX`, ids `NO_HIT`.
/// Queries start from it and only ever move `t` closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Ray parameter of the hit.
    pub t: f32,
    /// Hit point, in the space of the ray that produced it.
    pub position: Point3,
    /// Face normal at the hit (unit length, or zero for a degenerate face).
    pub normal: Vec3,
    /// Barycentric weight of the second vertex.
    pub u: f32,
    /// Barycentric weight of the third vertex.
    pub v: f32,
    /// Id of the triangle that was hit.
    pub prim_id: u32,
    /// Layer bits of the triangle that was hit.
    pub hit_layers: u32,
    /// Id of the scene instance that was hit; `NO_HIT` for single-mesh queries.
    pub instance_id: u32,
}

impl Intersection {
    /// True if this record holds a hit.
    #[inline]
    pub fn hit(&self) -> bool {
        self.prim_id != NO_HIT
    }

    /// Reset to the miss sentinel.
    #[inline]
    pub fn set_miss(&mut self) {
        *self = Self::default();
    }
}

impl Default for Intersection {
    fn default() -> Self {
        Self {
            t: f32::MAX,
            position: Point3::origin(),
            normal: Vec3::zeros(),
            u: 0.0,
            v: 0.0,
            prim_id: NO_HIT,
            hit_layers: 0,
            instance_id: NO_HIT,
        }
    }
}
