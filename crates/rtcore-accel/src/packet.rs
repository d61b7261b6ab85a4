//! Four-ray packets for coherent traversal.
//!
//! The packet stores rays in structure-of-arrays form so one box test covers
//! all four lanes. On `x86_64` the test runs on SSE2 (part of the target
//! baseline); elsewhere it loops over the lanes.

use rtcore_math::Aabb;

use crate::ray::Ray;

/// Lanes per packet.
pub const PACKET_WIDTH: usize = 4;

/// Four rays in structure-of-arrays layout.
///
/// Unused lanes get `t_min = 1` and `best_t = -1`, which no box test can
/// satisfy.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy)]
pub struct RayPacket4 {
    /// Origin X per lane.
    pub ox: [f32; 4],
    /// Origin Y per lane.
    pub oy: [f32; 4],
    /// Origin Z per lane.
    pub oz: [f32; 4],
    /// Reciprocal direction X per lane.
    pub inv_dx: [f32; 4],
    /// Reciprocal direction Y per lane.
    pub inv_dy: [f32; 4],
    /// Reciprocal direction Z per lane.
    pub inv_dz: [f32; 4],
    /// Lower range bound per lane.
    pub t_min: [f32; 4],
    /// Closest hit so far per lane; starts at the ray's `t_max`.
    pub best_t: [f32; 4],
    len: usize,
}

impl RayPacket4 {
    /// Pack one to four rays.
    ///
    /// # Panics
    ///
    /// Panics if `rays` is empty or longer than [`PACKET_WIDTH`].
    pub fn new(rays: &[Ray]) -> Self {
        assert!(
            (1..=PACKET_WIDTH).contains(&rays.len()),
            "a ray packet holds 1 to 4 rays, got {}",
            rays.len()
        );
        let mut packet = Self {
            ox: [0.0; 4],
            oy: [0.0; 4],
            oz: [0.0; 4],
            inv_dx: [1.0; 4],
            inv_dy: [1.0; 4],
            inv_dz: [1.0; 4],
            t_min: [1.0; 4],
            best_t: [-1.0; 4],
            len: rays.len(),
        };
        for (lane, ray) in rays.iter().enumerate() {
            packet.ox[lane] = ray.origin.x;
            packet.oy[lane] = ray.origin.y;
            packet.oz[lane] = ray.origin.z;
            packet.inv_dx[lane] = ray.inv_direction.x;
            packet.inv_dy[lane] = ray.inv_direction.y;
            packet.inv_dz[lane] = ray.inv_direction.z;
            packet.t_min[lane] = ray.t_min;
            packet.best_t[lane] = ray.t_max;
        }
        packet
    }

    /// Number of live lanes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a packet holds at least one ray.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shrink one lane's search range after it found a closer hit.
    #[inline]
    pub fn update_best_t(&mut self, lane: usize, t: f32) {
        assert!(lane < self.len, "packet lane {lane} out of range");
        debug_assert!(t.is_finite());
        self.best_t[lane] = t;
    }
}

/// Slab-test all four lanes against `aabb`.
///
/// Returns a bitmask with bit `i` set when lane `i` enters the box within
/// `[t_min, best_t]`.
#[inline]
pub fn packet_intersects_aabb(packet: &RayPacket4, aabb: &Aabb) -> u32 {
    #[cfg(target_arch = "x86_64")]
    {
        sse::intersects_aabb(packet, aabb)
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        scalar_intersects_aabb(packet, aabb)
    }
}

/// Lane-by-lane version of [`packet_intersects_aabb`].
pub fn scalar_intersects_aabb(packet: &RayPacket4, aabb: &Aabb) -> u32 {
    let mut mask = 0;
    for lane in 0..PACKET_WIDTH {
        let (tx1, tx2) = slab(aabb.min.x, aabb.max.x, packet.ox[lane], packet.inv_dx[lane]);
        let (ty1, ty2) = slab(aabb.min.y, aabb.max.y, packet.oy[lane], packet.inv_dy[lane]);
        let (tz1, tz2) = slab(aabb.min.z, aabb.max.z, packet.oz[lane], packet.inv_dz[lane]);
        let t_enter = tx1.max(ty1).max(tz1).max(packet.t_min[lane]);
        let t_exit = tx2.min(ty2).min(tz2).min(packet.best_t[lane]);
        if t_enter <= t_exit {
            mask |= 1 << lane;
        }
    }
    mask
}

#[inline]
fn slab(lo: f32, hi: f32, origin: f32, inv_dir: f32) -> (f32, f32) {
    let t1 = (lo - origin) * inv_dir;
    let t2 = (hi - origin) * inv_dir;
    (t1.min(t2), t1.max(t2))
}

#[cfg(target_arch = "x86_64")]
mod sse {
    use std::arch::x86_64::*;

    use rtcore_math::Aabb;

    use super::RayPacket4;

    #[inline]
    pub(super) fn intersects_aabb(p: &RayPacket4, aabb: &Aabb) -> u32 {
        // SAFETY: SSE2 is part of the x86_64 baseline, and every load reads
        // a full `[f32; 4]` field of `p`.
        unsafe {
            let ox = _mm_loadu_ps(p.ox.as_ptr());
            let oy = _mm_loadu_ps(p.oy.as_ptr());
            let oz = _mm_loadu_ps(p.oz.as_ptr());
            let inv_dx = _mm_loadu_ps(p.inv_dx.as_ptr());
            let inv_dy = _mm_loadu_ps(p.inv_dy.as_ptr());
            let inv_dz = _mm_loadu_ps(p.inv_dz.as_ptr());

            let t1x = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.min.x), ox), inv_dx);
            let t2x = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.max.x), ox), inv_dx);
            let mut tmin = _mm_min_ps(t1x, t2x);
            let mut tmax = _mm_max_ps(t1x, t2x);

            let t1y = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.min.y), oy), inv_dy);
            let t2y = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.max.y), oy), inv_dy);
            tmin = _mm_max_ps(tmin, _mm_min_ps(t1y, t2y));
            tmax = _mm_min_ps(tmax, _mm_max_ps(t1y, t2y));

            let t1z = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.min.z), oz), inv_dz);
            let t2z = _mm_mul_ps(_mm_sub_ps(_mm_set1_ps(aabb.max.z), oz), inv_dz);
            tmin = _mm_max_ps(tmin, _mm_min_ps(t1z, t2z));
            tmax = _mm_min_ps(tmax, _mm_max_ps(t1z, t2z));

            tmin = _mm_max_ps(tmin, _mm_loadu_ps(p.t_min.as_ptr()));
            tmax = _mm_min_ps(tmax, _mm_loadu_ps(p.best_t.as_ptr()));

            _mm_movemask_ps(_mm_cmple_ps(tmin, tmax)) as u32
        }
    }
}
