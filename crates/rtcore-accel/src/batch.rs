//! Batched ray queries: sequential, packetized and parallel.
//!
//! Each structure is read-only during queries, so any number of threads may
//! trace against it at once. Parallel batches give every chunk its own
//! [`RayStats`] and merge them when all chunks are done.

use std::fmt::Display;
use std::ops::Range;

use log::warn;
use rayon::prelude::*;

use crate::blas::MeshBlas;
use crate::cpu_features;
use crate::error::{AccelError, Result};
use crate::intersection::Intersection;
use crate::packet::PACKET_WIDTH;
use crate::ray::Ray;
use crate::stats::{RayStats, StatsSink};
use crate::tlas::SceneTlas;

/// Rays per parallel work item when the caller has no better figure.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// A structure that answers single-ray queries.
pub trait RayCaster {
    /// Closest hit among primitives matching `query_mask`.
    fn cast_ray_masked(&self, ray: &Ray, query_mask: u32) -> Intersection;

    /// True if any primitive matching `query_mask` is hit.
    fn any_hit_masked(&self, ray: &Ray, query_mask: u32) -> bool;

    /// Closest hit, recording into `stats`.
    fn cast_ray_with<S: StatsSink>(&self, ray: &Ray, query_mask: u32, stats: &mut S)
        -> Intersection;
}

impl RayCaster for MeshBlas {
    fn cast_ray_masked(&self, ray: &Ray, query_mask: u32) -> Intersection {
        MeshBlas::cast_ray_masked(self, ray, query_mask)
    }

    fn any_hit_masked(&self, ray: &Ray, query_mask: u32) -> bool {
        MeshBlas::any_hit_masked(self, ray, query_mask)
    }

    fn cast_ray_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        MeshBlas::cast_ray_with(self, ray, query_mask, stats)
    }
}

impl RayCaster for SceneTlas {
    fn cast_ray_masked(&self, ray: &Ray, query_mask: u32) -> Intersection {
        SceneTlas::cast_ray_masked(self, ray, query_mask)
    }

    fn any_hit_masked(&self, ray: &Ray, query_mask: u32) -> bool {
        SceneTlas::any_hit_masked(self, ray, query_mask)
    }

    fn cast_ray_with<S: StatsSink>(
        &self,
        ray: &Ray,
        query_mask: u32,
        stats: &mut S,
    ) -> Intersection {
        SceneTlas::cast_ray_with(self, ray, query_mask, stats)
    }
}

/// Trace `rays` in order, writing closest hits into `results`.
///
/// # Panics
///
/// Panics if `results` and `rays` differ in length.
pub fn cast_rays<C: RayCaster>(
    caster: &C,
    rays: &[Ray],
    query_mask: u32,
    results: &mut [Intersection],
) {
    assert_eq!(rays.len(), results.len(), "cast_rays: one result slot per ray");
    for (ray, out) in rays.iter().zip(results.iter_mut()) {
        *out = caster.cast_ray_masked(ray, query_mask);
    }
}

/// Occlusion test for each ray in `rays`.
///
/// # Panics
///
/// Panics if `results` and `rays` differ in length.
pub fn any_hit_rays<C: RayCaster>(caster: &C, rays: &[Ray], query_mask: u32, results: &mut [bool]) {
    assert_eq!(rays.len(), results.len(), "any_hit_rays: one result slot per ray");
    for (ray, out) in rays.iter().zip(results.iter_mut()) {
        *out = caster.any_hit_masked(ray, query_mask);
    }
}

/// Trace a mesh batch four rays at a time through the packet path.
///
/// Falls back to single rays when the CPU offers no packet SIMD.
pub fn cast_rays_packet4<S: StatsSink>(
    mesh: &MeshBlas,
    rays: &[Ray],
    query_mask: u32,
    results: &mut [Intersection],
    stats: &mut S,
) {
    assert_eq!(rays.len(), results.len(), "cast_rays_packet4: one result slot per ray");
    if !cpu_features::packet_simd() {
        for (ray, out) in rays.iter().zip(results.iter_mut()) {
            *out = mesh.cast_ray_with(ray, query_mask, stats);
        }
        return;
    }
    for (group, out) in rays
        .chunks(PACKET_WIDTH)
        .zip(results.chunks_mut(PACKET_WIDTH))
    {
        mesh.cast_ray_packet4_with(group, query_mask, out, stats);
    }
}

/// Trace `rays` across the rayon pool in chunks of `chunk_size`.
///
/// Returns the merged counters of every chunk.
///
/// # Panics
///
/// Panics if `chunk_size` is zero or the slices differ in length.
pub fn cast_rays_parallel<C: RayCaster + Sync>(
    caster: &C,
    rays: &[Ray],
    query_mask: u32,
    results: &mut [Intersection],
    chunk_size: usize,
) -> RayStats {
    assert!(chunk_size > 0, "cast_rays_parallel: chunk size must be positive");
    assert_eq!(rays.len(), results.len(), "cast_rays_parallel: one result slot per ray");

    rays.par_chunks(chunk_size)
        .zip(results.par_chunks_mut(chunk_size))
        .map(|(chunk, out)| {
            let mut stats = RayStats::default();
            for (ray, slot) in chunk.iter().zip(out.iter_mut()) {
                *slot = caster.cast_ray_with(ray, query_mask, &mut stats);
            }
            stats
        })
        .reduce(RayStats::default, |mut total, part| {
            total += part;
            total
        })
}

/// Run `work` over `[0, len)` split into ranges of `chunk_size`, in parallel.
///
/// Every chunk runs even if others fail. Failures are logged and reported
/// together as [`AccelError::WorkFailed`], carrying the message of the
/// lowest-indexed failing chunk.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn dispatch_chunks<F, E>(len: usize, chunk_size: usize, work: F) -> Result<()>
where
    F: Fn(Range<usize>) -> std::result::Result<(), E> + Sync,
    E: Display + Send,
{
    assert!(chunk_size > 0, "dispatch_chunks: chunk size must be positive");
    let total = len.div_ceil(chunk_size);

    let mut failures: Vec<(usize, String)> = (0..total)
        .into_par_iter()
        .filter_map(|chunk| {
            let start = chunk * chunk_size;
            let range = start..(start + chunk_size).min(len);
            work(range).err().map(|err| (chunk, err.to_string()))
        })
        .collect();

    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by_key(|(chunk, _)| *chunk);
    for (chunk, msg) in &failures {
        warn!("work chunk {chunk} of {total} failed: {msg}");
    }
    let failed = failures.len();
    let first = failures.swap_remove(0).1;
    Err(AccelError::WorkFailed {
        failed,
        total,
        first,
    })
}
