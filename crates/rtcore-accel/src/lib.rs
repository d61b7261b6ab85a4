#![warn(missing_docs)]

//! Two-level BVH acceleration structures for CPU ray tracing.
//!
//! Meshes are stored in object space, each with its own bottom-level BVH
//! ([`MeshBlas`]). A [`SceneTlas`] places meshes in the world through
//! [`BlasInstance`] transforms and builds a top-level BVH over the instances'
//! world bounds, so moving an instance costs a refit of the top level rather
//! than a rebuild of any mesh.
//!
//! # Architecture
//!
//! - [`Ray`] / [`Intersection`] - query input and closest-hit record
//! - [`Triangle`] - Möller–Trumbore primitive with visibility layers
//! - [`Bvh`] - binned-SAH build, depth-first node layout, nearest/any-hit
//!   and four-ray packet traversal, refit, structural validation
//! - [`brute`] - linear-scan reference used by unbuilt meshes and tests
//! - [`MeshBlas`] / [`BlasInstance`] / [`SceneTlas`] - the two levels
//! - [`batch`] - sequential, packetized and rayon-parallel ray batches
//! - [`gpu`] - `Pod` buffers mirroring the node and triangle layouts
//!
//! # Example
//!
//! ```
//! use rtcore_accel::{Ray, SceneTlas, Triangle};
//! use rtcore_math::{Point3, Transform, Vec3};
//!
//! let mut scene = SceneTlas::new();
//! let mesh = scene.add_mesh();
//! scene.mesh_mut(mesh).push_triangle(Triangle::new(
//!     Point3::new(0.0, 0.0, 0.0),
//!     Point3::new(1.0, 0.0, 0.0),
//!     Point3::new(0.0, 1.0, 0.0),
//!     7,
//! ));
//! scene.build_blas(mesh);
//! scene.add_instance(mesh, Transform::translation(0.0, 0.0, -5.0));
//! scene.build_tlas();
//!
//! let ray = Ray::new(Point3::new(0.2, 0.2, 0.0), Vec3::new(0.0, 0.0, -1.0));
//! let hit = scene.cast_ray(&ray);
//! assert!(hit.hit());
//! assert_eq!(hit.prim_id, 7);
//! ```

pub mod batch;
mod blas;
pub mod brute;
mod bvh;
mod config;
pub mod cpu_features;
mod error;
pub mod gpu;
mod instance;
mod intersection;
pub mod packet;
mod ray;
mod stats;
mod tlas;
mod triangle;

pub use blas::MeshBlas;
pub use bvh::{Bvh, BvhNode, NodeKind, Primitive, TRAVERSAL_STACK_SIZE};
pub use config::{BvhConfig, MAX_BINS};
pub use error::{AccelError, Result};
pub use instance::BlasInstance;
pub use intersection::{Intersection, NO_HIT};
pub use ray::{Ray, DEFAULT_T_MIN};
pub use stats::{NoStats, RayStats, StatsSink};
pub use tlas::SceneTlas;
pub use triangle::{Triangle, ALL_LAYERS};
