#![warn(missing_docs)]

//! Math types for the rtcore acceleration structures.
//!
//! Thin wrappers around nalgebra providing the single-precision types the
//! ray tracing core works in: points, vectors, affine transforms and
//! axis-aligned bounding boxes. Everything is `f32` so that node and
//! triangle arrays can be handed to a GPU upload step without conversion.

mod aabb;
mod transform;

use nalgebra::{Matrix3, Unit, Vector3};

pub use aabb::Aabb;
pub use transform::Transform;

/// A point in 3D space.
pub type Point3 = nalgebra::Point3<f32>;

/// A vector in 3D space.
pub type Vec3 = Vector3<f32>;

/// A unit (normalized) direction vector in 3D space.
pub type Dir3 = Unit<Vector3<f32>>;

/// A 3x3 matrix (rotation/scale basis of an affine transform).
pub type Mat3 = Matrix3<f32>;
