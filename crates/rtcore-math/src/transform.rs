//! Affine object-to-world transforms.

use crate::{Dir3, Mat3, Point3, Vec3};

/// An affine transformation: a 3x3 basis (rotation, scale, shear) followed
/// by a translation.
///
/// Applying the transform to a point computes `basis * p + origin`; applying
/// it to a direction uses the basis only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Rotation/scale part.
    pub basis: Mat3,
    /// Translation part.
    pub origin: Vec3,
}

impl Transform {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            basis: Mat3::identity(),
            origin: Vec3::zeros(),
        }
    }

    /// Build a transform from an explicit basis and translation.
    pub fn from_basis_origin(basis: Mat3, origin: Vec3) -> Self {
        Self { basis, origin }
    }

    /// Translation by `(dx, dy, dz)`.
    pub fn translation(dx: f32, dy: f32, dz: f32) -> Self {
        Self {
            basis: Mat3::identity(),
            origin: Vec3::new(dx, dy, dz),
        }
    }

    /// Non-uniform scale by `(sx, sy, sz)`.
    pub fn scale(sx: f32, sy: f32, sz: f32) -> Self {
        Self {
            basis: Mat3::from_diagonal(&Vec3::new(sx, sy, sz)),
            origin: Vec3::zeros(),
        }
    }

    /// Uniform scale by `s`.
    pub fn uniform_scale(s: f32) -> Self {
        Self::scale(s, s, s)
    }

    /// Rotation about the X axis by `angle` radians.
    pub fn rotation_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Mat3::identity();
        m[(1, 1)] = c;
        m[(1, 2)] = -s;
        m[(2, 1)] = s;
        m[(2, 2)] = c;
        Self::from_basis_origin(m, Vec3::zeros())
    }

    /// Rotation about the Y axis by `angle` radians.
    pub fn rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Mat3::identity();
        m[(0, 0)] = c;
        m[(0, 2)] = s;
        m[(2, 0)] = -s;
        m[(2, 2)] = c;
        Self::from_basis_origin(m, Vec3::zeros())
    }

    /// Rotation about the Z axis by `angle` radians.
    pub fn rotation_z(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut m = Mat3::identity();
        m[(0, 0)] = c;
        m[(0, 1)] = -s;
        m[(1, 0)] = s;
        m[(1, 1)] = c;
        Self::from_basis_origin(m, Vec3::zeros())
    }

    /// Rotation about an arbitrary axis through the origin by `angle` radians.
    ///
    /// Uses Rodrigues' rotation formula.
    pub fn rotation_about_axis(axis: &Dir3, angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let t = 1.0 - c;
        let (x, y, z) = (axis.as_ref().x, axis.as_ref().y, axis.as_ref().z);
        let mut m = Mat3::identity();
        m[(0, 0)] = t * x * x + c;
        m[(0, 1)] = t * x * y - s * z;
        m[(0, 2)] = t * x * z + s * y;
        m[(1, 0)] = t * x * y + s * z;
        m[(1, 1)] = t * y * y + c;
        m[(1, 2)] = t * y * z - s * x;
        m[(2, 0)] = t * x * z - s * y;
        m[(2, 1)] = t * y * z + s * x;
        m[(2, 2)] = t * z * z + c;
        Self::from_basis_origin(m, Vec3::zeros())
    }

    /// Compose: `self` after `other`. The result applies `other` first.
    pub fn then(&self, other: &Transform) -> Self {
        Self {
            basis: self.basis * other.basis,
            origin: self.basis * other.origin + self.origin,
        }
    }

    /// Transform a point (basis and translation).
    #[inline]
    pub fn apply_point(&self, p: &Point3) -> Point3 {
        Point3::from(self.basis * p.coords + self.origin)
    }

    /// Transform a direction vector (basis only, no translation).
    #[inline]
    pub fn apply_vec(&self, v: &Vec3) -> Vec3 {
        self.basis * v
    }

    /// Transform a surface normal by the basis and renormalize.
    ///
    /// Exact for rotations and uniform scale only. Under non-uniform scale
    /// the correct map is the inverse transpose of the basis; callers that
    /// stretch instances accept the approximation.
    #[inline]
    pub fn apply_normal(&self, n: &Vec3) -> Vec3 {
        (self.basis * n)
            .try_normalize(f32::MIN_POSITIVE)
            .unwrap_or_else(Vec3::zeros)
    }

    /// Affine inverse of this transform, if the basis is invertible.
    pub fn inverse(&self) -> Option<Self> {
        let basis = self.basis.try_inverse()?;
        Some(Self {
            basis,
            origin: -(basis * self.origin),
        })
    }

    /// True if every matrix and translation component is finite.
    pub fn is_finite(&self) -> bool {
        self.basis.iter().all(|c| c.is_finite()) && self.origin.iter().all(|c| c.is_finite())
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}
