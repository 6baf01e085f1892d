//! Math utilities and types
//!
//! Provides fundamental math types for 3D simulation work.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Orthonormal basis triad (the i/j/k axes of a local frame expressed in
/// another frame's coordinates)
///
/// Used by the narrow-phase collision test to express one entity's octree
/// in the other entity's local space without repeated quaternion math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    /// Local X axis
    pub i: Vec3,
    /// Local Y axis
    pub j: Vec3,
    /// Local Z axis
    pub k: Vec3,
}

impl Basis {
    /// The identity basis (local frame aligned with the reference frame)
    pub fn identity() -> Self {
        Self {
            i: Vec3::x(),
            j: Vec3::y(),
            k: Vec3::z(),
        }
    }

    /// Extract the basis axes of a rotation
    pub fn from_quat(rotation: &Quat) -> Self {
        let m = rotation.to_rotation_matrix();
        Self {
            i: m * Vec3::x(),
            j: m * Vec3::y(),
            k: m * Vec3::z(),
        }
    }

    /// Basis of frame `other` expressed in frame `reference`
    ///
    /// Equivalent to `from_quat(reference.inverse() * other)`.
    pub fn relative(reference: &Quat, other: &Quat) -> Self {
        Self::from_quat(&(reference.inverse() * other))
    }

    /// Rotate a vector from this basis's local frame into the reference frame
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        self.i * v.x + self.j * v.y + self.k * v.z
    }

    /// Rotate a vector from the reference frame into this basis's local frame
    pub fn unrotate(&self, v: Vec3) -> Vec3 {
        Vec3::new(self.i.dot(&v), self.j.dot(&v), self.k.dot(&v))
    }

    /// The inverse basis (valid because the triad is orthonormal)
    pub fn transposed(&self) -> Self {
        Self {
            i: Vec3::new(self.i.x, self.j.x, self.k.x),
            j: Vec3::new(self.i.y, self.j.y, self.k.y),
            k: Vec3::new(self.i.z, self.j.z, self.k.z),
        }
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl Aabb {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Get the center of the AABB
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the extents (half-size) of the AABB
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Check if this AABB contains a point
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// Check if this AABB intersects another AABB
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// sqrt(3), the circumscribed-sphere factor for a unit half-extent cube
    pub const SQRT_3: f32 = 1.732_050_8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn identity_basis_is_axis_aligned() {
        let basis = Basis::identity();
        assert_eq!(basis.i, Vec3::x());
        assert_eq!(basis.j, Vec3::y());
        assert_eq!(basis.k, Vec3::z());
    }

    #[test]
    fn basis_from_quarter_turn() {
        // 90 degrees around Y carries +X to -Z
        let q = Quat::from_axis_angle(&Vec3::y_axis(), constants::PI / 2.0);
        let basis = Basis::from_quat(&q);
        assert_relative_eq!(basis.i, Vec3::new(0.0, 0.0, -1.0), epsilon = EPSILON);
        assert_relative_eq!(basis.j, Vec3::y(), epsilon = EPSILON);
    }

    #[test]
    fn rotate_unrotate_roundtrip() {
        let q = Quat::from_axis_angle(&Unit::new_normalize(Vec3::new(1.0, 2.0, -0.5)), 0.83);
        let basis = Basis::from_quat(&q);
        let v = Vec3::new(3.0, -1.0, 7.5);
        assert_relative_eq!(basis.unrotate(basis.rotate(v)), v, epsilon = EPSILON);
    }

    #[test]
    fn relative_basis_of_same_rotation_is_identity() {
        let q = Quat::from_axis_angle(&Vec3::z_axis(), 1.1);
        let basis = Basis::relative(&q, &q);
        assert_relative_eq!(basis.i, Vec3::x(), epsilon = EPSILON);
        assert_relative_eq!(basis.j, Vec3::y(), epsilon = EPSILON);
        assert_relative_eq!(basis.k, Vec3::z(), epsilon = EPSILON);
    }
}
