//! Triangle-mesh reasoning for collision purposes
//!
//! A [`Geometry`] is a bag of triangles in model space. It exists to answer
//! the questions the octree builder asks: how far does the mesh reach from
//! the origin, does a triangle overlap a given octant cube, is the mesh
//! convex, and does a cube sit entirely inside a convex mesh.

pub mod octree;

use crate::foundation::math::Vec3;
use thiserror::Error;

/// Tolerance for plane-side and separating-axis tests
const EPSILON: f32 = 1e-5;

/// Errors raised when a mesh cannot serve as a collision model
#[derive(Error, Debug)]
pub enum GeometryError {
    /// The mesh contains no triangles
    #[error("mesh has no triangles")]
    Empty,

    /// The mesh has no measurable extent from the origin
    #[error("mesh extent {0} is too small to build a collision model")]
    DegenerateExtent(f32),

    /// An index referenced a vertex that does not exist
    #[error("triangle index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// The offending index
        index: u32,
        /// Number of vertices actually supplied
        vertex_count: usize,
    },
}

/// A triangle in model space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// First vertex
    pub v0: Vec3,
    /// Second vertex
    pub v1: Vec3,
    /// Third vertex
    pub v2: Vec3,
}

impl Triangle {
    /// Creates a new triangle
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    /// Face normal scaled by twice the triangle area (right-hand rule).
    /// Not normalized so degenerate triangles yield a zero vector instead
    /// of NaN.
    pub fn area_normal(&self) -> Vec3 {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        edge1.cross(&edge2)
    }

    /// Unit face normal (right-hand rule)
    pub fn normal(&self) -> Vec3 {
        self.area_normal().normalize()
    }

    /// This triangle translated by an offset
    pub fn translated(&self, offset: Vec3) -> Self {
        Self {
            v0: self.v0 + offset,
            v1: self.v1 + offset,
            v2: self.v2 + offset,
        }
    }

    /// This triangle scaled uniformly about the origin
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            v0: self.v0 * factor,
            v1: self.v1 * factor,
            v2: self.v2 * factor,
        }
    }

    /// Separating Axis Theorem overlap test against an axis-aligned cube
    /// centred at `center` with half-width `half`.
    ///
    /// Tests the 13 candidate axes for a triangle/box pair: the three box
    /// axes, the triangle face normal, and the nine edge cross products.
    pub fn overlaps_cube(&self, center: Vec3, half: f32) -> bool {
        // Work with the cube at the origin
        let v0 = self.v0 - center;
        let v1 = self.v1 - center;
        let v2 = self.v2 - center;

        // Box axes: triangle AABB vs cube
        for axis in 0..3 {
            let (p0, p1, p2) = (v0[axis], v1[axis], v2[axis]);
            if p0.min(p1).min(p2) > half + EPSILON || p0.max(p1).max(p2) < -half - EPSILON {
                return false;
            }
        }

        let edges = [v1 - v0, v2 - v1, v0 - v2];

        // Triangle plane vs cube
        let normal = edges[0].cross(&(v2 - v0));
        if !axis_overlaps(&[v0, v1, v2], normal, half) {
            return false;
        }

        // Nine edge cross products
        let box_axes = [Vec3::x(), Vec3::y(), Vec3::z()];
        for edge in &edges {
            for box_axis in &box_axes {
                let axis = edge.cross(box_axis);
                if !axis_overlaps(&[v0, v1, v2], axis, half) {
                    return false;
                }
            }
        }

        true
    }
}

/// Project the triangle and an origin-centred cube onto `axis` and check
/// for interval overlap. Degenerate axes never separate.
fn axis_overlaps(verts: &[Vec3; 3], axis: Vec3, half: f32) -> bool {
    let len_sq = axis.magnitude_squared();
    if len_sq < EPSILON * EPSILON {
        return true;
    }

    let p0 = axis.dot(&verts[0]);
    let p1 = axis.dot(&verts[1]);
    let p2 = axis.dot(&verts[2]);
    let tri_min = p0.min(p1).min(p2);
    let tri_max = p0.max(p1).max(p2);

    // Cube projection radius onto the (unnormalized) axis
    let r = half * (axis.x.abs() + axis.y.abs() + axis.z.abs());

    tri_min <= r + EPSILON && tri_max >= -r - EPSILON
}

/// A triangle soup in model space, the input to octree construction
#[derive(Debug, Clone)]
pub struct Geometry {
    triangles: Vec<Triangle>,
    convex: bool,
}

impl Geometry {
    /// Create an empty geometry with room for `capacity` triangles
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            triangles: Vec::with_capacity(capacity),
            convex: false,
        }
    }

    /// Build a geometry from an indexed triangle mesh
    ///
    /// Degenerate (zero-area) triangles are skipped; they contribute
    /// nothing to occupancy and break plane tests.
    pub fn from_mesh(vertices: &[Vec3], indices: &[u32]) -> Result<Self, GeometryError> {
        let mut geometry = Self::with_capacity(indices.len() / 3);

        for chunk in indices.chunks_exact(3) {
            for &index in chunk {
                if index as usize >= vertices.len() {
                    return Err(GeometryError::IndexOutOfRange {
                        index,
                        vertex_count: vertices.len(),
                    });
                }
            }
            let tri = Triangle::new(
                vertices[chunk[0] as usize],
                vertices[chunk[1] as usize],
                vertices[chunk[2] as usize],
            );
            geometry.add_triangle(tri);
        }

        if geometry.triangles.is_empty() {
            return Err(GeometryError::Empty);
        }

        geometry.convex = geometry.test_is_convex();
        Ok(geometry)
    }

    /// Append a triangle, ignoring degenerate ones
    pub fn add_triangle(&mut self, tri: Triangle) {
        if tri.area_normal().magnitude_squared() > EPSILON * EPSILON {
            self.triangles.push(tri);
        }
    }

    /// Number of triangles
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the mesh holds no triangles
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// The triangles of this geometry
    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    /// Whether the mesh was found to be convex at construction
    pub fn is_convex(&self) -> bool {
        self.convex
    }

    /// Largest absolute vertex coordinate: the half-width of the smallest
    /// origin-centred cube containing the whole mesh
    pub fn max_dimension_from_origin(&self) -> f32 {
        let mut max = 0.0f32;
        for tri in &self.triangles {
            for v in [tri.v0, tri.v1, tri.v2] {
                max = max.max(v.x.abs()).max(v.y.abs()).max(v.z.abs());
            }
        }
        max
    }

    /// Test whether every vertex lies on or behind every face plane.
    /// Requires consistently outward-wound faces; inconsistent winding
    /// simply reports non-convex, which is the safe answer.
    fn test_is_convex(&self) -> bool {
        for face in &self.triangles {
            let normal = face.area_normal();
            for tri in &self.triangles {
                for v in [tri.v0, tri.v1, tri.v2] {
                    if normal.dot(&(v - face.v0)) > EPSILON * normal.magnitude().max(1.0) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whether a point lies inside the mesh. Only meaningful for convex
    /// geometry; callers must check [`is_convex`](Self::is_convex) first.
    pub fn convex_contains_point(&self, point: Vec3) -> bool {
        for face in &self.triangles {
            let normal = face.area_normal();
            if normal.dot(&(point - face.v0)) > EPSILON * normal.magnitude().max(1.0) {
                return false;
            }
        }
        true
    }

    /// Whether all eight corners of an axis-aligned cube lie inside this
    /// convex mesh
    pub fn convex_contains_cube(&self, center: Vec3, half: f32) -> bool {
        for octant in 0..8u8 {
            let corner = center
                + Vec3::new(
                    if octant & 1 != 0 { half } else { -half },
                    if octant & 2 != 0 { half } else { -half },
                    if octant & 4 != 0 { half } else { -half },
                );
            if !self.convex_contains_point(corner) {
                return false;
            }
        }
        true
    }
}

/// Build the twelve-triangle surface of an axis-aligned box, wound
/// outward. Used by model setup and heavily by the collision tests.
pub fn box_geometry(half_extents: Vec3) -> Geometry {
    let h = half_extents;
    let corners = [
        Vec3::new(-h.x, -h.y, -h.z),
        Vec3::new(h.x, -h.y, -h.z),
        Vec3::new(-h.x, h.y, -h.z),
        Vec3::new(h.x, h.y, -h.z),
        Vec3::new(-h.x, -h.y, h.z),
        Vec3::new(h.x, -h.y, h.z),
        Vec3::new(-h.x, h.y, h.z),
        Vec3::new(h.x, h.y, h.z),
    ];
    // Each face as two triangles, outward winding
    const FACES: [[usize; 4]; 6] = [
        [1, 3, 7, 5], // +X
        [0, 4, 6, 2], // -X
        [2, 6, 7, 3], // +Y
        [0, 1, 5, 4], // -Y
        [4, 5, 7, 6], // +Z
        [0, 2, 3, 1], // -Z
    ];

    let mut geometry = Geometry::with_capacity(12);
    for face in &FACES {
        geometry.add_triangle(Triangle::new(
            corners[face[0]],
            corners[face[1]],
            corners[face[2]],
        ));
        geometry.add_triangle(Triangle::new(
            corners[face[0]],
            corners[face[2]],
            corners[face[3]],
        ));
    }
    geometry.convex = geometry.test_is_convex();
    geometry
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn triangle_normal_follows_winding() {
        let tri = Triangle::new(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        assert_relative_eq!(tri.normal(), Vec3::z(), epsilon = 1e-6);
    }

    #[test]
    fn triangle_overlaps_containing_cube() {
        let tri = Triangle::new(
            Vec3::new(-0.5, 0.0, 0.0),
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
        );
        assert!(tri.overlaps_cube(Vec3::zeros(), 1.0));
    }

    #[test]
    fn triangle_misses_distant_cube() {
        let tri = Triangle::new(
            Vec3::new(-0.5, 0.0, 0.0),
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::new(0.0, 0.5, 0.0),
        );
        assert!(!tri.overlaps_cube(Vec3::new(10.0, 0.0, 0.0), 1.0));
    }

    #[test]
    fn triangle_edge_crossing_cube_face() {
        // Large triangle slicing through a small cube without any vertex
        // inside it: only the cross-product axes can prove the overlap
        let tri = Triangle::new(
            Vec3::new(-10.0, 0.1, -10.0),
            Vec3::new(10.0, 0.1, -10.0),
            Vec3::new(0.0, 0.1, 10.0),
        );
        assert!(tri.overlaps_cube(Vec3::zeros(), 1.0));
    }

    #[test]
    fn from_mesh_rejects_bad_indices() {
        let vertices = [Vec3::zeros(), Vec3::x(), Vec3::y()];
        let result = Geometry::from_mesh(&vertices, &[0, 1, 9]);
        assert!(matches!(
            result,
            Err(GeometryError::IndexOutOfRange { index: 9, .. })
        ));
    }

    #[test]
    fn from_mesh_rejects_empty() {
        let result = Geometry::from_mesh(&[], &[]);
        assert!(matches!(result, Err(GeometryError::Empty)));
    }

    #[test]
    fn box_is_convex() {
        let geometry = box_geometry(Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(geometry.triangle_count(), 12);
        assert!(geometry.is_convex());
        assert_relative_eq!(geometry.max_dimension_from_origin(), 1.0);
    }

    #[test]
    fn convex_box_contains_inner_cube() {
        let geometry = box_geometry(Vec3::new(2.0, 2.0, 2.0));
        assert!(geometry.convex_contains_cube(Vec3::zeros(), 1.0));
        assert!(!geometry.convex_contains_cube(Vec3::new(1.5, 0.0, 0.0), 1.0));
    }

    #[test]
    fn degenerate_triangles_are_dropped() {
        let mut geometry = Geometry::with_capacity(1);
        geometry.add_triangle(Triangle::new(Vec3::zeros(), Vec3::x(), Vec3::x() * 2.0));
        assert!(geometry.is_empty());
    }
}
