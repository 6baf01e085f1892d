//! Flat-array collision octrees for narrow-phase mesh testing
//!
//! A [`MeshOctree`] encodes the occupancy of a model's triangle mesh as a
//! recursive eight-way subdivision of an origin-centred cube, stored as a
//! flat node array. Nodes are `0` (empty), `-1` (solid), or a positive
//! relative offset to a block of eight consecutive children. A parallel
//! byte array carries a per-branch occupancy bitmask so traversal can skip
//! empty octants without touching the child nodes.
//!
//! Octrees are built once per model at load time, never mutated, and
//! shared between every entity instance using that model. Scaled variants
//! share the node storage and differ only in radius.

use std::sync::Arc;

use log::debug;
use thiserror::Error;

use super::{Geometry, GeometryError, Triangle};
use crate::foundation::math::{Basis, Vec3};

/// Node marker: octant contains no geometry
pub const NODE_EMPTY: i32 = 0;

/// Node marker: octant is entirely solid
pub const NODE_SOLID: i32 = -1;

/// Errors raised while converting a mesh into an octree
#[derive(Error, Debug)]
pub enum OctreeBuildError {
    /// The underlying mesh was unusable
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// The mesh extent cannot serve as a root cube half-width
    #[error("mesh extent {0} is not a usable octree radius")]
    BadRadius(f32),
}

/// Immutable node storage shared between scaled copies of one model
#[derive(Debug, PartialEq, Eq)]
struct OctreeData {
    nodes: Vec<i32>,
    occupancy: Vec<u8>,
}

/// What a node index resolves to during traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    Empty,
    Solid,
    /// Index of the first of eight consecutive children
    Branch(usize),
}

impl OctreeData {
    fn kind(&self, index: usize) -> NodeKind {
        match self.nodes[index] {
            NODE_EMPTY => NodeKind::Empty,
            NODE_SOLID => NodeKind::Solid,
            offset => NodeKind::Branch(index + offset as usize),
        }
    }
}

/// Centre offset of child octant `octant` within a parent cube of
/// half-width `half`. Bit 0 selects +X, bit 1 +Y, bit 2 +Z.
fn offset_for_octant(octant: usize, half: f32) -> Vec3 {
    let quarter = half * 0.5;
    Vec3::new(
        if octant & 1 != 0 { quarter } else { -quarter },
        if octant & 2 != 0 { quarter } else { -quarter },
        if octant & 4 != 0 { quarter } else { -quarter },
    )
}

/// Intermediate recursive form used during construction, flattened into
/// the node array once the whole tree is classified
enum Cell {
    Empty,
    Solid,
    Branch(Box<[Cell; 8]>),
}

/// Hierarchical occupancy model of a triangle mesh
///
/// The root cube is centred on the model origin with half-width
/// [`radius`](Self::radius).
#[derive(Debug, Clone)]
pub struct MeshOctree {
    radius: f32,
    data: Arc<OctreeData>,
}

impl MeshOctree {
    /// Build an octree from a mesh, subdividing to `max_depth` levels or
    /// until octants shrink below `min_radius`.
    ///
    /// Building is deterministic: identical input produces identical node
    /// and occupancy arrays.
    pub fn build(
        geometry: &Geometry,
        max_depth: u32,
        min_radius: f32,
    ) -> Result<Self, OctreeBuildError> {
        if geometry.is_empty() {
            return Err(GeometryError::Empty.into());
        }
        let radius = geometry.max_dimension_from_origin();
        if !radius.is_finite() || radius <= 0.0 {
            return Err(OctreeBuildError::BadRadius(radius));
        }

        let cell = classify(
            geometry,
            geometry.triangles(),
            Vec3::zeros(),
            radius,
            0,
            max_depth,
            min_radius,
        );

        let mut nodes = vec![NODE_EMPTY];
        let mut occupancy = vec![0u8];
        flatten(&cell, 0, &mut nodes, &mut occupancy);

        debug!(
            "built octree: radius {radius:.1}, {} nodes, {} triangles",
            nodes.len(),
            geometry.triangle_count()
        );

        Ok(Self {
            radius,
            data: Arc::new(OctreeData { nodes, occupancy }),
        })
    }

    /// Root cube half-width in model units
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Whether the octree holds any solid volume at all
    pub fn has_collision_volume(&self) -> bool {
        self.data.nodes[0] != NODE_EMPTY
    }

    /// Number of nodes in the flat array
    pub fn node_count(&self) -> usize {
        self.data.nodes.len()
    }

    /// The raw node array (exposed for determinism checks and debugging)
    pub fn nodes(&self) -> &[i32] {
        &self.data.nodes
    }

    /// The per-node occupancy bitmask array
    pub fn occupancy(&self) -> &[u8] {
        &self.data.occupancy
    }

    /// A copy scaled uniformly by `factor`, sharing node storage with the
    /// original. Used for entities rendered at non-unit scale.
    pub fn scaled_by(&self, factor: f32) -> Self {
        debug_assert!(factor > 0.0, "octree scale must be positive");
        Self {
            radius: self.radius * factor,
            data: Arc::clone(&self.data),
        }
    }

    /// Whether two octrees share node storage (scaled copies do)
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Test a line segment `v0..v1` (model space) against the solid cells.
    ///
    /// Returns the fraction along the segment of the nearest solid hit, or
    /// `None` for a clean miss. Used for weapon-fire hit detection.
    pub fn hit_by_line(&self, v0: Vec3, v1: Vec3) -> Option<f32> {
        segment_hit(&self.data, 0, Vec3::zeros(), self.radius, v0, v1)
    }

    /// Test this octree against another entity's octree.
    ///
    /// Both trees are expressed in this entity's local frame: `origin` is
    /// the other model's centre and `ijk` its basis triad, already
    /// transformed into this frame by the caller. Recursion descends the
    /// larger cube first and prunes octant pairs whose cubes cannot
    /// overlap, so cost stays proportional to the contact neighbourhood.
    pub fn hit_by_octree(&self, other: &Self, origin: Vec3, ijk: &Basis) -> bool {
        self.hit_by_octree_scaled(other, origin, ijk, 1.0, 1.0)
    }

    /// [`hit_by_octree`](Self::hit_by_octree) with per-entity uniform
    /// scale factors applied to each octree's radius
    pub fn hit_by_octree_scaled(
        &self,
        other: &Self,
        origin: Vec3,
        ijk: &Basis,
        own_scale: f32,
        other_scale: f32,
    ) -> bool {
        octree_pair_hit(
            &self.data,
            0,
            Vec3::zeros(),
            self.radius * own_scale,
            &other.data,
            0,
            origin,
            other.radius * other_scale,
            ijk,
        )
    }
}

/// Classify the cube at `center`/`half` against the triangles that
/// overlapped the parent cube
fn classify(
    geometry: &Geometry,
    parent_triangles: &[Triangle],
    center: Vec3,
    half: f32,
    depth: u32,
    max_depth: u32,
    min_radius: f32,
) -> Cell {
    let overlapping: Vec<Triangle> = parent_triangles
        .iter()
        .filter(|tri| tri.overlaps_cube(center, half))
        .copied()
        .collect();

    if overlapping.is_empty() {
        // No surface passes through this octant. For a convex model the
        // octant may still be interior volume.
        if geometry.is_convex() && geometry.convex_contains_cube(center, half) {
            return Cell::Solid;
        }
        return Cell::Empty;
    }

    if depth >= max_depth || half * 0.5 < min_radius {
        return Cell::Solid;
    }

    let children: [Cell; 8] = std::array::from_fn(|octant| {
        classify(
            geometry,
            &overlapping,
            center + offset_for_octant(octant, half),
            half * 0.5,
            depth + 1,
            max_depth,
            min_radius,
        )
    });

    Cell::Branch(Box::new(children))
}

/// Write `cell` into slot `index`, appending child blocks as needed
fn flatten(cell: &Cell, index: usize, nodes: &mut Vec<i32>, occupancy: &mut Vec<u8>) {
    match cell {
        Cell::Empty => {
            nodes[index] = NODE_EMPTY;
            occupancy[index] = 0x00;
        }
        Cell::Solid => {
            nodes[index] = NODE_SOLID;
            occupancy[index] = 0xFF;
        }
        Cell::Branch(children) => {
            let base = nodes.len();
            nodes[index] = (base - index) as i32;

            let mut mask = 0u8;
            for (octant, child) in children.iter().enumerate() {
                if !matches!(child, Cell::Empty) {
                    mask |= 1 << octant;
                }
            }
            occupancy[index] = mask;

            nodes.resize(base + 8, NODE_EMPTY);
            occupancy.resize(base + 8, 0x00);
            for (octant, child) in children.iter().enumerate() {
                flatten(child, base + octant, nodes, occupancy);
            }
        }
    }
}

/// Clip a segment against an axis-aligned cube, returning the parameter
/// interval of the overlap
fn clip_segment(center: Vec3, half: f32, v0: Vec3, v1: Vec3) -> Option<(f32, f32)> {
    const TINY: f32 = 1e-12;
    let d = v1 - v0;
    let mut t_min = 0.0f32;
    let mut t_max = 1.0f32;

    for axis in 0..3 {
        let offset = v0[axis] - center[axis];
        if d[axis].abs() < TINY {
            if offset.abs() > half {
                return None;
            }
        } else {
            let inv = 1.0 / d[axis];
            let mut t0 = (-half - offset) * inv;
            let mut t1 = (half - offset) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
    }

    Some((t_min, t_max))
}

fn segment_hit(
    data: &OctreeData,
    index: usize,
    center: Vec3,
    half: f32,
    v0: Vec3,
    v1: Vec3,
) -> Option<f32> {
    let kind = data.kind(index);
    if kind == NodeKind::Empty {
        return None;
    }

    let (t_min, _) = clip_segment(center, half, v0, v1)?;

    match kind {
        NodeKind::Empty => None,
        NodeKind::Solid => Some(t_min),
        NodeKind::Branch(base) => {
            let mask = data.occupancy[index];
            let mut nearest: Option<f32> = None;
            for octant in 0..8 {
                if mask & (1 << octant) == 0 {
                    continue;
                }
                let child_center = center + offset_for_octant(octant, half);
                if let Some(t) = segment_hit(data, base + octant, child_center, half * 0.5, v0, v1)
                {
                    nearest = Some(nearest.map_or(t, |n: f32| n.min(t)));
                }
            }
            nearest
        }
    }
}

/// Separating-axis overlap test between an axis-aligned cube and a cube
/// oriented by `ijk`. Fifteen candidate axes; degenerate cross products
/// (parallel edges) never separate.
fn cubes_overlap(a_center: Vec3, a_half: f32, b_center: Vec3, b_half: f32, ijk: &Basis) -> bool {
    const TINY: f32 = 1e-10;
    let delta = b_center - a_center;

    // Circumscribed-sphere reject: cubes further apart than their
    // combined sphere radii cannot overlap on any axis
    let reach = (a_half + b_half) * crate::foundation::math::constants::SQRT_3;
    if delta.magnitude_squared() > reach * reach {
        return false;
    }

    let a_axes = [Vec3::x(), Vec3::y(), Vec3::z()];
    let b_axes = [ijk.i, ijk.j, ijk.k];

    let separated_on = |axis: Vec3| -> bool {
        let len_sq = axis.magnitude_squared();
        if len_sq < TINY {
            return false;
        }
        let ra = a_half * (axis.x.abs() + axis.y.abs() + axis.z.abs());
        let rb = b_half
            * (axis.dot(&b_axes[0]).abs()
                + axis.dot(&b_axes[1]).abs()
                + axis.dot(&b_axes[2]).abs());
        delta.dot(&axis).abs() > ra + rb
    };

    for axis in a_axes {
        if separated_on(axis) {
            return false;
        }
    }
    for axis in b_axes {
        if separated_on(axis) {
            return false;
        }
    }
    for a in &a_axes {
        for b in &b_axes {
            if separated_on(a.cross(b)) {
                return false;
            }
        }
    }

    true
}

fn octree_pair_hit(
    a: &OctreeData,
    a_index: usize,
    a_center: Vec3,
    a_half: f32,
    b: &OctreeData,
    b_index: usize,
    b_center: Vec3,
    b_half: f32,
    ijk: &Basis,
) -> bool {
    let a_kind = a.kind(a_index);
    let b_kind = b.kind(b_index);
    if a_kind == NodeKind::Empty || b_kind == NodeKind::Empty {
        return false;
    }

    if !cubes_overlap(a_center, a_half, b_center, b_half, ijk) {
        return false;
    }

    match (a_kind, b_kind) {
        (NodeKind::Solid, NodeKind::Solid) => true,
        // Descend the larger cube so the pair converges toward
        // comparable cell sizes
        (NodeKind::Branch(base), _) if a_half >= b_half || !matches!(b_kind, NodeKind::Branch(_)) => {
            let mask = a.occupancy[a_index];
            (0..8).any(|octant| {
                mask & (1 << octant) != 0
                    && octree_pair_hit(
                        a,
                        base + octant,
                        a_center + offset_for_octant(octant, a_half),
                        a_half * 0.5,
                        b,
                        b_index,
                        b_center,
                        b_half,
                        ijk,
                    )
            })
        }
        (_, NodeKind::Branch(base)) => {
            let mask = b.occupancy[b_index];
            (0..8).any(|octant| {
                mask & (1 << octant) != 0
                    && octree_pair_hit(
                        a,
                        a_index,
                        a_center,
                        a_half,
                        b,
                        base + octant,
                        b_center + ijk.rotate(offset_for_octant(octant, b_half)),
                        b_half * 0.5,
                        ijk,
                    )
            })
        }
        // Both solid is handled above; a solid/solid mix with no branch
        // left cannot reach here
        _ => unreachable!("octree traversal exhausted without resolution"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants::PI, Quat};
    use crate::geometry::box_geometry;
    use approx::assert_relative_eq;

    fn unit_box_octree() -> MeshOctree {
        let geometry = box_geometry(Vec3::new(1.0, 1.0, 1.0));
        MeshOctree::build(&geometry, 4, 0.01).unwrap()
    }

    #[test]
    fn build_is_deterministic() {
        let geometry = box_geometry(Vec3::new(1.0, 0.5, 2.0));
        let first = MeshOctree::build(&geometry, 5, 0.01).unwrap();
        let second = MeshOctree::build(&geometry, 5, 0.01).unwrap();

        assert_eq!(first.nodes(), second.nodes());
        assert_eq!(first.occupancy(), second.occupancy());
        assert_relative_eq!(first.radius(), second.radius());
    }

    #[test]
    fn build_rejects_empty_mesh() {
        let geometry = crate::geometry::Geometry::with_capacity(0);
        assert!(MeshOctree::build(&geometry, 5, 0.01).is_err());
    }

    #[test]
    fn box_octree_has_volume() {
        let octree = unit_box_octree();
        assert!(octree.has_collision_volume());
        assert_relative_eq!(octree.radius(), 1.0);
    }

    #[test]
    fn line_through_box_hits_near_face() {
        let octree = unit_box_octree();
        // Segment from x = -4 to x = +4 through the centre: the box face
        // at x = -1 sits 3/8 of the way along
        let hit = octree
            .hit_by_line(Vec3::new(-4.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0))
            .expect("segment through the box must hit");
        assert!(hit > 0.0 && hit < 0.5, "hit fraction {hit} not in front half");
        assert_relative_eq!(hit, 3.0 / 8.0, epsilon = 0.1);
    }

    #[test]
    fn line_beside_box_misses() {
        let octree = unit_box_octree();
        let hit = octree.hit_by_line(Vec3::new(-4.0, 3.0, 0.0), Vec3::new(4.0, 3.0, 0.0));
        assert!(hit.is_none());
    }

    #[test]
    fn segment_ending_before_box_misses() {
        let octree = unit_box_octree();
        let hit = octree.hit_by_line(Vec3::new(-4.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0));
        assert!(hit.is_none());
    }

    #[test]
    fn touching_octrees_collide() {
        let octree = unit_box_octree();
        let hit = octree.hit_by_octree(&octree, Vec3::new(1.5, 0.0, 0.0), &Basis::identity());
        assert!(hit, "overlapping unit boxes must collide");
    }

    #[test]
    fn separated_octrees_do_not_collide() {
        let octree = unit_box_octree();
        let hit = octree.hit_by_octree(&octree, Vec3::new(4.0, 0.0, 0.0), &Basis::identity());
        assert!(!hit);
    }

    #[test]
    fn overlapping_spheres_but_clear_meshes_do_not_collide() {
        // Bounding spheres of radius sqrt(3) overlap at distance 3.2, but
        // the unit cubes themselves stay clear
        let octree = unit_box_octree();
        let hit = octree.hit_by_octree(&octree, Vec3::new(3.2, 0.0, 0.0), &Basis::identity());
        assert!(!hit);
    }

    #[test]
    fn rotated_octree_collides_through_corner() {
        let octree = unit_box_octree();
        // A cube rotated 45 degrees about Z reaches sqrt(2) along X, so at
        // distance 2.2 the corner digs into the axial cube
        let rotation = Quat::from_axis_angle(&Vec3::z_axis(), PI / 4.0);
        let basis = Basis::from_quat(&rotation);
        assert!(octree.hit_by_octree(&octree, Vec3::new(2.2, 0.0, 0.0), &basis));
        // At 2.6 even the rotated reach falls short
        assert!(!octree.hit_by_octree(&octree, Vec3::new(2.6, 0.0, 0.0), &basis));
    }

    #[test]
    fn scaled_copy_shares_storage() {
        let octree = unit_box_octree();
        let scaled = octree.scaled_by(2.5);
        assert_relative_eq!(scaled.radius(), 2.5);
        assert!(scaled.shares_storage_with(&octree));
    }

    #[test]
    fn scaled_octrees_collide_at_scaled_range() {
        let octree = unit_box_octree();
        let basis = Basis::identity();
        // Unscaled boxes at 2.2 are clear, doubling one closes the gap
        assert!(!octree.hit_by_octree(&octree, Vec3::new(2.2, 0.0, 0.0), &basis));
        assert!(octree.hit_by_octree_scaled(&octree, Vec3::new(2.2, 0.0, 0.0), &basis, 1.0, 2.0));
    }
}
