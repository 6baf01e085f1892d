//! Collision regions
//!
//! Regions group entities that may potentially collide, cutting the
//! number of pairwise tests. The tree is built once at system setup —
//! typically a root "universe" region with subregions around stations and
//! other high-traffic volumes — and entity membership is reassigned once
//! per tick, not continuously.
//!
//! Every region has an inner radius and a larger border radius. An entity
//! inside a subregion's border band but outside its inner radius stays a
//! member of the parent yet is still tested against the subregion's
//! members, so a fast mover crossing the boundary cannot slip between two
//! regions' candidate sets. The band width is configurable; it should
//! exceed scanner range.

use std::collections::HashSet;

use log::warn;

use crate::config::SimConfig;
use crate::entity::{EntityArena, EntityId};
use crate::foundation::math::Vec3;
use crate::spatial::AxisLists;

/// An unordered candidate pair, stored smaller id first so the same pair
/// found twice collapses to one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollisionPair {
    /// Lower-id entity of the pair
    pub a: EntityId,
    /// Higher-id entity of the pair
    pub b: EntityId,
}

impl CollisionPair {
    /// Create a canonical pair
    pub fn new(a: EntityId, b: EntityId) -> Self {
        if a <= b {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }
}

/// A node in the collision-region tree
#[derive(Debug)]
pub struct CollisionRegion {
    location: Vec3,
    radius: f32,
    border_radius: f32,
    is_universe: bool,
    entities: Vec<EntityId>,
    subregions: Vec<CollisionRegion>,
    capacity: usize,
    border_margin: f32,
    auto_subdivide: bool,
    overflow_reported: bool,
}

/// Whether a position lies within a region's inner radius. The universe
/// root contains everything.
pub fn position_is_within_region(position: Vec3, region: &CollisionRegion) -> bool {
    if region.is_universe {
        return true;
    }
    (position - region.location).magnitude_squared() <= region.radius * region.radius
}

/// Whether a sphere lies entirely within a region's inner radius
pub fn sphere_is_within_region(position: Vec3, radius: f32, region: &CollisionRegion) -> bool {
    if region.is_universe {
        return true;
    }
    let reach = region.radius - radius;
    reach >= 0.0 && (position - region.location).magnitude_squared() <= reach * reach
}

/// Whether a position lies within a region's border radius
pub fn position_is_within_borders(position: Vec3, region: &CollisionRegion) -> bool {
    if region.is_universe {
        return true;
    }
    (position - region.location).magnitude_squared()
        <= region.border_radius * region.border_radius
}

/// Whether a position lies in the border band: outside the inner radius
/// but within the border radius
pub fn position_is_on_border(position: Vec3, region: &CollisionRegion) -> bool {
    if region.is_universe {
        return false;
    }
    let d2 = (position - region.location).magnitude_squared();
    d2 > region.radius * region.radius && d2 <= region.border_radius * region.border_radius
}

impl CollisionRegion {
    /// Create the root region spanning the whole system
    pub fn universe(config: &SimConfig) -> Self {
        Self {
            location: Vec3::zeros(),
            radius: 0.0,
            border_radius: 0.0,
            is_universe: true,
            entities: Vec::new(),
            subregions: Vec::new(),
            capacity: config.region_capacity,
            border_margin: config.region_border_margin,
            auto_subdivide: config.region_auto_subdivide,
            overflow_reported: false,
        }
    }

    /// Create a child region under this one
    pub fn add_subregion(&mut self, location: Vec3, radius: f32) {
        self.subregions.push(Self {
            location,
            radius,
            border_radius: radius + self.border_margin,
            is_universe: false,
            entities: Vec::new(),
            subregions: Vec::new(),
            capacity: self.capacity,
            border_margin: self.border_margin,
            auto_subdivide: self.auto_subdivide,
            overflow_reported: false,
        });
    }

    /// Drop all subregions (system teardown)
    pub fn clear_subregions(&mut self) {
        self.subregions.clear();
    }

    /// Region centre
    pub fn location(&self) -> Vec3 {
        self.location
    }

    /// Inner radius (zero for the universe root)
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Border radius (inner radius plus the configured margin)
    pub fn border_radius(&self) -> f32 {
        self.border_radius
    }

    /// Direct members assigned this tick
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Child regions
    pub fn subregions(&self) -> &[CollisionRegion] {
        &self.subregions
    }

    /// Members of this region and every descendant
    pub fn deep_entity_count(&self) -> usize {
        self.entities.len()
            + self
                .subregions
                .iter()
                .map(CollisionRegion::deep_entity_count)
                .sum::<usize>()
    }

    /// Empty all entity lists in the tree ahead of a reassignment pass
    pub fn clear_entity_lists(&mut self) {
        self.entities.clear();
        for child in &mut self.subregions {
            child.clear_entity_lists();
        }
    }

    /// Place one entity into the most specific region whose inner radius
    /// contains it, or this region if no child does
    pub fn assign(&mut self, id: EntityId, position: Vec3) {
        for child in &mut self.subregions {
            if position_is_within_region(position, child) {
                child.assign(id, position);
                return;
            }
        }
        self.entities.push(id);
    }

    /// Enforce the capacity bound after assignment.
    ///
    /// An over-full region either subdivides into octants (when the
    /// policy allows and it has no children yet) or logs once and carries
    /// on with the plain linear sweep. Entities are never dropped.
    pub fn apply_capacity_policy(&mut self, arena: &EntityArena) {
        if self.entities.len() > self.capacity {
            if self.auto_subdivide && self.subregions.is_empty() && !self.is_universe {
                let half = self.radius * 0.5;
                for octant in 0..8usize {
                    let offset = Vec3::new(
                        if octant & 1 != 0 { half } else { -half },
                        if octant & 2 != 0 { half } else { -half },
                        if octant & 4 != 0 { half } else { -half },
                    );
                    self.add_subregion(self.location + offset, half);
                }
                // Re-place the members that now fit a child
                let members = std::mem::take(&mut self.entities);
                for id in members {
                    if let Some(entity) = arena.get(id) {
                        self.assign(id, entity.position);
                    }
                }
            } else if !self.overflow_reported {
                self.overflow_reported = true;
                warn!(
                    "collision region at {:?} over capacity ({} > {}), falling back to linear sweep",
                    self.location,
                    self.entities.len(),
                    self.capacity
                );
            }
        }

        for child in &mut self.subregions {
            child.apply_capacity_policy(arena);
        }
    }

    /// Gather candidate collision pairs from this region and its subtree.
    ///
    /// Within a region, members are swept in x order (ranks taken from
    /// the axis orderings) so the scan past each entity stops as soon as
    /// the x gap exceeds any possible radius sum. Surviving pairs get the
    /// bounding-sphere pre-check and the per-entity collision filter
    /// before being emitted. Members sitting on a child's border band are
    /// additionally tested against that child's subtree — redundant work,
    /// bought deliberately to never miss a cross-boundary pair.
    pub fn find_collisions(
        &self,
        arena: &EntityArena,
        lists: &AxisLists,
        pairs: &mut HashSet<CollisionPair>,
    ) {
        self.sweep_members(arena, lists, pairs);

        // Border straddlers vs. child subtrees
        for child in &self.subregions {
            for &id in &self.entities {
                let Some(entity) = arena.get(id) else { continue };
                if position_is_on_border(entity.position, child) {
                    child.test_against_subtree(id, arena, pairs);
                }
            }
        }

        for child in &self.subregions {
            child.find_collisions(arena, lists, pairs);
        }
    }

    /// X-ordered sweep over this region's direct members
    fn sweep_members(
        &self,
        arena: &EntityArena,
        lists: &AxisLists,
        pairs: &mut HashSet<CollisionPair>,
    ) {
        if self.entities.len() < 2 {
            return;
        }

        let mut members: Vec<EntityId> = self.entities.clone();
        members.sort_by_key(|&id| lists.rank(0, id).unwrap_or(usize::MAX));

        let max_radius = members
            .iter()
            .filter_map(|&id| arena.get(id))
            .map(|e| e.collision_radius())
            .fold(0.0f32, f32::max);

        for (i, &id_a) in members.iter().enumerate() {
            let Some(a) = arena.get(id_a) else { continue };
            let window = a.collision_radius() + max_radius;

            for &id_b in &members[i + 1..] {
                let Some(b) = arena.get(id_b) else { continue };
                if b.position.x - a.position.x > window {
                    break;
                }
                if spheres_touch(a.position, a.collision_radius(), b.position, b.collision_radius())
                    && a.should_collide_with(b)
                {
                    pairs.insert(CollisionPair::new(id_a, id_b));
                }
            }
        }
    }

    /// Test one outside entity against every member of this subtree
    fn test_against_subtree(
        &self,
        id: EntityId,
        arena: &EntityArena,
        pairs: &mut HashSet<CollisionPair>,
    ) {
        let Some(entity) = arena.get(id) else { return };

        for &other_id in &self.entities {
            let Some(other) = arena.get(other_id) else { continue };
            if spheres_touch(
                entity.position,
                entity.collision_radius(),
                other.position,
                other.collision_radius(),
            ) && entity.should_collide_with(other)
            {
                pairs.insert(CollisionPair::new(id, other_id));
            }
        }

        for child in &self.subregions {
            child.test_against_subtree(id, arena, pairs);
        }
    }
}

/// Bounding-sphere overlap pre-check
fn spheres_touch(pos_a: Vec3, radius_a: f32, pos_b: Vec3, radius_b: f32) -> bool {
    let radius_sum = radius_a + radius_b;
    (pos_b - pos_a).magnitude_squared() <= radius_sum * radius_sum
}
