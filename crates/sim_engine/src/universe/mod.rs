//! The simulation context
//!
//! A [`Universe`] owns every structure the simulation needs: the entity
//! arena, the axis orderings, the collision-region tree, the collision
//! model cache, the clock, and the outgoing event queue. There is no
//! global instance; the embedding layer creates one, configures its
//! regions, and drives it with [`tick`](Universe::tick).
//!
//! Renderers read [`frame_snapshot`](Universe::frame_snapshot), scripting
//! reads and pokes entities through id lookups and AI messages, and audio
//! consumes `PlaySound` events. None of those surfaces can mutate
//! simulation state mid-tick.

pub mod pipeline;

use std::collections::HashSet;

use log::warn;
use thiserror::Error;

use crate::assets::{MapMeshSource, MeshSource, ModelLibrary};
use crate::config::SimConfig;
use crate::entity::{ArenaError, Entity, EntityArena, EntityId, EntityStatus};
use crate::events::{EventQueue, SimEvent};
use crate::foundation::math::{Aabb, Quat, Vec3};
use crate::foundation::time::UniversalClock;
use crate::spatial::{AxisLists, CollisionRegion};

/// An entity vanishes from rendering beyond its radius times this factor
pub const NO_DRAW_DISTANCE_FACTOR: f32 = 512.0;

/// Fraction of closing speed converted to scrape damage on collision
pub const COLLISION_DAMAGE_FACTOR: f32 = 0.5;

/// Errors raised by universe mutation
#[derive(Error, Debug)]
pub enum UniverseError {
    /// The live-entity cap was reached
    #[error("universe is at its live-entity cap")]
    AtCapacity(#[from] ArenaError),
}

/// Per-entity data handed to the rendering layer each frame
#[derive(Debug, Clone)]
pub struct EntityFrame {
    /// Entity identifier
    pub id: EntityId,
    /// World position
    pub position: Vec3,
    /// World orientation
    pub orientation: Quat,
    /// World-space bounding box
    pub bounding_box: Aabb,
    /// Whether the entity is beyond its draw distance from the viewpoint
    pub culled: bool,
}

/// The simulation context
pub struct Universe {
    config: SimConfig,
    clock: UniversalClock,
    arena: EntityArena,
    axis_lists: AxisLists,
    root_region: CollisionRegion,
    models: ModelLibrary,
    mesh_source: Box<dyn MeshSource>,
    events: EventQueue,
    pending_removal: HashSet<EntityId>,
    in_tick: bool,
}

impl Universe {
    /// Create a universe with no mesh source; every collider degrades to
    /// its bounding sphere. Handy for tests and headless tools.
    pub fn new(config: SimConfig) -> Self {
        Self::with_mesh_source(config, Box::new(MapMeshSource::new()))
    }

    /// Create a universe wired to the resource layer's mesh source
    pub fn with_mesh_source(config: SimConfig, mesh_source: Box<dyn MeshSource>) -> Self {
        Self {
            clock: UniversalClock::new(),
            arena: EntityArena::new(config.max_entities),
            axis_lists: AxisLists::new(),
            root_region: CollisionRegion::universe(&config),
            models: ModelLibrary::new(config.octree_max_depth, config.octree_min_radius),
            mesh_source,
            events: EventQueue::new(),
            pending_removal: HashSet::new(),
            in_tick: false,
            config,
        }
    }

    /// The active configuration
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Current universal time in seconds
    pub fn universal_time(&self) -> f64 {
        self.clock.now()
    }

    /// Number of live entities
    pub fn live_count(&self) -> usize {
        self.arena.len()
    }

    /// The collision-region tree root, for system setup
    pub fn root_region_mut(&mut self) -> &mut CollisionRegion {
        &mut self.root_region
    }

    /// Convenience: add a top-level collision region (typically around a
    /// station or other high-traffic volume)
    pub fn add_collision_region(&mut self, location: Vec3, radius: f32) {
        self.root_region.add_subregion(location, radius);
    }

    /// Tear down the region tree and model cache for a system transition
    pub fn reset_system(&mut self) {
        self.root_region = CollisionRegion::universe(&self.config);
        self.models.clear();
    }

    /// Spawn an entity into the simulation
    pub fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId, UniverseError> {
        entity.spawn_time = self.clock.now();
        let tracked = entity.collidable.is_some() && entity.scan_class.is_collidable();
        let position = entity.position;

        let id = self.arena.insert(entity)?;
        if tracked {
            self.axis_lists.insert(id, position);
            self.root_region.assign(id, position);
        }
        Ok(id)
    }

    /// Remove an entity from the simulation.
    ///
    /// During a tick the removal is deferred to the end-of-tick reap so
    /// in-progress passes never see a half-unlinked entity; outside a
    /// tick it happens immediately.
    pub fn remove_entity(&mut self, id: EntityId) {
        if !self.arena.contains(id) {
            return;
        }
        if self.in_tick {
            if let Some(entity) = self.arena.get_mut(id) {
                entity.status = EntityStatus::Dead;
            }
            self.pending_removal.insert(id);
        } else {
            self.unlink(id);
        }
    }

    /// Look up a live entity; stale ids return `None`
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.arena.get(id)
    }

    /// Mutable lookup; stale ids return `None`
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.arena.get_mut(id)
    }

    /// Queue a message for an entity's AI (processed at its next think)
    pub fn send_ai_message(&mut self, id: EntityId, message: &str) {
        if let Some(ai) = self.arena.get_mut(id).and_then(|e| e.ai.as_mut()) {
            ai.react_to_message(message);
        }
    }

    /// Drain all events queued since the last drain
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.events.drain()
    }

    /// Render-facing view of every live entity, with draw-distance
    /// culling computed against `viewpoint`
    pub fn frame_snapshot(&self, viewpoint: Vec3) -> Vec<EntityFrame> {
        self.arena
            .iter()
            .filter(|(_, e)| e.status != EntityStatus::Dead)
            .map(|(id, e)| {
                let no_draw = e.collision_radius().max(1.0) * NO_DRAW_DISTANCE_FACTOR;
                let distance_sq = (e.position - viewpoint).magnitude_squared();
                EntityFrame {
                    id,
                    position: e.position,
                    orientation: e.orientation,
                    bounding_box: e.bounding_box(),
                    culled: distance_sq > no_draw * no_draw,
                }
            })
            .collect()
    }

    /// Test a world-space line segment against one entity's collision
    /// model. Returns the hit fraction along the segment, or `None`.
    ///
    /// Falls back to the bounding sphere for entities without a mesh
    /// octree.
    pub fn line_hit_entity(&mut self, id: EntityId, v0: Vec3, v1: Vec3) -> Option<f32> {
        let entity = self.arena.get(id)?;
        if !entity.can_collide() {
            return None;
        }

        let inverse = entity.orientation.inverse();
        let local_v0 = inverse * (v0 - entity.position);
        let local_v1 = inverse * (v1 - entity.position);
        let scale = entity.scale;
        let radius = entity.collision_radius();

        let octree = entity
            .collidable
            .as_ref()
            .and_then(|c| c.model.clone())
            .and_then(|model| self.models.octree_for(&model, self.mesh_source.as_ref()));

        match octree {
            Some(octree) => {
                let scaled = if (scale - 1.0).abs() > f32::EPSILON {
                    octree.scaled_by(scale)
                } else {
                    octree.as_ref().clone()
                };
                scaled.hit_by_line(local_v0, local_v1)
            }
            None => segment_sphere_hit(local_v0, local_v1, radius),
        }
    }

    /// Fire an entity's forward weapon along its facing.
    ///
    /// Scans collidable entities within weapon range, takes the nearest
    /// mesh-confirmed hit, applies weapon damage, and queues the
    /// corresponding events. Returns the victim and hit fraction.
    pub fn fire_weapon(&mut self, attacker_id: EntityId) -> Option<(EntityId, f32)> {
        let attacker = self.arena.get(attacker_id)?;
        let armed = attacker.armed.as_ref()?;
        let (range, energy) = (armed.weapon_range, armed.weapon_energy);
        let origin = attacker.position;
        let forward = attacker.orientation * Vec3::z();
        let beam_end = origin + forward * range;

        // Nearest hit among candidates in range
        let candidates: Vec<EntityId> = self
            .arena
            .iter()
            .filter(|&(id, e)| {
                id != attacker_id
                    && e.can_collide()
                    && (e.position - origin).magnitude() <= range + e.collision_radius()
            })
            .map(|(id, _)| id)
            .collect();

        let mut nearest: Option<(EntityId, f32)> = None;
        for id in candidates {
            if let Some(fraction) = self.line_hit_entity(id, origin, beam_end) {
                if nearest.map_or(true, |(_, best)| fraction < best) {
                    nearest = Some((id, fraction));
                }
            }
        }

        let (victim_id, fraction) = nearest?;
        self.events.push(SimEvent::PlaySound {
            name: "weapon_hit".to_string(),
        });
        self.apply_damage(victim_id, energy, Some(attacker_id));
        Some((victim_id, fraction))
    }

    /// Apply energy damage with full event bookkeeping
    pub fn apply_damage(&mut self, id: EntityId, amount: f32, from: Option<EntityId>) {
        let Some(entity) = self.arena.get_mut(id) else {
            return;
        };
        let died = entity.take_energy_damage(amount, from);
        let low_energy = entity.energy < entity.max_energy * 0.25;
        if let Some(ai) = entity.ai.as_mut() {
            ai.react_to_message("ATTACKED");
            if low_energy && !died {
                ai.react_to_message("ENERGY_LOW");
            }
        }
        self.events.push(SimEvent::Damaged { id, amount, from });
        if died {
            self.events.push(SimEvent::Destroyed { id });
            self.mark_dead(id);
        }
    }

    /// Mark an entity dead and schedule it for removal
    pub(crate) fn mark_dead(&mut self, id: EntityId) {
        if let Some(entity) = self.arena.get_mut(id) {
            entity.status = EntityStatus::Dead;
        }
        if self.in_tick {
            self.pending_removal.insert(id);
        } else {
            self.unlink(id);
        }
    }

    /// Unlink an entity from every structure, then release its slot.
    /// The region lists are rebuilt from the arena each tick, so only
    /// the axis orderings need patching here.
    pub(crate) fn unlink(&mut self, id: EntityId) {
        self.axis_lists.remove(id);
        if self.arena.remove(id).is_none() {
            warn!("unlink of stale entity id {id:?}");
        }
    }
}

/// Segment-vs-origin-sphere hit fraction, the degraded collision model
fn segment_sphere_hit(v0: Vec3, v1: Vec3, radius: f32) -> Option<f32> {
    let d = v1 - v0;
    let a = d.magnitude_squared();
    if a <= f32::EPSILON {
        return None;
    }
    let b = 2.0 * v0.dot(&d);
    let c = v0.magnitude_squared() - radius * radius;
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let t0 = (-b - sqrt_d) / (2.0 * a);
    let t1 = (-b + sqrt_d) / (2.0 * a);
    let t = if t0 >= 0.0 { t0 } else { t1 };
    (0.0..=1.0).contains(&t).then_some(t.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Armed, Collidable, Movable};

    fn small_config() -> SimConfig {
        SimConfig {
            max_entities: 32,
            ..Default::default()
        }
    }

    fn ship_at(position: Vec3, radius: f32) -> Entity {
        Entity::builder(position)
            .collidable(Collidable::sphere(radius))
            .movable(Movable::default())
            .energy(100.0)
            .build()
    }

    #[test]
    fn add_entity_tracks_collidables() {
        let mut universe = Universe::new(small_config());
        let id = universe.add_entity(ship_at(Vec3::zeros(), 10.0)).unwrap();
        assert_eq!(universe.live_count(), 1);
        assert!(universe.entity(id).is_some());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut universe = Universe::new(SimConfig {
            max_entities: 1,
            ..Default::default()
        });
        universe.add_entity(ship_at(Vec3::zeros(), 1.0)).unwrap();
        assert!(matches!(
            universe.add_entity(ship_at(Vec3::zeros(), 1.0)),
            Err(UniverseError::AtCapacity(_))
        ));
    }

    #[test]
    fn remove_outside_tick_is_immediate() {
        let mut universe = Universe::new(small_config());
        let id = universe.add_entity(ship_at(Vec3::zeros(), 10.0)).unwrap();
        universe.remove_entity(id);
        assert_eq!(universe.live_count(), 0);
        assert!(universe.entity(id).is_none());
    }

    #[test]
    fn snapshot_culls_by_draw_distance() {
        let mut universe = Universe::new(small_config());
        universe.add_entity(ship_at(Vec3::zeros(), 1.0)).unwrap();
        universe
            .add_entity(ship_at(Vec3::new(1.0e6, 0.0, 0.0), 1.0))
            .unwrap();

        let frames = universe.frame_snapshot(Vec3::zeros());
        assert_eq!(frames.len(), 2);
        let near = frames.iter().find(|f| f.position.x == 0.0).unwrap();
        let far = frames.iter().find(|f| f.position.x != 0.0).unwrap();
        assert!(!near.culled);
        assert!(far.culled);
    }

    #[test]
    fn line_hit_uses_sphere_fallback() {
        let mut universe = Universe::new(small_config());
        let id = universe
            .add_entity(ship_at(Vec3::new(50.0, 0.0, 0.0), 10.0))
            .unwrap();

        let hit = universe.line_hit_entity(id, Vec3::zeros(), Vec3::new(100.0, 0.0, 0.0));
        // Sphere surface at x = 40: fraction 0.4
        let fraction = hit.expect("beam through the sphere must hit");
        assert!((fraction - 0.4).abs() < 1e-4);

        let miss = universe.line_hit_entity(id, Vec3::zeros(), Vec3::new(0.0, 100.0, 0.0));
        assert!(miss.is_none());
    }

    #[test]
    fn fire_weapon_damages_nearest_target() {
        let mut universe = Universe::new(small_config());
        let attacker = universe
            .add_entity(
                Entity::builder(Vec3::zeros())
                    .collidable(Collidable::sphere(5.0))
                    .armed(Armed {
                        weapon_energy: 30.0,
                        weapon_range: 1000.0,
                    })
                    .build(),
            )
            .unwrap();
        // Forward is +Z
        let near = universe
            .add_entity(ship_at(Vec3::new(0.0, 0.0, 100.0), 10.0))
            .unwrap();
        let far = universe
            .add_entity(ship_at(Vec3::new(0.0, 0.0, 300.0), 10.0))
            .unwrap();

        let (victim, _) = universe.fire_weapon(attacker).expect("target in the beam");
        assert_eq!(victim, near);
        assert_eq!(universe.entity(near).unwrap().energy, 70.0);
        assert_eq!(universe.entity(far).unwrap().energy, 100.0);

        let events = universe.drain_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::Damaged { id, .. } if *id == near)));
    }
}
