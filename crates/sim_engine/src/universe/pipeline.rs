//! The per-tick update/collision pipeline
//!
//! One tick runs a fixed stage sequence:
//! Advance → Relink → Broad-phase → Narrow-phase → Think → Dispatch →
//! Reap. Every Advance completes before any collision test starts, so
//! the collision stages see one consistent snapshot of the world, and
//! removal requested during Dispatch is deferred to Reap so no pass ever
//! iterates over a half-unlinked entity.
//!
//! The whole sequence runs on the single simulation thread. Nothing here
//! propagates an error across the tick boundary: per-entity trouble is
//! logged and at worst removes the offending entity.

use std::collections::HashSet;

use log::trace;

use super::{Universe, COLLISION_DAMAGE_FACTOR};
use crate::entity::{EntityFlags, EntityId, EntityStatus};
use crate::events::SimEvent;
use crate::foundation::math::{Basis, Vec3};
use crate::spatial::region::CollisionPair;

impl Universe {
    /// Advance the simulation by `delta_t` seconds
    pub fn tick(&mut self, delta_t: f64) {
        self.in_tick = true;
        self.clock.advance(delta_t);
        let now = self.clock.now();

        self.advance(delta_t as f32);
        self.relink();
        self.rebuild_regions();
        let candidates = self.broad_phase();
        let collisions = self.narrow_phase(&candidates);
        self.think(now);
        self.dispatch(&collisions);
        self.reap();

        #[cfg(debug_assertions)]
        {
            let interval = self.config.integrity_check_interval.max(1);
            if self.clock.tick_count() % interval == 0 {
                if let Err(message) = self.axis_lists.verify_integrity() {
                    panic!("spatial ordering corrupted: {message}");
                }
            }
        }

        self.in_tick = false;
    }

    /// Integrate position and orientation for every live entity
    fn advance(&mut self, dt: f32) {
        for (_, entity) in self.arena.iter_mut() {
            entity
                .flags
                .remove(EntityFlags::MOVED | EntityFlags::ROTATED | EntityFlags::COLLIDED);

            if matches!(entity.status, EntityStatus::Dead | EntityStatus::Docked) {
                continue;
            }

            let (velocity, angular) = {
                let Some(movable) = entity.movable.as_mut() else {
                    continue;
                };
                if movable.max_speed > 0.0 {
                    let speed = movable.velocity.magnitude();
                    if speed > movable.max_speed {
                        movable.velocity *= movable.max_speed / speed;
                    }
                }
                (movable.velocity, movable.angular_velocity)
            };

            let displacement = velocity * dt;
            if displacement != Vec3::zeros() {
                entity.position += displacement;
                entity.flags.insert(EntityFlags::MOVED);
            }

            let rate = angular.magnitude();
            if rate > f32::EPSILON {
                let spin = crate::foundation::math::Quat::from_axis_angle(
                    &nalgebra::Unit::new_normalize(angular),
                    rate * dt,
                );
                entity.orientation = spin * entity.orientation;
                entity.flags.insert(EntityFlags::ROTATED);
            }
        }
    }

    /// Re-sort moved entities within the axis orderings
    fn relink(&mut self) {
        let moved: Vec<(EntityId, Vec3)> = self
            .arena
            .iter()
            .filter(|&(id, e)| {
                e.flags.contains(EntityFlags::MOVED) && self.axis_lists.contains(id)
            })
            .map(|(id, e)| (id, e.position))
            .collect();

        for (id, position) in moved {
            self.axis_lists.update(id, position);
        }
    }

    /// Reassign every collidable entity to its region (once per tick)
    fn rebuild_regions(&mut self) {
        self.root_region.clear_entity_lists();
        for (id, entity) in self.arena.iter() {
            if entity.can_collide() {
                self.root_region.assign(id, entity.position);
            }
        }
        self.root_region.apply_capacity_policy(&self.arena);
    }

    /// Region-driven candidate gathering with sphere pre-checks
    fn broad_phase(&self) -> HashSet<CollisionPair> {
        let mut pairs = HashSet::new();
        self.root_region
            .find_collisions(&self.arena, &self.axis_lists, &mut pairs);
        trace!("broad phase: {} candidate pairs", pairs.len());
        pairs
    }

    /// Octree-vs-octree confirmation for candidates whose entities carry
    /// mesh collision models. An entity without a usable octree keeps its
    /// bounding-sphere verdict — which the broad phase already delivered.
    fn narrow_phase(&mut self, candidates: &HashSet<CollisionPair>) -> Vec<CollisionPair> {
        let mut confirmed = Vec::with_capacity(candidates.len());

        for &pair in candidates {
            let (Some(a), Some(b)) = (self.arena.get(pair.a), self.arena.get(pair.b)) else {
                continue;
            };

            let model_a = a.collidable.as_ref().and_then(|c| c.model.clone());
            let model_b = b.collidable.as_ref().and_then(|c| c.model.clone());
            let (pos_a, orient_a, scale_a) = (a.position, a.orientation, a.scale);
            let (pos_b, orient_b, scale_b) = (b.position, b.orientation, b.scale);

            let octree_a =
                model_a.and_then(|m| self.models.octree_for(&m, self.mesh_source.as_ref()));
            let octree_b =
                model_b.and_then(|m| self.models.octree_for(&m, self.mesh_source.as_ref()));

            let hit = match (octree_a, octree_b) {
                (Some(octree_a), Some(octree_b)) => {
                    // Shared frame: entity A's local space
                    let origin = orient_a.inverse() * (pos_b - pos_a);
                    let ijk = Basis::relative(&orient_a, &orient_b);
                    octree_a.hit_by_octree_scaled(&octree_b, origin, &ijk, scale_a, scale_b)
                }
                // At least one side degraded to its bounding sphere
                _ => true,
            };

            if hit {
                confirmed.push(pair);
            }
        }

        confirmed
    }

    /// Run AI think pulses that have come due.
    ///
    /// Runs on the post-Advance, pre-Dispatch snapshot: positions are
    /// settled for this tick, and any messages Dispatch queues will be
    /// seen at the entity's next pulse.
    fn think(&mut self, now: f64) {
        for id in self.arena.ids() {
            let Some(entity) = self.arena.get_mut(id) else {
                continue;
            };
            if entity.status == EntityStatus::Dead {
                continue;
            }
            let Some(ai) = entity.ai.as_mut() else {
                continue;
            };
            if !ai.is_due(now) {
                continue;
            }

            let directives = ai.think(now);
            for directive in directives {
                match directive {
                    crate::ai::AiDirective::PlaySound(name) => {
                        self.events.push(SimEvent::PlaySound { name });
                    }
                    crate::ai::AiDirective::External(action) => {
                        self.events.push(SimEvent::AiAction { id, action });
                    }
                }
            }
        }
    }

    /// Deliver collision consequences: scrape damage scaled by closing
    /// speed and mass ratio, AI notification, and death marking. Removal
    /// itself waits for Reap.
    fn dispatch(&mut self, collisions: &[CollisionPair]) {
        for pair in collisions {
            let Some((a, b)) = self.arena.get_pair(pair.a, pair.b) else {
                continue;
            };
            // A partner already destroyed by an earlier pair this tick
            // no longer collides
            if a.status == EntityStatus::Dead || b.status == EntityStatus::Dead {
                continue;
            }

            a.flags.insert(EntityFlags::COLLIDED);
            b.flags.insert(EntityFlags::COLLIDED);

            let closing_speed = (a.velocity() - b.velocity()).magnitude();
            let total_mass = (a.mass + b.mass).max(f32::EPSILON);
            let damage_to_a = COLLISION_DAMAGE_FACTOR * closing_speed * (b.mass / total_mass);
            let damage_to_b = COLLISION_DAMAGE_FACTOR * closing_speed * (a.mass / total_mass);

            let mut died_a = false;
            let mut died_b = false;
            if closing_speed > f32::EPSILON {
                died_a = a.take_energy_damage(damage_to_a, Some(pair.b));
                died_b = b.take_energy_damage(damage_to_b, Some(pair.a));
            }

            if let Some(ai) = a.ai.as_mut() {
                ai.react_to_message("COLLISION");
            }
            if let Some(ai) = b.ai.as_mut() {
                ai.react_to_message("COLLISION");
            }

            self.events.push(SimEvent::Collision {
                a: pair.a,
                b: pair.b,
            });
            if closing_speed > f32::EPSILON {
                self.events.push(SimEvent::PlaySound {
                    name: "scrape".to_string(),
                });
                self.events.push(SimEvent::Damaged {
                    id: pair.a,
                    amount: damage_to_a,
                    from: Some(pair.b),
                });
                self.events.push(SimEvent::Damaged {
                    id: pair.b,
                    amount: damage_to_b,
                    from: Some(pair.a),
                });
            }

            if died_a {
                self.events.push(SimEvent::Destroyed { id: pair.a });
                self.pending_removal.insert(pair.a);
            }
            if died_b {
                self.events.push(SimEvent::Destroyed { id: pair.b });
                self.pending_removal.insert(pair.b);
            }
        }
    }

    /// Unlink everything marked dead this tick and release identifiers
    fn reap(&mut self) {
        // Catch entities killed by routes that bypass mark_dead (a
        // scripted status change, for instance)
        let dead: Vec<EntityId> = self
            .arena
            .iter()
            .filter(|(_, e)| e.status == EntityStatus::Dead)
            .map(|(id, _)| id)
            .collect();
        for id in dead {
            self.pending_removal.insert(id);
        }

        let pending: Vec<EntityId> = self.pending_removal.drain().collect();
        for id in pending {
            self.unlink(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiState, StateMachine, GLOBAL_STATE, UPDATE_MESSAGE};
    use crate::assets::MapMeshSource;
    use crate::config::SimConfig;
    use crate::entity::{Collidable, Entity, Movable};
    use crate::geometry::box_geometry;
    use std::sync::Arc;

    fn config() -> SimConfig {
        SimConfig {
            max_entities: 64,
            ..Default::default()
        }
    }

    fn drifter(position: Vec3, velocity: Vec3, radius: f32) -> Entity {
        Entity::builder(position)
            .collidable(Collidable::sphere(radius))
            .movable(Movable::with_velocity(velocity))
            .energy(100.0)
            .mass(10.0)
            .build()
    }

    #[test]
    fn advance_integrates_position() {
        let mut universe = Universe::new(config());
        let id = universe
            .add_entity(drifter(Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0), 1.0))
            .unwrap();

        universe.tick(0.5);
        let entity = universe.entity(id).unwrap();
        assert_eq!(entity.position, Vec3::new(5.0, 0.0, 0.0));
        assert!(entity.flags.contains(EntityFlags::MOVED));
    }

    #[test]
    fn docked_entities_do_not_advance() {
        let mut universe = Universe::new(config());
        let mut entity = drifter(Vec3::zeros(), Vec3::new(10.0, 0.0, 0.0), 1.0);
        entity.status = EntityStatus::Docked;
        let id = universe.add_entity(entity).unwrap();

        universe.tick(0.5);
        assert_eq!(universe.entity(id).unwrap().position, Vec3::zeros());
    }

    #[test]
    fn max_speed_caps_velocity() {
        let mut universe = Universe::new(config());
        let mut mover = Movable::with_velocity(Vec3::new(100.0, 0.0, 0.0));
        mover.max_speed = 20.0;
        let id = universe
            .add_entity(
                Entity::builder(Vec3::zeros())
                    .collidable(Collidable::sphere(1.0))
                    .movable(mover)
                    .build(),
            )
            .unwrap();

        universe.tick(1.0);
        assert_eq!(universe.entity(id).unwrap().position.x, 20.0);
    }

    #[test]
    fn colliding_pair_emits_collision_and_damage() {
        let mut universe = Universe::new(config());
        let a = universe
            .add_entity(drifter(Vec3::new(0.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), 10.0))
            .unwrap();
        let b = universe
            .add_entity(drifter(Vec3::new(12.0, 0.0, 0.0), Vec3::zeros(), 10.0))
            .unwrap();

        universe.tick(0.1);
        let events = universe.drain_events();

        assert!(events.iter().any(
            |e| matches!(e, SimEvent::Collision { a: ea, b: eb } if (*ea, *eb) == (a.min(b), a.max(b)))
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, SimEvent::Damaged { .. })));
        // Scrape damage landed on both hulls
        assert!(universe.entity(a).unwrap().energy < 100.0);
        assert!(universe.entity(b).unwrap().energy < 100.0);
    }

    #[test]
    fn distant_pair_emits_nothing() {
        let mut universe = Universe::new(config());
        universe
            .add_entity(drifter(Vec3::zeros(), Vec3::zeros(), 10.0))
            .unwrap();
        universe
            .add_entity(drifter(Vec3::new(100.0, 0.0, 0.0), Vec3::zeros(), 10.0))
            .unwrap();

        universe.tick(0.1);
        assert!(universe.drain_events().is_empty());
    }

    #[test]
    fn mesh_collision_requires_octree_overlap() {
        // Bounding spheres overlap at 6.0 but the actual 1-unit cubes do
        // not; the narrow phase must clear the pair
        let mut source = MapMeshSource::new();
        source.insert("cube", box_geometry(Vec3::new(1.0, 1.0, 1.0)));
        let mut universe = Universe::with_mesh_source(config(), Box::new(source));

        let spawn = |universe: &mut Universe, x: f32| {
            universe
                .add_entity(
                    Entity::builder(Vec3::new(x, 0.0, 0.0))
                        .collidable(Collidable::mesh(5.0, "cube"))
                        .movable(Movable::with_velocity(Vec3::new(0.01, 0.0, 0.0)))
                        .mass(10.0)
                        .build(),
                )
                .unwrap()
        };
        spawn(&mut universe, 0.0);
        spawn(&mut universe, 6.0);

        universe.tick(0.1);
        let events = universe.drain_events();
        assert!(
            !events.iter().any(|e| matches!(e, SimEvent::Collision { .. })),
            "sphere-overlapping but mesh-separated entities must not collide"
        );
    }

    #[test]
    fn mesh_collision_fires_when_octrees_touch() {
        let mut source = MapMeshSource::new();
        source.insert("cube", box_geometry(Vec3::new(1.0, 1.0, 1.0)));
        let mut universe = Universe::with_mesh_source(config(), Box::new(source));

        for x in [0.0f32, 1.5] {
            universe
                .add_entity(
                    Entity::builder(Vec3::new(x, 0.0, 0.0))
                        .collidable(Collidable::mesh(5.0, "cube"))
                        .movable(Movable::with_velocity(Vec3::new(0.01 * x, 0.0, 0.0)))
                        .mass(10.0)
                        .build(),
                )
                .unwrap();
        }

        universe.tick(0.1);
        let events = universe.drain_events();
        assert!(events.iter().any(|e| matches!(e, SimEvent::Collision { .. })));
    }

    #[test]
    fn think_fires_once_per_interval() {
        let mut universe = Universe::new(config());

        let mut machine = StateMachine::new("beacon");
        machine.add_handler(GLOBAL_STATE, UPDATE_MESSAGE, vec!["blink".into()]);
        let ai = AiState::new(Arc::new(machine), universe.universal_time(), 0.125);

        let id = universe
            .add_entity(
                Entity::builder(Vec3::zeros())
                    .collidable(Collidable::sphere(1.0))
                    .ai(ai)
                    .build(),
            )
            .unwrap();

        let blink_count = |events: &[SimEvent]| {
            events
                .iter()
                .filter(
                    |e| matches!(e, SimEvent::AiAction { id: eid, action } if *eid == id && action == "blink"),
                )
                .count()
        };

        // t = 0.1: pulse due (scheduled at spawn time) fires once
        universe.tick(0.1);
        assert_eq!(blink_count(&universe.drain_events()), 1);

        // t = 0.2: next pulse is at 0.225, nothing fires
        universe.tick(0.1);
        assert_eq!(blink_count(&universe.drain_events()), 0);

        // t = 0.3: past 0.225, fires exactly once more
        universe.tick(0.1);
        assert_eq!(blink_count(&universe.drain_events()), 1);
    }

    #[test]
    fn fast_mover_crossing_region_boundary_still_collides() {
        let mut config = config();
        config.region_border_margin = 500.0;
        let mut universe = Universe::new(config);
        universe.add_collision_region(Vec3::new(1000.0, 0.0, 0.0), 400.0);

        // Target sits just inside the region's inner radius
        universe
            .add_entity(drifter(Vec3::new(605.0, 0.0, 0.0), Vec3::zeros(), 10.0))
            .unwrap();
        // The mover closes at 1000 u/s and ends the tick in the border
        // band, still outside the inner radius but touching the target
        universe
            .add_entity(drifter(
                Vec3::new(490.0, 0.0, 0.0),
                Vec3::new(1000.0, 0.0, 0.0),
                10.0,
            ))
            .unwrap();

        universe.tick(0.1);
        let events = universe.drain_events();
        assert!(
            events.iter().any(|e| matches!(e, SimEvent::Collision { .. })),
            "pair split across a region boundary was missed"
        );
    }

    #[test]
    fn fatal_collision_reaps_exactly_once() {
        let mut universe = Universe::new(config());
        // The fragile entity dies from a single scrape
        let sturdy = universe
            .add_entity(drifter(Vec3::zeros(), Vec3::new(50.0, 0.0, 0.0), 10.0))
            .unwrap();
        let mut fragile = drifter(Vec3::new(12.0, 0.0, 0.0), Vec3::zeros(), 10.0);
        fragile.energy = 0.5;
        fragile.max_energy = 0.5;
        let fragile = universe.add_entity(fragile).unwrap();

        universe.tick(0.1);

        let events = universe.drain_events();
        let destroyed: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SimEvent::Destroyed { id } if *id == fragile))
            .collect();
        assert_eq!(destroyed.len(), 1, "one death, one Destroyed event");

        assert!(universe.entity(fragile).is_none(), "reaped this tick");
        assert!(universe.entity(sturdy).is_some());

        // The next tick must not touch the dangling id
        universe.tick(0.1);
        assert!(universe.entity(fragile).is_none());
        assert_eq!(universe.live_count(), 1);
    }

    #[test]
    fn removal_mid_tick_is_deferred_but_complete() {
        let mut universe = Universe::new(config());
        let id = universe
            .add_entity(drifter(Vec3::zeros(), Vec3::zeros(), 10.0))
            .unwrap();

        // Simulate a dispatch-time removal request
        universe.in_tick = true;
        universe.remove_entity(id);
        assert!(universe.entity(id).is_some(), "removal deferred during tick");
        universe.reap();
        universe.in_tick = false;

        assert!(universe.entity(id).is_none());
        assert_eq!(universe.live_count(), 0);
    }

    #[test]
    fn axis_lists_stay_sorted_across_many_ticks() {
        let mut universe = Universe::new(config());
        for i in 0..12 {
            let angle = (i as f32) * 0.5;
            universe
                .add_entity(drifter(
                    Vec3::new(angle.cos() * 200.0, angle.sin() * 200.0, i as f32 * 10.0),
                    Vec3::new(angle.sin() * 30.0, angle.cos() * 20.0, 10.0),
                    2.0,
                ))
                .unwrap();
        }

        for _ in 0..50 {
            universe.tick(0.05);
        }
        universe.axis_lists.verify_integrity().unwrap();
    }
}
