//! Simulated entities and their capability components
//!
//! An [`Entity`] is a flat record of the state every simulated object
//! carries: transform, energy, status, scan class. Everything an entity
//! can optionally *do* — move, collide, think, shoot — is an orthogonal
//! capability component selected per instance rather than a subclass.

pub mod arena;

pub use arena::{ArenaError, EntityArena, EntityId};

use bitflags::bitflags;

use crate::ai::AiState;
use crate::foundation::math::{Aabb, Quat, Vec3};

bitflags! {
    /// Per-tick bookkeeping bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntityFlags: u8 {
        /// Position changed during the last Advance pass
        const MOVED = 1 << 0;
        /// Orientation changed during the last Advance pass
        const ROTATED = 1 << 1;
        /// A collision was dispatched against this entity this tick
        const COLLIDED = 1 << 2;
        /// Excluded from collision testing until cleared. Set by the
        /// embedding layer, e.g. while a ship overlaps the station that
        /// just launched it.
        const CHECK_FILTERED = 1 << 3;
    }
}

/// Lifecycle status of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Simulated but not flying (effects, beacons)
    Active,
    /// Flying free in the system
    InFlight,
    /// Docked inside a station; removed from collision checks
    Docked,
    /// On approach inside a station's docking volume
    Docking,
    /// Emerging from a station launch bay
    Launching,
    /// Held in a cargo scoop beam
    BeingScooped,
    /// Visual-only effect entity
    Effect,
    /// Marked dead this tick; reaped at end of tick
    Dead,
}

/// Scanner category, which doubles as the collision-filtering tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanClass {
    /// Ordinary traffic
    Neutral,
    /// Stations and other dockables
    Station,
    /// Cargo pods and scoopables
    Cargo,
    /// Live missiles
    Missile,
    /// Asteroids and boulders
    Rock,
    /// Space mines
    Mine,
    /// Navigation buoys
    Buoy,
    /// Planets and suns
    Planet,
    /// The player's ship
    Player,
    /// Police vessels
    Police,
    /// Military vessels
    Military,
    /// Not scannable and not collidable (dust, markers)
    NoDraw,
}

impl ScanClass {
    /// Whether this class participates in collision testing at all
    pub fn is_collidable(self) -> bool {
        self != Self::NoDraw
    }
}

/// Movement capability: linear and angular velocity
#[derive(Debug, Clone, Default)]
pub struct Movable {
    /// Linear velocity in world units per second
    pub velocity: Vec3,
    /// Angular velocity as axis * radians per second
    pub angular_velocity: Vec3,
    /// Maximum speed limit (0 = no limit)
    pub max_speed: f32,
}

impl Movable {
    /// A mover with an initial velocity and no speed cap
    pub fn with_velocity(velocity: Vec3) -> Self {
        Self {
            velocity,
            ..Default::default()
        }
    }
}

/// Collision capability: bounding radius and optional mesh model
#[derive(Debug, Clone)]
pub struct Collidable {
    /// Bounding-sphere radius in world units
    pub radius: f32,
    /// Model name keying the shared octree cache; `None` means
    /// sphere-only collision
    pub model: Option<String>,
}

impl Collidable {
    /// Sphere-only collider
    pub fn sphere(radius: f32) -> Self {
        Self {
            radius,
            model: None,
        }
    }

    /// Mesh collider backed by the named model's octree
    pub fn mesh(radius: f32, model: impl Into<String>) -> Self {
        Self {
            radius,
            model: Some(model.into()),
        }
    }
}

/// Weapons capability
#[derive(Debug, Clone)]
pub struct Armed {
    /// Damage delivered per weapon hit
    pub weapon_energy: f32,
    /// Maximum weapon range in world units
    pub weapon_range: f32,
}

/// A simulated world object
///
/// Construction goes through [`EntityBuilder`]; the id field is assigned
/// when the entity enters an [`EntityArena`].
#[derive(Debug)]
pub struct Entity {
    /// Arena identifier, set at insertion time
    pub id: EntityId,
    /// World position
    pub position: Vec3,
    /// World orientation
    pub orientation: Quat,
    /// Uniform render/collision scale
    pub scale: f32,
    /// Lifecycle status
    pub status: EntityStatus,
    /// Scanner / collision-filter category
    pub scan_class: ScanClass,
    /// Per-tick bookkeeping bits
    pub flags: EntityFlags,
    /// Current hull energy
    pub energy: f32,
    /// Energy ceiling
    pub max_energy: f32,
    /// Mass in tonnes, used for collision damage scaling
    pub mass: f32,
    /// Spawning entity, if any. A relation by lookup: the owner may die
    /// first and the reference simply goes stale.
    pub owner: Option<EntityId>,
    /// Universal time at spawn
    pub spawn_time: f64,
    /// Movement capability
    pub movable: Option<Movable>,
    /// Collision capability
    pub collidable: Option<Collidable>,
    /// Behaviour capability
    pub ai: Option<AiState>,
    /// Weapons capability
    pub armed: Option<Armed>,
}

impl Entity {
    /// Start building an entity at a position
    pub fn builder(position: Vec3) -> EntityBuilder {
        EntityBuilder::new(position)
    }

    /// Current linear velocity (zero for immovable entities)
    pub fn velocity(&self) -> Vec3 {
        self.movable.as_ref().map_or_else(Vec3::zeros, |m| m.velocity)
    }

    /// Current speed in world units per second
    pub fn speed(&self) -> f32 {
        self.velocity().magnitude()
    }

    /// Bounding-sphere radius scaled to this instance (zero without a
    /// collider)
    pub fn collision_radius(&self) -> f32 {
        self.collidable.as_ref().map_or(0.0, |c| c.radius * self.scale)
    }

    /// Axis-aligned bounding box derived from the collision sphere
    pub fn bounding_box(&self) -> Aabb {
        let r = self.collision_radius();
        Aabb::from_center_extents(self.position, Vec3::new(r, r, r))
    }

    /// Whether this entity takes part in collision testing right now.
    /// Docked and dead entities are out of the world; effects pass
    /// through everything.
    pub fn can_collide(&self) -> bool {
        self.collidable.is_some()
            && self.scan_class.is_collidable()
            && !self.flags.contains(EntityFlags::CHECK_FILTERED)
            && !matches!(
                self.status,
                EntityStatus::Dead | EntityStatus::Docked | EntityStatus::Effect
            )
    }

    /// Whether a collision between this entity and `other` should be
    /// tested at all. Projectiles and other spawned objects never
    /// collide with their owner, in either direction.
    pub fn should_collide_with(&self, other: &Entity) -> bool {
        if !self.can_collide() || !other.can_collide() {
            return false;
        }
        if self.owner == Some(other.id) || other.owner == Some(self.id) {
            return false;
        }
        true
    }

    /// Apply energy damage from an attacker. Returns `true` if this blow
    /// destroyed the entity; the caller is responsible for queueing the
    /// death for reaping.
    pub fn take_energy_damage(&mut self, amount: f32, _from: Option<EntityId>) -> bool {
        if self.status == EntityStatus::Dead {
            return false;
        }
        self.energy -= amount;
        if self.energy <= 0.0 {
            self.energy = 0.0;
            self.status = EntityStatus::Dead;
            return true;
        }
        false
    }
}

/// Builder for [`Entity`]
#[derive(Debug)]
pub struct EntityBuilder {
    entity: Entity,
}

impl EntityBuilder {
    fn new(position: Vec3) -> Self {
        Self {
            entity: Entity {
                id: EntityId::default(),
                position,
                orientation: Quat::identity(),
                scale: 1.0,
                status: EntityStatus::InFlight,
                scan_class: ScanClass::Neutral,
                flags: EntityFlags::empty(),
                energy: 100.0,
                max_energy: 100.0,
                mass: 1.0,
                owner: None,
                spawn_time: 0.0,
                movable: None,
                collidable: None,
                ai: None,
                armed: None,
            },
        }
    }

    /// Set the orientation
    pub fn orientation(mut self, orientation: Quat) -> Self {
        self.entity.orientation = orientation;
        self
    }

    /// Set the uniform scale
    pub fn scale(mut self, scale: f32) -> Self {
        self.entity.scale = scale;
        self
    }

    /// Set the lifecycle status
    pub fn status(mut self, status: EntityStatus) -> Self {
        self.entity.status = status;
        self
    }

    /// Set the scan class
    pub fn scan_class(mut self, scan_class: ScanClass) -> Self {
        self.entity.scan_class = scan_class;
        self
    }

    /// Set energy and energy ceiling together
    pub fn energy(mut self, energy: f32) -> Self {
        self.entity.energy = energy;
        self.entity.max_energy = energy;
        self
    }

    /// Set the mass
    pub fn mass(mut self, mass: f32) -> Self {
        self.entity.mass = mass;
        self
    }

    /// Set the owning entity
    pub fn owner(mut self, owner: EntityId) -> Self {
        self.entity.owner = Some(owner);
        self
    }

    /// Attach the movement capability
    pub fn movable(mut self, movable: Movable) -> Self {
        self.entity.movable = Some(movable);
        self
    }

    /// Attach the collision capability
    pub fn collidable(mut self, collidable: Collidable) -> Self {
        self.entity.collidable = Some(collidable);
        self
    }

    /// Attach the behaviour capability
    pub fn ai(mut self, ai: AiState) -> Self {
        self.entity.ai = Some(ai);
        self
    }

    /// Attach the weapons capability
    pub fn armed(mut self, armed: Armed) -> Self {
        self.entity.armed = Some(armed);
        self
    }

    /// Finish building
    pub fn build(self) -> Entity {
        self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ship(position: Vec3) -> Entity {
        Entity::builder(position)
            .collidable(Collidable::sphere(10.0))
            .movable(Movable::default())
            .build()
    }

    #[test]
    fn builder_defaults() {
        let entity = ship(Vec3::zeros());
        assert_eq!(entity.status, EntityStatus::InFlight);
        assert_eq!(entity.scan_class, ScanClass::Neutral);
        assert_eq!(entity.collision_radius(), 10.0);
        assert!(entity.can_collide());
    }

    #[test]
    fn scale_applies_to_collision_radius() {
        let entity = Entity::builder(Vec3::zeros())
            .collidable(Collidable::sphere(10.0))
            .scale(2.0)
            .build();
        assert_eq!(entity.collision_radius(), 20.0);
    }

    #[test]
    fn docked_entities_do_not_collide() {
        let mut entity = ship(Vec3::zeros());
        entity.status = EntityStatus::Docked;
        assert!(!entity.can_collide());
    }

    #[test]
    fn no_draw_entities_do_not_collide() {
        let mut entity = ship(Vec3::zeros());
        entity.scan_class = ScanClass::NoDraw;
        assert!(!entity.can_collide());
    }

    #[test]
    fn check_filter_flag_exempts_from_collision() {
        let mut entity = ship(Vec3::zeros());
        entity.flags.insert(EntityFlags::CHECK_FILTERED);
        assert!(!entity.can_collide());
        entity.flags.remove(EntityFlags::CHECK_FILTERED);
        assert!(entity.can_collide());
    }

    #[test]
    fn projectile_ignores_its_owner() {
        let mut arena = EntityArena::new(16);
        let shooter = arena.insert(ship(Vec3::zeros())).unwrap();

        let missile = Entity::builder(Vec3::new(5.0, 0.0, 0.0))
            .scan_class(ScanClass::Missile)
            .collidable(Collidable::sphere(1.0))
            .owner(shooter)
            .build();
        let missile = arena.insert(missile).unwrap();

        let (a, b) = arena.get_pair(shooter, missile).unwrap();
        assert!(!a.should_collide_with(b));
    }

    #[test]
    fn damage_kills_at_zero_energy() {
        let mut entity = ship(Vec3::zeros());
        assert!(!entity.take_energy_damage(40.0, None));
        assert_eq!(entity.energy, 60.0);

        assert!(entity.take_energy_damage(80.0, None));
        assert_eq!(entity.status, EntityStatus::Dead);
        assert_eq!(entity.energy, 0.0);

        // Already dead: further damage is a no-op
        assert!(!entity.take_energy_damage(10.0, None));
    }

    #[test]
    fn bounding_box_tracks_position() {
        let entity = ship(Vec3::new(100.0, 0.0, 0.0));
        let bb = entity.bounding_box();
        assert_eq!(bb.min, Vec3::new(90.0, -10.0, -10.0));
        assert_eq!(bb.max, Vec3::new(110.0, 10.0, 10.0));
    }
}
