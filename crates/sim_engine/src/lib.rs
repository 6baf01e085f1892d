//! # Sim Engine
//!
//! Entity simulation and collision core for a real-time 3D space game.
//!
//! ## Features
//!
//! - **Entity arena**: bounded generational storage; identifiers are
//!   reused safely and stale lookups are a normal outcome
//! - **Axis orderings**: per-axis sorted entity lists maintained by
//!   adjacent swaps, amortized near-O(1) per moving entity per tick
//! - **Collision regions**: hierarchical spatial grouping with
//!   border-band double-checking so boundary crossers are never missed
//! - **Octree narrow phase**: per-model flat-array octrees, built once
//!   and shared, tested octant-by-octant in a common frame
//! - **Tick pipeline**: Advance → Relink → Broad → Narrow → Think →
//!   Dispatch → Reap, with removal deferred to the reap pass
//! - **Data-driven AI**: behaviour state machines with decoupled think
//!   scheduling
//!
//! ## Quick Start
//!
//! ```rust
//! use sim_engine::prelude::*;
//!
//! let mut universe = Universe::new(SimConfig::default());
//! universe.add_collision_region(Vec3::new(50_000.0, 0.0, 0.0), 25_000.0);
//!
//! let ship = universe
//!     .add_entity(
//!         Entity::builder(Vec3::zeros())
//!             .collidable(Collidable::sphere(25.0))
//!             .movable(Movable::with_velocity(Vec3::new(100.0, 0.0, 0.0)))
//!             .build(),
//!     )
//!     .expect("under the entity cap");
//!
//! universe.tick(1.0 / 60.0);
//! for event in universe.drain_events() {
//!     println!("{event:?}");
//! }
//! assert!(universe.entity(ship).is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod ai;
pub mod assets;
pub mod config;
pub mod entity;
pub mod events;
pub mod foundation;
pub mod geometry;
pub mod spatial;
pub mod universe;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        ai::{AiState, StateMachine},
        assets::{MapMeshSource, MeshSource, ModelLibrary},
        config::{Config, SimConfig},
        entity::{
            Armed, Collidable, Entity, EntityId, EntityStatus, Movable, ScanClass,
        },
        events::SimEvent,
        foundation::math::{Aabb, Basis, Quat, Vec3},
        geometry::{octree::MeshOctree, Geometry},
        universe::{Universe, UniverseError},
    };
}
