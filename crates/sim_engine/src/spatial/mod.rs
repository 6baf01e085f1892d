//! Spatial bookkeeping structures
//!
//! Two structures cooperate during broad-phase collision detection: the
//! per-axis sorted orderings of all collidable entities
//! ([`axis_lists::AxisLists`]) and the hierarchical collision regions
//! ([`region::CollisionRegion`]) that group entities likely to interact.

pub mod axis_lists;
pub mod region;

pub use axis_lists::AxisLists;
pub use region::CollisionRegion;
