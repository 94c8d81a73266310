//! A deterministic 3D rigid-body physics engine: a dynamic-AABB-tree
//! broadphase, GJK/EPA narrowphase with a persistent contact cache, a
//! sequential-impulse constraint solver over eight joint kinds, continuous
//! collision detection, sleep/island management, and a kinematic character
//! controller, all driven through one [`world::World::update`] call per step.
//!
//! The crate has no rendering, asset loading, or networking surface; a host
//! application owns the render loop and only ever talks to a [`world::World`]
//! through body/constraint handles and the query layer.

pub mod body;
pub mod broadphase;
pub mod ccd;
pub mod character;
pub mod collide;
pub mod config;
pub mod constraint;
pub mod contact;
pub mod error;
pub mod island;
pub mod listener;
pub mod math;
pub mod narrowphase;
pub mod query;
pub mod shape;
pub mod solver;
pub mod world;

pub use body::{Body, BodyId, BodySettings, CombineMode, Material, MotionProperties, MotionQuality, MotionType};
pub use character::{Character, CharacterContactListener, CharacterSettings, GroundState, NullCharacterContactListener};
pub use config::{CcdSettings, SleepSettings, SolverSettings, WorldSettings, WorldSettingsBuilder};
pub use constraint::ConstraintId;
pub use error::{PhysicsError, PhysicsResult};
pub use listener::{ContactListener, ContactSettings, NullContactListener};
pub use shape::Shape;
pub use world::{StepStats, World};
