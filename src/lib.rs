//! Deterministic 2D rigid-body physics engine.
//!
//! # Architecture
//!
//! Every fixed substep runs the same pipeline:
//!
//! 1. Apply gravity and integrate poses
//! 2. Sync moved bodies into the broadphase (region quadtree)
//! 3. Narrowphase collision detection (GJK + EPA)
//! 4. Persist contact manifolds across steps, build islands, wake bodies
//! 5. Solve contact constraints (warm-started sequential impulses)
//! 6. Sleep arbitration per island
//!
//! # Example
//!
//! ```
//! use glam::vec2;
//! use rigid2d::{Aabb, EngineConfig, Material, PhysicsEngine, RigidBody};
//!
//! fn main() -> anyhow::Result<()> {
//!     let bounds = Aabb::new(vec2(0.0, 0.0), vec2(1280.0, 720.0));
//!     let mut engine = PhysicsEngine::new(bounds, EngineConfig::default());
//!
//!     let floor =
//!         RigidBody::from_rect(900.0, 60.0, vec2(640.0, 650.0), Material::default(), true)?;
//!     engine.add_body(floor);
//!
//!     let ball = RigidBody::from_circle(20.0, vec2(640.0, 100.0), Material::default(), false)?;
//!     let ball = engine.add_body(ball);
//!
//!     engine.update(1.0 / 60.0)?;
//!     assert!(engine.world().get::<&RigidBody>(ball).unwrap().position.y > 100.0);
//!     Ok(())
//! }
//! ```

pub mod broadphase;
pub mod collider;
pub mod contact;
pub mod engine;
pub mod island;
pub mod narrowphase;
pub mod rigid_body;
pub mod solver;

pub use broadphase::QuadTree;
pub use collider::{Aabb, Collider, Shape};
pub use contact::{Collision, CollisionManifold, Contact};
pub use engine::{EngineConfig, PhysicsEngine};
pub use island::Island;
pub use narrowphase::ContactInfo;
pub use rigid_body::{Material, RigidBody};
