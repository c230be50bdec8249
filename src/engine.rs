//! Fixed-step simulation driver owning all engine state.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use anyhow::Result;
use glam::Vec2;
use hecs::Entity;
use tracing::{debug, warn};

use crate::broadphase::QuadTree;
use crate::collider::{Aabb, Collider};
use crate::contact::{pair_key, Collision, CollisionCache, PairKey};
use crate::island::{Island, IslandSet};
use crate::narrowphase;
use crate::rigid_body::{self, RigidBody};
use crate::solver;

/// Simulation tuning parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Gravity along +y, px/s^2.
    pub gravity: f32,
    /// Fixed steps per second; defines the substep quantum.
    pub steps_per_second: u32,
    /// Velocity solver sweeps per step.
    pub velocity_iterations: u32,
    /// Linear speed below which a body accumulates still-time.
    pub sleep_linear_threshold: f32,
    /// Angular speed below which a body accumulates still-time.
    pub sleep_angular_threshold: f32,
    /// Island-wide still-time needed to sleep, in seconds.
    pub sleep_time_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gravity: 981.0,
            steps_per_second: 500,
            velocity_iterations: 5,
            sleep_linear_threshold: 0.15,
            sleep_angular_threshold: 0.15,
            sleep_time_threshold: 0.5,
        }
    }
}

/// The physics engine: owns the bodies, the broadphase index, the collision
/// cache, and the island arena, and advances them in fixed substeps.
pub struct PhysicsEngine {
    world: hecs::World,
    bodies: Vec<Entity>,
    broadphase: QuadTree,
    collisions: CollisionCache,
    islands: IslandSet,
    config: EngineConfig,
    fixed_time_step: f32,
    time_elapsed: f64,
    steps_elapsed: u64,
    update_duration: Duration,
    next_body_id: u64,
}

impl PhysicsEngine {
    pub fn new(bounds: Aabb, config: EngineConfig) -> Self {
        let fixed_time_step = 1.0 / config.steps_per_second as f32;
        Self {
            world: hecs::World::new(),
            bodies: Vec::new(),
            broadphase: QuadTree::new(bounds),
            collisions: CollisionCache::new(),
            islands: IslandSet::new(),
            config,
            fixed_time_step,
            time_elapsed: 0.0,
            steps_elapsed: 0,
            update_duration: Duration::ZERO,
            next_body_id: 0,
        }
    }

    /// Insert a body built by one of the [`RigidBody`] factories.
    pub fn add_body(&mut self, parts: (RigidBody, Collider)) -> Entity {
        let (mut body, collider) = parts;
        body.id = self.next_body_id;
        self.next_body_id += 1;

        let id = body.id;
        let bounds = collider.bounds;
        let entity = self.world.spawn((body, collider));
        self.bodies.push(entity);
        if !self.broadphase.insert(entity, bounds) {
            warn!(body = id, "body added outside world bounds, not in broadphase");
        }
        debug!(body = id, "body added");
        entity
    }

    /// Remove a body. Returns false if the entity is not a body of this
    /// engine. Its collisions disappear at the next step's collision pass.
    pub fn remove_body(&mut self, entity: Entity) -> bool {
        let Some(index) = self.bodies.iter().position(|&e| e == entity) else {
            return false;
        };
        self.bodies.swap_remove(index);
        self.broadphase.remove(entity);
        let _ = self.world.despawn(entity);
        debug!("body removed");
        true
    }

    /// Advance the clock by `dt` seconds and run every fixed substep that has
    /// become due. Returns the number of substeps performed.
    pub fn update(&mut self, dt: f32) -> Result<u32> {
        let start = Instant::now();

        self.time_elapsed += dt as f64;
        let due = (self.time_elapsed / self.fixed_time_step as f64).floor() as u64;
        let delta_steps = due.saturating_sub(self.steps_elapsed);

        for _ in 0..delta_steps {
            self.step(self.fixed_time_step)?;
        }
        self.steps_elapsed += delta_steps;

        self.update_duration = start.elapsed();
        Ok(delta_steps as u32)
    }

    fn step(&mut self, dt: f32) -> Result<()> {
        // 1. Gravity, integration, broadphase sync for everything that moved.
        {
            let Self {
                world,
                broadphase,
                config,
                ..
            } = self;
            for (entity, (body, collider)) in
                world.query_mut::<(&mut RigidBody, &mut Collider)>()
            {
                if body.fixed || body.sleeping {
                    continue;
                }
                body.linear_velocity.y += config.gravity * dt;
                let (position, rotation) = (body.position, body.rotation);
                rigid_body::integrate(body, collider, dt);
                if body.position != position || body.rotation != rotation {
                    broadphase.update(entity, collider.bounds);
                }
            }
        }

        // 2. Reset the island arena.
        self.islands.clear();
        for (_, body) in self.world.query_mut::<&mut RigidBody>() {
            body.island = None;
        }

        // 3. Collision detection, island building, wake-ups.
        let confirmed = self.collision_pass()?;
        self.collisions.prune_unconfirmed(&confirmed);

        // 4. Contact solve.
        solver::solve_contacts(
            &mut self.world,
            &mut self.collisions,
            self.config.velocity_iterations,
        );
        self.resync_corrected_bodies();

        // 5. Sleep arbitration.
        self.islands.arbitrate_sleep(&mut self.world, dt, &self.config);

        Ok(())
    }

    /// Narrowphase over broadphase candidates, visiting each unordered pair
    /// once in body-insertion order. Confirmed pairs wake their bodies, feed
    /// the island builder, and refresh the collision cache.
    fn collision_pass(&mut self) -> Result<BTreeSet<PairKey>> {
        let mut ids: HashMap<Entity, u64> = HashMap::with_capacity(self.bodies.len());
        for &entity in &self.bodies {
            if let Ok(body) = self.world.get::<&RigidBody>(entity) {
                ids.insert(entity, body.id);
            }
        }

        let mut pairs: Vec<(Entity, Entity, PairKey)> = Vec::new();
        for &entity in &self.bodies {
            let Some(&id) = ids.get(&entity) else {
                continue;
            };
            let Ok(collider) = self.world.get::<&Collider>(entity) else {
                continue;
            };
            for other in self.broadphase.query(&collider.bounds) {
                if other == entity {
                    continue;
                }
                let Some(&other_id) = ids.get(&other) else {
                    continue;
                };
                if id >= other_id {
                    continue;
                }
                pairs.push((entity, other, pair_key(id, other_id)));
            }
        }

        let inert = |world: &hecs::World, entity: Entity| {
            world
                .get::<&RigidBody>(entity)
                .map(|body| body.fixed || body.sleeping)
                .unwrap_or(true)
        };

        let mut confirmed = BTreeSet::new();
        for (entity_a, entity_b, key) in pairs {
            // Flags are read live so a wake-up earlier in this pass lets a
            // later pair of the same chain proceed.
            if inert(&self.world, entity_a) && inert(&self.world, entity_b) {
                continue;
            }
            let hit = {
                let Ok(collider_a) = self.world.get::<&Collider>(entity_a) else {
                    continue;
                };
                let Ok(collider_b) = self.world.get::<&Collider>(entity_b) else {
                    continue;
                };
                narrowphase::detect_collision(&collider_a.shape, &collider_b.shape)?
            };
            let Some(info) = hit else {
                continue;
            };

            // At least one body of the pair is awake, so both end up awake.
            for entity in [entity_a, entity_b] {
                if let Ok(mut body) = self.world.get::<&mut RigidBody>(entity) {
                    body.sleeping = false;
                }
            }

            self.islands.link(&mut self.world, entity_a, entity_b);

            {
                let Ok(body_a) = self.world.get::<&RigidBody>(entity_a) else {
                    continue;
                };
                let Ok(body_b) = self.world.get::<&RigidBody>(entity_b) else {
                    continue;
                };
                self.collisions
                    .confirm(key, entity_a, entity_b, &info, &body_a, &body_b);
            }
            confirmed.insert(key);
        }
        Ok(confirmed)
    }

    /// Position correction moved colliding bodies after integration already
    /// synced the broadphase, so their entries are refreshed here.
    fn resync_corrected_bodies(&mut self) {
        let Self {
            world,
            broadphase,
            collisions,
            ..
        } = self;
        for collision in collisions.iter() {
            for entity in [collision.entity_a, collision.entity_b] {
                let fixed = world
                    .get::<&RigidBody>(entity)
                    .map(|body| body.fixed)
                    .unwrap_or(true);
                if fixed {
                    continue;
                }
                if let Ok(collider) = world.get::<&Collider>(entity) {
                    broadphase.update(entity, collider.bounds);
                }
            }
        }
    }

    /// Externally teleport a body, keeping the broadphase in sync. Does not
    /// wake sleeping bodies; only contact does.
    pub fn teleport(&mut self, entity: Entity, delta: Vec2) -> bool {
        let bounds = {
            let Ok((body, collider)) = self
                .world
                .query_one_mut::<(&mut RigidBody, &mut Collider)>(entity)
            else {
                return false;
            };
            rigid_body::translate(body, collider, delta);
            collider.bounds
        };
        self.broadphase.update(entity, bounds);
        true
    }

    /// Apply an impulse through a body's center of mass.
    pub fn apply_impulse(&mut self, entity: Entity, impulse: Vec2) -> bool {
        match self.world.get::<&mut RigidBody>(entity) {
            Ok(mut body) => {
                body.apply_impulse(impulse);
                true
            }
            Err(_) => false,
        }
    }

    /// Accumulate a force on a body for the next substep.
    pub fn apply_force(&mut self, entity: Entity, force: Vec2) -> bool {
        match self.world.get::<&mut RigidBody>(entity) {
            Ok(mut body) => {
                body.apply_force(force);
                true
            }
            Err(_) => false,
        }
    }

    /// Broadphase range query.
    pub fn query_region(&self, aabb: &Aabb) -> Vec<Entity> {
        self.broadphase.query(aabb)
    }

    /// Read-only view of the body store.
    pub fn world(&self) -> &hecs::World {
        &self.world
    }

    /// Bodies in insertion order.
    pub fn bodies(&self) -> &[Entity] {
        &self.bodies
    }

    /// Collisions active after the last step.
    pub fn collisions(&self) -> impl Iterator<Item = &Collision> {
        self.collisions.iter()
    }

    pub fn collision_count(&self) -> usize {
        self.collisions.len()
    }

    /// Islands built during the last step.
    pub fn islands(&self) -> &[Island] {
        self.islands.islands()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bounds(&self) -> Aabb {
        self.broadphase.bounds()
    }

    pub fn fixed_time_step(&self) -> f32 {
        self.fixed_time_step
    }

    pub fn time_elapsed(&self) -> f64 {
        self.time_elapsed
    }

    pub fn steps_elapsed(&self) -> u64 {
        self.steps_elapsed
    }

    /// Wall-clock duration of the last `update` call.
    pub fn update_duration(&self) -> Duration {
        self.update_duration
    }
}
