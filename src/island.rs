//! Contact islands and sleep arbitration.

use hecs::Entity;

use crate::engine::EngineConfig;
use crate::rigid_body::RigidBody;

/// A connected set of non-fixed bodies coupled by active contacts this step.
#[derive(Debug, Default)]
pub struct Island {
    pub bodies: Vec<Entity>,
}

/// Step-scoped island arena.
///
/// Bodies hold their island as an index into this arena; merging leaves the
/// absorbed slot empty rather than shifting indices. The whole arena is
/// cleared at the start of every step.
#[derive(Debug, Default)]
pub struct IslandSet {
    islands: Vec<Island>,
}

impl IslandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn islands(&self) -> &[Island] {
        &self.islands
    }

    /// Number of non-empty islands.
    pub fn len(&self) -> usize {
        self.islands.iter().filter(|i| !i.bodies.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.islands.clear();
    }

    /// Join two contacting bodies into one island, merging their islands when
    /// both already belong to different ones. Fixed bodies are never added.
    pub fn link(&mut self, world: &mut hecs::World, entity_a: Entity, entity_b: Entity) {
        let Some((fixed_a, island_a)) = membership(world, entity_a) else {
            return;
        };
        let Some((fixed_b, island_b)) = membership(world, entity_b) else {
            return;
        };
        if fixed_a && fixed_b {
            return;
        }

        match (island_a, island_b) {
            (Some(a), Some(b)) if a != b => self.merge(world, a, b),
            (Some(_), Some(_)) => {}
            (Some(a), None) => {
                if !fixed_b {
                    self.attach(world, a, entity_b);
                }
            }
            (None, Some(b)) => {
                if !fixed_a {
                    self.attach(world, b, entity_a);
                }
            }
            (None, None) => {
                let index = self.islands.len();
                self.islands.push(Island::default());
                if !fixed_a {
                    self.attach(world, index, entity_a);
                }
                if !fixed_b {
                    self.attach(world, index, entity_b);
                }
            }
        }
    }

    /// Accumulate still-time on slow bodies, then put every island whose
    /// slowest member has been still long enough to sleep.
    pub fn arbitrate_sleep(&self, world: &mut hecs::World, dt: f32, config: &EngineConfig) {
        let linear_sq = config.sleep_linear_threshold * config.sleep_linear_threshold;
        for (_, body) in world.query_mut::<&mut RigidBody>() {
            if body.fixed {
                continue;
            }
            if body.linear_velocity.length_squared() < linear_sq
                && body.angular_velocity.abs() < config.sleep_angular_threshold
            {
                body.time_still += dt;
            } else {
                body.time_still = 0.0;
            }
        }

        for island in &self.islands {
            if island.bodies.is_empty() {
                continue;
            }
            let mut min_time = f32::MAX;
            for &entity in &island.bodies {
                if let Ok(body) = world.get::<&RigidBody>(entity) {
                    min_time = min_time.min(body.time_still);
                }
            }
            if min_time >= config.sleep_time_threshold {
                for &entity in &island.bodies {
                    if let Ok(mut body) = world.get::<&mut RigidBody>(entity) {
                        body.sleeping = true;
                    }
                }
            }
        }
    }

    fn attach(&mut self, world: &mut hecs::World, index: usize, entity: Entity) {
        if let Ok(mut body) = world.get::<&mut RigidBody>(entity) {
            body.island = Some(index);
        }
        self.islands[index].bodies.push(entity);
    }

    /// Move every body of the smaller island into the larger one.
    fn merge(&mut self, world: &mut hecs::World, a: usize, b: usize) {
        let (dst, src) = if self.islands[a].bodies.len() >= self.islands[b].bodies.len() {
            (a, b)
        } else {
            (b, a)
        };
        let moved = std::mem::take(&mut self.islands[src].bodies);
        for &entity in &moved {
            if let Ok(mut body) = world.get::<&mut RigidBody>(entity) {
                body.island = Some(dst);
            }
        }
        self.islands[dst].bodies.extend(moved);
    }
}

fn membership(world: &hecs::World, entity: Entity) -> Option<(bool, Option<usize>)> {
    world
        .get::<&RigidBody>(entity)
        .ok()
        .map(|body| (body.fixed, body.island))
}
