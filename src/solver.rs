//! Sequential impulse contact solver with accumulated impulses.

use glam::Vec2;
use hecs::Entity;

use crate::collider::Collider;
use crate::contact::{restitution_bias, Collision, CollisionCache};
use crate::rigid_body::{self, RigidBody};

/// Penetration allowed before position correction engages.
const PENETRATION_SLOP: f32 = 0.1;

/// Run the full solver pass: warm start, linear position correction,
/// restitution bias refresh, then `iterations` sequential velocity sweeps.
pub fn solve_contacts(world: &mut hecs::World, cache: &mut CollisionCache, iterations: u32) {
    warm_start(world, cache);
    correct_positions(world, cache);
    refresh_bias(world, cache);

    for _ in 0..iterations {
        for collision in cache.iter_mut() {
            solve_collision(world, collision);
        }
    }
}

/// Re-apply the previous step's accumulated impulses as the initial guess.
fn warm_start(world: &mut hecs::World, cache: &mut CollisionCache) {
    for collision in cache.iter_mut() {
        let normal = collision.manifold.normal;
        let tangent = collision.manifold.tangent;
        for contact in &collision.manifold.contacts {
            let impulse = normal * contact.accumulated_normal + tangent * contact.accumulated_tangent;
            apply_pair_impulse(
                world,
                collision.entity_a,
                collision.entity_b,
                impulse,
                contact.local_pos_a,
                contact.local_pos_b,
            );
        }
    }
}

/// Translate the bodies of each collision out of penetration, split by
/// inverse mass. Linear only: rotating stacks out of penetration destabilizes
/// them.
fn correct_positions(world: &mut hecs::World, cache: &mut CollisionCache) {
    for collision in cache.iter_mut() {
        let (inv_a, inv_b) = {
            let Ok(a) = world.get::<&RigidBody>(collision.entity_a) else {
                continue;
            };
            let Ok(b) = world.get::<&RigidBody>(collision.entity_b) else {
                continue;
            };
            (a.inverse_mass, b.inverse_mass)
        };
        let inv_sum = inv_a + inv_b;
        if inv_sum == 0.0 {
            continue;
        }

        let k = 1.0 / inv_sum;
        let correction =
            collision.manifold.normal * (collision.manifold.depth - PENETRATION_SLOP).max(0.0);

        if let Ok((body, collider)) =
            world.query_one_mut::<(&mut RigidBody, &mut Collider)>(collision.entity_a)
        {
            rigid_body::translate(body, collider, correction * (-k * inv_a));
        }
        if let Ok((body, collider)) =
            world.query_one_mut::<(&mut RigidBody, &mut Collider)>(collision.entity_b)
        {
            rigid_body::translate(body, collider, correction * (k * inv_b));
        }
    }
}

/// Recompute each contact's restitution bias from current velocities. The
/// bias then stays fixed for this step's iteration sweeps.
fn refresh_bias(world: &mut hecs::World, cache: &mut CollisionCache) {
    for collision in cache.iter_mut() {
        let Ok(body_a) = world.get::<&RigidBody>(collision.entity_a) else {
            continue;
        };
        let Ok(body_b) = world.get::<&RigidBody>(collision.entity_b) else {
            continue;
        };
        let normal = collision.manifold.normal;
        for contact in &mut collision.manifold.contacts {
            contact.restitution_bias = restitution_bias(
                &body_a,
                &body_b,
                contact.local_pos_a,
                contact.local_pos_b,
                normal,
                collision.restitution,
            );
        }
    }
}

/// One Gauss-Seidel sweep over a collision: a normal pass then a tangent pass
/// per contact, clamping the accumulated impulses.
fn solve_collision(world: &mut hecs::World, collision: &mut Collision) {
    let normal = collision.manifold.normal;
    let tangent = collision.manifold.tangent;
    let friction = collision.friction;

    for contact in &mut collision.manifold.contacts {
        let ra = contact.local_pos_a;
        let rb = contact.local_pos_b;

        // Normal: drive the closing velocity to the restitution bias.
        let Some(relative) = relative_velocity(world, collision.entity_a, collision.entity_b, ra, rb)
        else {
            continue;
        };
        let vn = normal.dot(relative);
        let lambda = -(vn - contact.restitution_bias) * contact.effective_mass_normal;

        let accumulated = (contact.accumulated_normal + lambda).max(0.0);
        let delta = accumulated - contact.accumulated_normal;
        contact.accumulated_normal = accumulated;
        apply_pair_impulse(
            world,
            collision.entity_a,
            collision.entity_b,
            normal * delta,
            ra,
            rb,
        );

        // Tangent: oppose sliding within the friction cone.
        let Some(relative) = relative_velocity(world, collision.entity_a, collision.entity_b, ra, rb)
        else {
            continue;
        };
        let vt = tangent.dot(relative);
        let lambda = -vt * contact.effective_mass_tangent;

        let limit = friction * contact.accumulated_normal;
        let accumulated = (contact.accumulated_tangent + lambda).clamp(-limit, limit);
        let delta = accumulated - contact.accumulated_tangent;
        contact.accumulated_tangent = accumulated;
        apply_pair_impulse(
            world,
            collision.entity_a,
            collision.entity_b,
            tangent * delta,
            ra,
            rb,
        );
    }
}

fn relative_velocity(
    world: &hecs::World,
    entity_a: Entity,
    entity_b: Entity,
    ra: Vec2,
    rb: Vec2,
) -> Option<Vec2> {
    let a = world.get::<&RigidBody>(entity_a).ok()?;
    let b = world.get::<&RigidBody>(entity_b).ok()?;
    Some(b.velocity_at(rb) - a.velocity_at(ra))
}

/// Apply `impulse` to B and its opposite to A at the matching offsets.
fn apply_pair_impulse(
    world: &mut hecs::World,
    entity_a: Entity,
    entity_b: Entity,
    impulse: Vec2,
    ra: Vec2,
    rb: Vec2,
) {
    if let Ok(mut body) = world.get::<&mut RigidBody>(entity_a) {
        body.apply_impulse_at(-impulse, ra);
    }
    if let Ok(mut body) = world.get::<&mut RigidBody>(entity_b) {
        body.apply_impulse_at(impulse, rb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::pair_key;
    use crate::narrowphase::ContactInfo;
    use crate::rigid_body::Material;
    use glam::vec2;

    const BOUNCY: Material = Material {
        restitution: 1.0,
        friction: 0.0,
        density: 1.0,
    };

    fn spawn(
        world: &mut hecs::World,
        parts: (RigidBody, Collider),
        id: u64,
    ) -> Entity {
        let (mut body, collider) = parts;
        body.id = id;
        world.spawn((body, collider))
    }

    fn confirm(
        world: &hecs::World,
        cache: &mut CollisionCache,
        entity_a: Entity,
        entity_b: Entity,
        info: ContactInfo,
    ) {
        let body_a = world.get::<&RigidBody>(entity_a).unwrap();
        let body_b = world.get::<&RigidBody>(entity_b).unwrap();
        let key = pair_key(body_a.id, body_b.id);
        cache.confirm(key, entity_a, entity_b, &info, &body_a, &body_b);
    }

    fn head_on_world() -> (hecs::World, CollisionCache, Entity, Entity) {
        let mut world = hecs::World::new();
        let a = spawn(
            &mut world,
            RigidBody::from_circle(1.0, vec2(0.0, 0.0), BOUNCY, false).unwrap(),
            0,
        );
        let b = spawn(
            &mut world,
            RigidBody::from_circle(1.0, vec2(1.9, 0.0), BOUNCY, false).unwrap(),
            1,
        );
        world.get::<&mut RigidBody>(a).unwrap().linear_velocity = vec2(5.0, 0.0);
        world.get::<&mut RigidBody>(b).unwrap().linear_velocity = vec2(-5.0, 0.0);

        let mut cache = CollisionCache::new();
        let info = ContactInfo {
            normal: Vec2::X,
            depth: 0.1,
            mtv: vec2(0.1, 0.0),
            world_contact_a: vec2(1.0, 0.0),
            world_contact_b: vec2(0.9, 0.0),
        };
        confirm(&world, &mut cache, a, b, info);
        (world, cache, a, b)
    }

    #[test]
    fn test_head_on_impulses_conserve_momentum() {
        let (mut world, mut cache, a, b) = head_on_world();
        solve_contacts(&mut world, &mut cache, 5);

        let va = world.get::<&RigidBody>(a).unwrap().linear_velocity;
        let vb = world.get::<&RigidBody>(b).unwrap().linear_velocity;
        // Equal masses: total momentum stays zero.
        assert!((va + vb).length() < 1e-4);
        // The pair no longer approaches.
        assert!(vb.x - va.x >= -1e-4);
    }

    #[test]
    fn test_elastic_bounce_restores_speed() {
        let (mut world, mut cache, a, b) = head_on_world();
        solve_contacts(&mut world, &mut cache, 5);

        // Restitution 1 restores the full closing speed as separation.
        let va = world.get::<&RigidBody>(a).unwrap().linear_velocity;
        let vb = world.get::<&RigidBody>(b).unwrap().linear_velocity;
        assert!((vb.x - va.x - 10.0).abs() < 0.1);
    }

    #[test]
    fn test_accumulated_impulse_invariants() {
        let (mut world, mut cache, _, _) = head_on_world();
        solve_contacts(&mut world, &mut cache, 5);

        for collision in cache.iter() {
            for contact in &collision.manifold.contacts {
                assert!(contact.accumulated_normal >= 0.0);
                assert!(
                    contact.accumulated_tangent.abs()
                        <= collision.friction * contact.accumulated_normal + 1e-5
                );
            }
        }
    }

    #[test]
    fn test_position_correction_respects_slop() {
        let mut world = hecs::World::new();
        let floor = spawn(
            &mut world,
            RigidBody::from_rect(100.0, 20.0, vec2(0.0, 30.0), Material::default(), true).unwrap(),
            0,
        );
        let block = spawn(
            &mut world,
            RigidBody::from_rect(10.0, 10.0, vec2(0.0, 16.0), Material::default(), false).unwrap(),
            1,
        );

        // Block bottom at y=21, floor top at y=20: depth 1 along +Y (A=floor).
        let mut cache = CollisionCache::new();
        let info = ContactInfo {
            normal: vec2(0.0, -1.0),
            depth: 1.0,
            mtv: vec2(0.0, -1.0),
            world_contact_a: vec2(0.0, 20.0),
            world_contact_b: vec2(0.0, 21.0),
        };
        confirm(&world, &mut cache, floor, block, info);

        let before = world.get::<&RigidBody>(block).unwrap().position;
        solve_contacts(&mut world, &mut cache, 5);
        let after = world.get::<&RigidBody>(block).unwrap().position;

        // Only the dynamic block moves, by depth minus slop, away from the floor.
        let moved = after - before;
        assert!((moved.y + 0.9).abs() < 1e-4);
        assert_eq!(moved.x, 0.0);
        assert_eq!(world.get::<&RigidBody>(floor).unwrap().position, vec2(0.0, 30.0));
        // Collider bounds moved with the body.
        let bounds = world.get::<&Collider>(block).unwrap().bounds;
        assert!((bounds.center() - after).length() < 1e-4);
    }

    #[test]
    fn test_warm_start_applies_cached_impulse() {
        let (mut world, mut cache, a, b) = head_on_world();
        for collision in cache.iter_mut() {
            collision.manifold.contacts[0].accumulated_normal = 2.0;
        }

        warm_start(&mut world, &mut cache);

        // Impulse 2 along +X on B, -X on A, over the unit circle mass pi.
        let mass = std::f32::consts::PI;
        let va = world.get::<&RigidBody>(a).unwrap().linear_velocity;
        let vb = world.get::<&RigidBody>(b).unwrap().linear_velocity;
        assert!((va.x - (5.0 - 2.0 / mass)).abs() < 1e-4);
        assert!((vb.x - (-5.0 + 2.0 / mass)).abs() < 1e-4);
    }
}
