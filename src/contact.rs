//! Persistent contact manifolds and the per-pair collision cache.

use std::collections::BTreeMap;

use glam::Vec2;
use hecs::Entity;

use crate::narrowphase::ContactInfo;
use crate::rigid_body::RigidBody;

/// Squared world drift beyond which a cached contact is discarded.
const DRIFT_THRESHOLD_SQ: f32 = 4.0;
/// Normal separation beyond which a cached contact no longer touches.
const SEPARATION_THRESHOLD: f32 = 0.01;
/// Squared local-offset distance under which two contacts are duplicates.
const DUPLICATE_THRESHOLD_SQ: f32 = 4.0;
/// Closing normal velocity above which restitution contributes no bias.
const BIAS_VELOCITY_CUTOFF: f32 = -0.1;
/// Contact points kept per manifold.
const MAX_CONTACTS: usize = 2;

/// Ordered body-id pair, smaller id first.
pub type PairKey = (u64, u64);

#[inline]
pub fn pair_key(id_a: u64, id_b: u64) -> PairKey {
    if id_a < id_b {
        (id_a, id_b)
    } else {
        (id_b, id_a)
    }
}

/// A single persistent contact point between two bodies.
///
/// Effective masses and accumulated impulses survive across steps while the
/// point stays valid; the world/local witness positions are frozen at
/// creation time.
#[derive(Debug, Clone, Copy)]
pub struct Contact {
    pub world_pos_a: Vec2,
    pub world_pos_b: Vec2,
    /// Offset from body A's position at creation. Deliberately not rotated
    /// with the body; large rotations are handled by the drift check instead.
    pub local_pos_a: Vec2,
    pub local_pos_b: Vec2,
    pub effective_mass_normal: f32,
    pub effective_mass_tangent: f32,
    /// Target separating velocity from restitution, refreshed once per step.
    pub restitution_bias: f32,
    pub accumulated_normal: f32,
    pub accumulated_tangent: f32,
}

impl Contact {
    pub fn new(
        world_pos_a: Vec2,
        world_pos_b: Vec2,
        normal: Vec2,
        tangent: Vec2,
        restitution: f32,
        body_a: &RigidBody,
        body_b: &RigidBody,
    ) -> Self {
        let local_pos_a = world_pos_a - body_a.position;
        let local_pos_b = world_pos_b - body_b.position;
        Self {
            world_pos_a,
            world_pos_b,
            local_pos_a,
            local_pos_b,
            effective_mass_normal: effective_mass(body_a, body_b, local_pos_a, local_pos_b, normal),
            effective_mass_tangent: effective_mass(
                body_a,
                body_b,
                local_pos_a,
                local_pos_b,
                tangent,
            ),
            restitution_bias: restitution_bias(
                body_a,
                body_b,
                local_pos_a,
                local_pos_b,
                normal,
                restitution,
            ),
            accumulated_normal: 0.0,
            accumulated_tangent: 0.0,
        }
    }
}

/// Scalar effective mass along `axis` for impulses applied at the contact
/// offsets: 1 / (invMa + invMb + invIa (ra x n)^2 + invIb (rb x n)^2).
fn effective_mass(body_a: &RigidBody, body_b: &RigidBody, ra: Vec2, rb: Vec2, axis: Vec2) -> f32 {
    let ra_cross = ra.perp_dot(axis);
    let rb_cross = rb.perp_dot(axis);
    1.0 / (body_a.inverse_mass
        + body_b.inverse_mass
        + body_a.inverse_angular_mass * ra_cross * ra_cross
        + body_b.inverse_angular_mass * rb_cross * rb_cross)
}

/// Restitution bias: the separating velocity to restore, taken from the
/// current closing velocity when it exceeds the cutoff.
pub(crate) fn restitution_bias(
    body_a: &RigidBody,
    body_b: &RigidBody,
    ra: Vec2,
    rb: Vec2,
    normal: Vec2,
    restitution: f32,
) -> f32 {
    let closing = normal.dot(body_b.velocity_at(rb) - body_a.velocity_at(ra));
    if closing < BIAS_VELOCITY_CUTOFF {
        -restitution * closing
    } else {
        0.0
    }
}

/// Contact manifold shared by one body pair.
#[derive(Debug, Clone)]
pub struct CollisionManifold {
    /// Collision normal out of body A.
    pub normal: Vec2,
    /// Fixed per step as the normal's perpendicular.
    pub tangent: Vec2,
    pub depth: f32,
    pub mtv: Vec2,
    pub contacts: Vec<Contact>,
}

/// An active collision between an ordered body pair.
#[derive(Debug, Clone)]
pub struct Collision {
    pub entity_a: Entity,
    pub entity_b: Entity,
    /// Product of the bodies' restitutions.
    pub restitution: f32,
    /// Mean of the bodies' frictions.
    pub friction: f32,
    pub manifold: CollisionManifold,
}

/// Per-pair collision store persisting contact points across steps.
///
/// Keyed by the ordered body-id pair; the ordered map gives the solver a
/// deterministic iteration order.
#[derive(Debug, Default)]
pub struct CollisionCache {
    collisions: BTreeMap<PairKey, Collision>,
}

impl CollisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a narrowphase hit for `key` this step.
    ///
    /// A known pair keeps its surviving contacts (with accumulated impulses)
    /// and refreshes the manifold from `info`; an unknown pair starts a fresh
    /// single-contact manifold.
    pub fn confirm(
        &mut self,
        key: PairKey,
        entity_a: Entity,
        entity_b: Entity,
        info: &ContactInfo,
        body_a: &RigidBody,
        body_b: &RigidBody,
    ) {
        let normal = info.normal;
        let tangent = normal.perp();
        let restitution = body_a.material.restitution * body_b.material.restitution;
        let friction = (body_a.material.friction + body_b.material.friction) * 0.5;

        let candidate = Contact::new(
            info.world_contact_a,
            info.world_contact_b,
            normal,
            tangent,
            restitution,
            body_a,
            body_b,
        );

        let collision = self.collisions.entry(key).or_insert_with(|| Collision {
            entity_a,
            entity_b,
            restitution,
            friction,
            manifold: CollisionManifold {
                normal,
                tangent,
                depth: info.depth,
                mtv: info.mtv,
                contacts: Vec::with_capacity(MAX_CONTACTS),
            },
        });

        collision.restitution = restitution;
        collision.friction = friction;
        let manifold = &mut collision.manifold;
        manifold.normal = normal;
        manifold.tangent = tangent;
        manifold.depth = info.depth;
        manifold.mtv = info.mtv;

        // Drop contacts that drifted or separated since they were created.
        manifold.contacts.retain(|contact| {
            let current_a = body_a.position + contact.local_pos_a;
            let current_b = body_b.position + contact.local_pos_b;
            (contact.world_pos_a - current_a).length_squared() <= DRIFT_THRESHOLD_SQ
                && (contact.world_pos_b - current_b).length_squared() <= DRIFT_THRESHOLD_SQ
                && normal.dot(current_b - current_a) <= SEPARATION_THRESHOLD
        });

        let duplicate = manifold.contacts.iter().any(|contact| {
            (contact.local_pos_a - candidate.local_pos_a).length_squared() < DUPLICATE_THRESHOLD_SQ
                && (contact.local_pos_b - candidate.local_pos_b).length_squared()
                    < DUPLICATE_THRESHOLD_SQ
        });
        if !duplicate {
            manifold.contacts.push(candidate);
        }

        if manifold.contacts.len() > MAX_CONTACTS {
            cap_contacts(manifold);
        }
    }

    /// Delete every pair that was not confirmed this step.
    pub fn prune_unconfirmed(&mut self, confirmed: &std::collections::BTreeSet<PairKey>) {
        self.collisions.retain(|key, _| confirmed.contains(key));
    }

    pub fn get(&self, key: &PairKey) -> Option<&Collision> {
        self.collisions.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collision> {
        self.collisions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Collision> {
        self.collisions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.collisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collisions.is_empty()
    }

    pub fn clear(&mut self) {
        self.collisions.clear();
    }
}

/// Reduce an over-full manifold to the deepest contact and the retained
/// contact furthest from it.
fn cap_contacts(manifold: &mut CollisionManifold) {
    let depth_sq =
        |contact: &Contact| (contact.world_pos_a - contact.world_pos_b).length_squared();

    let deepest_index = manifold
        .contacts
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            depth_sq(a)
                .partial_cmp(&depth_sq(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    let deepest = manifold.contacts[deepest_index];

    let furthest = manifold
        .contacts
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != deepest_index)
        .max_by(|(_, a), (_, b)| {
            let da = (a.world_pos_a - deepest.world_pos_a).length_squared();
            let db = (b.world_pos_a - deepest.world_pos_a).length_squared();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(_, c)| *c);

    manifold.contacts.clear();
    manifold.contacts.push(deepest);
    if let Some(furthest) = furthest {
        manifold.contacts.push(furthest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rigid_body::Material;
    use glam::vec2;
    use std::collections::BTreeSet;

    fn body_at(position: Vec2, fixed: bool) -> RigidBody {
        let (mut body, _) =
            RigidBody::from_rect(40.0, 40.0, position, Material::default(), fixed).unwrap();
        body.id = if fixed { 0 } else { 1 };
        body
    }

    fn info_at(point: Vec2, normal: Vec2, depth: f32) -> ContactInfo {
        ContactInfo {
            normal,
            depth,
            mtv: normal * depth,
            world_contact_a: point,
            world_contact_b: point - normal * depth,
        }
    }

    fn entities() -> (Entity, Entity) {
        let mut world = hecs::World::new();
        (world.spawn(()), world.spawn(()))
    }

    #[test]
    fn test_confirm_creates_single_contact() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 1.0), &a, &b);

        let collision = cache.get(&(0, 1)).unwrap();
        assert_eq!(collision.manifold.contacts.len(), 1);
        let contact = &collision.manifold.contacts[0];
        assert_eq!(contact.accumulated_normal, 0.0);
        assert!(contact.effective_mass_normal > 0.0);
        assert!((contact.local_pos_a - vec2(0.0, 20.0)).length() < 1e-5);
        assert!((collision.restitution - 0.09).abs() < 1e-5);
        assert!((collision.friction - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_reconfirm_keeps_accumulated_impulses() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();
        let info = info_at(vec2(0.0, 20.0), Vec2::Y, 1.0);

        cache.confirm((0, 1), ea, eb, &info, &a, &b);
        cache
            .iter_mut()
            .next()
            .unwrap()
            .manifold
            .contacts[0]
            .accumulated_normal = 42.0;

        // Same candidate point again: deduplicated, impulse survives.
        cache.confirm((0, 1), ea, eb, &info, &a, &b);
        let collision = cache.get(&(0, 1)).unwrap();
        assert_eq!(collision.manifold.contacts.len(), 1);
        assert_eq!(collision.manifold.contacts[0].accumulated_normal, 42.0);
    }

    #[test]
    fn test_distinct_point_grows_manifold() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(-15.0, 20.0), Vec2::Y, 1.0), &a, &b);
        cache.confirm((0, 1), ea, eb, &info_at(vec2(15.0, 20.0), Vec2::Y, 1.0), &a, &b);

        assert_eq!(cache.get(&(0, 1)).unwrap().manifold.contacts.len(), 2);
    }

    #[test]
    fn test_drifted_contact_dropped() {
        let (ea, eb) = entities();
        let mut a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 1.0), &a, &b);

        // Body A moved sideways by more than the drift threshold; the stored
        // world position no longer matches position + local offset.
        a.position += vec2(3.0, 0.0);
        cache.confirm((0, 1), ea, eb, &info_at(vec2(3.0, 20.0), Vec2::Y, 1.0), &a, &b);

        let collision = cache.get(&(0, 1)).unwrap();
        assert_eq!(collision.manifold.contacts.len(), 1);
        assert!((collision.manifold.contacts[0].world_pos_a - vec2(3.0, 20.0)).length() < 1e-5);
    }

    #[test]
    fn test_separated_contact_dropped() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let mut b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 1.0), &a, &b);

        // B slides along the normal: drift stays under the threshold but the
        // witnesses separate past the contact threshold.
        b.position += vec2(0.0, 1.5);
        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.5), Vec2::Y, 0.1), &a, &b);

        let collision = cache.get(&(0, 1)).unwrap();
        assert_eq!(collision.manifold.contacts.len(), 1);
        assert!((collision.manifold.contacts[0].world_pos_a - vec2(0.0, 20.5)).length() < 1e-5);
    }

    #[test]
    fn test_manifold_capped_at_two() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(-15.0, 20.0), Vec2::Y, 0.4), &a, &b);
        cache.confirm((0, 1), ea, eb, &info_at(vec2(15.0, 20.0), Vec2::Y, 2.0), &a, &b);
        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 0.4), &a, &b);

        let manifold = &cache.get(&(0, 1)).unwrap().manifold;
        assert_eq!(manifold.contacts.len(), 2);
        // Deepest witness pair survives, plus the furthest from it.
        assert!((manifold.contacts[0].world_pos_a - vec2(15.0, 20.0)).length() < 1e-5);
        assert!((manifold.contacts[1].world_pos_a - vec2(-15.0, 20.0)).length() < 1e-5);
    }

    #[test]
    fn test_prune_unconfirmed() {
        let (ea, eb) = entities();
        let a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);
        let mut cache = CollisionCache::new();

        cache.confirm((0, 1), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 1.0), &a, &b);
        cache.confirm((0, 2), ea, eb, &info_at(vec2(0.0, 20.0), Vec2::Y, 1.0), &a, &b);

        let confirmed: BTreeSet<PairKey> = [(0, 2)].into_iter().collect();
        cache.prune_unconfirmed(&confirmed);

        assert!(cache.get(&(0, 1)).is_none());
        assert!(cache.get(&(0, 2)).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_restitution_bias_cutoff() {
        let mut a = body_at(vec2(0.0, 0.0), false);
        let b = body_at(vec2(0.0, 39.0), false);

        // A moving up into B at 10 px/s: closing velocity -10 along +Y.
        a.linear_velocity = vec2(0.0, 10.0);
        let bias = restitution_bias(&a, &b, Vec2::ZERO, Vec2::ZERO, Vec2::Y, 0.5);
        assert!((bias - 5.0).abs() < 1e-5);

        // Slow approach stays under the cutoff.
        a.linear_velocity = vec2(0.0, 0.05);
        let bias = restitution_bias(&a, &b, Vec2::ZERO, Vec2::ZERO, Vec2::Y, 0.5);
        assert_eq!(bias, 0.0);
    }
}
