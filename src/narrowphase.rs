//! Narrowphase collision detection: 2D GJK and EPA.

use anyhow::{bail, Result};
use glam::Vec2;
use tracing::error;

use crate::collider::Shape;

const GJK_MAX_ITERATIONS: usize = 64;
const EPA_MAX_ITERATIONS: usize = 100;
/// Support distance improvement below which EPA is considered converged.
const EPA_TOLERANCE: f32 = 1e-3;
/// Squared distance under which the two edge witnesses collapse to one point.
const WITNESS_MERGE_THRESHOLD: f32 = 1.0;

/// Penetration data for one colliding shape pair.
///
/// The normal points out of the Minkowski difference A - B; translating body
/// A by `-mtv` (or B by `+mtv`) separates the shapes.
#[derive(Debug, Clone, Copy)]
pub struct ContactInfo {
    pub normal: Vec2,
    pub depth: f32,
    /// Minimum translation vector, `normal * depth`.
    pub mtv: Vec2,
    /// Witness point on body A in world space.
    pub world_contact_a: Vec2,
    /// Witness point on body B, `world_contact_a - mtv`.
    pub world_contact_b: Vec2,
}

/// Minkowski-difference vertex with the body-A support that produced it.
#[derive(Debug, Clone, Copy)]
struct SupportPoint {
    p: Vec2,
    on_a: Vec2,
}

/// Vector triple product (a x b) x c, evaluated in the plane.
#[inline]
fn triple_cross(a: Vec2, b: Vec2, c: Vec2) -> Vec2 {
    b * a.dot(c) - a * b.dot(c)
}

#[inline]
fn minkowski_support(shape_a: &Shape, shape_b: &Shape, direction: Vec2) -> SupportPoint {
    let on_a = shape_a.support(direction);
    SupportPoint {
        p: on_a - shape_b.support(-direction),
        on_a,
    }
}

/// Test two convex shapes, returning penetration data when they overlap.
///
/// Fails only when EPA cannot converge within its iteration cap, which
/// leaves the step in an undefined state.
pub fn detect_collision(shape_a: &Shape, shape_b: &Shape) -> Result<Option<ContactInfo>> {
    match gjk(shape_a, shape_b) {
        Some(simplex) => epa(simplex, shape_a, shape_b).map(Some),
        None => Ok(None),
    }
}

/// GJK boolean test. Returns the origin-enclosing simplex on intersection.
fn gjk(shape_a: &Shape, shape_b: &Shape) -> Option<Vec<SupportPoint>> {
    let mut direction = shape_a.centroid() - shape_b.centroid();
    if direction.length_squared() == 0.0 {
        direction = Vec2::X;
    }

    let first = minkowski_support(shape_a, shape_b, direction);
    let mut simplex = Vec::with_capacity(3);
    simplex.push(first);
    direction = -first.p;

    for _ in 0..GJK_MAX_ITERATIONS {
        let next = minkowski_support(shape_a, shape_b, direction);
        if next.p.dot(direction) < 0.0 {
            // The support cannot pass the origin; the shapes are separated.
            return None;
        }
        simplex.push(next);
        if evolve_simplex(&mut simplex, &mut direction) {
            return Some(simplex);
        }
    }
    None
}

/// Advance the simplex toward enclosing the origin. Returns true once the
/// origin is inside the triangle.
fn evolve_simplex(simplex: &mut Vec<SupportPoint>, direction: &mut Vec2) -> bool {
    if simplex.len() == 2 {
        let a = simplex[1].p; // newest
        let b = simplex[0].p;
        let ab = b - a;
        let ao = -a;
        let mut normal = triple_cross(ab, ao, ab);
        if normal.length_squared() == 0.0 {
            normal = ab.perp();
        }
        *direction = normal;
        return false;
    }

    // Triangle: a newest, c oldest.
    let a = simplex[2].p;
    let b = simplex[1].p;
    let c = simplex[0].p;
    let ao = -a;
    let ab = b - a;
    let ac = c - a;

    let ab_normal = triple_cross(ac, ab, ab);
    if ab_normal.dot(ao) > 0.0 {
        simplex.remove(0);
        *direction = ab_normal;
        return false;
    }

    let ac_normal = triple_cross(ab, ac, ac);
    if ac_normal.dot(ao) > 0.0 {
        simplex.remove(1);
        *direction = ac_normal;
        return false;
    }

    true
}

/// Expand the GJK simplex along the Minkowski boundary until the closest edge
/// stops improving, yielding the penetration normal, depth, and witnesses.
fn epa(simplex: Vec<SupportPoint>, shape_a: &Shape, shape_b: &Shape) -> Result<ContactInfo> {
    let mut polytope = simplex;

    for _ in 0..EPA_MAX_ITERATIONS {
        let (index, min_normal, min_distance) = closest_edge(&polytope);

        let probe = minkowski_support(shape_a, shape_b, min_normal);
        let depth = min_normal.dot(probe.p);

        if (depth - min_distance).abs() < EPA_TOLERANCE {
            return Ok(build_contact(&polytope, index, min_normal, depth));
        }
        polytope.insert(index + 1, probe);
    }

    error!("EPA failed to converge after {EPA_MAX_ITERATIONS} iterations");
    bail!("EPA did not converge within {EPA_MAX_ITERATIONS} iterations");
}

/// Index, outward normal, and origin distance of the polytope edge nearest
/// the origin.
fn closest_edge(polytope: &[SupportPoint]) -> (usize, Vec2, f32) {
    let mut min_index = 0;
    let mut min_normal = Vec2::ZERO;
    let mut min_distance = f32::MAX;

    for i in 0..polytope.len() {
        let a = polytope[i].p;
        let b = polytope[(i + 1) % polytope.len()].p;
        let ab = b - a;

        let mut normal = triple_cross(ab, a, ab);
        if normal.length_squared() == 0.0 {
            normal = ab.perp();
        }
        normal = normal.normalize();

        let distance = normal.dot(a).max(0.0);
        if distance < min_distance {
            min_index = i;
            min_normal = normal;
            min_distance = distance;
        }
    }

    (min_index, min_normal, min_distance)
}

fn build_contact(polytope: &[SupportPoint], index: usize, normal: Vec2, depth: f32) -> ContactInfo {
    let a = polytope[index];
    let b = polytope[(index + 1) % polytope.len()];
    let mtv = normal * depth;

    let world_contact_a = if (a.on_a - b.on_a).length_squared() < WITNESS_MERGE_THRESHOLD {
        a.on_a
    } else {
        // Project the origin onto the Minkowski edge and interpolate the
        // body-A witnesses with the same factor.
        let edge = b.p - a.p;
        let t = -a.p.dot(edge) / edge.dot(edge);
        a.on_a + (b.on_a - a.on_a) * t
    };

    ContactInfo {
        normal,
        depth,
        mtv,
        world_contact_a,
        world_contact_b: world_contact_a - mtv,
    }
}
