//! Rigid body state, factory constructors, and pose integration.

use anyhow::{ensure, Result};
use glam::{vec2, Vec2};

use crate::collider::{Collider, Shape};

/// Surface and bulk material parameters.
#[derive(Debug, Clone, Copy)]
pub struct Material {
    /// Coefficient of restitution, 0..=1.
    pub restitution: f32,
    /// Friction coefficient, 0..=1. Also used as the integration damping rate.
    pub friction: f32,
    /// Mass per unit area.
    pub density: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.3,
            friction: 0.5,
            density: 1.0,
        }
    }
}

/// Rigid body component: kinematic and material state.
///
/// The collider lives in a sibling [`Collider`] component; every operation
/// that moves the body goes through [`translate`]/[`rotate`] so the collider
/// and its cached bounds stay in sync.
#[derive(Debug, Clone)]
pub struct RigidBody {
    /// Engine-assigned, unique and monotonically increasing.
    pub id: u64,
    pub fixed: bool,
    pub sleeping: bool,
    /// Seconds spent below the sleep velocity thresholds.
    pub time_still: f32,
    /// Index into the engine's step-scoped island arena.
    pub island: Option<usize>,
    pub position: Vec2,
    /// Orientation angle in radians.
    pub rotation: f32,
    pub material: Material,
    pub mass: f32,
    /// Scalar mass moment of inertia about the centroid.
    pub angular_mass: f32,
    pub inverse_mass: f32,
    pub inverse_angular_mass: f32,
    pub acceleration: Vec2,
    pub angular_acceleration: f32,
    pub linear_velocity: Vec2,
    pub angular_velocity: f32,
}

impl RigidBody {
    /// Rectangle collider of `width` by `height`, centered on `position`.
    pub fn from_rect(
        width: f32,
        height: f32,
        position: Vec2,
        material: Material,
        fixed: bool,
    ) -> Result<(RigidBody, Collider)> {
        let (hw, hh) = (width * 0.5, height * 0.5);
        let shape = Shape::Polygon {
            vertices: vec![
                vec2(-hw, -hh),
                vec2(hw, -hh),
                vec2(hw, hh),
                vec2(-hw, hh),
            ],
        };
        let mmoi = (width * width + height * height) / 12.0;
        assemble(shape, mmoi, position, material, fixed)
    }

    pub fn from_circle(
        radius: f32,
        position: Vec2,
        material: Material,
        fixed: bool,
    ) -> Result<(RigidBody, Collider)> {
        let shape = Shape::Circle {
            center: Vec2::ZERO,
            radius,
        };
        assemble(shape, radius * radius * 0.5, position, material, fixed)
    }

    /// Capsule lying along the x axis; `length` is the distance between the
    /// two cap centers.
    pub fn from_capsule(
        length: f32,
        radius: f32,
        position: Vec2,
        material: Material,
        fixed: bool,
    ) -> Result<(RigidBody, Collider)> {
        let half = length * 0.5;
        let shape = Shape::Capsule {
            a: vec2(-half, 0.0),
            b: vec2(half, 0.0),
            radius,
        };
        assemble(shape, capsule_mmoi(length, radius), position, material, fixed)
    }

    pub fn from_triangle(
        p1: Vec2,
        p2: Vec2,
        p3: Vec2,
        position: Vec2,
        material: Material,
        fixed: bool,
    ) -> Result<(RigidBody, Collider)> {
        let shape = Shape::Polygon {
            vertices: vec![p1, p2, p3],
        };
        assemble(shape, triangle_mmoi(p1, p2, p3), position, material, fixed)
    }

    /// Arbitrary convex polygon; vertices wind counter-clockwise.
    pub fn from_convex_polygon(
        vertices: Vec<Vec2>,
        position: Vec2,
        material: Material,
        fixed: bool,
    ) -> Result<(RigidBody, Collider)> {
        ensure!(
            vertices.len() >= 3,
            "polygon needs at least 3 vertices, got {}",
            vertices.len()
        );
        let mmoi = polygon_mmoi(&vertices);
        let shape = Shape::Polygon { vertices };
        assemble(shape, mmoi, position, material, fixed)
    }

    /// Linear plus angular velocity of the body at offset `r` from its position.
    #[inline]
    pub fn velocity_at(&self, r: Vec2) -> Vec2 {
        self.linear_velocity + r.perp() * self.angular_velocity
    }

    /// Apply an impulse at offset `r` from the body position.
    #[inline]
    pub fn apply_impulse_at(&mut self, impulse: Vec2, r: Vec2) {
        self.linear_velocity += impulse * self.inverse_mass;
        self.angular_velocity += self.inverse_angular_mass * r.perp_dot(impulse);
    }

    /// Apply an impulse through the center of mass.
    #[inline]
    pub fn apply_impulse(&mut self, impulse: Vec2) {
        self.linear_velocity += impulse * self.inverse_mass;
    }

    /// Accumulate a force through the center of mass for the next substep.
    #[inline]
    pub fn apply_force(&mut self, force: Vec2) {
        self.acceleration += force * self.inverse_mass;
    }
}

fn assemble(
    mut shape: Shape,
    mmoi_per_mass: f32,
    position: Vec2,
    material: Material,
    fixed: bool,
) -> Result<(RigidBody, Collider)> {
    ensure!(position.is_finite(), "body position must be finite");

    shape.translate(position - shape.centroid());

    let mass = shape.area() * material.density;
    ensure!(mass > 0.0, "body mass must be positive");
    let angular_mass = mmoi_per_mass * mass;

    let (inverse_mass, inverse_angular_mass) = if fixed {
        (0.0, 0.0)
    } else {
        (1.0 / mass, 1.0 / angular_mass)
    };

    let body = RigidBody {
        id: 0,
        fixed,
        sleeping: false,
        time_still: 0.0,
        island: None,
        position,
        rotation: 0.0,
        material,
        mass,
        angular_mass,
        inverse_mass,
        inverse_angular_mass,
        acceleration: Vec2::ZERO,
        angular_acceleration: 0.0,
        linear_velocity: Vec2::ZERO,
        angular_velocity: 0.0,
    };
    Ok((body, Collider::new(shape)))
}

/// Moment of inertia per unit mass for a capsule along its long axis.
///
/// Splits the capsule into its circular caps and the central rectangle,
/// weighted by their area fractions.
fn capsule_mmoi(length: f32, radius: f32) -> f32 {
    let pi = std::f32::consts::PI;
    let cap_fraction = pi * radius / (pi * radius + 2.0 * length);
    let rect_fraction = 1.0 - cap_fraction;
    let cap = (radius * radius * 0.5 + length * length * 0.5) * cap_fraction;
    let rect = (length * length + 4.0 * radius * radius) / 12.0 * rect_fraction;
    cap + rect
}

fn triangle_mmoi(p1: Vec2, p2: Vec2, p3: Vec2) -> f32 {
    ((p2 - p1).length_squared() + (p3 - p1).length_squared() + (p2 - p3).length_squared()) / 36.0
}

/// Fan-triangulated moment of inertia per unit mass about the polygon centroid.
fn polygon_mmoi(vertices: &[Vec2]) -> f32 {
    let shape = Shape::Polygon {
        vertices: vertices.to_vec(),
    };
    let centroid = shape.centroid();
    let total_area = shape.area();

    let mut mmoi = 0.0;
    let origin = vertices[0];
    for i in 1..vertices.len() - 1 {
        let (a, b) = (vertices[i], vertices[i + 1]);
        let tri_area = ((a - origin).perp_dot(b - origin) * 0.5).abs();
        let tri_centroid = (origin + a + b) / 3.0;
        let tri_mmoi = triangle_mmoi(origin, a, b);
        mmoi += (tri_mmoi + (tri_centroid - centroid).length_squared()) * tri_area / total_area;
    }
    mmoi
}

/// Translate a body and its collider, keeping the cached bounds in sync.
pub fn translate(body: &mut RigidBody, collider: &mut Collider, delta: Vec2) {
    body.position += delta;
    collider.translate(delta);
}

/// Rotate a body by `angle` radians about its own position.
pub fn rotate(body: &mut RigidBody, collider: &mut Collider, angle: f32) {
    body.rotation += angle;
    collider.rotate(angle, body.position);
}

/// Advance one substep: integrate accelerations and velocities into the pose,
/// then damp velocities by the material friction. Fixed and sleeping bodies
/// are left untouched.
pub fn integrate(body: &mut RigidBody, collider: &mut Collider, dt: f32) {
    if body.fixed || body.sleeping {
        return;
    }

    body.linear_velocity += body.acceleration * dt;
    let step = body.linear_velocity * dt;
    translate(body, collider, step);

    body.angular_velocity += body.angular_acceleration * dt;
    rotate(body, collider, body.angular_velocity * dt);

    let damping = (-dt * body.material.friction).exp();
    body.linear_velocity *= damping;
    body.angular_velocity *= damping;

    body.acceleration = Vec2::ZERO;
    body.angular_acceleration = 0.0;
}
