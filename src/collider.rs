//! Collider shapes, support functions, and bounding boxes.

use glam::{Mat2, Vec2};

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Smallest box enclosing all of `points`.
    pub fn from_points(points: &[Vec2]) -> Self {
        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    /// Test whether two boxes overlap, boundaries included.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// Test whether `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }

    #[inline]
    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.min += delta;
        self.max += delta;
    }

    #[inline]
    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn area(&self) -> f32 {
        let size = self.max - self.min;
        size.x * size.y
    }
}

/// Convex collider shape, stored directly in world space.
#[derive(Debug, Clone)]
pub enum Shape {
    Circle {
        center: Vec2,
        radius: f32,
    },
    /// Counter-clockwise vertex loop.
    Polygon {
        vertices: Vec<Vec2>,
    },
    /// Two cap centers and the cap radius.
    Capsule {
        a: Vec2,
        b: Vec2,
        radius: f32,
    },
}

impl Shape {
    /// GJK/EPA support function: the furthest point of the shape along `direction`.
    #[inline]
    pub fn support(&self, direction: Vec2) -> Vec2 {
        match self {
            Shape::Circle { center, radius } => {
                *center + direction.normalize_or_zero() * *radius
            }
            Shape::Polygon { vertices } => {
                let mut best = vertices[0];
                let mut best_dot = best.dot(direction);
                for v in &vertices[1..] {
                    let d = v.dot(direction);
                    if d > best_dot {
                        best_dot = d;
                        best = *v;
                    }
                }
                best
            }
            Shape::Capsule { a, b, radius } => {
                let end = if a.dot(direction) >= b.dot(direction) {
                    *a
                } else {
                    *b
                };
                end + direction.normalize_or_zero() * *radius
            }
        }
    }

    pub fn area(&self) -> f32 {
        match self {
            Shape::Circle { radius, .. } => std::f32::consts::PI * radius * radius,
            Shape::Polygon { vertices } => signed_area(vertices).abs(),
            Shape::Capsule { a, b, radius } => {
                std::f32::consts::PI * radius * radius + a.distance(*b) * 2.0 * radius
            }
        }
    }

    pub fn centroid(&self) -> Vec2 {
        match self {
            Shape::Circle { center, .. } => *center,
            Shape::Polygon { vertices } => polygon_centroid(vertices),
            Shape::Capsule { a, b, .. } => (*a + *b) * 0.5,
        }
    }

    /// Recompute the enclosing AABB from the shape's current extents.
    pub fn compute_aabb(&self) -> Aabb {
        match self {
            Shape::Circle { center, radius } => Aabb {
                min: *center - Vec2::splat(*radius),
                max: *center + Vec2::splat(*radius),
            },
            Shape::Polygon { vertices } => Aabb::from_points(vertices),
            Shape::Capsule { a, b, radius } => Aabb {
                min: a.min(*b) - Vec2::splat(*radius),
                max: a.max(*b) + Vec2::splat(*radius),
            },
        }
    }

    pub fn translate(&mut self, delta: Vec2) {
        match self {
            Shape::Circle { center, .. } => *center += delta,
            Shape::Polygon { vertices } => {
                for v in vertices {
                    *v += delta;
                }
            }
            Shape::Capsule { a, b, .. } => {
                *a += delta;
                *b += delta;
            }
        }
    }

    /// Rotate the shape by `angle` radians about `pivot`.
    pub fn rotate(&mut self, angle: f32, pivot: Vec2) {
        let rotation = Mat2::from_angle(angle);
        let rotate_point = |p: Vec2| pivot + rotation * (p - pivot);
        match self {
            Shape::Circle { center, .. } => *center = rotate_point(*center),
            Shape::Polygon { vertices } => {
                for v in vertices {
                    *v = rotate_point(*v);
                }
            }
            Shape::Capsule { a, b, .. } => {
                *a = rotate_point(*a);
                *b = rotate_point(*b);
            }
        }
    }
}

/// Shoelace sum; positive for counter-clockwise winding.
fn signed_area(vertices: &[Vec2]) -> f32 {
    let mut sum = 0.0;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        sum += a.perp_dot(b);
    }
    sum * 0.5
}

fn polygon_centroid(vertices: &[Vec2]) -> Vec2 {
    let area = signed_area(vertices);
    let mut sum = Vec2::ZERO;
    for i in 0..vertices.len() {
        let a = vertices[i];
        let b = vertices[(i + 1) % vertices.len()];
        sum += (a + b) * a.perp_dot(b);
    }
    sum / (6.0 * area)
}

/// Collision component: world-space shape plus its cached bounds.
///
/// The bounds are kept equal to the shape's AABB through every mutation, so
/// the broadphase never sees a stale box.
#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: Shape,
    pub bounds: Aabb,
}

impl Collider {
    pub fn new(shape: Shape) -> Self {
        let bounds = shape.compute_aabb();
        Self { shape, bounds }
    }

    pub fn translate(&mut self, delta: Vec2) {
        self.shape.translate(delta);
        self.bounds.translate(delta);
    }

    pub fn rotate(&mut self, angle: f32, pivot: Vec2) {
        self.shape.rotate(angle, pivot);
        self.bounds = self.shape.compute_aabb();
    }
}
