//! Camera position and the motion models that drive it: drag inertia and
//! eased teleports. Everything here works in world pixels.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

pub mod physics;
pub mod teleport;

pub use physics::{DragTracker, Fling, Release};
pub use teleport::{CoordUnit, Coordinate, TeleportAnimation, TeleportRequest};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length_sq(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f64 {
        self.length_sq().sqrt()
    }

    pub fn lerp(self, other: Vec2, t: f64) -> Vec2 {
        self + (other - self) * t
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// World-pixel position of the canvas's top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    pub origin: Vec2,
}

impl Camera {
    pub const fn at(x: f64, y: f64) -> Self {
        Self {
            origin: Vec2::new(x, y),
        }
    }

    /// Move the camera by `delta` world pixels.
    pub fn pan(&mut self, delta: Vec2) {
        self.origin += delta;
    }
}
