//! Free-fly camera control
//!
//! W/S move along the view direction, A/D strafe, and dragging with the
//! left mouse button turns the view around the camera position.

use glam::{Mat4, Vec2, Vec3};

use super::Camera;

/// Input state for camera controllers
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Whether mouse look is active (left button held)
    pub mouse_look_active: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Movement along (forward, right) in -1..=1
    pub fn movement(&self) -> Vec2 {
        let axis = |pos: bool, neg: bool| pos as i32 as f32 - neg as i32 as f32;
        Vec2::new(
            axis(self.forward, self.backward),
            axis(self.right, self.left),
        )
    }

    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
    }
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;
}

/// Moves position and target together, keeping their distance
pub struct FreeFlyController {
    /// Movement speed in units per second
    pub move_speed: f32,
    /// Mouse sensitivity (radians per pixel)
    pub mouse_sensitivity: f32,
}

impl Default for FreeFlyController {
    fn default() -> Self {
        Self {
            move_speed: 5.0,
            mouse_sensitivity: std::f32::consts::PI * 0.002,
        }
    }
}

impl FreeFlyController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.move_speed = speed;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: f32) -> Self {
        self.mouse_sensitivity = sensitivity;
        self
    }
}

impl CameraController for FreeFlyController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        let movement = input.movement() * self.move_speed * dt;

        let direction = camera.forward();
        if direction == Vec3::ZERO {
            return;
        }
        let offset = direction * movement.x;
        camera.position += offset;
        camera.target += offset;

        let right = direction.cross(camera.up).normalize_or_zero();
        let offset = right * movement.y;
        camera.position += offset;
        camera.target += offset;

        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            let angles = input.mouse_delta * self.mouse_sensitivity;
            let rotation = Mat4::from_axis_angle(right, angles.y)
                * Mat4::from_axis_angle(camera.up, angles.x);
            let distance = camera.position.distance(camera.target);
            let direction = rotation.transform_vector3(direction).normalize_or_zero();
            if direction != Vec3::ZERO {
                camera.target = camera.position + direction * distance;
            }
        }
    }

    fn name(&self) -> &'static str {
        "FreeFly"
    }
}
