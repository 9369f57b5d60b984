//! Node placement

use glam::{Mat4, Quat, Vec3};

/// Placement of a drawable, composed as `pivot * translate * rotate * scale * base`.
///
/// `base` carries the node's own matrix from load time; `pivot` is applied
/// last and is what the simulation drives per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub base: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            base: Mat4::IDENTITY,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn from_position_scale(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Default::default()
        }
    }

    /// Wrap a raw matrix supplied by the simulation
    pub fn from_matrix(matrix: Mat4) -> Self {
        Self {
            base: matrix,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    /// World matrix of the node
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position) * self.base
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    /// Spin about `axis` through `center` in local space, then place at `position`
    pub fn spin_about(center: Vec3, axis: Vec3, angle: f32, position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::from_axis_angle(axis, angle),
            scale: Vec3::ONE,
            base: Mat4::from_translation(-center),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_applies_base_first() {
        let transform = Transform {
            position: Vec3::new(0.0, 1.0, 0.0),
            scale: Vec3::splat(2.0),
            base: Mat4::from_translation(Vec3::X),
            ..Default::default()
        };
        let p = transform.matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(2.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_rotation_wraps_simulation_matrix() {
        let t = Transform::from_matrix(Mat4::from_translation(Vec3::X))
            .with_rotation(Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));
        let p = t.matrix().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_spin_about_keeps_center_fixed() {
        let center = Vec3::new(3.0, 0.0, 1.0);
        let t = Transform::spin_about(center, Vec3::Y, 1.3, Vec3::new(4.0, 1.0, -16.0));
        let p = t.matrix().transform_point3(center);
        assert!((p - Vec3::new(4.0, 1.0, -16.0)).length() < 1e-5);
    }
}
