//! Spotlights

use glam::{Mat4, Vec3};

use crate::backend::GraphicsBackend;
use crate::pipeline::shadow::ShadowTarget;
use crate::pipeline::PassError;

/// Largest cone half-angle in degrees
pub const MAX_CONE_ANGLE: f32 = 89.0;
pub const LIGHT_NEAR: f32 = 1.0;
pub const LIGHT_FAR: f32 = 100.0;

/// Cone light aimed from `position` at `target`.
///
/// Inside `umbra` degrees from the axis the light is at full strength and it
/// fades out towards `penumbra`. A light casts shadows exactly when it owns a
/// [`ShadowTarget`]; dropping the target releases its depth texture.
#[derive(Debug)]
pub struct SpotLight {
    pub position: Vec3,
    pub target: Vec3,
    pub color: Vec3,
    /// HDR scale applied to `color`
    pub intensity: f32,
    pub umbra: f32,
    pub penumbra: f32,
    shadow: Option<ShadowTarget>,
}

impl SpotLight {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            color: Vec3::ONE,
            intensity: 100.0,
            umbra: 25.0,
            penumbra: 35.0,
            shadow: None,
        }
    }

    pub fn with_color(mut self, color: Vec3, intensity: f32) -> Self {
        self.color = color;
        self.intensity = intensity;
        self
    }

    pub fn with_cone(mut self, umbra: f32, penumbra: f32) -> Self {
        self.umbra = umbra;
        self.penumbra = penumbra;
        self
    }

    /// Cone half-angles in degrees after clamping, `umbra <= penumbra`
    pub fn cone(&self) -> (f32, f32) {
        let umbra = self.umbra.clamp(0.0, MAX_CONE_ANGLE);
        let penumbra = self.penumbra.clamp(umbra, MAX_CONE_ANGLE);
        (umbra, penumbra)
    }

    /// Unit vector along the cone axis
    pub fn direction(&self) -> Vec3 {
        let direction = (self.target - self.position).normalize_or_zero();
        if direction == Vec3::ZERO {
            Vec3::NEG_Y
        } else {
            direction
        }
    }

    /// Color times intensity
    pub fn radiance(&self) -> Vec3 {
        self.color * self.intensity
    }

    pub fn view(&self) -> Mat4 {
        let direction = self.direction();
        let up = if direction.dot(Vec3::Y).abs() > 0.999 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Mat4::look_to_rh(self.position, direction, up)
    }

    /// Square perspective frustum enclosing the penumbra cone
    pub fn projection(&self) -> Mat4 {
        let (_, penumbra) = self.cone();
        let fov = (2.0 * penumbra).max(1.0).to_radians();
        Mat4::perspective_rh(fov, 1.0, LIGHT_NEAR, LIGHT_FAR)
    }

    pub fn casts_shadows(&self) -> bool {
        self.shadow.is_some()
    }

    pub fn shadow(&self) -> Option<&ShadowTarget> {
        self.shadow.as_ref()
    }

    pub fn shadow_mut(&mut self) -> Option<&mut ShadowTarget> {
        self.shadow.as_mut()
    }

    /// Allocate a shadow map, or resize the existing one
    pub fn enable_shadows<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        resolution: u32,
    ) -> Result<(), PassError> {
        match &mut self.shadow {
            Some(target) => target.set_resolution(backend, resolution),
            None => {
                self.shadow = Some(ShadowTarget::new(backend, resolution)?);
                Ok(())
            }
        }
    }

    /// Stop casting shadows and release the shadow map
    pub fn disable_shadows(&mut self) {
        self.shadow = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    #[test]
    fn test_cone_is_clamped() {
        let light = SpotLight::new(Vec3::ZERO, Vec3::NEG_Y).with_cone(7000.0, 7000.0);
        assert_eq!(light.cone(), (89.0, 89.0));
        let light = SpotLight::new(Vec3::ZERO, Vec3::NEG_Y).with_cone(30.0, 10.0);
        assert_eq!(light.cone(), (30.0, 30.0));
    }

    #[test]
    fn test_vertical_light_has_valid_view() {
        let light = SpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO);
        let view = light.view();
        assert!(view.is_finite());
        let target = view.transform_point3(Vec3::ZERO);
        assert!(target.x.abs() < 1e-4 && target.y.abs() < 1e-4);
        assert!((target.z + 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_target_projects_to_map_center() {
        let light = SpotLight::new(Vec3::new(0.0, 10.0, 0.0), Vec3::new(1.0, 1.5, 0.0));
        let clip = light.projection() * light.view() * light.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }

    #[test]
    fn test_shadow_map_lifetime() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut light = SpotLight::new(Vec3::Y, Vec3::ZERO);
        assert!(!light.casts_shadows());

        light.enable_shadows(&mut backend, 64).unwrap();
        assert_eq!(light.shadow().unwrap().resolution(), 64);
        light.enable_shadows(&mut backend, 128).unwrap();
        assert_eq!(light.shadow().unwrap().resolution(), 128);
        backend.collect_garbage();
        assert_eq!(backend.live_textures(), 1);

        light.disable_shadows();
        backend.collect_garbage();
        assert_eq!(backend.live_textures(), 0);
    }
}
