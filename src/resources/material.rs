//! Phong-style material parameters

use std::sync::Arc;

use glam::Vec3;

use super::GpuTexture;

/// Surface description of one material part
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub diffuse: Vec3,
    pub ambient: Vec3,
    pub specular: Vec3,
    pub shininess: f32,
    pub metallic: f32,

    pub diffuse_texture: Option<Arc<GpuTexture>>,
    /// Alpha mask; texels with red below one half are discarded
    pub mask_texture: Option<Arc<GpuTexture>>,
    pub normal_texture: Option<Arc<GpuTexture>>,
    pub bump_texture: Option<Arc<GpuTexture>>,
    pub emissive_texture: Option<Arc<GpuTexture>>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            diffuse: Vec3::splat(0.8),
            ambient: Vec3::ZERO,
            specular: Vec3::splat(0.2),
            shininess: 32.0,
            metallic: 0.0,
            diffuse_texture: None,
            mask_texture: None,
            normal_texture: None,
            bump_texture: None,
            emissive_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_diffuse(mut self, color: Vec3) -> Self {
        self.diffuse = color;
        self
    }

    pub fn with_ambient(mut self, color: Vec3) -> Self {
        self.ambient = color;
        self
    }

    pub fn with_specular(mut self, color: Vec3, shininess: f32) -> Self {
        self.specular = color;
        self.shininess = shininess;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_diffuse_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.diffuse_texture = Some(texture);
        self
    }

    pub fn with_mask_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.mask_texture = Some(texture);
        self
    }

    pub fn with_normal_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.normal_texture = Some(texture);
        self
    }

    pub fn with_bump_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.bump_texture = Some(texture);
        self
    }

    pub fn with_emissive_texture(mut self, texture: Arc<GpuTexture>) -> Self {
        self.emissive_texture = Some(texture);
        self
    }

    /// Texture for the normal unit and whether it is a bump map.
    /// A bump map takes precedence over a normal map.
    pub fn surface_texture(&self) -> (Option<&Arc<GpuTexture>>, bool) {
        match (&self.bump_texture, &self.normal_texture) {
            (Some(bump), _) => (Some(bump), true),
            (None, Some(normal)) => (Some(normal), false),
            (None, None) => (None, false),
        }
    }

    /// Scalar specular strength stored in the G-buffer
    pub fn specular_intensity(&self) -> f32 {
        (self.specular.x + self.specular.y + self.specular.z) / 3.0
    }

    // Presets

    pub fn matte(color: Vec3) -> Self {
        Self::new("matte")
            .with_diffuse(color)
            .with_specular(Vec3::ZERO, 1.0)
    }

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_diffuse(color)
            .with_specular(Vec3::splat(0.5), 64.0)
    }

    pub fn metal(color: Vec3) -> Self {
        Self::new("metal")
            .with_diffuse(color)
            .with_specular(Vec3::ONE, 128.0)
            .with_metallic(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::resources::TextureData;

    #[test]
    fn test_bump_wins_over_normal() {
        let mut backend = SoftwareBackend::new(4, 4);
        let normal = GpuTexture::upload(&mut backend, &TextureData::flat_normal()).unwrap();
        let bump = GpuTexture::upload(&mut backend, &TextureData::solid_color([128; 4], "bump"))
            .unwrap();

        let material = Material::default();
        assert!(material.surface_texture().0.is_none());

        let material = material.with_normal_texture(normal.clone());
        let (texture, is_bump) = material.surface_texture();
        assert_eq!(texture.unwrap().handle(), normal.handle());
        assert!(!is_bump);

        let material = material.with_bump_texture(bump.clone());
        let (texture, is_bump) = material.surface_texture();
        assert_eq!(texture.unwrap().handle(), bump.handle());
        assert!(is_bump);
    }

    #[test]
    fn test_specular_intensity_is_mean() {
        let material = Material::new("m").with_specular(Vec3::new(0.3, 0.6, 0.9), 8.0);
        assert!((material.specular_intensity() - 0.6).abs() < 1e-6);
    }
}
