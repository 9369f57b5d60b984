//! Material textures

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};

use crate::backend::{
    BackendResult, GraphicsBackend, Owned, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage,
};

/// Loaded texture data, tightly packed RGBA8
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, image::ImageError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Ok(Self::from_image(image::open(path)?, &name))
    }

    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, image::ImageError> {
        Ok(Self::from_image(image::load_from_memory(bytes)?, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// 1x1 texture of one color
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Tangent-space normal map pointing straight out of the surface
    pub fn flat_normal() -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            ..Self::solid_color([128, 128, 255, 255], "flat_normal")
        }
    }

    /// Checkerboard of 8x8 texel cells
    pub fn checkerboard(size: u32, even: [u8; 4], odd: [u8; 4]) -> Self {
        let data = (0..size * size)
            .flat_map(|i| {
                let (x, y) = (i % size, i / size);
                if (x / 8 + y / 8) % 2 == 0 {
                    even
                } else {
                    odd
                }
            })
            .collect();
        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Treat the data as linear values, as masks and normal maps are
    pub fn linear(mut self) -> Self {
        self.format = TextureFormat::Rgba8Unorm;
        self
    }
}

/// Sampled texture on the device
#[derive(Debug)]
pub struct GpuTexture {
    texture: Owned<TextureHandle>,
    pub width: u32,
    pub height: u32,
    pub name: String,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn upload<B: GraphicsBackend>(
        backend: &mut B,
        data: &TextureData,
    ) -> BackendResult<Arc<Self>> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        let texture = backend.release_queue().own(handle);
        backend.write_texture(handle, &data.data)?;

        Ok(Arc::new(Self {
            texture,
            width: data.width,
            height: data.height,
            name: data.name.clone(),
        }))
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    #[test]
    fn test_checkerboard_cells() {
        let tex = TextureData::checkerboard(16, [255; 4], [0, 0, 0, 255]);
        assert_eq!(tex.data.len(), 16 * 16 * 4);
        let texel = |x: usize, y: usize| tex.data[(y * 16 + x) * 4];
        assert_eq!(texel(0, 0), 255);
        assert_eq!(texel(8, 0), 0);
        assert_eq!(texel(8, 8), 255);
    }

    #[test]
    fn test_upload_and_release() {
        let mut backend = SoftwareBackend::new(4, 4);
        let texture = GpuTexture::upload(&mut backend, &TextureData::flat_normal()).unwrap();
        let texel = backend.texel(texture.handle(), 0, 0).unwrap();
        assert!((texel.x - 128.0 / 255.0).abs() < 1e-6);
        assert_eq!(texel.z, 1.0);

        drop(texture);
        backend.collect_garbage();
        assert_eq!(backend.live_textures(), 0);
    }
}
