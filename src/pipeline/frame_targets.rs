//! G-buffer and shaded-color targets
//!
//! All six textures share one framebuffer. The geometry pass writes
//! attachments 0 to 3 with depth, the lighting pass writes attachment 4 only.
//!
//! | attachment | format       | contents                                  |
//! |------------|--------------|-------------------------------------------|
//! | 0 position | Rgba32Float  | world position, w = 1 where covered       |
//! | 1 normal   | Rgba32Float  | world normal, w = shininess               |
//! | 2 albedo   | Rgba32Float  | albedo, w = metallic                      |
//! | 3 mask     | Rgba32Float  | emissive + ambient, w = specular strength |
//! | 4 shaded   | Rgba16Float  | accumulated radiance                      |
//! | depth      | Depth32Float | window depth                              |

use crate::backend::{
    FramebufferDescriptor, FramebufferHandle, FramebufferStatus, GraphicsBackend, LoadOp, Owned,
    RenderPassDescriptor, RenderTarget, TextureDescriptor, TextureFormat, TextureHandle,
};

use super::PassError;

pub const GBUFFER_FORMAT: TextureFormat = TextureFormat::Rgba32Float;
/// Must stay blendable for the additive light accumulation
pub const SHADED_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Color attachments written by the geometry pass
pub const GEOMETRY_DRAW_BUFFERS: [u32; 4] = [0, 1, 2, 3];
/// Color attachment written by the lighting pass
pub const SHADED_DRAW_BUFFER: u32 = 4;

#[derive(Debug)]
pub struct FrameTargets {
    width: u32,
    height: u32,
    position: Owned<TextureHandle>,
    normal: Owned<TextureHandle>,
    albedo: Owned<TextureHandle>,
    mask: Owned<TextureHandle>,
    shaded: Owned<TextureHandle>,
    depth: Owned<TextureHandle>,
    framebuffer: Owned<FramebufferHandle>,
}

impl FrameTargets {
    /// Allocate a complete target set. Nothing is kept if any step fails.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<Self, PassError> {
        let max = backend.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(PassError::InvalidSize {
                target: "frame",
                width,
                height,
            });
        }

        let queue = backend.release_queue();
        let mut create = |label: &str, format: TextureFormat| -> Result<Owned<TextureHandle>, PassError> {
            let desc = TextureDescriptor::render_target(label, width, height, format);
            Ok(queue.own(backend.create_texture(&desc)?))
        };
        let position = create("gbuffer_position", GBUFFER_FORMAT)?;
        let normal = create("gbuffer_normal", GBUFFER_FORMAT)?;
        let albedo = create("gbuffer_albedo", GBUFFER_FORMAT)?;
        let mask = create("gbuffer_mask", GBUFFER_FORMAT)?;
        let shaded = create("shaded_color", SHADED_FORMAT)?;
        let depth = create("gbuffer_depth", DEPTH_FORMAT)?;

        let framebuffer = backend.create_framebuffer(&FramebufferDescriptor {
            label: Some("frame_targets".into()),
            color_attachments: vec![
                position.handle(),
                normal.handle(),
                albedo.handle(),
                mask.handle(),
                shaded.handle(),
            ],
            depth_attachment: Some(depth.handle()),
        })?;
        let framebuffer = queue.own(framebuffer);

        let status = backend.framebuffer_status(framebuffer.handle());
        if !status.is_complete() {
            return Err(PassError::IncompleteFramebuffer {
                target: "frame",
                status,
            });
        }

        log::debug!("Frame targets allocated at {}x{}", width, height);
        Ok(Self {
            width,
            height,
            position,
            normal,
            albedo,
            mask,
            shaded,
            depth,
            framebuffer,
        })
    }

    /// Replace the whole target set with one of the new size.
    ///
    /// On failure the current set stays bound and usable.
    pub fn resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<(), PassError> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        let replacement = Self::new(backend, width, height)?;
        *self = replacement;
        log::info!("Frame targets resized to {}x{}", width, height);
        Ok(())
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn status<B: GraphicsBackend>(&self, backend: &B) -> FramebufferStatus {
        backend.framebuffer_status(self.framebuffer.handle())
    }

    fn ensure_complete<B: GraphicsBackend>(&self, backend: &B) -> Result<(), PassError> {
        let status = self.status(backend);
        if status.is_complete() {
            Ok(())
        } else {
            Err(PassError::IncompleteFramebuffer {
                target: "frame",
                status,
            })
        }
    }

    /// Begin the geometry pass: position, normal, albedo and mask are written
    /// and depth tested. Colors are cleared to zero and depth to one.
    pub fn bind_for_geometry_write<B: GraphicsBackend>(&self, backend: &mut B) -> Result<(), PassError> {
        self.ensure_complete(backend)?;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("geometry".into()),
            target: RenderTarget::Framebuffer {
                framebuffer: self.framebuffer.handle(),
                draw_buffers: GEOMETRY_DRAW_BUFFERS.to_vec(),
                use_depth: true,
            },
            color_load: LoadOp::Clear([0.0; 4]),
            depth_load: LoadOp::Clear(1.0),
            viewport: None,
        })?;
        Ok(())
    }

    /// Begin the lighting pass: only the shaded color is written, no depth
    pub fn bind_for_lighting_write<B: GraphicsBackend>(
        &self,
        backend: &mut B,
        color_load: LoadOp<[f32; 4]>,
    ) -> Result<(), PassError> {
        self.ensure_complete(backend)?;
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("lighting".into()),
            target: RenderTarget::Framebuffer {
                framebuffer: self.framebuffer.handle(),
                draw_buffers: vec![SHADED_DRAW_BUFFER],
                use_depth: false,
            },
            color_load,
            depth_load: LoadOp::Load,
            viewport: None,
        })?;
        Ok(())
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer.handle()
    }

    pub fn position(&self) -> TextureHandle {
        self.position.handle()
    }

    pub fn normal(&self) -> TextureHandle {
        self.normal.handle()
    }

    pub fn albedo(&self) -> TextureHandle {
        self.albedo.handle()
    }

    pub fn mask(&self) -> TextureHandle {
        self.mask.handle()
    }

    pub fn depth(&self) -> TextureHandle {
        self.depth.handle()
    }

    pub fn shaded(&self) -> TextureHandle {
        self.shaded.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::{BackendLimits, TextureInfo};

    #[test]
    fn test_all_targets_share_size() {
        let mut backend = SoftwareBackend::new(32, 16);
        let targets = FrameTargets::new(&mut backend, 32, 16).unwrap();
        let handles = [
            targets.position(),
            targets.normal(),
            targets.albedo(),
            targets.mask(),
            targets.shaded(),
            targets.depth(),
        ];
        for handle in handles {
            let TextureInfo { width, height, .. } = backend.texture_info(handle).unwrap();
            assert_eq!((width, height), (32, 16));
        }
        let format = |handle| backend.texture_info(handle).unwrap().format;
        assert_eq!(format(targets.position()), TextureFormat::Rgba32Float);
        assert_eq!(format(targets.mask()), TextureFormat::Rgba32Float);
        assert_eq!(format(targets.shaded()), TextureFormat::Rgba16Float);
        assert_eq!(format(targets.depth()), TextureFormat::Depth32Float);
        assert!(targets.status(&backend).is_complete());
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mut backend = SoftwareBackend::new(4, 4);
        let result = FrameTargets::new(&mut backend, 0, 4);
        assert!(matches!(result, Err(PassError::InvalidSize { width: 0, .. })));
    }

    #[test]
    fn test_failed_resize_keeps_previous_set() {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut targets = FrameTargets::new(&mut backend, 16, 16).unwrap();
        let old_framebuffer = targets.framebuffer();

        backend.fail_next_framebuffer(FramebufferStatus::IncompleteAttachment { index: 2 });
        let err = targets.resize(&mut backend, 24, 24).unwrap_err();
        assert!(matches!(err, PassError::IncompleteFramebuffer { .. }));
        assert_eq!(targets.size(), (16, 16));
        assert_eq!(targets.framebuffer(), old_framebuffer);

        // The half-built set is released, the old one survives
        backend.collect_garbage();
        assert!(targets.status(&backend).is_complete());
        assert_eq!(backend.live_textures(), 6);
    }

    #[test]
    fn test_allocation_failure_keeps_previous_set() {
        let limits = BackendLimits {
            max_texture_dimension_2d: 64,
            ..Default::default()
        };
        let mut backend = SoftwareBackend::with_limits(16, 16, limits);
        let mut targets = FrameTargets::new(&mut backend, 16, 16).unwrap();
        assert!(targets.resize(&mut backend, 128, 16).is_err());
        assert_eq!(targets.size(), (16, 16));
        assert!(targets.status(&backend).is_complete());
    }
}
