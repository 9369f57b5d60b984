//! Shadow maps for spotlights

use glam::Mat4;

use crate::backend::{
    CompareFunction, FramebufferDescriptor, FramebufferHandle, FramebufferStatus, GraphicsBackend,
    LoadOp, Owned, RasterState, RenderPassDescriptor, RenderTarget, TextureDescriptor,
    TextureHandle, Viewport,
};
use crate::scene::{SceneEntry, SpotLight};
use crate::shader::ShaderProgram;

use super::frame_targets::DEPTH_FORMAT;
use super::PassError;

pub const DEFAULT_SHADOW_RESOLUTION: u32 = 1024;
/// Depth offset subtracted before the shadow comparison
pub const DEFAULT_SHADOW_BIAS: f32 = 0.002;

/// Depth-only render target of one light
#[derive(Debug)]
pub struct ShadowTarget {
    resolution: u32,
    depth: Owned<TextureHandle>,
    framebuffer: Owned<FramebufferHandle>,
    projection: Mat4,
    view: Mat4,
}

impl ShadowTarget {
    pub fn new<B: GraphicsBackend>(backend: &mut B, resolution: u32) -> Result<Self, PassError> {
        let max = backend.limits().max_texture_dimension_2d;
        if resolution == 0 || resolution > max {
            return Err(PassError::InvalidSize {
                target: "shadow",
                width: resolution,
                height: resolution,
            });
        }

        let queue = backend.release_queue();
        let depth = queue.own(backend.create_texture(&TextureDescriptor::render_target(
            "shadow_map",
            resolution,
            resolution,
            DEPTH_FORMAT,
        ))?);
        let framebuffer = queue.own(backend.create_framebuffer(&FramebufferDescriptor {
            label: Some("shadow_map".into()),
            color_attachments: Vec::new(),
            depth_attachment: Some(depth.handle()),
        })?);

        let status = backend.framebuffer_status(framebuffer.handle());
        if !status.is_complete() {
            return Err(PassError::IncompleteFramebuffer {
                target: "shadow",
                status,
            });
        }

        Ok(Self {
            resolution,
            depth,
            framebuffer,
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        })
    }

    /// Reallocate the depth texture at a new resolution
    pub fn set_resolution<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        resolution: u32,
    ) -> Result<(), PassError> {
        if resolution == self.resolution {
            return Ok(());
        }
        let mut replacement = Self::new(backend, resolution)?;
        replacement.set_matrices(self.projection, self.view);
        *self = replacement;
        Ok(())
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn depth(&self) -> TextureHandle {
        self.depth.handle()
    }

    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer.handle()
    }

    pub fn status<B: GraphicsBackend>(&self, backend: &B) -> FramebufferStatus {
        backend.framebuffer_status(self.framebuffer.handle())
    }

    /// Light-space matrices the map was last rendered with
    pub fn set_matrices(&mut self, projection: Mat4, view: Mat4) {
        self.projection = projection;
        self.view = view;
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection_view(&self) -> Mat4 {
        self.projection * self.view
    }

    fn bind<B: GraphicsBackend>(&self, backend: &mut B) -> Result<(), PassError> {
        let status = self.status(backend);
        if !status.is_complete() {
            return Err(PassError::IncompleteFramebuffer {
                target: "shadow",
                status,
            });
        }
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("shadow".into()),
            target: RenderTarget::Framebuffer {
                framebuffer: self.framebuffer.handle(),
                draw_buffers: Vec::new(),
                use_depth: true,
            },
            color_load: LoadOp::Load,
            depth_load: LoadOp::Clear(1.0),
            viewport: Some(Viewport::full(self.resolution, self.resolution)),
        })?;
        Ok(())
    }
}

/// Renders scene depth from a light's point of view
pub struct ShadowPass;

impl ShadowPass {
    /// Render depth for `light` into its shadow target.
    ///
    /// Lights without a shadow target are skipped. Returns the number of draw
    /// calls issued.
    pub fn render_depth<B: GraphicsBackend>(
        backend: &mut B,
        program: &ShaderProgram,
        light: &mut SpotLight,
        world: Mat4,
        entries: &[SceneEntry],
    ) -> Result<u32, PassError> {
        let projection = light.projection();
        let view = light.view();
        let Some(target) = light.shadow_mut() else {
            return Ok(0);
        };
        target.set_matrices(projection, view);
        target.bind(backend)?;

        backend.set_program(program.handle());
        backend.set_raster_state(RasterState::default().with_depth(CompareFunction::Less, true));

        let light_space = projection * view * world;
        let mut draws = 0;
        for drawable in entries.iter().filter_map(SceneEntry::visible) {
            if drawable.parts.is_empty() {
                continue;
            }
            backend.load_mat4(
                "uniform_projection_matrix",
                light_space * drawable.transform.matrix(),
            );
            drawable.mesh.bind(backend);
            for part in &drawable.parts {
                backend.draw(part.range());
                draws += 1;
            }
        }

        backend.end_render_pass();
        log::trace!("Shadow pass: {} draws", draws);
        Ok(draws)
    }
}
