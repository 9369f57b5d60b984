//! Deferred Pipeline - a deferred shading renderer for spotlit scenes
//!
//! Each frame runs four passes:
//! - **Shadow**: depth from every shadow-casting spotlight
//! - **Geometry**: fills a G-buffer of position, normal, albedo and material mask
//! - **Lighting**: resolves the G-buffer once per light, summed with additive blending
//! - **Post-process**: tonemapped composite onto the presented surface
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **wgpu**: the GPU backend used by the viewer
//! - **software**: a CPU reference rasterizer that runs the same four
//!   programs, used by the test suite

pub mod backend;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;
pub mod window;

use std::path::PathBuf;

pub use backend::software::SoftwareBackend;
pub use backend::wgpu_backend::WgpuBackend;
pub use pipeline::{DebugView, FrameReport, FrameState};
pub use renderer::{Renderer, RendererError};
pub use window::Window;

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title
    pub title: String,
    /// Initial width of the frame targets
    pub width: u32,
    /// Initial height of the frame targets
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Color of pixels no geometry covers
    pub clear_color: [f32; 4],
    /// Edge length of each shadow map in texels
    pub shadow_resolution: u32,
    pub shadow_bias: f32,
    /// Scale applied before tonemapping
    pub exposure: f32,
    /// Read programs from this directory instead of the embedded sources
    pub shader_dir: Option<PathBuf>,
    /// Vertical field of view of the camera in degrees
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Pipeline".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: [0.0, 0.8, 1.0, 1.0],
            shadow_resolution: pipeline::shadow::DEFAULT_SHADOW_RESOLUTION,
            shadow_bias: pipeline::shadow::DEFAULT_SHADOW_BIAS,
            exposure: 1.0,
            shader_dir: None,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_shadow_resolution(mut self, resolution: u32) -> Self {
        self.shadow_resolution = resolution;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = Some(dir.into());
        self
    }
}
