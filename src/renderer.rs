//! Renderer facade
//!
//! Owns the backend, the scene and the pipeline resources, and exposes the
//! four operations a host drives the pipeline with: [`init`](Renderer::init),
//! [`render`](Renderer::render), [`resize_buffers`](Renderer::resize_buffers)
//! and [`reload_shaders`](Renderer::reload_shaders).

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendResult, GraphicsBackend};
use crate::pipeline::{
    DebugView, FrameOrchestrator, FrameReport, FrameView, PassError, PipelineResources, SetupError,
};
use crate::resources::{GpuMesh, GpuTexture, MeshData, TextureData};
use crate::scene::{Projection, Scene, SpotLight};
use crate::shader::ShaderError;
use crate::RendererConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RendererError {
    #[error("renderer is not initialized")]
    NotInitialized,
    #[error("pipeline setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

pub struct Renderer<B: GraphicsBackend> {
    config: RendererConfig,
    scene: Scene,
    orchestrator: FrameOrchestrator,
    resources: Option<PipelineResources>,
    pending_resize: Option<(u32, u32)>,
    debug_view: DebugView,
    backend: B,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Wrap a backend. Nothing is allocated until [`init`](Self::init).
    pub fn new(backend: B, config: RendererConfig) -> Self {
        let mut scene = Scene::new();
        scene.camera.projection = Projection::perspective(
            config.fov_y_degrees,
            config.width.max(1) as f32 / config.height.max(1) as f32,
            config.near,
            config.far,
        );
        Self {
            config,
            scene,
            orchestrator: FrameOrchestrator::new(),
            resources: None,
            pending_resize: None,
            debug_view: DebugView::Final,
            backend,
        }
    }

    /// Compile the programs and allocate the frame targets.
    ///
    /// Calling it again rebuilds everything at the new size.
    pub fn init(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        log::info!(
            "Initializing deferred pipeline on {} backend at {}x{}",
            self.backend.name(),
            width,
            height
        );
        self.resources = None;
        self.backend.collect_garbage();

        let resources = PipelineResources::new(
            &mut self.backend,
            width,
            height,
            self.config.shader_dir.as_deref(),
        )
        .map_err(|e| {
            log::error!("Pipeline setup failed: {}", e);
            e
        })?;
        self.resources = Some(resources);
        self.backend.resize_surface(width, height);
        self.scene.camera.set_aspect(width, height);
        self.pending_resize = None;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Run one frame.
    ///
    /// Released resources are destroyed and a requested resize is applied
    /// before the shadow pass starts. Pass failures and API errors end up in
    /// the returned report rather than in an `Err`. A failed resize keeps the
    /// previous targets and drops the frame.
    pub fn render(&mut self) -> Result<FrameReport, RendererError> {
        if self.resources.is_none() {
            return Err(RendererError::NotInitialized);
        }
        self.backend.collect_garbage();
        if let Some((width, height)) = self.pending_resize.take() {
            if let Err(e) = self.apply_resize(width, height) {
                return Ok(self.orchestrator.skip_frame(e));
            }
        }

        let view = self.frame_view();
        let resources = self.resources.as_ref().ok_or(RendererError::NotInitialized)?;
        Ok(self
            .orchestrator
            .run_frame(&mut self.backend, resources, &mut self.scene, &view))
    }

    /// Reallocate the frame targets. On failure the previous set stays bound.
    pub fn resize_buffers(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        if self.resources.is_none() {
            return Err(RendererError::NotInitialized);
        }
        Ok(self.apply_resize(width, height)?)
    }

    fn apply_resize(&mut self, width: u32, height: u32) -> Result<(), PassError> {
        let Some(resources) = self.resources.as_mut() else {
            return Ok(());
        };
        if resources.targets.size() == (width, height) {
            return Ok(());
        }
        match resources.targets.resize(&mut self.backend, width, height) {
            Ok(()) => {
                log::info!("Resized frame targets to {}x{}", width, height);
                self.backend.resize_surface(width, height);
                self.scene.camera.set_aspect(width, height);
                Ok(())
            }
            Err(e) => {
                log::warn!("Resize to {}x{} failed, keeping previous targets: {}", width, height, e);
                Err(e)
            }
        }
    }

    /// Resize at the start of the next [`render`](Self::render)
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some((width, height));
    }

    /// Re-read and recompile every program. On failure the previous programs
    /// stay in use.
    pub fn reload_shaders(&mut self) -> Result<(), RendererError> {
        let resources = self.resources.as_mut().ok_or(RendererError::NotInitialized)?;
        match resources
            .programs
            .reload(&mut self.backend, self.config.shader_dir.as_deref())
        {
            Ok(()) => {
                log::info!("Shaders reloaded");
                Ok(())
            }
            Err(e) => {
                log::warn!("Shader reload failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Add a light, allocating its shadow map when `cast_shadows` is set
    pub fn add_light(&mut self, mut light: SpotLight, cast_shadows: bool) -> Result<usize, PassError> {
        if cast_shadows {
            light.enable_shadows(&mut self.backend, self.config.shadow_resolution)?;
        }
        Ok(self.scene.add_light(light))
    }

    /// Turn shadows of one light on or off
    pub fn set_cast_shadows(&mut self, light: usize, cast_shadows: bool) -> Result<(), PassError> {
        let resolution = self.config.shadow_resolution;
        let Some(light) = self.scene.lights.get_mut(light) else {
            return Ok(());
        };
        if cast_shadows {
            light.enable_shadows(&mut self.backend, resolution)
        } else {
            light.disable_shadows();
            Ok(())
        }
    }

    pub fn upload_mesh(&mut self, mesh: &MeshData) -> BackendResult<Arc<GpuMesh>> {
        GpuMesh::upload(&mut self.backend, mesh)
    }

    pub fn upload_texture(&mut self, texture: &TextureData) -> BackendResult<Arc<GpuTexture>> {
        GpuTexture::upload(&mut self.backend, texture)
    }

    pub fn debug_view(&self) -> DebugView {
        self.debug_view
    }

    pub fn set_debug_view(&mut self, view: DebugView) {
        self.debug_view = view;
    }

    pub fn set_exposure(&mut self, exposure: f32) {
        self.config.exposure = exposure;
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn resources(&self) -> Option<&PipelineResources> {
        self.resources.as_ref()
    }

    pub fn orchestrator(&self) -> &FrameOrchestrator {
        &self.orchestrator
    }

    /// Release every GPU object the renderer and its scene own
    pub fn shutdown(&mut self) {
        self.scene.entries.clear();
        self.scene.lights.clear();
        self.resources = None;
        self.backend.collect_garbage();
    }

    fn frame_view(&self) -> FrameView {
        let camera = &self.scene.camera;
        FrameView {
            view_projection: camera.view_projection_matrix(),
            world: self.scene.world,
            camera_position: camera.position,
            camera_direction: camera.forward(),
            clear_color: self.config.clear_color,
            exposure: self.config.exposure,
            debug_view: self.debug_view,
            shadow_bias: self.config.shadow_bias,
        }
    }
}

impl<B: GraphicsBackend> Drop for Renderer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn renderer(width: u32, height: u32) -> Renderer<SoftwareBackend> {
        let config = RendererConfig::default().with_size(width, height);
        Renderer::new(SoftwareBackend::new(width, height), config)
    }

    #[test]
    fn test_render_before_init_fails() {
        let mut renderer = renderer(8, 8);
        assert_eq!(renderer.render().unwrap_err(), RendererError::NotInitialized);
        assert!(renderer.resize_buffers(4, 4).is_err());
        assert!(renderer.reload_shaders().is_err());
    }

    #[test]
    fn test_pending_resize_applies_before_frame() {
        let mut renderer = renderer(8, 8);
        renderer.init(8, 8).unwrap();
        renderer.request_resize(6, 4);
        let report = renderer.render().unwrap();
        assert!(report.presented);
        assert_eq!(renderer.resources().unwrap().targets.size(), (6, 4));
        assert_eq!(renderer.backend().surface_size(), (6, 4));
        assert!((renderer.scene().camera.projection.aspect - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_reload_embedded_shaders() {
        let mut renderer = renderer(4, 4);
        renderer.init(4, 4).unwrap();
        renderer.reload_shaders().unwrap();
        assert!(renderer.render().unwrap().presented);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut renderer = renderer(4, 4);
        renderer.init(4, 4).unwrap();
        let mesh = renderer.upload_mesh(&MeshData::cube()).unwrap();
        renderer
            .add_light(SpotLight::new(glam::Vec3::Y * 5.0, glam::Vec3::ZERO), true)
            .unwrap();
        drop(mesh);
        renderer.shutdown();
        assert_eq!(renderer.backend().live_resources(), 0);
    }
}
