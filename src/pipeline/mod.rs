//! Deferred rendering pipeline
//!
//! Every frame runs the same four passes in order:
//! 1. Shadow pass - depth from each shadow-casting spotlight
//! 2. Geometry pass - fills the G-buffer
//! 3. Lighting pass - resolves the G-buffer once per light, summed by blending
//! 4. Post-processing - tonemapped composite onto the surface
//!
//! [`FrameOrchestrator`] sequences them and drops the frame when a target
//! turns out to be unusable.

pub mod accumulator;
pub mod frame_targets;
pub mod geometry_pass;
pub mod lighting_pass;
pub mod orchestrator;
pub mod postprocess;
pub mod quad;
pub mod shadow;
pub mod texture_units;

pub use accumulator::LightAccumulator;
pub use frame_targets::FrameTargets;
pub use geometry_pass::GeometryPass;
pub use lighting_pass::LightingPass;
pub use orchestrator::{FrameFailure, FrameOrchestrator, FrameReport, FrameState};
pub use postprocess::{DebugView, PostProcessPass};
pub use quad::FullscreenQuad;
pub use shadow::{ShadowPass, ShadowTarget};
pub use texture_units::{TextureSlot, UnitTable};

use glam::{Mat4, Vec3};
use thiserror::Error;

use crate::backend::{BackendError, FramebufferStatus, GraphicsBackend};
use crate::shader::{ProgramSet, ShaderError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassError {
    #[error("{target} framebuffer is {status}")]
    IncompleteFramebuffer {
        target: &'static str,
        status: FramebufferStatus,
    },
    #[error("invalid {target} size {width}x{height}")]
    InvalidSize {
        target: &'static str,
        width: u32,
        height: u32,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Per-frame values shared by the passes
#[derive(Debug, Clone, Copy)]
pub struct FrameView {
    pub view_projection: Mat4,
    /// Scene-wide matrix applied before every node transform
    pub world: Mat4,
    pub camera_position: Vec3,
    pub camera_direction: Vec3,
    pub clear_color: [f32; 4],
    pub exposure: f32,
    pub debug_view: DebugView,
    pub shadow_bias: f32,
}

impl Default for FrameView {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            world: Mat4::IDENTITY,
            camera_position: Vec3::ZERO,
            camera_direction: Vec3::NEG_Z,
            clear_color: [0.0, 0.8, 1.0, 1.0],
            exposure: 1.0,
            debug_view: DebugView::Final,
            shadow_bias: shadow::DEFAULT_SHADOW_BIAS,
        }
    }
}

/// GPU objects the pipeline owns for its whole life
pub struct PipelineResources {
    pub targets: FrameTargets,
    pub quad: FullscreenQuad,
    pub programs: ProgramSet,
}

/// Why the pipeline could not be set up
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SetupError {
    #[error(transparent)]
    Pass(#[from] PassError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

impl PipelineResources {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
        shader_dir: Option<&std::path::Path>,
    ) -> Result<Self, SetupError> {
        let programs = ProgramSet::create(backend, shader_dir)?;
        let targets = FrameTargets::new(backend, width, height)?;
        let quad = FullscreenQuad::new(backend).map_err(PassError::from)?;
        Ok(Self {
            targets,
            quad,
            programs,
        })
    }
}
