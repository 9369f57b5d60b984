//! Core backend abstraction traits
//!
//! The pipeline talks to the GPU through [`GraphicsBackend`], a small
//! state-machine style interface: begin a pass, set a program and fixed
//! function state, load uniforms by name, bind textures to numbered units
//! and draw. Both the wgpu backend and the CPU reference backend implement it.

use crate::backend::release::{ReleaseQueue, ResourceId};
use crate::backend::types::*;
use crate::shader::{ProgramDescriptor, UniformValue};
use glam::{Mat4, Vec3};
use std::ops::Range;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create framebuffer: {0}")]
    FramebufferCreationFailed(String),
    #[error("Failed to create program: {0}")]
    ProgramCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a set of render attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn limits(&self) -> BackendLimits;

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    fn surface_format(&self) -> TextureFormat;

    /// Resize the presentable surface
    fn resize_surface(&mut self, width: u32, height: u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<()>;

    /// End the frame, presenting it only if `present` is set
    fn end_frame(&mut self, present: bool) -> BackendResult<()>;

    /// Queue that owned handles push themselves onto when dropped
    fn release_queue(&self) -> ReleaseQueue;

    /// Destroy a resource immediately
    fn release(&mut self, resource: ResourceId);

    /// Destroy everything that was dropped since the last call
    fn collect_garbage(&mut self) {
        for resource in self.release_queue().drain() {
            self.release(resource);
        }
    }

    // Resource creation

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload tightly packed texel data covering the whole texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    fn texture_info(&self, texture: TextureHandle) -> Option<TextureInfo>;

    /// Group attachments into a framebuffer; completeness is checked separately
    fn create_framebuffer(&mut self, desc: &FramebufferDescriptor)
        -> BackendResult<FramebufferHandle>;

    /// Check that every attachment of a framebuffer is still usable together
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Compile and link a program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Replace a program's code in place, keeping the handle valid
    fn reload_program(&mut self, program: ProgramHandle, desc: &ProgramDescriptor)
        -> BackendResult<()>;

    // Command recording

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()>;

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Set viewport
    fn set_viewport(&mut self, viewport: Viewport);

    /// Make `program` current for uniform loads and draws
    fn set_program(&mut self, program: ProgramHandle);

    fn set_raster_state(&mut self, state: RasterState);

    /// Write a uniform of the current program; unknown names are ignored
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Bind a texture to a numbered unit, `None` unbinds
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>);

    /// Set vertex buffer
    fn set_vertex_buffer(&mut self, buffer: BufferHandle, layout: VertexLayout);

    /// Draw primitives
    fn draw(&mut self, vertices: Range<u32>);

    /// Pop the oldest API error recorded since the last call
    fn take_error(&mut self) -> Option<BackendError>;

    fn load_mat4(&mut self, name: &str, value: Mat4) {
        self.set_uniform(name, UniformValue::Mat4(value));
    }

    fn load_vec3(&mut self, name: &str, value: Vec3) {
        self.set_uniform(name, UniformValue::Vec3(value));
    }

    fn load_float(&mut self, name: &str, value: f32) {
        self.set_uniform(name, UniformValue::Float(value));
    }

    fn load_int(&mut self, name: &str, value: i32) {
        self.set_uniform(name, UniformValue::Int(value));
    }
}
