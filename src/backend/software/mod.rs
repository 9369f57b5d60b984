//! CPU reference backend
//!
//! Executes the pipeline programs on the CPU with a small scan-converting
//! rasterizer. It is deterministic and needs no GPU, which makes it the
//! backend the test suite renders with. Besides rendering it records what
//! happened during the current frame (commands, depth writes, texture
//! fetches per unit) and lets tests inject framebuffer and API failures.

mod programs;
mod raster;

pub use programs::{spot_factor, tonemap};

use std::collections::{HashMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use glam::{Vec3, Vec4};

use super::framebuffer::validate_framebuffer;
use super::release::{ReleaseQueue, ResourceId};
use super::traits::*;
use super::types::*;
use crate::shader::{ProgramDescriptor, ProgramKind, TextureKind, UniformBlock, UniformLayout, UniformValue};
use programs::{Inputs, VertexInput};
use raster::{Bounds, ClipVertex};

/// Texture units the backend exposes
pub const MAX_TEXTURE_UNITS: usize = 16;

/// Texel storage. Depth textures keep their value in `x`.
#[derive(Debug, Clone)]
pub(crate) struct SoftTexture {
    info: TextureInfo,
    texels: Vec<Vec4>,
}

impl SoftTexture {
    fn new(info: TextureInfo) -> Self {
        let clear = if info.format.is_depth() {
            Vec4::ONE
        } else {
            Vec4::ZERO
        };
        Self {
            info,
            texels: vec![clear; (info.width * info.height) as usize],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.info.width + x) as usize
    }

    fn load(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(x, y)]
    }

    fn store(&mut self, x: u32, y: u32, value: Vec4) {
        let value = if self.info.format.is_normalized() {
            value.clamp(Vec4::ZERO, Vec4::ONE)
        } else {
            value
        };
        let index = self.index(x, y);
        self.texels[index] = value;
    }

    fn clear(&mut self, value: Vec4) {
        self.texels.fill(value);
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn decode_texels(format: TextureFormat, data: &[u8]) -> BackendResult<Vec<Vec4>> {
    let unorm = |b: u8| b as f32 / 255.0;
    let texels = match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => data
            .chunks_exact(4)
            .map(|p| Vec4::new(unorm(p[0]), unorm(p[1]), unorm(p[2]), unorm(p[3])))
            .collect::<Vec<_>>(),
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => data
            .chunks_exact(4)
            .map(|p| Vec4::new(unorm(p[2]), unorm(p[1]), unorm(p[0]), unorm(p[3])))
            .collect(),
        TextureFormat::Rgba32Float => data
            .chunks_exact(16)
            .map(|p| Vec4::from_array(bytemuck::pod_read_unaligned::<[f32; 4]>(p)))
            .collect(),
        TextureFormat::Depth32Float => data
            .chunks_exact(4)
            .map(|p| Vec4::new(bytemuck::pod_read_unaligned::<f32>(p), 0.0, 0.0, 0.0))
            .collect(),
        TextureFormat::Rgba16Float => {
            return Err(BackendError::InvalidOperation(
                "uploads to Rgba16Float textures are not supported".into(),
            ))
        }
    };
    if format.is_srgb() {
        return Ok(texels
            .into_iter()
            .map(|t| {
                Vec4::new(
                    srgb_to_linear(t.x),
                    srgb_to_linear(t.y),
                    srgb_to_linear(t.z),
                    t.w,
                )
            })
            .collect());
    }
    Ok(texels)
}

fn blend_factor(factor: BlendFactor, src: Vec4, dst: Vec4) -> Vec4 {
    match factor {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::Src => src,
        BlendFactor::OneMinusSrc => Vec4::ONE - src,
        BlendFactor::SrcAlpha => Vec4::splat(src.w),
        BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
        BlendFactor::Dst => dst,
        BlendFactor::OneMinusDst => Vec4::ONE - dst,
        BlendFactor::DstAlpha => Vec4::splat(dst.w),
        BlendFactor::OneMinusDstAlpha => Vec4::splat(1.0 - dst.w),
    }
}

fn blend_component(component: &BlendComponent, src: Vec4, dst: Vec4) -> Vec4 {
    let s = src * blend_factor(component.src_factor, src, dst);
    let d = dst * blend_factor(component.dst_factor, src, dst);
    match component.operation {
        BlendOperation::Add => s + d,
        BlendOperation::Subtract => s - d,
        BlendOperation::ReverseSubtract => d - s,
        BlendOperation::Min => src.min(dst),
        BlendOperation::Max => src.max(dst),
    }
}

fn blend(state: &BlendState, src: Vec4, dst: Vec4) -> Vec4 {
    let color = blend_component(&state.color, src, dst);
    let alpha = blend_component(&state.alpha, src, dst);
    Vec4::new(color.x, color.y, color.z, alpha.w)
}

/// One entry of the command log
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame,
    BeginPass {
        label: Option<String>,
        target: RenderTarget,
        color_load: LoadOp<[f32; 4]>,
        depth_load: LoadOp<f32>,
    },
    Draw {
        program: &'static str,
        vertices: Range<u32>,
        blend: Option<BlendState>,
        /// Fragments that survived discard and the depth test
        fragments: u64,
    },
    RasterState(RasterState),
    EndPass,
    EndFrame {
        present: bool,
    },
}

/// What the backend did since the last `begin_frame`
#[derive(Debug, Clone, Default)]
pub struct SoftwareStats {
    pub commands: Vec<Command>,
    pub depth_writes: HashMap<TextureHandle, u64>,
    /// Texel reads per (program label, texture unit)
    pub texture_fetches: HashMap<(&'static str, u32), u64>,
    /// Every `bind_texture` call in order
    pub bindings: Vec<(u32, Option<TextureHandle>)>,
}

impl SoftwareStats {
    /// Draw calls issued with `program`
    pub fn draws(&self, program: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { program: p, .. } if *p == program))
            .count()
    }

    pub fn depth_writes(&self, texture: TextureHandle) -> u64 {
        self.depth_writes.get(&texture).copied().unwrap_or(0)
    }

    pub fn fetches(&self, program: &str, unit: u32) -> u64 {
        self.texture_fetches
            .iter()
            .filter(|((p, u), _)| *p == program && *u == unit)
            .map(|(_, count)| *count)
            .sum()
    }

    /// Labels of the render passes in the order they began
    pub fn passes(&self) -> Vec<Option<String>> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginPass { label, .. } => Some(label.clone()),
                _ => None,
            })
            .collect()
    }
}

struct SoftProgram {
    kind: ProgramKind,
    uniforms: UniformBlock,
    unit_kinds: [Option<TextureKind>; MAX_TEXTURE_UNITS],
}

impl SoftProgram {
    fn from_descriptor(desc: &ProgramDescriptor) -> BackendResult<Self> {
        let kind = ProgramKind::ALL
            .into_iter()
            .find(|kind| kind.label() == desc.label)
            .ok_or_else(|| {
                BackendError::ProgramCreationFailed(format!(
                    "no CPU implementation for program '{}'",
                    desc.label
                ))
            })?;

        let layout = desc.reflection.uniforms.clone().unwrap_or_else(|| {
            Arc::new(UniformLayout {
                group: 0,
                binding: 0,
                size: 0,
                members: Vec::new(),
            })
        });

        let mut unit_kinds = [None; MAX_TEXTURE_UNITS];
        for texture in &desc.reflection.textures {
            let slot = unit_kinds.get_mut(texture.binding as usize).ok_or_else(|| {
                BackendError::ProgramCreationFailed(format!(
                    "'{}' binds '{}' past the last texture unit",
                    desc.label, texture.name
                ))
            })?;
            *slot = Some(texture.kind);
        }

        Ok(Self {
            kind,
            uniforms: UniformBlock::new(layout),
            unit_kinds,
        })
    }

    fn expected_layout(&self) -> VertexLayout {
        match self.kind {
            ProgramKind::ShadowMap | ProgramKind::Geometry => VertexLayout::Mesh,
            ProgramKind::Lighting | ProgramKind::PostProcess => VertexLayout::ScreenQuad,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attachment {
    Texture(TextureHandle),
    Surface,
}

struct ActivePass {
    colors: Vec<Attachment>,
    depth: Option<TextureHandle>,
    width: u32,
    height: u32,
}

#[derive(Default)]
struct DrawState {
    program: Option<ProgramHandle>,
    raster: RasterState,
    viewport: Option<Viewport>,
    units: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    vertex_buffer: Option<(BufferHandle, VertexLayout)>,
}

/// CPU reference implementation of [`GraphicsBackend`]
pub struct SoftwareBackend {
    limits: BackendLimits,
    surface: SoftTexture,
    next_id: u64,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, SoftTexture>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, SoftProgram>,
    release_queue: ReleaseQueue,
    state: DrawState,
    pass: Option<ActivePass>,
    frame_open: bool,
    errors: VecDeque<BackendError>,
    stats: SoftwareStats,
    framebuffer_faults: HashMap<u64, FramebufferStatus>,
    pending_faults: Vec<FramebufferStatus>,
    frames_presented: u64,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, BackendLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: BackendLimits) -> Self {
        log::info!("Software backend: {}x{} surface", width, height);
        Self {
            limits,
            surface: SoftTexture::new(Self::surface_info(width, height)),
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            release_queue: ReleaseQueue::new(),
            state: DrawState::default(),
            pass: None,
            frame_open: false,
            errors: VecDeque::new(),
            stats: SoftwareStats::default(),
            framebuffer_faults: HashMap::new(),
            pending_faults: Vec::new(),
            frames_presented: 0,
        }
    }

    fn surface_info(width: u32, height: u32) -> TextureInfo {
        TextureInfo {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
        }
    }

    /// Statistics of the current frame, or the last one once it has ended
    pub fn stats(&self) -> &SoftwareStats {
        &self.stats
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Presented image, row-major from the top-left corner
    pub fn surface_pixels(&self) -> &[Vec4] {
        &self.surface.texels
    }

    pub fn surface_pixel(&self, x: u32, y: u32) -> Vec4 {
        self.surface.load(x, y)
    }

    pub fn texture_texels(&self, texture: TextureHandle) -> Option<&[Vec4]> {
        self.textures.get(&texture.0).map(|t| t.texels.as_slice())
    }

    pub fn texel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<Vec4> {
        let t = self.textures.get(&texture.0)?;
        (x < t.info.width && y < t.info.height).then(|| t.load(x, y))
    }

    /// Resources created and not yet released
    pub fn live_resources(&self) -> usize {
        self.buffers.len() + self.textures.len() + self.framebuffers.len() + self.programs.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Make `framebuffer` report `status`; `None` restores the real check
    pub fn inject_framebuffer_status(
        &mut self,
        framebuffer: FramebufferHandle,
        status: Option<FramebufferStatus>,
    ) {
        match status {
            Some(status) => {
                self.framebuffer_faults.insert(framebuffer.0, status);
            }
            None => {
                self.framebuffer_faults.remove(&framebuffer.0);
            }
        }
    }

    /// Make the next framebuffer created report `status` for its whole life
    pub fn fail_next_framebuffer(&mut self, status: FramebufferStatus) {
        self.pending_faults.push(status);
    }

    /// Queue an API error, as if the device had raised it
    pub fn inject_error(&mut self, error: BackendError) {
        self.errors.push_back(error);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, error: BackendError) {
        log::debug!("SoftwareBackend: {}", error);
        self.errors.push_back(error);
    }

    fn take_attachment(&mut self, attachment: Attachment) -> Option<SoftTexture> {
        match attachment {
            Attachment::Texture(handle) => self.textures.remove(&handle.0),
            Attachment::Surface => {
                let empty = SoftTexture {
                    info: self.surface.info,
                    texels: Vec::new(),
                };
                Some(std::mem::replace(&mut self.surface, empty))
            }
        }
    }

    fn restore_attachment(&mut self, attachment: Attachment, texture: SoftTexture) {
        match attachment {
            Attachment::Texture(handle) => {
                self.textures.insert(handle.0, texture);
            }
            Attachment::Surface => self.surface = texture,
        }
    }

    fn fetch_vertices(&self, layout: VertexLayout, data: &[u8], range: Range<u32>) -> Option<Vec<VertexInput>> {
        let stride = layout.stride() as usize;
        range
            .map(|i| {
                let start = i as usize * stride;
                let bytes = data.get(start..start + stride)?;
                Some(match layout {
                    VertexLayout::Mesh => VertexInput::Mesh(bytemuck::pod_read_unaligned(bytes)),
                    VertexLayout::ScreenQuad => VertexInput::Quad(bytemuck::pod_read_unaligned(bytes)),
                })
            })
            .collect()
    }

    fn assemble(topology: PrimitiveTopology, vertices: &[ClipVertex]) -> Vec<[ClipVertex; 3]> {
        match topology {
            PrimitiveTopology::TriangleList => vertices
                .chunks_exact(3)
                .map(|t| [t[0], t[1], t[2]])
                .collect(),
            PrimitiveTopology::TriangleStrip => (2..vertices.len())
                .map(|i| {
                    if i % 2 == 0 {
                        [vertices[i - 2], vertices[i - 1], vertices[i]]
                    } else {
                        [vertices[i - 1], vertices[i - 2], vertices[i]]
                    }
                })
                .collect(),
        }
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface.info.width, self.surface.info.height)
    }

    fn surface_format(&self) -> TextureFormat {
        self.surface.info.format
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let max = self.limits.max_texture_dimension_2d;
        let (width, height) = (width.clamp(1, max), height.clamp(1, max));
        log::debug!("SoftwareBackend: surface resized to {}x{}", width, height);
        self.surface = SoftTexture::new(Self::surface_info(width, height));
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.frame_open {
            return Err(BackendError::InvalidOperation("frame already begun".into()));
        }
        self.frame_open = true;
        self.stats = SoftwareStats::default();
        self.stats.commands.push(Command::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self, present: bool) -> BackendResult<()> {
        if !self.frame_open {
            return Err(BackendError::InvalidOperation("no frame to end".into()));
        }
        if self.pass.is_some() {
            self.record(BackendError::InvalidOperation(
                "frame ended inside a render pass".into(),
            ));
            self.pass = None;
        }
        self.frame_open = false;
        if present {
            self.frames_presented += 1;
        }
        self.stats.commands.push(Command::EndFrame { present });
        Ok(())
    }

    fn release_queue(&self) -> ReleaseQueue {
        self.release_queue.clone()
    }

    fn release(&mut self, resource: ResourceId) {
        let found = match resource {
            ResourceId::Buffer(h) => self.buffers.remove(&h.0).is_some(),
            ResourceId::Texture(h) => self.textures.remove(&h.0).is_some(),
            ResourceId::Framebuffer(h) => {
                self.framebuffer_faults.remove(&h.0);
                self.framebuffers.remove(&h.0).is_some()
            }
            ResourceId::Program(h) => self.programs.remove(&h.0).is_some(),
        };
        if found {
            log::trace!("SoftwareBackend: released {:?}", resource);
        } else {
            log::warn!("SoftwareBackend: release of unknown {:?}", resource);
        }
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if (data.len() as u64) > desc.size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: {} bytes of data for a {} byte buffer",
                desc.label,
                data.len(),
                desc.size
            )));
        }
        let mut contents = vec![0; desc.size as usize];
        contents[..data.len()].copy_from_slice(data);
        let id = self.allocate_id();
        self.buffers.insert(id, contents);
        log::trace!("SoftwareBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.limits.max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} is outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }
        let id = self.allocate_id();
        self.textures.insert(id, SoftTexture::new(TextureInfo::from(desc)));
        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let target = self.textures.get_mut(&texture.0).ok_or_else(|| {
            BackendError::InvalidOperation(format!("write to unknown texture {:?}", texture))
        })?;
        let info = target.info;
        let expected = (info.width * info.height * info.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(BackendError::InvalidOperation(format!(
                "texture upload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }
        target.texels = decode_texels(info.format, data)?;
        Ok(())
    }

    fn texture_info(&self, texture: TextureHandle) -> Option<TextureInfo> {
        self.textures.get(&texture.0).map(|t| t.info)
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDescriptor,
    ) -> BackendResult<FramebufferHandle> {
        let id = self.allocate_id();
        self.framebuffers.insert(id, desc.clone());
        if !self.pending_faults.is_empty() {
            let status = self.pending_faults.remove(0);
            self.framebuffer_faults.insert(id, status);
        }
        Ok(FramebufferHandle(id))
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        if let Some(status) = self.framebuffer_faults.get(&framebuffer.0) {
            return *status;
        }
        match self.framebuffers.get(&framebuffer.0) {
            Some(desc) => validate_framebuffer(desc, &self.limits, |texture| {
                self.textures.get(&texture.0).map(|t| t.info)
            }),
            None => FramebufferStatus::MissingAttachment,
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let program = SoftProgram::from_descriptor(desc)?;
        let id = self.allocate_id();
        self.programs.insert(id, program);
        Ok(ProgramHandle(id))
    }

    fn reload_program(
        &mut self,
        program: ProgramHandle,
        desc: &ProgramDescriptor,
    ) -> BackendResult<()> {
        let replacement = SoftProgram::from_descriptor(desc)?;
        let slot = self.programs.get_mut(&program.0).ok_or_else(|| {
            BackendError::InvalidOperation(format!("reload of unknown program {:?}", program))
        })?;
        *slot = replacement;
        Ok(())
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        if !self.frame_open {
            return Err(BackendError::InvalidOperation(
                "render pass outside of a frame".into(),
            ));
        }
        if self.pass.is_some() {
            return Err(BackendError::InvalidOperation(
                "render pass already active".into(),
            ));
        }

        let (colors, depth) = match &desc.target {
            RenderTarget::Framebuffer {
                framebuffer,
                draw_buffers,
                use_depth,
            } => {
                let status = self.framebuffer_status(*framebuffer);
                if !status.is_complete() {
                    return Err(BackendError::InvalidOperation(format!(
                        "framebuffer {:?} is {}",
                        framebuffer, status
                    )));
                }
                let fb = self.framebuffers.get(&framebuffer.0).ok_or_else(|| {
                    BackendError::InvalidOperation(format!("unknown framebuffer {:?}", framebuffer))
                })?;
                let colors = draw_buffers
                    .iter()
                    .map(|index| {
                        fb.color_attachments
                            .get(*index as usize)
                            .map(|texture| Attachment::Texture(*texture))
                            .ok_or_else(|| {
                                BackendError::InvalidOperation(format!(
                                    "draw buffer {} is not attached",
                                    index
                                ))
                            })
                    })
                    .collect::<BackendResult<Vec<_>>>()?;
                let depth = if *use_depth { fb.depth_attachment } else { None };
                (colors, depth)
            }
            RenderTarget::Surface => (vec![Attachment::Surface], None),
        };

        let extent = colors
            .first()
            .map(|attachment| match attachment {
                Attachment::Texture(h) => self.texture_info(*h).map(|i| (i.width, i.height)),
                Attachment::Surface => Some(self.surface_size()),
            })
            .or_else(|| depth.map(|h| self.texture_info(h).map(|i| (i.width, i.height))))
            .flatten()
            .ok_or_else(|| BackendError::InvalidOperation("render pass has no attachments".into()))?;

        if let LoadOp::Clear(color) = desc.color_load {
            for attachment in &colors {
                match attachment {
                    Attachment::Texture(h) => {
                        if let Some(t) = self.textures.get_mut(&h.0) {
                            t.clear(Vec4::from_array(color));
                        }
                    }
                    Attachment::Surface => self.surface.clear(Vec4::from_array(color)),
                }
            }
        }
        if let (LoadOp::Clear(value), Some(h)) = (desc.depth_load, depth) {
            if let Some(t) = self.textures.get_mut(&h.0) {
                t.clear(Vec4::new(value, 0.0, 0.0, 0.0));
            }
        }

        self.state.viewport = Some(
            desc.viewport
                .unwrap_or_else(|| Viewport::full(extent.0, extent.1)),
        );
        self.pass = Some(ActivePass {
            colors,
            depth,
            width: extent.0,
            height: extent.1,
        });
        self.stats.commands.push(Command::BeginPass {
            label: desc.label.clone(),
            target: desc.target.clone(),
            color_load: desc.color_load,
            depth_load: desc.depth_load,
        });
        Ok(())
    }

    fn end_render_pass(&mut self) {
        if self.pass.take().is_none() {
            self.record(BackendError::InvalidOperation(
                "end_render_pass without an active pass".into(),
            ));
            return;
        }
        self.stats.commands.push(Command::EndPass);
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = Some(viewport);
    }

    fn set_program(&mut self, program: ProgramHandle) {
        if !self.programs.contains_key(&program.0) {
            self.record(BackendError::InvalidOperation(format!(
                "unknown program {:?}",
                program
            )));
            return;
        }
        self.state.program = Some(program);
    }

    fn set_raster_state(&mut self, state: RasterState) {
        self.state.raster = state;
        self.stats.commands.push(Command::RasterState(state));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(handle) = self.state.program else {
            self.record(BackendError::InvalidOperation(format!(
                "uniform '{}' loaded with no program bound",
                name
            )));
            return;
        };
        let Some(program) = self.programs.get_mut(&handle.0) else {
            self.record(BackendError::InvalidOperation(format!(
                "uniform '{}' loaded into released program",
                name
            )));
            return;
        };
        match program.uniforms.set(name, value) {
            Ok(true) => {}
            Ok(false) => log::trace!("SoftwareBackend: '{}' is not used by {:?}", name, program.kind),
            Err(e) => self.record(BackendError::Validation(e.to_string())),
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
        self.stats.bindings.push((unit, texture));
        match self.state.units.get_mut(unit as usize) {
            Some(slot) => *slot = texture,
            None => self.record(BackendError::InvalidOperation(format!(
                "texture unit {} out of range",
                unit
            ))),
        }
    }

    fn set_vertex_buffer(&mut self, buffer: BufferHandle, layout: VertexLayout) {
        self.state.vertex_buffer = Some((buffer, layout));
    }

    fn draw(&mut self, vertices: Range<u32>) {
        let Some(pass) = self.pass.as_ref() else {
            self.record(BackendError::InvalidOperation("draw outside of a render pass".into()));
            return;
        };
        let (colors, depth_handle, extent) = (pass.colors.clone(), pass.depth, (pass.width, pass.height));

        let Some(program_handle) = self.state.program else {
            self.record(BackendError::InvalidOperation("draw with no program bound".into()));
            return;
        };
        let Some((buffer, layout)) = self.state.vertex_buffer else {
            self.record(BackendError::InvalidOperation("draw with no vertex buffer".into()));
            return;
        };
        let Some(program) = self.programs.get(&program_handle.0) else {
            self.record(BackendError::InvalidOperation("draw with released program".into()));
            return;
        };
        if program.expected_layout() != layout {
            let message = format!("{:?} cannot draw {:?} vertices", program.kind, layout);
            self.record(BackendError::Validation(message));
            return;
        }
        let Some(data) = self.buffers.get(&buffer.0) else {
            self.record(BackendError::InvalidOperation("draw from released buffer".into()));
            return;
        };
        let Some(inputs) = self.fetch_vertices(layout, data, vertices.clone()) else {
            self.record(BackendError::Validation(format!(
                "draw range {:?} exceeds the vertex buffer",
                vertices
            )));
            return;
        };

        // A texture cannot be sampled while it is being rendered to
        let attached = |h: TextureHandle| colors.contains(&Attachment::Texture(h)) || depth_handle == Some(h);
        let mut feedback = Vec::new();
        for (unit, kind) in program.unit_kinds.iter().enumerate() {
            if let (Some(_), Some(h)) = (kind, self.state.units[unit]) {
                if attached(h) {
                    feedback.push(unit);
                }
            }
        }
        for unit in feedback {
            self.record(BackendError::Validation(format!(
                "texture on unit {} is also a render target",
                unit
            )));
        }

        let mut targets = Vec::with_capacity(colors.len());
        for attachment in &colors {
            match self.take_attachment(*attachment) {
                Some(texture) => targets.push(texture),
                None => {
                    for (attachment, texture) in colors.iter().zip(targets) {
                        self.restore_attachment(*attachment, texture);
                    }
                    self.record(BackendError::InvalidOperation("render target was released".into()));
                    return;
                }
            }
        }
        let mut depth = depth_handle.and_then(|h| self.textures.remove(&h.0));

        let Some(program) = self.programs.get(&program_handle.0) else {
            return;
        };
        let kind = program.kind;
        let raster = self.state.raster;
        let viewport = self.state.viewport.unwrap_or_else(|| Viewport::full(extent.0, extent.1));
        let bounds = Bounds::new(&viewport, extent.0, extent.1);

        let mut units = [None; MAX_TEXTURE_UNITS];
        for (unit, slot) in units.iter_mut().enumerate() {
            if program.unit_kinds[unit].is_some() {
                *slot = self.state.units[unit].and_then(|h| self.textures.get(&h.0));
            }
        }
        let mut texture_inputs = Inputs::new(units, program.unit_kinds);

        let clip: Vec<ClipVertex> = inputs
            .into_iter()
            .map(|input| programs::vertex(kind, &program.uniforms, input))
            .collect();
        let outputs = kind.color_outputs() as usize;
        let mut fragments = 0u64;
        let mut depth_writes = 0u64;

        for triangle in Self::assemble(layout.topology(), &clip) {
            raster::rasterize_triangle(triangle, &viewport, bounds, raster.cull_mode, |fragment| {
                if !(0.0..=1.0).contains(&fragment.depth) {
                    return;
                }
                let Some(values) =
                    programs::fragment(kind, &program.uniforms, &mut texture_inputs, &fragment)
                else {
                    return;
                };
                if let (Some(compare), Some(depth)) = (raster.depth_test, depth.as_mut()) {
                    let stored = depth.load(fragment.x, fragment.y).x;
                    if !compare.passes(fragment.depth, stored) {
                        return;
                    }
                    if raster.depth_write {
                        depth.store(fragment.x, fragment.y, Vec4::new(fragment.depth, 0.0, 0.0, 0.0));
                        depth_writes += 1;
                    }
                }
                for (target, value) in targets.iter_mut().zip(values.iter()).take(outputs) {
                    let value = match &raster.blend {
                        Some(state) => blend(state, *value, target.load(fragment.x, fragment.y)),
                        None => *value,
                    };
                    target.store(fragment.x, fragment.y, value);
                }
                fragments += 1;
            });
        }

        let fetches = texture_inputs.fetches;
        let label = kind.label();
        for (unit, count) in fetches.iter().enumerate() {
            if *count > 0 {
                *self.stats.texture_fetches.entry((label, unit as u32)).or_default() += count;
            }
        }
        if let Some(h) = depth_handle {
            if depth_writes > 0 {
                *self.stats.depth_writes.entry(h).or_default() += depth_writes;
            }
            if let Some(texture) = depth {
                self.textures.insert(h.0, texture);
            }
        }
        for (attachment, texture) in colors.iter().zip(targets) {
            self.restore_attachment(*attachment, texture);
        }
        self.stats.commands.push(Command::Draw {
            program: label,
            vertices,
            blend: raster.blend,
            fragments,
        });
        log::trace!("SoftwareBackend: {} drew {} fragments", label, fragments);
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.errors.pop_front()
    }
}

/// Mean of an RGB image, handy when comparing renders
pub fn mean_rgb(pixels: &[Vec4]) -> Vec3 {
    if pixels.is_empty() {
        return Vec3::ZERO;
    }
    pixels.iter().map(|p| p.truncate()).sum::<Vec3>() / pixels.len() as f32
}
