//! wgpu backend implementation
//!
//! The pipeline drives the backend one state change at a time, while wgpu
//! wants complete pipelines and bind groups up front. Each draw therefore
//! snapshots the current program, raster state, bound textures and uniform
//! block into a [`RecordedDraw`]; the draws of a pass are replayed into a
//! `wgpu::RenderPass` when the pass ends. Pipelines are created lazily and
//! cached per program, raster state and attachment formats.

mod convert;

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::backend::framebuffer::validate_framebuffer;
use crate::backend::release::{ReleaseQueue, ResourceId};
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::{
    ProgramDescriptor, ShaderReflection, TextureKind, UniformBlock, UniformValue, SAMPLER_BINDING,
    TEXTURE_GROUP,
};

use convert::*;

const MAX_TEXTURE_UNITS: usize = 16;
const MAX_COLOR_ATTACHMENTS: u32 = 8;

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    info: TextureInfo,
}

struct WgpuProgram {
    module: wgpu::ShaderModule,
    reflection: ShaderReflection,
    uniforms: Option<UniformBlock>,
    uniform_layout: Arc<wgpu::BindGroupLayout>,
    texture_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    /// Bumped on reload so cached pipelines of the old code are never hit
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    generation: u64,
    raster: RasterState,
    layout: VertexLayout,
    color_formats: Vec<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
}

enum PassColor {
    Texture(Arc<WgpuTexture>),
    Surface,
}

#[derive(Debug, Clone, Copy)]
struct UniformRange {
    offset: u64,
    size: u64,
}

/// A draw with everything needed to replay it
struct RecordedDraw {
    pipeline: Arc<wgpu::RenderPipeline>,
    uniform_layout: Arc<wgpu::BindGroupLayout>,
    uniforms: Option<UniformRange>,
    textures: wgpu::BindGroup,
    vertex_buffer: Arc<wgpu::Buffer>,
    vertices: Range<u32>,
    viewport: Viewport,
}

/// Render pass whose draws are buffered until `end_render_pass`
struct PendingPass {
    label: Option<String>,
    colors: Vec<PassColor>,
    color_formats: Vec<wgpu::TextureFormat>,
    depth: Option<Arc<WgpuTexture>>,
    depth_format: Option<wgpu::TextureFormat>,
    /// Textures written by this pass, which draws must not sample
    attached: Vec<TextureHandle>,
    color_load: LoadOp<[f32; 4]>,
    depth_load: LoadOp<f32>,
    width: u32,
    height: u32,
    /// Uniform blocks of every draw, each at an aligned offset
    uniform_data: Vec<u8>,
    draws: Vec<RecordedDraw>,
}

#[derive(Default)]
struct DrawState {
    program: Option<ProgramHandle>,
    raster: RasterState,
    viewport: Option<Viewport>,
    units: [Option<TextureHandle>; MAX_TEXTURE_UNITS],
    vertex_buffer: Option<(BufferHandle, VertexLayout)>,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<wgpu::SurfaceTexture>,
    surface_view: Option<wgpu::TextureView>,
    encoder: Option<wgpu::CommandEncoder>,
    frame_open: bool,

    // Resource storage
    next_id: u64,
    buffers: HashMap<u64, Arc<wgpu::Buffer>>,
    textures: HashMap<u64, Arc<WgpuTexture>>,
    framebuffers: HashMap<u64, FramebufferDescriptor>,
    programs: HashMap<u64, WgpuProgram>,
    pipelines: HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>,
    release_queue: ReleaseQueue,

    // Bound to units the current program reads but nothing was bound to
    fallback_color: Arc<WgpuTexture>,
    fallback_depth: Arc<WgpuTexture>,
    sampler: wgpu::Sampler,

    state: DrawState,
    pass: Option<PendingPass>,
    errors: VecDeque<BackendError>,
    uncaptured: Arc<Mutex<VecDeque<BackendError>>>,
}

impl WgpuBackend {
    /// Create the backend for a window, blocking until the device is ready
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter, device, queue) = Self::init_native(window.clone()).await?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb() && from_wgpu_format(*f).is_some())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SurfaceCreationFailed("surface supports no formats".into())
            })?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let (width, height) =
            clamp_extent(size.width, size.height, device.limits().max_texture_dimension_2d);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let uncaptured = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |error: wgpu::Error| {
            log::error!("wgpu: {}", error);
            sink.lock().push_back(from_wgpu_error(error));
        }));

        let fallback_color = Arc::new(create_wgpu_texture(
            &device,
            &TextureDescriptor {
                label: Some("fallback_color".into()),
                ..Default::default()
            },
        ));
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &fallback_color.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        // Depth textures start zeroed, the same as an unbound depth unit reads
        let fallback_depth = Arc::new(create_wgpu_texture(
            &device,
            &TextureDescriptor {
                label: Some("fallback_depth".into()),
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            },
        ));

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("material_sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            surface_view: None,
            encoder: None,
            frame_open: false,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            release_queue: ReleaseQueue::new(),
            fallback_color,
            fallback_depth,
            sampler,
            state: DrawState::default(),
            pass: None,
            errors: VecDeque::new(),
            uncaptured,
        })
    }

    async fn init_native(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )> {
        // On Windows, try Vulkan first to avoid D3D12 debug layer validation errors
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::Backends::all()
        } else {
            #[cfg(target_os = "windows")]
            {
                wgpu::Backends::VULKAN
            }
            #[cfg(not(target_os = "windows"))]
            {
                wgpu::Backends::all()
            }
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;

        // If no adapter found with preferred backend, try with all backends
        let (instance, surface, adapter) = match adapter {
            Some(adapter) => (instance, surface, adapter),
            None if backends != wgpu::Backends::all() => {
                log::warn!("Preferred backend not available, falling back to all backends");
                let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                    backends: wgpu::Backends::all(),
                    ..Default::default()
                });
                let surface = instance
                    .create_surface(window.clone())
                    .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
                let adapter = instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::HighPerformance,
                        compatible_surface: Some(&surface),
                        force_fallback_adapter: false,
                    })
                    .await
                    .ok_or_else(|| {
                        BackendError::InitializationFailed("No suitable adapter found".into())
                    })?;
                (instance, surface, adapter)
            }
            None => {
                return Err(BackendError::InitializationFailed(
                    "No suitable adapter found".into(),
                ))
            }
        };

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        // The geometry pass writes four float targets at once, which needs
        // more color attachment bytes per sample than the defaults allow
        let required_limits = adapter.limits();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, error: BackendError) {
        log::debug!("WgpuBackend: {}", error);
        self.errors.push_back(error);
    }

    fn build_program(&self, desc: &ProgramDescriptor, generation: u64) -> BackendResult<WgpuProgram> {
        let reflection = desc.reflection.clone();
        if let Some(texture) = reflection.textures.iter().find(|t| {
            t.group != TEXTURE_GROUP
                || t.binding == SAMPLER_BINDING
                || t.binding as usize >= MAX_TEXTURE_UNITS
        }) {
            return Err(BackendError::ProgramCreationFailed(format!(
                "'{}' binds '{}' outside the texture units",
                desc.label, texture.name
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&desc.label),
                source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
            });

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
            .uniforms
            .iter()
            .filter(|layout| layout.size > 0)
            .map(|layout| wgpu::BindGroupLayoutEntry {
                binding: layout.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(layout.size as u64),
                },
                count: None,
            })
            .collect();
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &uniform_entries,
            });

        // Float targets are only filterable when the program samples through
        // the material sampler; everything else is read with textureLoad
        let filterable = reflection.has_filtering_sampler();
        let mut texture_entries: Vec<wgpu::BindGroupLayoutEntry> = reflection
            .textures
            .iter()
            .map(|texture| wgpu::BindGroupLayoutEntry {
                binding: texture.binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: match texture.kind {
                        TextureKind::Float => wgpu::TextureSampleType::Float { filterable },
                        TextureKind::Depth => wgpu::TextureSampleType::Depth,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        if filterable {
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding: SAMPLER_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }
        let texture_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &texture_entries,
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::ProgramCreationFailed(format!(
                "{}: {}",
                desc.label, error
            )));
        }

        Ok(WgpuProgram {
            module,
            uniforms: reflection.uniforms.clone().map(UniformBlock::new),
            reflection,
            uniform_layout: Arc::new(uniform_layout),
            texture_layout,
            pipeline_layout,
            generation,
        })
    }

    /// Snapshot the current state into a draw of the open pass
    fn prepare_draw(&mut self, vertices: Range<u32>) -> BackendResult<RecordedDraw> {
        let pass = self
            .pass
            .as_mut()
            .ok_or_else(|| BackendError::InvalidOperation("draw outside of a render pass".into()))?;
        let program_handle = self
            .state
            .program
            .ok_or_else(|| BackendError::InvalidOperation("draw with no program bound".into()))?;
        let (buffer_handle, layout) = self
            .state
            .vertex_buffer
            .ok_or_else(|| BackendError::InvalidOperation("draw with no vertex buffer".into()))?;
        let program = self
            .programs
            .get(&program_handle.0)
            .ok_or_else(|| BackendError::InvalidOperation("draw with released program".into()))?;
        let vertex_buffer = self
            .buffers
            .get(&buffer_handle.0)
            .ok_or_else(|| BackendError::InvalidOperation("draw from released buffer".into()))?;
        if u64::from(vertices.end) * layout.stride() > vertex_buffer.size() {
            return Err(BackendError::Validation(format!(
                "draw range {:?} exceeds the vertex buffer",
                vertices
            )));
        }

        let mut bound = Vec::with_capacity(program.reflection.textures.len());
        for binding in &program.reflection.textures {
            let unit = binding.binding as usize;
            let texture = match self.state.units[unit] {
                Some(handle) => {
                    if pass.attached.contains(&handle) {
                        return Err(BackendError::Validation(format!(
                            "texture on unit {} is also a render target",
                            unit
                        )));
                    }
                    let texture = self.textures.get(&handle.0).ok_or_else(|| {
                        BackendError::InvalidOperation(format!(
                            "texture unit {} holds a released texture",
                            unit
                        ))
                    })?;
                    if texture.info.format.is_depth() != (binding.kind == TextureKind::Depth) {
                        return Err(BackendError::Validation(format!(
                            "texture unit {} expects {}, got {:?}",
                            unit, binding.kind, texture.info.format
                        )));
                    }
                    Arc::clone(texture)
                }
                None => match binding.kind {
                    TextureKind::Float => Arc::clone(&self.fallback_color),
                    TextureKind::Depth => Arc::clone(&self.fallback_depth),
                },
            };
            bound.push((binding.binding, texture));
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = bound
            .iter()
            .map(|(binding, texture)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            })
            .collect();
        if program.reflection.has_filtering_sampler() {
            entries.push(wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            });
        }
        let textures = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.reflection.label),
            layout: &program.texture_layout,
            entries: &entries,
        });

        let key = PipelineKey {
            program: program_handle.0,
            generation: program.generation,
            raster: self.state.raster,
            layout,
            color_formats: pass.color_formats.clone(),
            depth_format: pass.depth_format,
        };
        let pipeline = match self.pipelines.get(&key) {
            Some(pipeline) => Arc::clone(pipeline),
            None => {
                log::debug!(
                    "WgpuBackend: building pipeline for '{}' ({:?})",
                    program.reflection.label,
                    key.raster
                );
                let pipeline = Arc::new(build_pipeline(&self.device, program, &key));
                self.pipelines.insert(key, Arc::clone(&pipeline));
                pipeline
            }
        };

        let alignment = self.device.limits().min_uniform_buffer_offset_alignment as usize;
        let uniforms = program
            .uniforms
            .as_ref()
            .filter(|block| !block.as_bytes().is_empty())
            .map(|block| {
                let offset = pass.uniform_data.len().next_multiple_of(alignment);
                pass.uniform_data.resize(offset, 0);
                pass.uniform_data.extend_from_slice(block.as_bytes());
                UniformRange {
                    offset: offset as u64,
                    size: block.as_bytes().len() as u64,
                }
            });

        Ok(RecordedDraw {
            pipeline,
            uniform_layout: Arc::clone(&program.uniform_layout),
            uniforms,
            textures,
            vertex_buffer: Arc::clone(vertex_buffer),
            vertices,
            viewport: self
                .state
                .viewport
                .unwrap_or_else(|| Viewport::full(pass.width, pass.height)),
        })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn limits(&self) -> BackendLimits {
        let limits = self.device.limits();
        BackendLimits {
            max_texture_dimension_2d: limits.max_texture_dimension_2d,
            max_color_attachments: MAX_COLOR_ATTACHMENTS,
            max_texture_units: MAX_TEXTURE_UNITS as u32,
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn surface_format(&self) -> TextureFormat {
        from_wgpu_format(self.surface_config.format).unwrap_or(TextureFormat::Bgra8UnormSrgb)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) =
            clamp_extent(width, height, self.device.limits().max_texture_dimension_2d);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn begin_frame(&mut self) -> BackendResult<()> {
        if self.frame_open {
            return Err(BackendError::InvalidOperation("frame already begun".into()));
        }

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.surface_config);
                return Err(BackendError::SurfaceLost);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
            Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
        };

        self.surface_view = Some(
            output
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
        );
        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.frame_open = true;
        Ok(())
    }

    fn end_frame(&mut self, present: bool) -> BackendResult<()> {
        if !self.frame_open {
            return Err(BackendError::InvalidOperation("no frame to end".into()));
        }
        if self.pass.take().is_some() {
            self.record(BackendError::InvalidOperation(
                "frame ended inside a render pass".into(),
            ));
        }
        self.frame_open = false;

        let encoder = self.encoder.take();
        self.surface_view = None;
        let output = self.current_texture.take();
        if present {
            if let Some(encoder) = encoder {
                self.queue.submit(std::iter::once(encoder.finish()));
            }
            if let Some(output) = output {
                output.present();
            }
        }

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            self.record(from_wgpu_error(error));
        }
        Ok(())
    }

    fn release_queue(&self) -> ReleaseQueue {
        self.release_queue.clone()
    }

    fn release(&mut self, resource: ResourceId) {
        let found = match resource {
            ResourceId::Buffer(h) => self.buffers.remove(&h.0).is_some(),
            ResourceId::Texture(h) => self.textures.remove(&h.0).is_some(),
            ResourceId::Framebuffer(h) => self.framebuffers.remove(&h.0).is_some(),
            ResourceId::Program(h) => {
                self.pipelines.retain(|key, _| key.program != h.0);
                self.programs.remove(&h.0).is_some()
            }
        };
        if found {
            log::trace!("WgpuBackend: released {:?}", resource);
        } else {
            log::warn!("WgpuBackend: release of unknown {:?}", resource);
        }
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.len() as u64 > desc.size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} bytes do not fit a {} byte buffer",
                data.len(),
                desc.size
            )));
        }
        let mut contents = data.to_vec();
        contents.resize(desc.size as usize, 0);

        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: &contents,
                usage: to_wgpu_buffer_usage(desc.usage),
            });

        let id = self.allocate_id();
        self.buffers.insert(id, Arc::new(buffer));
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} is outside 1..={}",
                desc.width, desc.height, max
            )));
        }

        let texture = create_wgpu_texture(&self.device, desc);
        let id = self.allocate_id();
        self.textures.insert(id, Arc::new(texture));
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let target = self.textures.get(&texture.0).ok_or_else(|| {
            BackendError::InvalidOperation(format!("write to unknown texture {:?}", texture))
        })?;
        let info = target.info;
        let bytes_per_row = info.width * info.format.bytes_per_pixel();
        let expected = bytes_per_row as usize * info.height as usize;
        if data.len() != expected {
            return Err(BackendError::InvalidOperation(format!(
                "texture upload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(info.height),
            },
            wgpu::Extent3d {
                width: info.width,
                height: info.height,
                depth_or_array_layers: 1,
            },
        );
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
        Ok(FramebufferHandle(id))
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        match self.framebuffers.get(&framebuffer.0) {
            Some(desc) => validate_framebuffer(desc, &self.limits(), |texture| {
                self.textures.get(&texture.0).map(|t| t.info)
            }),
            None => FramebufferStatus::MissingAttachment,
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let program = self.build_program(desc, 0)?;
        let id = self.allocate_id();
        self.programs.insert(id, program);
        log::debug!("WgpuBackend: created program '{}'", desc.label);
        Ok(ProgramHandle(id))
    }

    fn reload_program(
        &mut self,
        program: ProgramHandle,
        desc: &ProgramDescriptor,
    ) -> BackendResult<()> {
        let generation = self
            .programs
            .get(&program.0)
            .map(|p| p.generation + 1)
            .ok_or_else(|| {
                BackendError::InvalidOperation(format!("reload of unknown program {:?}", program))
            })?;
        let rebuilt = self.build_program(desc, generation)?;
        self.pipelines.retain(|key, _| key.program != program.0);
        self.programs.insert(program.0, rebuilt);
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

        let mut colors = Vec::new();
        let mut color_formats = Vec::new();
        let mut attached = Vec::new();
        let mut depth = None;
        let (width, height) = match &desc.target {
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

                for index in draw_buffers {
                    let handle = fb.color_attachments.get(*index as usize).ok_or_else(|| {
                        BackendError::InvalidOperation(format!(
                            "draw buffer {} is not attached",
                            index
                        ))
                    })?;
                    let texture = self.textures.get(&handle.0).ok_or_else(|| {
                        BackendError::InvalidOperation(format!("draw buffer {} was released", index))
                    })?;
                    color_formats.push(to_wgpu_format(texture.info.format));
                    colors.push(PassColor::Texture(Arc::clone(texture)));
                    attached.push(*handle);
                }
                if *use_depth {
                    if let Some(handle) = fb.depth_attachment {
                        let texture = self.textures.get(&handle.0).ok_or_else(|| {
                            BackendError::InvalidOperation("depth attachment was released".into())
                        })?;
                        depth = Some(Arc::clone(texture));
                        attached.push(handle);
                    }
                }

                fb.color_attachments
                    .first()
                    .or(fb.depth_attachment.as_ref())
                    .and_then(|h| self.textures.get(&h.0))
                    .map(|t| (t.info.width, t.info.height))
                    .ok_or_else(|| {
                        BackendError::InvalidOperation("render pass has no attachments".into())
                    })?
            }
            RenderTarget::Surface => {
                colors.push(PassColor::Surface);
                color_formats.push(self.surface_config.format);
                self.surface_size()
            }
        };

        self.state.viewport = Some(desc.viewport.unwrap_or_else(|| Viewport::full(width, height)));
        self.pass = Some(PendingPass {
            label: desc.label.clone(),
            colors,
            color_formats,
            depth_format: depth.as_ref().map(|t| to_wgpu_format(t.info.format)),
            depth,
            attached,
            color_load: desc.color_load,
            depth_load: desc.depth_load,
            width,
            height,
            uniform_data: Vec::new(),
            draws: Vec::new(),
        });
        Ok(())
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.pass.take() else {
            self.record(BackendError::InvalidOperation(
                "end_render_pass without an active pass".into(),
            ));
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            self.record(BackendError::InvalidOperation(
                "render pass ended with no frame encoder".into(),
            ));
            return;
        };

        let uniform_buffer = (!pass.uniform_data.is_empty()).then(|| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Pass Uniforms"),
                    contents: &pass.uniform_data,
                    usage: wgpu::BufferUsages::UNIFORM,
                })
        });
        let uniform_groups: Vec<wgpu::BindGroup> = pass
            .draws
            .iter()
            .map(|draw| {
                let entries: Vec<wgpu::BindGroupEntry> = match (&uniform_buffer, draw.uniforms) {
                    (Some(buffer), Some(range)) => vec![wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: range.offset,
                            size: NonZeroU64::new(range.size),
                        }),
                    }],
                    _ => Vec::new(),
                };
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: None,
                    layout: &draw.uniform_layout,
                    entries: &entries,
                })
            })
            .collect();

        let color_load = match pass.color_load {
            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: color[0] as f64,
                g: color[1] as f64,
                b: color[2] as f64,
                a: color[3] as f64,
            }),
            LoadOp::Load => wgpu::LoadOp::Load,
        };
        let surface_view = self.surface_view.as_ref();
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pass
            .colors
            .iter()
            .map(|color| {
                let view = match color {
                    PassColor::Texture(texture) => Some(&texture.view),
                    PassColor::Surface => surface_view,
                }?;
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_attachment = pass
            .depth
            .as_ref()
            .map(|texture| wgpu::RenderPassDepthStencilAttachment {
                view: &texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: match pass.depth_load {
                        LoadOp::Clear(value) => wgpu::LoadOp::Clear(value),
                        LoadOp::Load => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pass.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (draw, uniforms) in pass.draws.iter().zip(&uniform_groups) {
                let viewport = draw.viewport;
                render_pass.set_viewport(
                    viewport.x,
                    viewport.y,
                    viewport.width,
                    viewport.height,
                    0.0,
                    1.0,
                );
                render_pass.set_pipeline(&draw.pipeline);
                render_pass.set_bind_group(0, uniforms, &[]);
                render_pass.set_bind_group(1, &draw.textures, &[]);
                render_pass.set_vertex_buffer(0, draw.vertex_buffer.slice(..));
                render_pass.draw(draw.vertices.clone(), 0..1);
            }
        }

        self.encoder = Some(encoder);
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
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        let Some(handle) = self.state.program else {
            self.record(BackendError::InvalidOperation(format!(
                "uniform '{}' loaded with no program bound",
                name
            )));
            return;
        };
        let result = match self
            .programs
            .get_mut(&handle.0)
            .and_then(|p| p.uniforms.as_mut())
        {
            Some(block) => block.set(name, value),
            None => Ok(false),
        };
        match result {
            Ok(true) => {}
            Ok(false) => log::trace!("WgpuBackend: '{}' is not used by {:?}", name, handle),
            Err(e) => self.record(BackendError::Validation(e.to_string())),
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureHandle>) {
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
        match self.prepare_draw(vertices) {
            Ok(draw) => {
                if let Some(pass) = self.pass.as_mut() {
                    pass.draws.push(draw);
                }
            }
            Err(error) => self.record(error),
        }
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.errors
            .pop_front()
            .or_else(|| self.uncaptured.lock().pop_front())
    }
}

fn create_wgpu_texture(device: &wgpu::Device, desc: &TextureDescriptor) -> WgpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: desc.label.as_deref(),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: to_wgpu_format(desc.format),
        usage: to_wgpu_texture_usage(desc.usage),
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    WgpuTexture {
        texture,
        view,
        info: TextureInfo::from(desc),
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    program: &WgpuProgram,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let buffer_layout = key.layout.buffer_layout();
    let attributes: Vec<wgpu::VertexAttribute> = buffer_layout
        .attributes
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: to_wgpu_vertex_format(a.format),
            offset: a.offset,
            shader_location: a.location,
        })
        .collect();
    let vertex_buffers = [wgpu::VertexBufferLayout {
        array_stride: buffer_layout.array_stride,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &attributes,
    }];

    let blend = key.raster.blend.as_ref().map(to_wgpu_blend_state);
    let targets: Vec<Option<wgpu::ColorTargetState>> = key
        .color_formats
        .iter()
        .map(|format| {
            Some(wgpu::ColorTargetState {
                format: *format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })
        })
        .collect();

    // A pass with a depth attachment needs a matching depth state even when
    // the draw does not test against it
    let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
        format,
        depth_write_enabled: key.raster.depth_test.is_some() && key.raster.depth_write,
        depth_compare: key
            .raster
            .depth_test
            .map(to_wgpu_compare_function)
            .unwrap_or(wgpu::CompareFunction::Always),
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    });

    let reflection = &program.reflection;
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(&reflection.label),
        layout: Some(&program.pipeline_layout),
        vertex: wgpu::VertexState {
            module: &program.module,
            entry_point: reflection.vertex_entry.as_deref().unwrap_or("vs_main"),
            buffers: &vertex_buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: reflection
            .fragment_entry
            .as_deref()
            .map(|entry_point| wgpu::FragmentState {
                module: &program.module,
                entry_point,
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
        primitive: wgpu::PrimitiveState {
            topology: to_wgpu_topology(key.layout.topology()),
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: to_wgpu_cull_mode(key.raster.cull_mode),
            ..Default::default()
        },
        depth_stencil,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
    })
}

/// Clamp to device limits while maintaining aspect ratio
fn clamp_extent(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).clamp(1, max_size),
            ((height as f32 * scale) as u32).clamp(1, max_size),
        )
    } else {
        (width.max(1), height.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_extent_keeps_aspect() {
        assert_eq!(clamp_extent(800, 600, 8192), (800, 600));
        assert_eq!(clamp_extent(16384, 8192, 8192), (8192, 4096));
        assert_eq!(clamp_extent(0, 0, 8192), (1, 1));
    }
}
