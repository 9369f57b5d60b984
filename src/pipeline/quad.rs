//! Full-screen quad shared by the lighting and post-process passes

use glam::Vec2;

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, Owned,
    QuadVertex, VertexLayout,
};

/// Triangle strip covering NDC, uv origin at the top-left
pub const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: Vec2::new(-1.0, -1.0),
        uv: Vec2::new(0.0, 1.0),
    },
    QuadVertex {
        position: Vec2::new(1.0, -1.0),
        uv: Vec2::new(1.0, 1.0),
    },
    QuadVertex {
        position: Vec2::new(-1.0, 1.0),
        uv: Vec2::new(0.0, 0.0),
    },
    QuadVertex {
        position: Vec2::new(1.0, 1.0),
        uv: Vec2::new(1.0, 0.0),
    },
];

#[derive(Debug)]
pub struct FullscreenQuad {
    buffer: Owned<BufferHandle>,
}

impl FullscreenQuad {
    pub fn new<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("Fullscreen Quad".into()),
                size: bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytes,
        )?;
        Ok(Self {
            buffer: backend.release_queue().own(buffer),
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// Bind the quad and draw it with whatever program and state are current
    pub fn draw<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_vertex_buffer(self.buffer(), VertexLayout::ScreenQuad);
        backend.draw(0..QUAD_VERTICES.len() as u32);
    }
}
