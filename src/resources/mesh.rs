//! Procedural meshes and their vertex buffers
//!
//! Meshes are plain triangle lists. Several meshes can be packed into one
//! [`MeshData`] with [`MeshData::append`], each keeping its own vertex range,
//! which is how material parts address a shared buffer.

use std::ops::Range;
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use crate::backend::{
    BackendError, BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend,
    Owned, Vertex, VertexLayout,
};

/// CPU-side triangle list
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: String,
    pub vertices: Vec<Vertex>,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            vertices: Vec::new(),
        }
    }

    /// Expand an indexed mesh into a triangle list
    pub fn from_indexed(name: &str, vertices: &[Vertex], indices: &[u32]) -> Self {
        Self {
            name: name.to_string(),
            vertices: indices.iter().map(|&i| vertices[i as usize]).collect(),
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.vertex_count() / 3
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Copy `other` onto the end and return the vertex range it now occupies
    pub fn append(&mut self, other: &MeshData) -> Range<u32> {
        let start = self.vertex_count();
        self.vertices.extend_from_slice(&other.vertices);
        start..self.vertex_count()
    }

    /// Unit cube centered at the origin
    pub fn cube() -> Self {
        let mut mesh = Self::new("cube");
        let faces = [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z];
        for normal in faces {
            // u runs along `tangent`, v down along `-bitangent`
            let tangent = if normal.y.abs() > 0.5 {
                Vec3::X
            } else {
                Vec3::Y.cross(normal)
            };
            let bitangent = normal.cross(tangent);
            let corner = |u: f32, v: f32| Vertex {
                position: normal * 0.5 + tangent * (u - 0.5) + bitangent * (0.5 - v),
                normal,
                uv: Vec2::new(u, v),
                tangent: tangent.extend(1.0),
            };
            let quad = [corner(0.0, 1.0), corner(1.0, 1.0), corner(1.0, 0.0), corner(0.0, 0.0)];
            for i in [0, 1, 2, 0, 2, 3] {
                mesh.vertices.push(quad[i]);
            }
        }
        mesh
    }

    /// Plane in XZ facing +Y, centered at the origin
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let cells = subdivisions.max(1);
        let row = cells + 1;
        let mut grid = Vec::with_capacity((row * row) as usize);
        for j in 0..row {
            for i in 0..row {
                let u = i as f32 / cells as f32;
                let v = j as f32 / cells as f32;
                grid.push(Vertex {
                    position: Vec3::new((u - 0.5) * width, 0.0, (v - 0.5) * depth),
                    normal: Vec3::Y,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(1.0, 0.0, 0.0, 1.0),
                });
            }
        }
        Self::from_indexed("plane", &grid, &grid_indices(cells, cells))
    }

    /// UV sphere of diameter 1
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut grid = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let phi = v * std::f32::consts::PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let theta = u * std::f32::consts::TAU;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                grid.push(Vertex {
                    position: normal * 0.5,
                    normal,
                    uv: Vec2::new(u, v),
                    tangent: Vec4::new(-theta.sin(), 0.0, theta.cos(), 1.0),
                });
            }
        }
        Self::from_indexed("sphere", &grid, &grid_indices(segments, rings))
    }
}

/// Two triangles per cell of a `(columns + 1) x (rows + 1)` vertex grid
fn grid_indices(columns: u32, rows: u32) -> Vec<u32> {
    let stride = columns + 1;
    let mut indices = Vec::with_capacity((columns * rows * 6) as usize);
    for row in 0..rows {
        for column in 0..columns {
            let a = row * stride + column;
            let b = a + stride;
            indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
        }
    }
    indices
}

/// Vertex buffer on the device
#[derive(Debug)]
pub struct GpuMesh {
    name: String,
    buffer: Owned<BufferHandle>,
    vertex_count: u32,
}

impl GpuMesh {
    pub fn upload<B: GraphicsBackend>(backend: &mut B, mesh: &MeshData) -> BackendResult<Arc<Self>> {
        if mesh.vertices.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "mesh '{}' has no vertices",
                mesh.name
            )));
        }
        let bytes = mesh.vertex_bytes();
        let buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(mesh.name.clone()),
                size: bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytes,
        )?;
        log::debug!("Uploaded mesh '{}' ({} vertices)", mesh.name, mesh.vertex_count());
        Ok(Arc::new(Self {
            name: mesh.name.clone(),
            buffer: backend.release_queue().own(buffer),
            vertex_count: mesh.vertex_count(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn bind<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_vertex_buffer(self.buffer(), VertexLayout::Mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_faces_point_outwards() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 36);
        for triangle in cube.vertices.chunks(3) {
            let [a, b, c] = [triangle[0].position, triangle[1].position, triangle[2].position];
            let winding = (b - a).cross(c - a);
            assert!(winding.dot(triangle[0].normal) > 0.0);
            assert!(a.dot(triangle[0].normal) > 0.49);
        }
    }

    #[test]
    fn test_plane_and_sphere_sizes() {
        assert_eq!(MeshData::plane(2.0, 2.0, 4).triangle_count(), 32);
        let sphere = MeshData::sphere(8, 4);
        assert_eq!(sphere.triangle_count(), 64);
        assert!(sphere
            .vertices
            .iter()
            .all(|v| (v.position.length() - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_append_returns_ranges() {
        let mut shared = MeshData::new("shared");
        let cube = shared.append(&MeshData::cube());
        let plane = shared.append(&MeshData::plane(1.0, 1.0, 1));
        assert_eq!(cube, 0..36);
        assert_eq!(plane, 36..42);
    }
}
