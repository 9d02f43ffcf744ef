use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use glam::{Vec2, Vec3};
use gpu_allocator::vulkan::Allocator;
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::shader_data::Vertex;

/// Indexed triangle list in the stimulus' local unit space
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

impl Geometry {
    /// Fails on empty input or on an index pointing past the vertex list
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(eyre!("Geometry needs at least one vertex and one index"));
        }
        if indices.len() % 3 != 0 {
            return Err(eyre!("Index count {} is not a multiple of 3", indices.len()));
        }
        if let Some(bad) = indices.iter().find(|i| **i as usize >= vertices.len()) {
            return Err(eyre!(
                "Index {} out of range for {} vertices",
                bad,
                vertices.len()
            ));
        }
        Ok(Self { vertices, indices })
    }

    /// Unit square centered on the origin
    pub fn quad() -> Self {
        let vertices = vec![
            Vertex::new(Vec3::new(-1.0, -1.0, 0.0), Vec2::new(0.0, 1.0)),
            Vertex::new(Vec3::new(1.0, -1.0, 0.0), Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(-1.0, 1.0, 0.0), Vec2::new(0.0, 0.0)),
        ];
        Self {
            vertices,
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }

    /// Triangle fan approximating a unit circle
    pub fn circle(segments: u32) -> Self {
        let segments = segments.max(3);
        let mut vertices = Vec::with_capacity(segments as usize + 1);
        vertices.push(Vertex::new(Vec3::ZERO, Vec2::splat(0.5)));
        for i in 0..segments {
            let theta = TAU * i as f32 / segments as f32;
            let (sin, cos) = theta.sin_cos();
            vertices.push(Vertex::new(
                Vec3::new(cos, sin, 0.0),
                Vec2::new(0.5 + cos / 2.0, 0.5 - sin / 2.0),
            ));
        }
        let indices = (0..segments)
            .flat_map(|i| [0, i + 1, (i + 1) % segments + 1])
            .collect();
        Self { vertices, indices }
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn vertex_buffer_size(&self) -> u64 {
        (self.vertices.len() * Vertex::SIZE) as u64
    }
}

/// Device-local vertex and index buffers of one renderable
pub struct GeometryObjects {
    pub vertex_buffer: Buffer,
    pub index_buffer: Buffer,
    pub index_count: u32,
}

impl GeometryObjects {
    pub fn new(
        geometry: &Geometry,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        transfer_context: &TransferContext,
    ) -> Result<Self> {
        let vertex_buffer = Buffer::new_with_data(
            geometry.vertices(),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "Vertex buffer",
            memory_allocator.clone(),
            device.clone(),
            transfer_context,
        )?;
        let index_buffer = Buffer::new_with_data(
            geometry.indices(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "Index buffer",
            memory_allocator,
            device,
            transfer_context,
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: geometry.indices().len() as u32,
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer, device: &ash::Device) {
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_geometry() {
        assert!(Geometry::new(Vec::new(), vec![0, 0, 0]).is_err());
        assert!(Geometry::new(Geometry::quad().vertices().to_vec(), Vec::new()).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let vertices = Geometry::quad().vertices().to_vec();
        assert!(Geometry::new(vertices.clone(), vec![0, 1, 4]).is_err());
        assert!(Geometry::new(vertices, vec![0, 1, 3]).is_ok());
    }

    #[test]
    fn test_rejects_partial_triangle() {
        let vertices = Geometry::quad().vertices().to_vec();
        assert!(Geometry::new(vertices, vec![0, 1]).is_err());
    }

    #[test]
    fn test_vertex_buffer_size() {
        assert_eq!(Geometry::quad().vertex_buffer_size(), 4 * 20);
    }

    #[test]
    fn test_circle_indices_in_range() {
        let circle = Geometry::circle(32);
        assert_eq!(circle.vertices().len(), 33);
        assert_eq!(circle.indices().len(), 32 * 3);
        let rebuilt = Geometry::new(circle.vertices().to_vec(), circle.indices().to_vec());
        assert!(rebuilt.is_ok());
    }
}
