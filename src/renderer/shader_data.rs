use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{IVec4, Mat4, Vec2, Vec3, Vec4};

/// Data unique to each vertex passed as elements into a vertex buffer
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub texcoord: Vec2,
}

impl Vertex {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(position: Vec3, texcoord: Vec2) -> Self {
        Self { position, texcoord }
    }

    pub fn input_description() -> VertexInputDescription {
        VertexInputDescription {
            bindings: vec![
                vk::VertexInputBindingDescription::default()
                    .binding(0)
                    .stride(Self::SIZE as u32)
                    .input_rate(vk::VertexInputRate::VERTEX),
            ],
            attributes: vec![
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(0)
                    .format(vk::Format::R32G32B32_SFLOAT)
                    .offset(std::mem::offset_of!(Vertex, position) as u32),
                vk::VertexInputAttributeDescription::default()
                    .binding(0)
                    .location(1)
                    .format(vk::Format::R32G32_SFLOAT)
                    .offset(std::mem::offset_of!(Vertex, texcoord) as u32),
            ],
        }
    }
}

pub struct VertexInputDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Camera state shared by every stimulus during one frame
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraState {
    pub lens: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            lens: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Per-stimulus uniform block. The layout is read verbatim by `shaders/stimulus.vert`.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct StimulusUniforms {
    /// x: texture kind, y: envelope kind, z: defocus flag
    pub settings: IVec4,
    pub model: Mat4,
    pub lens: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
    pub frequency: Vec4,
    pub tex_rotation: Vec4,
    pub rgba0: Vec4,
    pub rgba1: Vec4,
    pub contrast: Vec4,
    pub envelope: Vec4,
}

impl StimulusUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_vertex_size() {
        assert_eq!(Vertex::SIZE, 20);
        assert_eq!(offset_of!(Vertex, position), 0);
        assert_eq!(offset_of!(Vertex, texcoord), 12);
    }

    #[test]
    fn test_vertex_input_description() {
        let desc = Vertex::input_description();
        assert_eq!(desc.bindings.len(), 1);
        assert_eq!(desc.bindings[0].stride, 20);
        assert_eq!(desc.attributes.len(), 2);
        assert_eq!(desc.attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(desc.attributes[0].offset, 0);
        assert_eq!(desc.attributes[1].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(desc.attributes[1].offset, 12);
    }

    #[test]
    fn test_uniform_block_size() {
        // ivec4 + 4 mat4 + 6 vec4
        assert_eq!(StimulusUniforms::SIZE, 16 + 4 * 64 + 6 * 16);
        assert_eq!(StimulusUniforms::SIZE, 368);
    }

    #[test]
    fn test_uniform_block_offsets() {
        assert_eq!(offset_of!(StimulusUniforms, settings), 0);
        assert_eq!(offset_of!(StimulusUniforms, model), 16);
        assert_eq!(offset_of!(StimulusUniforms, lens), 80);
        assert_eq!(offset_of!(StimulusUniforms, view), 144);
        assert_eq!(offset_of!(StimulusUniforms, projection), 208);
        assert_eq!(offset_of!(StimulusUniforms, frequency), 272);
        assert_eq!(offset_of!(StimulusUniforms, tex_rotation), 288);
        assert_eq!(offset_of!(StimulusUniforms, rgba0), 304);
        assert_eq!(offset_of!(StimulusUniforms, rgba1), 320);
        assert_eq!(offset_of!(StimulusUniforms, contrast), 336);
        assert_eq!(offset_of!(StimulusUniforms, envelope), 352);
    }

    #[test]
    fn test_uniform_bytes_are_column_major() {
        let uniforms = StimulusUniforms {
            model: Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            ..Default::default()
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        let floats: &[f32] = bytemuck::cast_slice(&bytes[16..80]);
        // Translation lives in the fourth column
        assert_eq!(&floats[12..15], &[1.0, 2.0, 3.0]);
    }
}
