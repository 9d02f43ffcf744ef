use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::Allocator;
use gpu_allocator::MemoryLocation;
use gpu_descriptor::DescriptorDevice;
use crate::renderer::contexts::device_ctx::device::DescriptorAshDevice;
use crate::renderer::resources::buffer::Buffer;
use crate::renderer::resources::texture::TextureObjects;
use crate::renderer::shader_data::StimulusUniforms;

/// One uniform buffer and one descriptor set per swapchain image, allocated from a private
/// fixed-size pool
pub struct DescriptorObjects {
    pub sets: Vec<vk::DescriptorSet>,
    pool: vk::DescriptorPool,
    uniform_buffers: Vec<Buffer>,
    descriptor_device: DescriptorAshDevice,
}

impl DescriptorObjects {
    pub fn new(
        image_count: usize,
        layout: vk::DescriptorSetLayout,
        texture: &TextureObjects,
        memory_allocator: Arc<Mutex<Allocator>>,
        descriptor_device: DescriptorAshDevice,
    ) -> Result<Self> {
        if image_count == 0 {
            return Err(eyre!("Descriptor objects need at least one swapchain image"));
        }

        let uniform_buffers = (0..image_count)
            .map(|i| {
                Buffer::new(
                    StimulusUniforms::SIZE as u64,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    &format!("Uniform buffer {}", i),
                    MemoryLocation::CpuToGpu,
                    memory_allocator.clone(),
                    descriptor_device.0.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pool = descriptor_device.create_fixed_pool(image_count as u32)?;
        let sets = match descriptor_device.allocate_sets(&mut pool, layout, image_count) {
            Ok(sets) => sets,
            Err(err) => {
                unsafe { descriptor_device.destroy_descriptor_pool(pool) };
                return Err(err);
            }
        };

        for (set, buffer) in sets.iter().zip(&uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo::default()
                .buffer(buffer.buffer)
                .offset(0)
                .range(StimulusUniforms::SIZE as u64)];
            let image_info = [vk::DescriptorImageInfo::default()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(texture.image.view)
                .sampler(texture.sampler)];
            let writes = [
                vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(0)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info),
                vk::WriteDescriptorSet::default()
                    .dst_set(*set)
                    .dst_binding(1)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info),
            ];
            unsafe {
                descriptor_device.0.update_descriptor_sets(&writes, &[]);
            }
        }

        Ok(Self {
            sets,
            pool,
            uniform_buffers,
            descriptor_device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.uniform_buffers.len()
    }

    pub fn set(&self, image_index: usize) -> Result<vk::DescriptorSet> {
        self.sets
            .get(image_index)
            .copied()
            .ok_or_eyre("Descriptor set index out of range")
    }

    pub fn write_uniforms(&mut self, image_index: usize, uniforms: &StimulusUniforms) -> Result<()> {
        let buffer = self.uniform_buffers
            .get_mut(image_index)
            .ok_or_eyre("Uniform buffer index out of range")?;
        buffer.write(std::slice::from_ref(uniforms), 0)?;
        Ok(())
    }
}

impl Drop for DescriptorObjects {
    fn drop(&mut self) {
        // Destroying the pool frees every set allocated from it
        unsafe {
            self.descriptor_device.destroy_descriptor_pool(self.pool);
        }
    }
}
