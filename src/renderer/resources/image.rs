use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::error::{RenderError, VkResultExt};
use crate::renderer::resources::buffer::Buffer;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

pub struct ImageCreateInfo {
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub name: String,
}

/// A 2D image with one view over all of its mip levels
pub struct Image {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Image {
    /// The returned image is allocated but holds undefined contents
    fn new(
        create_info: &ImageCreateInfo,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(create_info.format)
                .usage(create_info.usage)
                .extent(create_info.extent)
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(create_info.mip_levels)
                .array_layers(1)
                .samples(create_info.samples)
                .tiling(vk::ImageTiling::OPTIMAL)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe {
                device
                    .create_image(&info, None)
                    .classify("create_image")?
            }
        };
        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = match memory_allocator.lock() {
            Ok(mut allocator) => allocator.allocate(&AllocationCreateDesc {
                name: &create_info.name,
                requirements: reqs,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            }),
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(eyre!(err.to_string()));
            }
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(RenderError::ResourceExhaustion(
                    format!("{}: {}", create_info.name, err)
                ).into());
            }
        };

        // Owned from here on: Drop releases the image and its memory if binding or the view fails
        let mut image = Self {
            image,
            view: vk::ImageView::null(),
            format: create_info.format,
            extent: create_info.extent,
            aspect: create_info.aspect,
            mip_levels: create_info.mip_levels,

            allocation: Some(allocation),
            memory_allocator,
            device,
        };
        image.bind_memory()?;
        image.view = image.create_view()?;
        Ok(image)
    }

    fn bind_memory(&self) -> Result<()> {
        let allocation = self.allocation
            .as_ref()
            .ok_or_eyre("Image allocation was already freed")?;
        unsafe {
            self.device
                .bind_image_memory(self.image, allocation.memory(), allocation.offset())
                .classify("bind_image_memory")
        }
    }

    fn create_view(&self) -> Result<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::default()
            .view_type(vk::ImageViewType::TYPE_2D)
            .image(self.image)
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
                aspect_mask: self.aspect,
            });
        unsafe {
            self.device
                .create_image_view(&info, None)
                .classify("create_image_view")
        }
    }

    /// Multisampled color target, resolved into the swapchain image every frame
    pub fn new_color_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let create_info = ImageCreateInfo {
            format,
            extent: extent.into(),
            usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            samples,
            name: "MSAA color attachment".into(),
        };
        Self::new(&create_info, memory_allocator, device)
    }

    pub fn new_depth_attachment(
        extent: vk::Extent2D,
        format: vk::Format,
        samples: vk::SampleCountFlags,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let create_info = ImageCreateInfo {
            format,
            extent: extent.into(),
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            mip_levels: 1,
            samples,
            name: "Depth attachment".into(),
        };
        Self::new(&create_info, memory_allocator, device)
    }

    /// Sampled RGBA f32 image uploaded from `pixels`, with every mip level generated on the GPU.
    /// `format_properties` are those of [`TEXTURE_FORMAT`] on the current device.
    pub fn new_texture(
        pixels: &[f32],
        width: u32,
        height: u32,
        mip_levels: u32,
        format_properties: vk::FormatProperties,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        transfer_context: &TransferContext,
    ) -> Result<Self> {
        if mip_levels > 1
            && !format_properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(RenderError::FatalDevice(format!(
                "{:?} does not support linear blitting",
                TEXTURE_FORMAT
            )).into());
        }

        let create_info = ImageCreateInfo {
            format: TEXTURE_FORMAT,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            name: "Texture".into(),
        };
        let image = Self::new(&create_info, memory_allocator, device)?;
        image.upload(pixels, transfer_context)?;
        Ok(image)
    }

    fn upload(
        &self,
        pixels: &[f32],
        transfer_context: &TransferContext,
    ) -> Result<()> {
        let mut staging_buffer = Buffer::new(
            std::mem::size_of_val(pixels) as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "Texture staging buffer",
            MemoryLocation::CpuToGpu,
            self.memory_allocator.clone(),
            self.device.clone(),
        )?;
        staging_buffer.write(pixels, 0)?;

        transfer_context.immediate_submit(
            |cmd: vk::CommandBuffer, device: &ash::Device| {
                let all_levels = vk::ImageSubresourceRange {
                    aspect_mask: self.aspect,
                    base_mip_level: 0,
                    level_count: self.mip_levels,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                let to_transfer = vk::ImageMemoryBarrier::default()
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(self.image)
                    .subresource_range(all_levels)
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_transfer],
                    );
                }

                let copy_region = vk::BufferImageCopy::default()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: self.aspect,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_extent(self.extent);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        staging_buffer.buffer,
                        self.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy_region],
                    );
                }

                self.record_mipmaps(cmd, device);
                Ok(())
            },
        )
    }

    /// Blit each level into the next one and leave every level shader-readable.
    /// Expects all levels in TRANSFER_DST_OPTIMAL with level 0 filled.
    fn record_mipmaps(&self, cmd: vk::CommandBuffer, device: &ash::Device) {
        let extents = mip_extents(self.extent.width, self.extent.height, self.mip_levels);
        let barrier = |level: u32,
                       old_layout: vk::ImageLayout,
                       new_layout: vk::ImageLayout,
                       src_access: vk::AccessFlags,
                       dst_access: vk::AccessFlags| {
            vk::ImageMemoryBarrier::default()
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(self.image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: self.aspect,
                    base_mip_level: level,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
        };

        for level in 1..self.mip_levels {
            let (src_w, src_h) = extents[(level - 1) as usize];
            let (dst_w, dst_h) = extents[level as usize];

            let to_src = barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::TRANSFER_READ,
            );
            let blit = vk::ImageBlit::default()
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D { x: src_w as i32, y: src_h as i32, z: 1 },
                ])
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect,
                    mip_level: level - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D { x: dst_w as i32, y: dst_h as i32, z: 1 },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: self.aspect,
                    mip_level: level,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let to_read = barrier(
                level - 1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_READ,
                vk::AccessFlags::SHADER_READ,
            );

            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_src],
                );
                device.cmd_blit_image(
                    cmd,
                    self.image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    self.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[to_read],
                );
            }
        }

        // The last level was only ever written to
        let last = barrier(
            self.mip_levels - 1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
        );
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[last],
            );
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free image allocation: {}", err);
                    }
                }
                Err(err) => log::error!("Allocator lock poisoned: {}", err),
            }
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

/// Size of every mip level, halving each axis and never going below 1
pub fn mip_extents(width: u32, height: u32, mip_levels: u32) -> Vec<(u32, u32)> {
    (0..mip_levels)
        .map(|level| ((width >> level).max(1), (height >> level).max(1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extents_square() {
        assert_eq!(
            mip_extents(8, 8, 4),
            vec![(8, 8), (4, 4), (2, 2), (1, 1)]
        );
    }

    #[test]
    fn test_mip_extents_clamp_to_one() {
        let extents = mip_extents(16, 2, 5);
        assert_eq!(extents.last(), Some(&(1, 1)));
        assert_eq!(extents[2], (4, 1));
    }

    #[test]
    fn test_single_level() {
        assert_eq!(mip_extents(3, 5, 1), vec![(3, 5)]);
    }
}
