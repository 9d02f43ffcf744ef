use std::collections::BTreeSet;
use std::ffi::c_char;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_descriptor::{CreatePoolError, DescriptorDevice, DescriptorPoolCreateFlags, DescriptorTotalCount, DeviceAllocationError};
use smallvec::SmallVec;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::contexts::device_ctx::selection::{required_device_extensions, SuitableDevice};
use crate::renderer::error::{RenderError, VkResultExt};

const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Logical device and everything that lives exactly as long as it
pub struct RenderDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub name: String,

    pub graphics_queue: Arc<Queue>,
    pub present_queue: Arc<Queue>,

    /// Binding 0: uniform block (vertex stage), binding 1: texture (fragment stage)
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    pub msaa_samples: vk::SampleCountFlags,
    pub depth_format: vk::Format,
    pub sample_rate_shading: bool,
    pub max_sampler_anisotropy: f32,

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    instance: ash::Instance,
}

impl RenderDevice {
    pub fn new(
        instance: &RenderInstance,
        selected: &SuitableDevice,
    ) -> Result<Self> {
        let physical = selected.physical;
        let supported_features = unsafe {
            instance.instance.get_physical_device_features(physical)
        };
        let properties = unsafe {
            instance.instance.get_physical_device_properties(physical)
        };
        let sample_rate_shading = supported_features.sample_rate_shading == vk::TRUE;

        let (
            logical_device,
            graphics_queue,
            present_queue,
        ) = Self::create_logical_device(
            instance,
            selected,
            sample_rate_shading,
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical_device.clone(),
            physical_device: physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        let descriptor_set_layout = Self::create_descriptor_set_layout(&logical_device)?;

        let msaa_samples = max_usable_sample_count(
            properties.limits.framebuffer_color_sample_counts
                & properties.limits.framebuffer_depth_sample_counts,
        );
        let depth_format = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| unsafe {
                instance.instance.get_physical_device_format_properties(physical, format)
            },
        )
            .ok_or_else(|| RenderError::FatalDevice(String::from("No supported depth format")))?;

        log::info!(
            "Using device {} ({:?}), msaa {:?}, depth {:?}, sample shading {}",
            selected.name,
            selected.device_type,
            msaa_samples,
            depth_format,
            sample_rate_shading,
        );

        Ok(Self {
            logical: Arc::new(logical_device),
            physical,
            name: selected.name.clone(),

            graphics_queue: Arc::new(graphics_queue),
            present_queue: Arc::new(present_queue),

            descriptor_set_layout,
            msaa_samples,
            depth_format,
            sample_rate_shading,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            instance: instance.instance.clone(),
        })
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.memory_allocator)
    }

    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance.get_physical_device_format_properties(self.physical, format)
        }
    }

    pub fn descriptor_device(&self) -> DescriptorAshDevice {
        DescriptorAshDevice::from(self.logical.clone())
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical
                .device_wait_idle()
                .classify("device_wait_idle")
        }
    }

    /// Graphics and present family indices, deduplicated
    pub fn queue_family_indices(&self) -> Vec<u32> {
        unique_family_indices(
            self.graphics_queue.family.index,
            self.present_queue.family.index,
        )
    }

    fn create_logical_device(
        instance: &RenderInstance,
        selected: &SuitableDevice,
        sample_rate_shading: bool,
    ) -> Result<(ash::Device, Queue, Queue)> {
        let queue_priorities = [1.0];
        let queue_create_infos = unique_family_indices(
            selected.graphics_family.index,
            selected.present_family.index,
        )
            .into_iter()
            .map(|index| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(index)
                    .queue_priorities(&queue_priorities)
            })
            .collect::<Vec<_>>();

        let device = {
            let enabled_extension_names = required_device_extensions()
                .iter()
                .map(|ext| ext.as_ptr())
                .collect::<Vec<*const c_char>>();
            // Ignored by current loaders, kept for older implementations
            let enabled_layer_names = instance
                .layers()
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>();
            let enabled_features = vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(true)
                .sample_rate_shading(sample_rate_shading);

            #[allow(deprecated)]
            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&enabled_extension_names)
                .enabled_layer_names(&enabled_layer_names)
                .enabled_features(&enabled_features);

            unsafe {
                instance.instance
                    .create_device(selected.physical, &device_create_info, None)
                    .classify("create_device")?
            }
        };

        let graphics_queue = unsafe {
            let queue = device.get_device_queue(selected.graphics_family.index, 0);
            Queue::new(selected.graphics_family.clone(), queue)
        };
        let present_queue = unsafe {
            let queue = device.get_device_queue(selected.present_family.index, 0);
            Queue::new(selected.present_family.clone(), queue)
        };

        Ok((device, graphics_queue, present_queue))
    }

    fn create_descriptor_set_layout(device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::VERTEX),
            vk::DescriptorSetLayoutBinding::default()
                .binding(1)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::FRAGMENT),
        ];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&bindings);

        unsafe {
            device
                .create_descriptor_set_layout(&layout_info, None)
                .classify("create_descriptor_set_layout")
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        let allocator = unsafe { ManuallyDrop::take(&mut self.memory_allocator) };
        if Arc::strong_count(&allocator) > 1 {
            log::warn!("Allocator still shared at device teardown");
        }
        drop(allocator);

        unsafe {
            self.logical.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.logical.destroy_device(None);
        }
    }
}

/// Highest single sample count contained in `counts`
pub fn max_usable_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
        .into_iter()
        .find(|count| counts.contains(*count))
        .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// First candidate whose tiling-specific features include `features`
pub fn find_supported_format<F>(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    properties_of: F,
) -> Option<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatProperties,
{
    candidates.iter().copied().find(|format| {
        let props = properties_of(*format);
        match tiling {
            vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
            vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
            _ => false,
        }
    })
}

fn unique_family_indices(graphics: u32, present: u32) -> Vec<u32> {
    BTreeSet::from([graphics, present]).into_iter().collect()
}

/// Lets `gpu-descriptor` drive pool and set creation on an `ash` device
pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorAshDevice {
    /// A pool that can hold exactly `max_sets` stimulus descriptor sets and never grows
    pub fn create_fixed_pool(&self, max_sets: u32) -> Result<vk::DescriptorPool> {
        let count = DescriptorTotalCount {
            uniform_buffer: max_sets,
            combined_image_sampler: max_sets,
            ..Default::default()
        };
        let pool = unsafe {
            self.create_descriptor_pool(&count, max_sets, DescriptorPoolCreateFlags::empty())
        };
        pool.map_err(|e| {
            RenderError::ResourceExhaustion(format!("create descriptor pool: {:?}", e)).into()
        })
    }

    pub fn allocate_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let mut sets = Vec::with_capacity(count);
        let allocated = unsafe {
            self.alloc_descriptor_sets(pool, layouts.iter(), &mut sets)
        };
        allocated.map_err(|e| {
            RenderError::ResourceExhaustion(format!("allocate descriptor sets: {:?}", e))
        })?;
        if sets.len() != count {
            return Err(eyre!("Expected {} descriptor sets, got {}", count, sets.len()));
        }
        Ok(sets)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let pool_sizes = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
        ]
            .into_iter()
            .filter(|(_, count)| *count != 0)
            .map(|(ty, count)| {
                vk::DescriptorPoolSize::default()
                    .ty(ty)
                    .descriptor_count(count)
            })
            .collect::<SmallVec<[_; 6]>>();

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(CreatePoolError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("create_descriptor_pool failed: {}", err);
                Err(CreatePoolError::OutOfDeviceMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: SmallVec<[_; 4]> = layouts.copied().collect();

        let result = unsafe {
            self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            )
        };

        match result {
            Ok(allocated) => {
                sets.extend(allocated);
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => Err(DeviceAllocationError::OutOfHostMemory),
            Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
            Err(err) => {
                log::error!("allocate_descriptor_sets failed: {}", err);
                Err(DeviceAllocationError::OutOfDeviceMemory)
            }
        }
    }

    unsafe fn dealloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        // Sets die with their pool unless it was created freeable
        let sets: SmallVec<[_; 4]> = sets.collect();
        if let Err(err) = unsafe { self.0.free_descriptor_sets(*pool, &sets) } {
            log::error!("free_descriptor_sets failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_usable_sample_count() {
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(max_usable_sample_count(counts), vk::SampleCountFlags::TYPE_8);
        assert_eq!(max_usable_sample_count(vk::SampleCountFlags::TYPE_1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(max_usable_sample_count(vk::SampleCountFlags::empty()), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn test_color_and_depth_sample_counts_intersect() {
        let color = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4 | vk::SampleCountFlags::TYPE_8;
        let depth = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(max_usable_sample_count(color & depth), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_find_supported_depth_format() {
        let format = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |format| {
                if format == vk::Format::D24_UNORM_S8_UINT {
                    vk::FormatProperties {
                        optimal_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                        ..Default::default()
                    }
                } else {
                    vk::FormatProperties::default()
                }
            },
        );
        assert_eq!(format, Some(vk::Format::D24_UNORM_S8_UINT));
    }

    #[test]
    fn test_linear_tiling_is_checked_separately() {
        let format = find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
            |_| {
                vk::FormatProperties {
                    linear_tiling_features: vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
                    ..Default::default()
                }
            },
        );
        assert_eq!(format, None);
    }

    #[test]
    fn test_unique_family_indices() {
        assert_eq!(unique_family_indices(0, 0), vec![0]);
        assert_eq!(unique_family_indices(2, 1), vec![1, 2]);
    }
}
