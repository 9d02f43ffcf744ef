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

/// A `vk::Buffer` with its own dedicated allocation, freed on drop
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: u64,

    allocation: Option<Allocation>,
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl Buffer {
    pub fn new(
        size: u64,
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_loc: MemoryLocation,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let buffer = {
            let buffer_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            unsafe {
                device
                    .create_buffer(&buffer_info, None)
                    .classify("create_buffer")?
            }
        };

        let requirements = unsafe {
            device.get_buffer_memory_requirements(buffer)
        };
        let allocation = match mem_allocator.lock() {
            Ok(mut allocator) => allocator.allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: mem_loc,
                linear: true,
                allocation_scheme: AllocationScheme::DedicatedBuffer(buffer),
            }),
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(eyre!(err.to_string()));
            }
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(RenderError::ResourceExhaustion(format!("{}: {}", name, err)).into());
            }
        };

        // Owned from here on, so a failed bind releases both through Drop
        let buffer = Self {
            buffer,
            size,

            allocation: Some(allocation),
            memory_allocator: mem_allocator,
            device,
        };
        buffer.bind_memory()?;
        Ok(buffer)
    }

    fn bind_memory(&self) -> Result<()> {
        let allocation = self.allocation
            .as_ref()
            .ok_or_eyre("Buffer allocation was already freed")?;
        unsafe {
            self.device
                .bind_buffer_memory(self.buffer, allocation.memory(), allocation.offset())
                .classify("bind_buffer_memory")
        }
    }

    /// Device-local buffer filled with `data` through a temporary staging buffer
    pub fn new_with_data<T>(
        data: &[T],
        usage: vk::BufferUsageFlags,
        name: &str,
        mem_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        transfer_context: &TransferContext,
    ) -> Result<Self>
    where
        T: Copy,
    {
        let size = std::mem::size_of_val(data) as u64;
        if size == 0 {
            return Err(eyre!("Cannot create empty buffer {}", name));
        }

        let mut staging = Buffer::new(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{} staging", name),
            MemoryLocation::CpuToGpu,
            mem_allocator.clone(),
            device.clone(),
        )?;
        staging.write(data, 0)?;

        let buffer = Buffer::new(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            name,
            MemoryLocation::GpuOnly,
            mem_allocator,
            device,
        )?;

        transfer_context.immediate_submit(|cmd, device| {
            let region = vk::BufferCopy::default()
                .size(size);
            unsafe {
                device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            }
            Ok(())
        })?;

        // `staging` is released here, the copy has completed
        Ok(buffer)
    }

    pub fn write<T>(
        &mut self,
        data: &[T],
        start_offset: usize,
    ) -> Result<presser::CopyRecord>
    where
        T: Copy,
    {
        let allocation = self.allocation
            .as_mut()
            .ok_or_eyre("Buffer allocation was already freed")?;
        Ok(presser::copy_from_slice_to_offset(
            data,
            allocation,
            start_offset,
        )?)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free buffer allocation: {}", err);
                    }
                }
                Err(err) => log::error!("Allocator lock poisoned: {}", err),
            }
        }
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}
