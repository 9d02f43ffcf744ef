use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::Result;
use crate::renderer::contexts::device_ctx::queue::Queue;
use crate::renderer::error::VkResultExt;

/// A private command pool with one reusable buffer for blocking one-shot submissions.
/// Each renderable owns one for its uploads.
pub struct TransferContext {
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    queue: Arc<Queue>,
    device: Arc<ash::Device>,
}

impl TransferContext {
    pub fn new(
        queue: Arc<Queue>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::default();
        let fence = unsafe {
            device.create_fence(&fence_info, None).classify("create_fence")?
        };

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family.index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = match unsafe { device.create_command_pool(&command_pool_info, None) } {
            Ok(pool) => pool,
            Err(err) => {
                unsafe { device.destroy_fence(fence, None) };
                return Err(err).classify("create_command_pool");
            }
        };

        let command_buffer_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .command_buffer_count(1)
            .level(vk::CommandBufferLevel::PRIMARY);
        let command_buffer = match unsafe { device.allocate_command_buffers(&command_buffer_info) } {
            Ok(buffers) => buffers[0],
            Err(err) => {
                unsafe {
                    device.destroy_command_pool(command_pool, None);
                    device.destroy_fence(fence, None);
                }
                return Err(err).classify("allocate_command_buffers");
            }
        };

        Ok(Self {
            fence,
            command_pool,
            command_buffer,
            queue,
            device,
        })
    }

    /// Record with `func`, submit, and block until the queue has finished executing it
    pub fn immediate_submit<F>(
        &self,
        func: F,
    ) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, &ash::Device) -> Result<()>,
    {
        let cmd = self.command_buffer;

        let cmd_begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device.begin_command_buffer(cmd, &cmd_begin_info).classify("begin_command_buffer")?;
        }

        func(cmd, &self.device)?;

        unsafe {
            self.device.end_command_buffer(cmd).classify("end_command_buffer")?;
        }

        let cmds = [cmd];
        let submit = vk::SubmitInfo::default()
            .command_buffers(&cmds);
        unsafe {
            self.device
                .queue_submit(self.queue.handle, &[submit], self.fence)
                .classify("queue_submit")?;

            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .classify("wait_for_fences")?;
            self.device.reset_fences(&[self.fence]).classify("reset_fences")?;
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .classify("reset_command_pool")?;
        }

        Ok(())
    }
}

impl Drop for TransferContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}
