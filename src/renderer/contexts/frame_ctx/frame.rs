use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::error::VkResultExt;

/// Synchronization objects of one frame in flight
pub struct FrameSlot {
    // Signals when the acquired swapchain image is ready to be rendered to.
    pub image_acquired: vk::Semaphore,

    // Signals when rendering commands have finished, present waits on it.
    pub render_complete: vk::Semaphore,

    // Signals when all rendering commands have finished execution.
    pub fence: vk::Fence,

    device: Arc<ash::Device>,
}

impl FrameSlot {
    pub fn new(device: Arc<ash::Device>) -> Result<Self> {
        let image_acquired = unsafe {
            device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .classify("create_semaphore")?
        };
        let render_complete = match unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        } {
            Ok(semaphore) => semaphore,
            Err(err) => {
                unsafe { device.destroy_semaphore(image_acquired, None) };
                return Err(err).classify("create_semaphore");
            }
        };
        // Created signaled so the first wait on a fresh slot returns immediately
        let fence = match unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED),
                None,
            )
        } {
            Ok(fence) => fence,
            Err(err) => {
                unsafe {
                    device.destroy_semaphore(render_complete, None);
                    device.destroy_semaphore(image_acquired, None);
                }
                return Err(err).classify("create_fence");
            }
        };

        Ok(Self {
            image_acquired,
            render_complete,
            fence,
            device,
        })
    }

    pub fn wait(&self) -> Result<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .classify("wait_for_fences")
        }
    }

    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .reset_fences(&[self.fence])
                .classify("reset_fences")
        }
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_semaphore(self.render_complete, None);
            self.device.destroy_semaphore(self.image_acquired, None);
        }
    }
}
