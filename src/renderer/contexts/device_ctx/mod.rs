pub mod instance;
pub mod device;
pub mod queue;
pub mod selection;
pub mod transfer_ctx;

use color_eyre::Result;
use crate::renderer::contexts::device_ctx::device::RenderDevice;
use crate::renderer::contexts::device_ctx::instance::RenderInstance;
use crate::renderer::contexts::device_ctx::selection::SuitableDevice;

/// Responsibilities:
/// - Own the Vulkan instance, window surface, logical device and queues
/// - Own the descriptor set layout shared by every stimulus
/// - Be passed by reference to every other component instead of living in globals
pub struct RenderContext {
    // Dropped first: the device must go before the instance it was created from
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderContext {
    pub fn new(
        instance: RenderInstance,
        selected: &SuitableDevice,
    ) -> Result<Self> {
        let device = RenderDevice::new(&instance, selected)?;

        Ok(Self {
            device,
            instance,
        })
    }
}
