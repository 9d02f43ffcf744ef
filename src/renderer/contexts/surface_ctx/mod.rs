pub mod swapchain;
pub mod render_pass;
pub mod view_pass;

use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::config::ViewMode;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::surface_ctx::render_pass::{Framebuffers, RenderPass};
use crate::renderer::contexts::surface_ctx::swapchain::Swapchain;
use crate::renderer::contexts::surface_ctx::view_pass::{create_view_passes, ViewPass};
use crate::renderer::observer::Observer;
use crate::renderer::resources::image::Image;

/// Responsibilities:
/// - Own the swapchain, the shared color and depth attachments and the render pass
/// - Own one framebuffer per swapchain image and one view pass per eye
/// - Rebuild all of the above when the surface changes
pub struct SurfaceManager {
    // Fields drop top to bottom, reverse of creation
    framebuffers: Framebuffers,
    view_passes: Vec<ViewPass>,
    render_pass: RenderPass,
    _depth_attachment: Image,
    _color_attachment: Option<Image>,
    swapchain: Swapchain,

    view_mode: ViewMode,
}

impl SurfaceManager {
    pub fn new(
        ctx: &RenderContext,
        window_size: vk::Extent2D,
        view_mode: ViewMode,
    ) -> Result<Self> {
        Self::build(ctx, window_size, view_mode, None)
    }

    /// Wait for the device to go idle and rebuild everything for the current surface and the
    /// observer's view mode. The observer's projection follows the new extent.
    pub fn recreate(
        &mut self,
        ctx: &RenderContext,
        window_size: vk::Extent2D,
        observer: &mut Observer,
    ) -> Result<()> {
        ctx.device.wait_idle()?;

        let rebuilt = Self::build(ctx, window_size, observer.view_mode(), Some(&self.swapchain))?;
        // Old objects are released here, after the new swapchain took over the surface
        *self = rebuilt;

        observer.update_projection(self.extent().width, self.extent().height);
        log::info!(
            "Surface rebuilt: {} images, {}x{}, {:?}",
            self.image_count(),
            self.extent().width,
            self.extent().height,
            self.view_mode,
        );
        Ok(())
    }

    fn build(
        ctx: &RenderContext,
        window_size: vk::Extent2D,
        view_mode: ViewMode,
        old_swapchain: Option<&Swapchain>,
    ) -> Result<Self> {
        let device = &ctx.device;
        let swapchain = Swapchain::new(ctx, window_size, old_swapchain)?;
        let extent = swapchain.extent;
        let samples = device.msaa_samples;

        let render_pass = RenderPass::new(
            swapchain.format.format,
            device.depth_format,
            samples,
            device.logical.clone(),
        )?;
        let color_attachment = if render_pass.uses_resolve() {
            Some(Image::new_color_attachment(
                extent,
                swapchain.format.format,
                samples,
                device.allocator(),
                device.logical.clone(),
            )?)
        } else {
            None
        };
        let depth_attachment = Image::new_depth_attachment(
            extent,
            device.depth_format,
            samples,
            device.allocator(),
            device.logical.clone(),
        )?;

        let view_passes = create_view_passes(ctx, &render_pass, extent, view_mode)?;
        let framebuffers = Framebuffers::new(
            &render_pass,
            color_attachment.as_ref().map(|image| image.view),
            depth_attachment.view,
            &swapchain.image_views,
            extent,
            device.logical.clone(),
        )?;

        Ok(Self {
            framebuffers,
            view_passes,
            render_pass,
            _depth_attachment: depth_attachment,
            _color_attachment: color_attachment,
            swapchain,
            view_mode,
        })
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// K, the number of presentable images
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn view_passes(&self) -> &[ViewPass] {
        &self.view_passes
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.render_pass
    }

    pub fn framebuffer(&self, image_index: usize) -> Result<vk::Framebuffer> {
        self.framebuffers
            .framebuffers
            .get(image_index)
            .copied()
            .ok_or_eyre("Framebuffer index out of range")
    }
}
