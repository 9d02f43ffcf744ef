use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::error::VkResultExt;

/// Single-subpass render pass: multisampled color and depth, resolved into the swapchain image.
/// Without multisampling the swapchain image is the color attachment and nothing is resolved.
pub struct RenderPass {
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    device: Arc<ash::Device>,
}

impl RenderPass {
    pub fn new(
        color_format: vk::Format,
        depth_format: vk::Format,
        samples: vk::SampleCountFlags,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let resolve = uses_resolve(samples);

        let color_attachment = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(if resolve {
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
            } else {
                vk::ImageLayout::PRESENT_SRC_KHR
            });
        let depth_attachment = vk::AttachmentDescription::default()
            .format(depth_format)
            .samples(samples)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let resolve_attachment = vk::AttachmentDescription::default()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::DONT_CARE)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let mut attachments = vec![color_attachment, depth_attachment];
        if resolve {
            attachments.push(resolve_attachment);
        }

        let color_refs = [vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];
        let depth_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let resolve_refs = [vk::AttachmentReference::default()
            .attachment(2)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref);
        if resolve {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        let subpasses = [subpass];

        let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(stages)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )];

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe {
            device
                .create_render_pass(&render_pass_info, None)
                .classify("create_render_pass")?
        };

        Ok(Self {
            render_pass,
            samples,
            device,
        })
    }

    pub fn uses_resolve(&self) -> bool {
        uses_resolve(self.samples)
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// One framebuffer per swapchain image
pub struct Framebuffers {
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<ash::Device>,
}

impl Framebuffers {
    /// `color_view` is the shared multisampled attachment, absent without multisampling
    pub fn new(
        render_pass: &RenderPass,
        color_view: Option<vk::ImageView>,
        depth_view: vk::ImageView,
        swapchain_views: &[vk::ImageView],
        extent: vk::Extent2D,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let mut framebuffers = Vec::with_capacity(swapchain_views.len());
        for swapchain_view in swapchain_views {
            let attachments = framebuffer_attachments(color_view, depth_view, *swapchain_view);
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(err) => {
                    for framebuffer in framebuffers {
                        unsafe { device.destroy_framebuffer(framebuffer, None) };
                    }
                    return Err(err).classify("create_framebuffer");
                }
            }
        }

        Ok(Self {
            framebuffers,
            device,
        })
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.destroy_framebuffer(framebuffer, None);
            }
        }
    }
}

pub fn uses_resolve(samples: vk::SampleCountFlags) -> bool {
    samples != vk::SampleCountFlags::TYPE_1
}

/// Attachment order matching the render pass: [color, depth, resolve]
pub fn framebuffer_attachments(
    color_view: Option<vk::ImageView>,
    depth_view: vk::ImageView,
    swapchain_view: vk::ImageView,
) -> Vec<vk::ImageView> {
    match color_view {
        Some(color_view) => vec![color_view, depth_view, swapchain_view],
        None => vec![swapchain_view, depth_view],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_framebuffer_attachment_order() {
        let color = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let swapchain = vk::ImageView::from_raw(3);
        assert_eq!(
            framebuffer_attachments(Some(color), depth, swapchain),
            vec![color, depth, swapchain],
        );
        assert_eq!(
            framebuffer_attachments(None, depth, swapchain),
            vec![swapchain, depth],
        );
    }

    #[test]
    fn test_resolve_only_when_multisampled() {
        assert!(!uses_resolve(vk::SampleCountFlags::TYPE_1));
        assert!(uses_resolve(vk::SampleCountFlags::TYPE_4));
    }
}
