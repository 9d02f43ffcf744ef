use std::collections::BTreeSet;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::config::ViewMode;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::surface_ctx::SurfaceManager;
use crate::renderer::error::VkResultExt;
use crate::renderer::renderable::{Eye, Renderable, RetiredResource};
use crate::renderer::shader_data::CameraState;

/// Responsibilities:
/// - Own one primary command buffer per swapchain image
/// - Record the render pass of an image: every view pass, every renderable visible in it
pub struct CommandRecorder {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<ash::Device>,
}

impl CommandRecorder {
    pub fn new(
        device: Arc<ash::Device>,
        graphics_family: u32,
        image_count: usize,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(graphics_family);
        let pool = unsafe {
            device
                .create_command_pool(&pool_info, None)
                .classify("create_command_pool")?
        };

        let mut recorder = Self {
            pool,
            buffers: Vec::new(),
            device,
        };
        recorder.allocate(image_count)?;
        Ok(recorder)
    }

    /// Replace the command buffers for a new image count. The device must be idle.
    pub fn resize(&mut self, image_count: usize) -> Result<()> {
        if self.buffers.len() == image_count {
            return Ok(());
        }
        self.free();
        self.allocate(image_count)
    }

    pub fn buffer(&self, image_index: usize) -> Result<vk::CommandBuffer> {
        self.buffers
            .get(image_index)
            .copied()
            .ok_or_eyre("Command buffer index out of range")
    }

    pub fn image_count(&self) -> usize {
        self.buffers.len()
    }

    /// Record every image's command buffer. The device must be idle.
    pub fn record_all(
        &self,
        ctx: &RenderContext,
        surface: &SurfaceManager,
        renderables: &mut [Renderable],
        camera: &CameraState,
        retired: &mut Vec<RetiredResource>,
    ) -> Result<()> {
        for image_index in 0..self.buffers.len() {
            self.record(ctx, image_index, surface, renderables, camera, retired)?;
        }
        Ok(())
    }

    /// Re-record the command buffer of `image_index`. No submitted work may still use it.
    /// Visible renderables without GPU objects are built, dirty ones are rebuilt and the objects
    /// they replace go to `retired`.
    pub fn record(
        &self,
        ctx: &RenderContext,
        image_index: usize,
        surface: &SurfaceManager,
        renderables: &mut [Renderable],
        camera: &CameraState,
        retired: &mut Vec<RetiredResource>,
    ) -> Result<()> {
        let cmd = self.buffer(image_index)?;
        let device = &self.device;

        let eyes = renderables.iter().map(Renderable::eye).collect::<Vec<_>>();
        let draws = plan_draws(surface.view_mode(), &eyes);

        // Uniforms are shared by both eyes, so each visible renderable is prepared once.
        // Renderables added after start get their GPU objects on first use.
        let visible = draws.iter().map(|(_, index)| *index).collect::<BTreeSet<_>>();
        for index in visible {
            let renderable = &mut renderables[index];
            renderable.ensure_ready(ctx, surface.image_count())?;
            renderable.recreate_if_dirty(ctx, retired)?;
            renderable.write_uniforms(image_index, camera)?;
        }

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(surface.render_pass())
            .framebuffer(surface.framebuffer(image_index)?)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: surface.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .classify("reset_command_buffer")?;
            device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .classify("begin_command_buffer")?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        }

        for (pass_index, view_pass) in surface.view_passes().iter().enumerate() {
            view_pass.pipeline.bind(cmd);
            for (_, index) in draws.iter().filter(|(pass, _)| *pass == pass_index) {
                renderables[*index].record_draw(cmd, device, &view_pass.pipeline, image_index)?;
            }
        }

        unsafe {
            device.cmd_end_render_pass(cmd);
            device
                .end_command_buffer(cmd)
                .classify("end_command_buffer")?;
        }
        Ok(())
    }

    fn allocate(&mut self, image_count: usize) -> Result<()> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(image_count as u32);
        self.buffers = unsafe {
            self.device
                .allocate_command_buffers(&allocate_info)
                .classify("allocate_command_buffers")?
        };
        Ok(())
    }

    fn free(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.pool, &self.buffers);
        }
        self.buffers.clear();
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        unsafe {
            // Destroying the pool frees its buffers
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// `(pass index, renderable index)` for every draw of a frame, grouped by pass
pub fn plan_draws(view_mode: ViewMode, eyes: &[Eye]) -> Vec<(usize, usize)> {
    (0..view_mode.pass_count())
        .flat_map(|pass| {
            eyes.iter()
                .enumerate()
                .filter(move |(_, eye)| eye.visible_in(view_mode, pass))
                .map(move |(index, _)| (pass, index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_draws_everything_visible_once() {
        let eyes = [Eye::Left, Eye::None, Eye::Both, Eye::Right];
        let draws = plan_draws(ViewMode::Mono, &eyes);
        assert_eq!(draws, vec![(0, 0), (0, 2), (0, 3)]);
    }

    #[test]
    fn test_stereo_routes_eyes() {
        let eyes = [Eye::Left, Eye::None, Eye::Both, Eye::Right];
        let draws = plan_draws(ViewMode::Stereo, &eyes);
        assert_eq!(draws, vec![(0, 0), (0, 2), (1, 2), (1, 3)]);
    }

    #[test]
    fn test_both_drawn_twice_none_never() {
        let eyes = [Eye::Both, Eye::None];
        let draws = plan_draws(ViewMode::Stereo, &eyes);
        assert_eq!(draws.iter().filter(|(_, index)| *index == 0).count(), 2);
        assert_eq!(draws.iter().filter(|(_, index)| *index == 1).count(), 0);
    }

    #[test]
    fn test_empty_scene() {
        assert!(plan_draws(ViewMode::Stereo, &[]).is_empty());
    }
}
