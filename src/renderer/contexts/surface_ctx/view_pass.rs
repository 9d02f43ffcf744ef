use ash::vk;
use color_eyre::Result;
use crate::renderer::config::ViewMode;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::surface_ctx::render_pass::RenderPass;
use crate::renderer::resources::pipeline::{GraphicsPipelineBuilder, Pipeline};
use crate::renderer::resources::shader::GraphicsShader;
use crate::renderer::shader_data::Vertex;

const STIMULUS_SHADER: &str = "stimulus";

/// One eye's region of the surface and the pipeline drawing into it
pub struct ViewPass {
    pub pipeline: Pipeline,
    pub viewport: vk::Viewport,
}

impl ViewPass {
    pub fn new(
        ctx: &RenderContext,
        render_pass: &RenderPass,
        viewport: vk::Viewport,
    ) -> Result<Self> {
        let device = &ctx.device;
        let shader = GraphicsShader::new(STIMULUS_SHADER, device.logical.clone())?;

        let pipeline = GraphicsPipelineBuilder::new(device.logical.clone())
            .with_shader(shader)
            .with_vertex_input(Vertex::input_description())
            .with_descriptor_set_layout(device.descriptor_set_layout)
            .with_render_pass(render_pass.render_pass)
            .with_viewport(viewport)
            .with_input_topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .with_cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
            .with_depth_test(true, Some(vk::CompareOp::LESS))
            .with_alpha_blending_enabled()
            .with_multisampling(render_pass.samples, device.sample_rate_shading)
            .build()?;

        Ok(Self { pipeline, viewport })
    }
}

/// Build one pass per viewport of `view_mode`
pub fn create_view_passes(
    ctx: &RenderContext,
    render_pass: &RenderPass,
    extent: vk::Extent2D,
    view_mode: ViewMode,
) -> Result<Vec<ViewPass>> {
    split_viewports(extent, view_mode)
        .into_iter()
        .map(|viewport| ViewPass::new(ctx, render_pass, viewport))
        .collect()
}

/// Mono covers the whole extent. Stereo puts the left eye in `[0, w/2)` and the right eye in
/// the remaining columns, so odd widths give the extra column to the right eye.
pub fn split_viewports(extent: vk::Extent2D, view_mode: ViewMode) -> Vec<vk::Viewport> {
    let viewport = |x: u32, width: u32| vk::Viewport {
        x: x as f32,
        y: 0.0,
        width: width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    match view_mode {
        ViewMode::Mono => vec![viewport(0, extent.width)],
        ViewMode::Stereo => {
            let half = extent.width / 2;
            vec![
                viewport(0, half),
                viewport(half, extent.width - half),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_covers_surface() {
        let viewports = split_viewports(vk::Extent2D { width: 1920, height: 1080 }, ViewMode::Mono);
        assert_eq!(viewports.len(), 1);
        assert_eq!(viewports[0].x, 0.0);
        assert_eq!(viewports[0].width, 1920.0);
        assert_eq!(viewports[0].height, 1080.0);
    }

    #[test]
    fn test_stereo_split_even() {
        let viewports = split_viewports(vk::Extent2D { width: 1920, height: 1080 }, ViewMode::Stereo);
        assert_eq!(viewports.len(), 2);
        assert_eq!((viewports[0].x, viewports[0].width), (0.0, 960.0));
        assert_eq!((viewports[1].x, viewports[1].width), (960.0, 960.0));
    }

    #[test]
    fn test_stereo_split_odd() {
        let viewports = split_viewports(vk::Extent2D { width: 1921, height: 1080 }, ViewMode::Stereo);
        assert_eq!((viewports[0].x, viewports[0].width), (0.0, 960.0));
        assert_eq!((viewports[1].x, viewports[1].width), (960.0, 961.0));
        assert_eq!(viewports[0].width + viewports[1].width, 1921.0);
    }

    #[test]
    fn test_pass_count_matches_view_mode() {
        let extent = vk::Extent2D { width: 800, height: 600 };
        for mode in [ViewMode::Mono, ViewMode::Stereo] {
            assert_eq!(split_viewports(extent, mode).len(), mode.pass_count());
        }
    }
}
