use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::error::{RenderError, VkResultExt};
use crate::renderer::resources::shader::GraphicsShader;
use crate::renderer::shader_data::VertexInputDescription;

/// A graphics pipeline and the layout it was built with
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<ash::Device>,
}

impl Pipeline {
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline,
            );
        }
    }

    pub fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.layout,
                first_set,
                descriptor_sets,
                &[],
            );
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Builds a [`Pipeline`] for one subpass of a render pass with a fixed viewport
pub struct GraphicsPipelineBuilder {
    device: Arc<ash::Device>,

    vertex_input_description: Option<VertexInputDescription>,
    topology: vk::PrimitiveTopology,
    rasterization: vk::PipelineRasterizationStateCreateInfo<'static>,
    color_blend_attachment: vk::PipelineColorBlendAttachmentState,
    samples: vk::SampleCountFlags,
    sample_shading: bool,
    depth_stencil: vk::PipelineDepthStencilStateCreateInfo<'static>,
    viewport: Option<vk::Viewport>,
    render_pass: Option<vk::RenderPass>,
    descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    shader: Option<GraphicsShader>,
}

impl GraphicsPipelineBuilder {
    pub fn new(device: Arc<ash::Device>) -> Self {
        Self {
            device,

            vertex_input_description: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            rasterization: Self::default_rasterization_info(),
            color_blend_attachment: Self::default_color_blend_state(),
            samples: vk::SampleCountFlags::TYPE_1,
            sample_shading: false,
            depth_stencil: Self::default_depth_stencil_info(),
            viewport: None,
            render_pass: None,
            descriptor_set_layouts: Vec::new(),
            shader: None,
        }
    }

    pub fn with_shader(mut self, shader: GraphicsShader) -> Self {
        let _ = self.shader.replace(shader);
        self
    }

    pub fn with_vertex_input(mut self, description: VertexInputDescription) -> Self {
        self.vertex_input_description = Some(description);
        self
    }

    pub fn with_descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.descriptor_set_layouts.push(layout);
        self
    }

    pub fn with_render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = Some(render_pass);
        self
    }

    /// Viewport and scissor cover the same rectangle
    pub fn with_viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewport = Some(viewport);
        self
    }

    pub fn with_input_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_cull_mode(
        mut self,
        cull_mode: vk::CullModeFlags,
        front_face: vk::FrontFace,
    ) -> Self {
        self.rasterization.cull_mode = cull_mode;
        self.rasterization.front_face = front_face;
        self
    }

    pub fn with_multisampling(mut self, samples: vk::SampleCountFlags, sample_shading: bool) -> Self {
        self.samples = samples;
        self.sample_shading = sample_shading;
        self
    }

    pub fn with_alpha_blending_enabled(mut self) -> Self {
        self.color_blend_attachment = Self::default_color_blend_state();
        self
    }

    pub fn with_depth_test(
        mut self,
        enable: bool,
        compare: Option<vk::CompareOp>,
    ) -> Self {
        self.depth_stencil.depth_test_enable = enable.into();
        self.depth_stencil.depth_write_enable = enable.into();
        self.depth_stencil.depth_compare_op = if enable {
            compare.unwrap_or(vk::CompareOp::LESS)
        } else {
            vk::CompareOp::ALWAYS
        };
        self
    }

    pub fn build(mut self) -> Result<Pipeline> {
        let device = self.device.clone();

        let shader = self
            .shader
            .take()
            .ok_or_eyre("No shader provided for GraphicsPipelineBuilder")?;
        let render_pass = self
            .render_pass
            .ok_or_eyre("No render pass provided for GraphicsPipelineBuilder")?;
        let viewport = self
            .viewport
            .ok_or_eyre("No viewport provided for GraphicsPipelineBuilder")?;
        let vertex_input_description = self
            .vertex_input_description
            .take()
            .ok_or_eyre("No vertex input provided for GraphicsPipelineBuilder")?;

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader.vert_mod)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader.frag_mod)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_input_description.bindings)
            .vertex_attribute_descriptions(&vertex_input_description.attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewports = [viewport];
        let scissors = [scissor_for(&viewport)];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.samples)
            .sample_shading_enable(self.sample_shading)
            .min_sample_shading(if self.sample_shading { 0.2 } else { 1.0 })
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false);

        let color_blend_attachments = [self.color_blend_attachment];
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&self.descriptor_set_layouts);
        let layout = unsafe {
            device.create_pipeline_layout(&layout_info, None).classify("create_pipeline_layout")?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&self.rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&self.depth_stencil);

        let pipeline = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_info],
                None,
            )
        };
        let pipeline = match pipeline {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(RenderError::ShaderBuild(
                    format!("create_graphics_pipelines: {}", err)
                ).into());
            }
        };

        // Shader modules are only needed until the pipeline exists
        drop(shader);

        Ok(Pipeline {
            pipeline,
            layout,
            device,
        })
    }

    fn default_rasterization_info() -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
    }

    fn default_color_blend_state() -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
    }

    fn default_depth_stencil_info() -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .stencil_test_enable(false)
    }
}

/// Scissor rectangle covering exactly `viewport`
pub fn scissor_for(viewport: &vk::Viewport) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: viewport.x as i32,
            y: viewport.y as i32,
        },
        extent: vk::Extent2D {
            width: viewport.width as u32,
            height: viewport.height as u32,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scissor_matches_viewport() {
        let viewport = vk::Viewport {
            x: 960.0,
            y: 0.0,
            width: 961.0,
            height: 1080.0,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = scissor_for(&viewport);
        assert_eq!(scissor.offset.x, 960);
        assert_eq!(scissor.extent.width, 961);
        assert_eq!(scissor.extent.height, 1080);
    }
}
