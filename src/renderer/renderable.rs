use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use glam::{IVec4, Mat4, Vec2, Vec3, Vec4};
use crate::renderer::config::ViewMode;
use crate::renderer::contexts::device_ctx::RenderContext;
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::observer::Z_FAR;
use crate::renderer::resources::descriptors::DescriptorObjects;
use crate::renderer::resources::geometry::{Geometry, GeometryObjects};
use crate::renderer::resources::image::TEXTURE_FORMAT;
use crate::renderer::resources::pipeline::Pipeline;
use crate::renderer::resources::texture::{Texture, TextureObjects};
use crate::renderer::shader_data::{CameraState, StimulusUniforms, Vertex};

/// Which view passes a renderable is drawn into
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Eye {
    Left,
    Right,
    #[default]
    Both,
    None,
}

impl Eye {
    /// Whether this selector is drawn in view pass `pass` under `view_mode`
    pub fn visible_in(self, view_mode: ViewMode, pass: usize) -> bool {
        match (self, view_mode) {
            (Eye::None, _) => false,
            (_, ViewMode::Mono) => pass == 0,
            (Eye::Both, ViewMode::Stereo) => pass < 2,
            (Eye::Left, ViewMode::Stereo) => pass == 0,
            (Eye::Right, ViewMode::Stereo) => pass == 1,
        }
    }
}

/// Post-processing window applied to the stimulus in the fragment shader
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Envelope {
    #[default]
    None,
    Square,
    Circle,
    Gaussian,
}

impl Envelope {
    /// Value of `settings.y` and `envelope.x` in the uniform block
    pub fn shader_code(self) -> i32 {
        match self {
            Envelope::None => 0,
            Envelope::Square => 1,
            Envelope::Circle => 2,
            Envelope::Gaussian => 3,
        }
    }
}

/// Scalar stimulus parameters, stored in the units the uniform block is built from
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StimulusParams {
    /// x, y: visual angle in radians, z: distance
    pub position: Vec3,
    /// x, y: half visual angle in radians, z: depth scale
    pub size: Vec3,
    /// Radians
    pub rotation: f32,
    pub rotation_axis: Vec3,
    /// Radians
    pub tex_rotation: f32,
    pub tex_pivot: Vec2,
    /// (x frequency, y frequency, x phase, y phase) in cycles per degree, `None` maps the texture once
    pub frequency: Option<Vec4>,
    pub contrast: Vec4,
    pub envelope: Envelope,
    /// Half visual angle in radians
    pub envelope_sd: Vec2,
    /// Radians
    pub envelope_angle: f32,
    pub defocus: bool,
}

impl Default for StimulusParams {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, Z_FAR / 2.0),
            size: Vec3::new(1.0f32.to_radians(), 1.0f32.to_radians(), 1.0),
            rotation: 0.0,
            rotation_axis: Vec3::Z,
            tex_rotation: 0.0,
            tex_pivot: Vec2::splat(0.5),
            frequency: None,
            contrast: Vec4::ONE,
            envelope: Envelope::None,
            envelope_sd: Vec2::ZERO,
            envelope_angle: 0.0,
            defocus: false,
        }
    }
}

impl StimulusParams {
    /// translate * rotate * scale
    pub fn model_transform(&self) -> Mat4 {
        let z = self.position.z;
        let translation = Vec3::new(
            z * self.position.x.tan(),
            z * self.position.y.tan(),
            z,
        );
        let scale = Vec3::new(
            z * self.size.x.tan(),
            z * self.size.y.tan(),
            self.size.z,
        );
        let axis = self.rotation_axis.try_normalize().unwrap_or(Vec3::Z);
        Mat4::from_translation(translation)
            * Mat4::from_axis_angle(axis, self.rotation)
            * Mat4::from_scale(scale)
    }
}

/// Build the uniform block for one draw. Identical inputs give identical bytes.
pub fn compose_uniforms(
    params: &StimulusParams,
    texture: &Texture,
    camera: &CameraState,
) -> StimulusUniforms {
    let frequency = match params.frequency {
        Some(f) => Vec4::new(
            params.size.x.to_degrees() * 2.0 * f.x,
            params.size.y.to_degrees() * 2.0 * f.y,
            f.z,
            f.w,
        ),
        None => Vec4::new(1.0, 1.0, 0.0, 0.0),
    };
    let envelope = if params.envelope == Envelope::None {
        Vec4::ZERO
    } else {
        Vec4::new(
            params.envelope.shader_code() as f32,
            params.envelope_sd.x / params.size.x,
            params.envelope_sd.y / params.size.y,
            params.envelope_angle,
        )
    };
    let (rgba0, rgba1) = if texture.kind().uses_colors() {
        (texture.rgba0, texture.rgba1)
    } else {
        (Vec4::ZERO, Vec4::ZERO)
    };

    StimulusUniforms {
        settings: IVec4::new(
            texture.kind().shader_code(),
            params.envelope.shader_code(),
            params.defocus as i32,
            0,
        ),
        model: params.model_transform(),
        lens: camera.lens,
        view: camera.view,
        projection: camera.projection,
        frequency,
        tex_rotation: Vec4::new(params.tex_rotation, params.tex_pivot.x, params.tex_pivot.y, 1.0),
        rgba0,
        rgba1,
        contrast: params.contrast,
        envelope,
    }
}

/// Objects superseded by a rebuild, kept until no submitted frame can still read them
pub enum RetiredResource {
    Geometry(GeometryObjects),
    /// Descriptor objects first, they reference the texture
    Texture(DescriptorObjects, TextureObjects),
    /// Everything a removed renderable owned
    Renderable(RenderableGpu),
}

/// GPU side of a renderable. Fields drop top to bottom.
pub struct RenderableGpu {
    descriptors: DescriptorObjects,
    texture: TextureObjects,
    geometry: GeometryObjects,
    transfer: TransferContext,
}

/// A drawable stimulus: CPU content, parameters and the GPU objects built from them
pub struct Renderable {
    geometry: Geometry,
    texture: Texture,
    eye: Eye,
    pub params: StimulusParams,

    geometry_dirty: bool,
    texture_dirty: bool,
    gpu: Option<RenderableGpu>,
}

impl Renderable {
    pub fn new(geometry: Geometry, texture: Texture) -> Self {
        Self {
            geometry,
            texture,
            eye: Eye::Both,
            params: StimulusParams::default(),
            geometry_dirty: false,
            texture_dirty: false,
            gpu: None,
        }
    }

    /// Replace the mesh, rejecting empty input and out-of-range indices
    pub fn assign_geometry(&mut self, vertices: Vec<Vertex>, indices: Vec<u32>) -> Result<()> {
        self.set_geometry(Geometry::new(vertices, indices)?);
        Ok(())
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.geometry_dirty = true;
    }

    pub fn assign_texture(&mut self, texture: Texture) {
        self.texture = texture;
        self.texture_dirty = true;
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn set_eye(&mut self, eye: Eye) {
        self.eye = eye;
    }

    /// Only read when uniforms are written, no rebuild needed
    pub fn set_colors(&mut self, rgba0: Vec4, rgba1: Vec4) {
        self.texture.rgba0 = rgba0;
        self.texture.rgba1 = rgba1;
    }

    /// Center in degrees of visual angle, `z` is the distance from the observer
    pub fn set_position(&mut self, x: f32, y: f32, z: f32) {
        self.params.position = Vec3::new(x.to_radians(), y.to_radians(), z);
    }

    /// Full extent in degrees of visual angle
    pub fn set_size(&mut self, x: f32, y: f32, z: f32) {
        self.params.size = Vec3::new((x / 2.0).to_radians(), (y / 2.0).to_radians(), z);
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.set_rotation_about(degrees, Vec3::Z);
    }

    pub fn set_rotation_about(&mut self, degrees: f32, axis: Vec3) {
        self.params.rotation = degrees.to_radians();
        self.params.rotation_axis = axis;
    }

    pub fn set_tex_rotation(&mut self, degrees: f32, pivot: Vec2) {
        self.params.tex_rotation = degrees.to_radians();
        self.params.tex_pivot = pivot;
    }

    /// Phases and spatial frequencies (cycles per degree) along x and y
    pub fn set_frequency(&mut self, x_phase: f32, x_freq: f32, y_phase: f32, y_freq: f32) {
        self.params.frequency = Some(Vec4::new(x_freq, y_freq, x_phase, y_phase));
    }

    pub fn set_contrast(&mut self, contrast: Vec4) {
        self.params.contrast = contrast;
    }

    /// Standard deviations in degrees, angle in degrees
    pub fn set_envelope(&mut self, envelope: Envelope, sd_x: f32, sd_y: f32, angle: f32) {
        self.params.envelope = envelope;
        self.params.envelope_sd = Vec2::new((sd_x / 2.0).to_radians(), (sd_y / 2.0).to_radians());
        self.params.envelope_angle = angle.to_radians();
    }

    pub fn remove_envelope(&mut self) {
        self.set_envelope(Envelope::None, 0.0, 0.0, 0.0);
    }

    pub fn set_defocus(&mut self, defocus: bool) {
        self.params.defocus = defocus;
    }

    pub fn is_geometry_dirty(&self) -> bool {
        self.geometry_dirty
    }

    pub fn is_texture_dirty(&self) -> bool {
        self.texture_dirty
    }

    pub fn is_ready(&self) -> bool {
        self.gpu.is_some()
    }

    /// Number of uniform buffers and descriptor sets currently owned
    pub fn uniform_set_count(&self) -> usize {
        self.gpu
            .as_ref()
            .map_or(0, |gpu| gpu.descriptors.image_count())
    }

    /// Build every GPU object the first time a context is available
    pub fn ensure_ready(&mut self, ctx: &RenderContext, image_count: usize) -> Result<()> {
        if self.gpu.is_some() {
            return Ok(());
        }

        let device = &ctx.device;
        let transfer = TransferContext::new(
            device.graphics_queue.clone(),
            device.logical.clone(),
        )?;
        let geometry = self.build_geometry(ctx, &transfer)?;
        let texture = self.build_texture(ctx, &transfer)?;
        let descriptors = Self::build_descriptors(ctx, &texture, image_count)?;

        self.gpu = Some(RenderableGpu {
            descriptors,
            texture,
            geometry,
            transfer,
        });
        // Everything was built from current content
        self.geometry_dirty = false;
        self.texture_dirty = false;
        Ok(())
    }

    /// Rebuild whatever changed since the last build. Superseded objects are pushed to `retired`.
    pub fn recreate_if_dirty(
        &mut self,
        ctx: &RenderContext,
        retired: &mut Vec<RetiredResource>,
    ) -> Result<()> {
        let Some(gpu) = self.gpu.as_ref() else {
            return Ok(());
        };
        let image_count = gpu.descriptors.image_count();

        if self.geometry_dirty {
            let geometry = self.build_geometry(ctx, &gpu.transfer)?;
            let gpu = self.gpu.as_mut().ok_or_eyre("Renderable lost its GPU objects")?;
            let old = std::mem::replace(&mut gpu.geometry, geometry);
            retired.push(RetiredResource::Geometry(old));
            self.geometry_dirty = false;
            log::debug!(
                "Rebuilt geometry ({} vertices, {} bytes)",
                self.geometry.vertices().len(),
                self.geometry.vertex_buffer_size(),
            );
        }

        if self.texture_dirty {
            let gpu = self.gpu.as_ref().ok_or_eyre("Renderable lost its GPU objects")?;
            let texture = self.build_texture(ctx, &gpu.transfer)?;
            let descriptors = Self::build_descriptors(ctx, &texture, image_count)?;
            let gpu = self.gpu.as_mut().ok_or_eyre("Renderable lost its GPU objects")?;
            let old_descriptors = std::mem::replace(&mut gpu.descriptors, descriptors);
            let old_texture = std::mem::replace(&mut gpu.texture, texture);
            retired.push(RetiredResource::Texture(old_descriptors, old_texture));
            self.texture_dirty = false;
            log::debug!(
                "Rebuilt texture ({}x{}, {} mips)",
                self.texture.width(),
                self.texture.height(),
                self.texture.mip_levels(),
            );
        }

        Ok(())
    }

    /// Rebuild the per-image descriptor objects for a new swapchain image count.
    /// The device must be idle.
    pub fn refresh_image_count(&mut self, ctx: &RenderContext, image_count: usize) -> Result<()> {
        let Some(gpu) = self.gpu.as_mut() else {
            return Ok(());
        };
        if gpu.descriptors.image_count() == image_count {
            return Ok(());
        }
        gpu.descriptors = Self::build_descriptors(ctx, &gpu.texture, image_count)?;
        Ok(())
    }

    pub fn write_uniforms(&mut self, image_index: usize, camera: &CameraState) -> Result<()> {
        let uniforms = compose_uniforms(&self.params, &self.texture, camera);
        let gpu = self.gpu.as_mut().ok_or_eyre("Renderable has no GPU objects")?;
        gpu.descriptors.write_uniforms(image_index, &uniforms)
    }

    /// Bind buffers and descriptor set `image_index` and issue one indexed draw
    pub fn record_draw(
        &self,
        cmd: vk::CommandBuffer,
        device: &ash::Device,
        pipeline: &Pipeline,
        image_index: usize,
    ) -> Result<()> {
        let gpu = self.gpu.as_ref().ok_or_eyre("Renderable has no GPU objects")?;
        gpu.geometry.bind(cmd, device);
        pipeline.bind_descriptor_sets(cmd, 0, &[gpu.descriptors.set(image_index)?]);
        unsafe {
            device.cmd_draw_indexed(cmd, gpu.geometry.index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    /// Hand over every GPU object, leaving the renderable as if it was never drawn.
    /// The next `ensure_ready` builds everything again from the current content.
    pub fn retire(&mut self) -> Option<RetiredResource> {
        self.gpu.take().map(RetiredResource::Renderable)
    }

    /// Release descriptor objects, texture, geometry and command pool in that order.
    /// The device must no longer be using them.
    pub fn destroy(&mut self) {
        self.gpu = None;
    }

    fn build_geometry(&self, ctx: &RenderContext, transfer: &TransferContext) -> Result<GeometryObjects> {
        GeometryObjects::new(
            &self.geometry,
            ctx.device.allocator(),
            ctx.device.logical.clone(),
            transfer,
        )
    }

    fn build_texture(&self, ctx: &RenderContext, transfer: &TransferContext) -> Result<TextureObjects> {
        TextureObjects::new(
            &self.texture,
            ctx.device.format_properties(TEXTURE_FORMAT),
            ctx.device.max_sampler_anisotropy,
            ctx.device.allocator(),
            ctx.device.logical.clone(),
            transfer,
        )
    }

    fn build_descriptors(
        ctx: &RenderContext,
        texture: &TextureObjects,
        image_count: usize,
    ) -> Result<DescriptorObjects> {
        DescriptorObjects::new(
            image_count,
            ctx.device.descriptor_set_layout,
            texture,
            ctx.device.allocator(),
            ctx.device.descriptor_device(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraState {
        CameraState {
            view: Mat4::look_at_rh(Vec3::ZERO, Vec3::Z, Vec3::Y),
            projection: Mat4::perspective_rh(0.5, 1.5, 0.1, 1000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_eye_routing_mono() {
        for eye in [Eye::Left, Eye::Right, Eye::Both] {
            assert!(eye.visible_in(ViewMode::Mono, 0));
        }
        assert!(!Eye::None.visible_in(ViewMode::Mono, 0));
    }

    #[test]
    fn test_eye_routing_stereo() {
        assert!(Eye::Both.visible_in(ViewMode::Stereo, 0));
        assert!(Eye::Both.visible_in(ViewMode::Stereo, 1));
        assert!(Eye::Left.visible_in(ViewMode::Stereo, 0));
        assert!(!Eye::Left.visible_in(ViewMode::Stereo, 1));
        assert!(!Eye::Right.visible_in(ViewMode::Stereo, 0));
        assert!(Eye::Right.visible_in(ViewMode::Stereo, 1));
        assert!(!Eye::None.visible_in(ViewMode::Stereo, 0));
        assert!(!Eye::None.visible_in(ViewMode::Stereo, 1));
    }

    #[test]
    fn test_envelope_codes() {
        assert_eq!(Envelope::None.shader_code(), 0);
        assert_eq!(Envelope::Square.shader_code(), 1);
        assert_eq!(Envelope::Circle.shader_code(), 2);
        assert_eq!(Envelope::Gaussian.shader_code(), 3);
    }

    #[test]
    fn test_assign_geometry_sets_dirty_flag() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::default());
        assert!(!renderable.is_geometry_dirty());
        let circle = Geometry::circle(16);
        renderable
            .assign_geometry(circle.vertices().to_vec(), circle.indices().to_vec())
            .unwrap();
        assert!(renderable.is_geometry_dirty());
        assert!(!renderable.is_texture_dirty());
    }

    #[test]
    fn test_rejected_geometry_keeps_previous() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::default());
        assert!(renderable.assign_geometry(Vec::new(), vec![0, 1, 2]).is_err());
        assert!(!renderable.is_geometry_dirty());
        assert_eq!(renderable.geometry(), &Geometry::quad());
    }

    #[test]
    fn test_assign_texture_sets_dirty_flag() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::default());
        renderable.assign_texture(Texture::checkerboard(Vec4::ZERO, Vec4::ONE));
        assert!(renderable.is_texture_dirty());
        assert!(!renderable.is_ready());
        assert_eq!(renderable.uniform_set_count(), 0);
    }

    #[test]
    fn test_retire_before_first_draw() {
        // Added but never drawn: nothing on the GPU to hand over
        let mut renderable = Renderable::new(Geometry::circle(8), Texture::default());
        assert!(!renderable.is_ready());
        assert_eq!(renderable.uniform_set_count(), 0);
        assert!(renderable.retire().is_none());
        assert!(!renderable.is_ready());
    }

    #[test]
    fn test_uniforms_are_idempotent() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::sine(Vec4::ZERO, Vec4::ONE));
        renderable.set_position(3.0, -2.0, 500.0);
        renderable.set_frequency(0.0, 2.0, 0.0, 0.0);
        renderable.set_envelope(Envelope::Gaussian, 1.0, 1.0, 0.0);
        let first = compose_uniforms(&renderable.params, renderable.texture(), &camera());
        let second = compose_uniforms(&renderable.params, renderable.texture(), &camera());
        assert_eq!(bytemuck::bytes_of(&first), bytemuck::bytes_of(&second));
    }

    #[test]
    fn test_model_transform() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::default());
        renderable.set_position(0.0, 0.0, 100.0);
        renderable.set_size(90.0, 90.0, 1.0);
        let model = renderable.params.model_transform();
        // Half size of 45 degrees at distance 100 spans 100 units
        let corner = model.transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert!((corner - Vec3::new(100.0, 100.0, 100.0)).abs().max_element() < 1e-3);
    }

    #[test]
    fn test_rotation_applies_before_translation() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::default());
        renderable.set_position(0.0, 0.0, 10.0);
        renderable.set_size(90.0, 90.0, 1.0);
        renderable.set_rotation(90.0);
        let model = renderable.params.model_transform();
        let p = model.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(0.0, 10.0, 10.0)).abs().max_element() < 1e-3);
    }

    #[test]
    fn test_uniform_settings_and_vectors() {
        let mut renderable = Renderable::new(Geometry::quad(), Texture::sine(Vec4::ZERO, Vec4::ONE));
        renderable.set_size(4.0, 2.0, 1.0);
        renderable.set_frequency(0.25, 1.5, 0.5, 3.0);
        renderable.set_envelope(Envelope::Circle, 2.0, 1.0, 90.0);
        renderable.set_defocus(true);
        renderable.set_tex_rotation(180.0, Vec2::new(0.25, 0.75));

        let uniforms = compose_uniforms(&renderable.params, renderable.texture(), &camera());
        assert_eq!(uniforms.settings, IVec4::new(2, 2, 1, 0));
        // 4 degrees wide at 1.5 cycles per degree, 2 degrees high at 3
        assert!((uniforms.frequency - Vec4::new(6.0, 6.0, 0.25, 0.5)).abs().max_element() < 1e-4);
        assert!((uniforms.envelope - Vec4::new(2.0, 0.5, 0.5, 90f32.to_radians())).abs().max_element() < 1e-4);
        assert!((uniforms.tex_rotation - Vec4::new(180f32.to_radians(), 0.25, 0.75, 1.0)).abs().max_element() < 1e-5);
        assert_eq!(uniforms.rgba1, Vec4::ONE);
        assert_eq!(uniforms.projection, camera().projection);
    }

    #[test]
    fn test_image_uniforms_are_transparent() {
        let texture = Texture::new(
            crate::renderer::resources::texture::TextureKind::Image,
            vec![1.0; 4],
            1,
            1,
        )
        .unwrap();
        let mut renderable = Renderable::new(Geometry::quad(), texture);
        renderable.set_colors(Vec4::ONE, Vec4::ONE);
        let uniforms = compose_uniforms(&renderable.params, renderable.texture(), &camera());
        assert_eq!(uniforms.settings.x, 0);
        assert_eq!(uniforms.rgba0, Vec4::ZERO);
        assert_eq!(uniforms.rgba1, Vec4::ZERO);
    }

    #[test]
    fn test_default_frequency_maps_texture_once() {
        let renderable = Renderable::new(Geometry::quad(), Texture::default());
        let uniforms = compose_uniforms(&renderable.params, renderable.texture(), &camera());
        assert_eq!(uniforms.frequency, Vec4::new(1.0, 1.0, 0.0, 0.0));
        assert_eq!(uniforms.envelope, Vec4::ZERO);
        assert_eq!(uniforms.settings.x, 1);
    }
}
