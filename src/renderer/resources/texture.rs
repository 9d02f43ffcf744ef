use std::f32::consts::TAU;
use std::path::Path;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use glam::Vec4;
use gpu_allocator::vulkan::Allocator;
use crate::renderer::contexts::device_ctx::transfer_ctx::TransferContext;
use crate::renderer::error::VkResultExt;
use crate::renderer::resources::image::Image;

const SAMPLER_MAX_ANISOTROPY: f32 = 16.0;
const PATTERN_SIZE: u32 = 512;

/// How the fragment shader interprets the sampled texture
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum TextureKind {
    #[default]
    Flat,
    Checkerboard,
    Sine,
    SquareSine,
    G1,
    G2,
    G3,
    Text,
    Image,
}

impl TextureKind {
    /// Value of `settings.x` in the uniform block
    pub fn shader_code(self) -> i32 {
        match self {
            TextureKind::Text | TextureKind::Image => 0,
            TextureKind::Flat => 1,
            TextureKind::Checkerboard
            | TextureKind::Sine
            | TextureKind::SquareSine
            | TextureKind::G1
            | TextureKind::G2
            | TextureKind::G3 => 2,
        }
    }

    /// Sampled images carry their own colors, everything else is tinted by `rgba0`/`rgba1`
    pub fn uses_colors(self) -> bool {
        !matches!(self, TextureKind::Text | TextureKind::Image)
    }
}

/// CPU side RGBA f32 pixels plus the colors the shader mixes them with
#[derive(Debug, Clone, PartialEq)]
pub struct Texture {
    kind: TextureKind,
    width: u32,
    height: u32,
    pixels: Vec<f32>,
    pub rgba0: Vec4,
    pub rgba1: Vec4,
}

impl Default for Texture {
    fn default() -> Self {
        Self::flat(Vec4::ONE)
    }
}

impl Texture {
    /// Fails unless `pixels` holds exactly `4 * width * height` floats
    pub fn new(kind: TextureKind, pixels: Vec<f32>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(eyre!("Texture must be at least 1x1, got {}x{}", width, height));
        }
        let expected = 4 * width as usize * height as usize;
        if pixels.len() != expected {
            return Err(eyre!(
                "Texture {}x{} needs {} floats, got {}",
                width,
                height,
                expected,
                pixels.len()
            ));
        }
        let (rgba0, rgba1) = if kind.uses_colors() {
            (Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::ONE)
        } else {
            (Vec4::ZERO, Vec4::ZERO)
        };
        Ok(Self {
            kind,
            width,
            height,
            pixels,
            rgba0,
            rgba1,
        })
    }

    pub fn flat(rgba: Vec4) -> Self {
        Self {
            kind: TextureKind::Flat,
            width: 1,
            height: 1,
            pixels: vec![1.0; 4],
            rgba0: rgba,
            rgba1: rgba,
        }
    }

    /// 2x2 black and white checks, tinted by `rgba0` and `rgba1`
    pub fn checkerboard(rgba0: Vec4, rgba1: Vec4) -> Self {
        let black = [0.0, 0.0, 0.0, 1.0];
        let white = [1.0; 4];
        Self {
            kind: TextureKind::Checkerboard,
            width: 2,
            height: 2,
            pixels: [black, white, white, black].concat(),
            rgba0,
            rgba1,
        }
    }

    /// One period of a sine grating along x
    pub fn sine(rgba0: Vec4, rgba1: Vec4) -> Self {
        let pixels = (0..PATTERN_SIZE)
            .flat_map(|i| {
                let level = 0.5 * (TAU * i as f32 / PATTERN_SIZE as f32).sin() + 0.5;
                [level, level, level, 1.0]
            })
            .collect();
        Self {
            kind: TextureKind::Sine,
            width: PATTERN_SIZE,
            height: 1,
            pixels,
            rgba0,
            rgba1,
        }
    }

    /// One period of a square wave along x
    pub fn square_sine(rgba0: Vec4, rgba1: Vec4) -> Self {
        Self {
            kind: TextureKind::SquareSine,
            width: 2,
            height: 1,
            pixels: vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0],
            rgba0,
            rgba1,
        }
    }

    /// Odd first derivative of a gaussian across x, scaled into [0, 1]
    pub fn g1(rgba0: Vec4, rgba1: Vec4) -> Self {
        let scale = 2.0 * (-0.5f64).exp();
        Self::profile(TextureKind::G1, rgba0, rgba1, |x| 0.5 - x * gaussian(x) / scale)
    }

    /// Second derivative of a gaussian across x, scaled into [0, 1]
    pub fn g2(rgba0: Vec4, rgba1: Vec4) -> Self {
        let scale = 2.0 * gaussian(3f64.sqrt()) + 1.0;
        Self::profile(TextureKind::G2, rgba0, rgba1, |x| (1.0 + (x * x - 1.0) * gaussian(x)) / scale)
    }

    /// Third derivative of a gaussian across x, scaled into [0, 1]
    pub fn g3(rgba0: Vec4, rgba1: Vec4) -> Self {
        let xmin = (3.0 - 6f64.sqrt()).sqrt();
        let scale = 2.0 * (3.0 * xmin - xmin.powi(3)) * gaussian(xmin);
        Self::profile(TextureKind::G3, rgba0, rgba1, |x| {
            0.5 + (3.0 * x - x.powi(3)) * gaussian(x) / scale
        })
    }

    /// One row of `PATTERN_SIZE` gray levels sampled from `level` over x in [-4, 4]
    fn profile<F>(kind: TextureKind, rgba0: Vec4, rgba1: Vec4, level: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        let pixels = (0..PATTERN_SIZE)
            .flat_map(|i| {
                let x = 8.0 * i as f64 / (PATTERN_SIZE - 1) as f64 - 4.0;
                let level = level(x) as f32;
                [level, level, level, 1.0]
            })
            .collect();
        Self {
            kind,
            width: PATTERN_SIZE,
            height: 1,
            pixels,
            rgba0,
            rgba1,
        }
    }

    /// Load a PNG or JPEG file as an image texture
    pub fn from_image_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| eyre!("Failed to load {}: {}", path.display(), e))?
            .to_rgba32f();
        let (width, height) = image.dimensions();
        Self::new(TextureKind::Image, image.into_raw(), width, height)
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn mip_levels(&self) -> u32 {
        mip_levels(self.width, self.height)
    }
}

fn gaussian(x: f64) -> f64 {
    (-x * x / 2.0).exp()
}

/// floor(log2(max(w, h))) + 1
pub fn mip_levels(width: u32, height: u32) -> u32 {
    width.max(height).max(1).ilog2() + 1
}

/// Sampled image plus sampler of one renderable
pub struct TextureObjects {
    pub image: Image,
    pub sampler: vk::Sampler,
    device: Arc<ash::Device>,
}

impl TextureObjects {
    pub fn new(
        texture: &Texture,
        format_properties: vk::FormatProperties,
        max_anisotropy: f32,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
        transfer_context: &TransferContext,
    ) -> Result<Self> {
        let mip_levels = texture.mip_levels();
        let image = Image::new_texture(
            texture.pixels(),
            texture.width(),
            texture.height(),
            mip_levels,
            format_properties,
            memory_allocator,
            device.clone(),
            transfer_context,
        )?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(SAMPLER_MAX_ANISOTROPY.min(max_anisotropy))
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0);
        let sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .classify("create_sampler")?
        };

        Ok(Self {
            image,
            sampler,
            device,
        })
    }
}

impl Drop for TextureObjects {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_codes() {
        assert_eq!(TextureKind::Text.shader_code(), 0);
        assert_eq!(TextureKind::Image.shader_code(), 0);
        assert_eq!(TextureKind::Flat.shader_code(), 1);
        assert_eq!(TextureKind::Checkerboard.shader_code(), 2);
        assert_eq!(TextureKind::G3.shader_code(), 2);
    }

    #[test]
    fn test_mip_levels() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 2), 2);
        assert_eq!(mip_levels(512, 1), 10);
        assert_eq!(mip_levels(640, 480), 10);
        assert_eq!(mip_levels(1024, 1024), 11);
    }

    #[test]
    fn test_rejects_wrong_pixel_count() {
        assert!(Texture::new(TextureKind::Image, vec![0.0; 15], 2, 2).is_err());
        assert!(Texture::new(TextureKind::Image, vec![0.0; 16], 2, 2).is_ok());
        assert!(Texture::new(TextureKind::Image, Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn test_image_textures_are_transparent() {
        let texture = Texture::new(TextureKind::Image, vec![0.5; 4], 1, 1).unwrap();
        assert_eq!(texture.rgba0, Vec4::ZERO);
        assert_eq!(texture.rgba1, Vec4::ZERO);
    }

    #[test]
    fn test_builtin_patterns_are_well_formed() {
        for texture in [
            Texture::default(),
            Texture::checkerboard(Vec4::ZERO, Vec4::ONE),
            Texture::sine(Vec4::ZERO, Vec4::ONE),
            Texture::square_sine(Vec4::ZERO, Vec4::ONE),
            Texture::g1(Vec4::ZERO, Vec4::ONE),
            Texture::g2(Vec4::ZERO, Vec4::ONE),
            Texture::g3(Vec4::ZERO, Vec4::ONE),
        ] {
            let expected = 4 * texture.width() as usize * texture.height() as usize;
            assert_eq!(texture.pixels().len(), expected);
        }
        let checks = Texture::checkerboard(Vec4::ZERO, Vec4::ONE);
        assert_eq!((checks.width(), checks.height(), checks.mip_levels()), (2, 2, 2));
        assert_eq!(Texture::default().mip_levels(), 1);
    }

    fn levels(texture: &Texture) -> Vec<f32> {
        texture.pixels().chunks(4).map(|px| px[0]).collect()
    }

    #[test]
    fn test_gaussian_derivatives_span_unit_range() {
        for texture in [
            Texture::g1(Vec4::ZERO, Vec4::ONE),
            Texture::g2(Vec4::ZERO, Vec4::ONE),
            Texture::g3(Vec4::ZERO, Vec4::ONE),
        ] {
            let levels = levels(&texture);
            let min = levels.iter().copied().fold(f32::MAX, f32::min);
            let max = levels.iter().copied().fold(f32::MIN, f32::max);
            assert!(min >= -1e-3 && max <= 1.0 + 1e-3, "{:?}: {} {}", texture.kind(), min, max);
            assert!(max - min > 0.9, "{:?} barely varies", texture.kind());
            assert_eq!(texture.mip_levels(), 10);
        }
    }

    #[test]
    fn test_gaussian_derivative_symmetry() {
        // G1 and G3 are odd around the center, G2 is even
        let g1 = levels(&Texture::g1(Vec4::ZERO, Vec4::ONE));
        let g2 = levels(&Texture::g2(Vec4::ZERO, Vec4::ONE));
        let last = g1.len() - 1;
        for i in [0, 100, 200, 255] {
            assert!((g1[i] - 0.5 + g1[last - i] - 0.5).abs() < 1e-4);
            assert!((g2[i] - g2[last - i]).abs() < 1e-4);
        }
    }

    #[test]
    fn test_load_image_file() {
        let path = std::env::temp_dir().join("vistim_texture_test.png");
        let mut source = image::RgbaImage::new(3, 2);
        source.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        source.save(&path).unwrap();

        let texture = Texture::from_image_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(texture.kind(), TextureKind::Image);
        assert_eq!((texture.width(), texture.height()), (3, 2));
        assert_eq!(&texture.pixels()[..4], &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(texture.rgba0, Vec4::ZERO);
    }

    #[test]
    fn test_missing_image_file_fails() {
        assert!(Texture::from_image_file("does/not/exist.png").is_err());
    }
}
