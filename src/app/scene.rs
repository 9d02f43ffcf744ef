use std::path::Path;
use color_eyre::Result;
use glam::{Vec2, Vec4};
use crate::renderer::renderable::{Envelope, Eye, Renderable};
use crate::renderer::resources::geometry::Geometry;
use crate::renderer::resources::texture::{Texture, TextureKind};

pub const SHAPE: usize = 0;
pub const PATTERN: usize = 1;

const CIRCLE_SEGMENTS: u32 = 64;

/// A flat shape seen by both eyes, a checkerboard for the left eye, a Gabor patch for the
/// right eye and optionally an image below them
pub fn build(image_path: Option<&Path>) -> Result<Vec<Renderable>> {
    let mut shape = Renderable::new(Geometry::quad(), Texture::flat(Vec4::new(0.5, 0.5, 0.5, 1.0)));
    shape.set_position(-6.0, 0.0, 400.0);
    shape.set_size(4.0, 4.0, 1.0);
    shape.set_rotation(15.0);

    let mut pattern = Renderable::new(
        Geometry::quad(),
        Texture::checkerboard(Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::ONE),
    );
    pattern.set_eye(Eye::Left);
    pattern.set_position(0.0, 0.0, 500.0);
    pattern.set_size(5.0, 5.0, 1.0);
    pattern.set_frequency(0.0, 1.0, 0.0, 1.0);

    let mut gabor = Renderable::new(
        Geometry::quad(),
        Texture::sine(Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::ONE),
    );
    gabor.set_eye(Eye::Right);
    gabor.set_position(6.0, 0.0, 500.0);
    gabor.set_size(6.0, 6.0, 1.0);
    gabor.set_frequency(0.0, 2.0, 0.0, 0.0);
    gabor.set_tex_rotation(45.0, Vec2::splat(0.5));
    gabor.set_envelope(Envelope::Gaussian, 1.0, 1.0, 0.0);

    let mut scene = vec![shape, pattern, gabor];
    if let Some(path) = image_path {
        let mut image = Renderable::new(Geometry::quad(), Texture::from_image_file(path)?);
        image.set_position(0.0, -8.0, 600.0);
        image.set_size(3.0, 3.0, 1.0);
        log::info!("Showing {}", path.display());
        scene.push(image);
    }
    Ok(scene)
}

/// Small red dot in the middle of the view, in front of everything else
pub fn fixation() -> Renderable {
    let mut dot = Renderable::new(
        Geometry::circle(CIRCLE_SEGMENTS),
        Texture::flat(Vec4::new(1.0, 0.0, 0.0, 1.0)),
    );
    dot.set_position(0.0, 0.0, 100.0);
    dot.set_size(0.2, 0.2, 1.0);
    dot
}

/// Swap between a square and a circle
pub fn toggle_shape(renderable: &mut Renderable) {
    let geometry = if renderable.geometry() == &Geometry::quad() {
        Geometry::circle(CIRCLE_SEGMENTS)
    } else {
        Geometry::quad()
    };
    renderable.set_geometry(geometry);
}

/// Step through checkerboard, square wave and the gaussian derivative profiles
pub fn toggle_pattern(renderable: &mut Renderable) {
    let black = Vec4::new(0.0, 0.0, 0.0, 1.0);
    let texture = match renderable.texture().kind() {
        TextureKind::Checkerboard => Texture::square_sine(black, Vec4::ONE),
        TextureKind::SquareSine => Texture::g1(black, Vec4::ONE),
        TextureKind::G1 => Texture::g2(black, Vec4::ONE),
        TextureKind::G2 => Texture::g3(black, Vec4::ONE),
        _ => Texture::checkerboard(black, Vec4::ONE),
    };
    renderable.assign_texture(texture);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_layout() {
        let scene = build(None).unwrap();
        assert_eq!(scene.len(), 3);
        assert_eq!(scene[PATTERN].eye(), Eye::Left);
        assert_eq!(scene[PATTERN].texture().kind(), TextureKind::Checkerboard);
        assert!(scene.iter().all(|renderable| !renderable.is_ready()));
    }

    #[test]
    fn test_missing_image_fails_scene() {
        assert!(build(Some(Path::new("does/not/exist.png"))).is_err());
    }

    #[test]
    fn test_pattern_cycle_returns_to_start() {
        let mut scene = build(None).unwrap();
        let pattern = &mut scene[PATTERN];
        let mut kinds = Vec::new();
        for _ in 0..5 {
            toggle_pattern(pattern);
            kinds.push(pattern.texture().kind());
        }
        assert_eq!(
            kinds,
            vec![
                TextureKind::SquareSine,
                TextureKind::G1,
                TextureKind::G2,
                TextureKind::G3,
                TextureKind::Checkerboard,
            ]
        );
        assert!(pattern.is_texture_dirty());
    }

    #[test]
    fn test_toggle_shape() {
        let mut scene = build(None).unwrap();
        toggle_shape(&mut scene[SHAPE]);
        assert_eq!(scene[SHAPE].geometry(), &Geometry::circle(CIRCLE_SEGMENTS));
        toggle_shape(&mut scene[SHAPE]);
        assert_eq!(scene[SHAPE].geometry(), &Geometry::quad());
    }
}
