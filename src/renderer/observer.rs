use glam::{Mat4, Vec3};
use crate::renderer::config::ViewMode;
use crate::renderer::shader_data::CameraState;

pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 1000.0;

/// Viewing geometry of the person looking at the display. Only the parts the
/// renderer needs to build a projection for the current surface extent.
#[derive(Debug, Clone)]
pub struct Observer {
    view_mode: ViewMode,
    distance_mm: f32,
    pixel_pitch_mm: f32,

    fovx: f32,
    fovy: f32,
    camera: CameraState,
}

impl Observer {
    pub fn new(view_mode: ViewMode, distance_mm: f32, pixel_pitch_mm: f32) -> Self {
        let camera = CameraState {
            view: Mat4::look_at_rh(Vec3::ZERO, Vec3::Z, Vec3::Y),
            ..Default::default()
        };

        Self {
            view_mode,
            distance_mm,
            pixel_pitch_mm,
            fovx: 0.0,
            fovy: 0.0,
            camera,
        }
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        self.view_mode = view_mode;
    }

    /// Field of view in degrees (x, y) of a single eye
    pub fn field_of_view(&self) -> (f32, f32) {
        (self.fovx.to_degrees(), self.fovy.to_degrees())
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    /// Recompute field of view and projection for a surface of `width` x `height` pixels
    pub fn update_projection(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }

        let width_mm = width as f32 * self.pixel_pitch_mm;
        let height_mm = height as f32 * self.pixel_pitch_mm;
        self.fovx = 2.0 * ((width_mm / 2.0) / self.distance_mm).atan();
        self.fovy = 2.0 * ((height_mm / 2.0) / self.distance_mm).atan();

        let mut aspect = width as f32 / height as f32;
        if self.view_mode == ViewMode::Stereo {
            // Each eye only sees half of the surface
            self.fovx /= 2.0;
            aspect /= 2.0;
        }

        self.camera.projection = Mat4::perspective_rh(self.fovy, aspect, Z_NEAR, Z_FAR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_field_of_view_mono() {
        let mut observer = Observer::new(ViewMode::Mono, 500.0, 0.25);
        observer.update_projection(2000, 1000);
        let (fovx, fovy) = observer.field_of_view();
        // 500 mm wide at 500 mm: 2 * atan(0.5)
        assert!((fovx - 2.0 * 0.5f32.atan().to_degrees()).abs() < 1e-4);
        assert!((fovy - 2.0 * 0.25f32.atan().to_degrees()).abs() < 1e-4);
    }

    #[test]
    fn test_field_of_view_stereo_is_halved() {
        let mut mono = Observer::new(ViewMode::Mono, 500.0, 0.25);
        let mut stereo = Observer::new(ViewMode::Stereo, 500.0, 0.25);
        mono.update_projection(1920, 1080);
        stereo.update_projection(1920, 1080);
        assert!((stereo.field_of_view().0 * 2.0 - mono.field_of_view().0).abs() < 1e-4);
        assert_eq!(stereo.field_of_view().1, mono.field_of_view().1);
    }

    #[test]
    fn test_projection_depth_range_is_zero_to_one() {
        let mut observer = Observer::new(ViewMode::Mono, 500.0, 0.25);
        observer.update_projection(800, 600);
        let camera = observer.camera();
        let near = camera.projection * camera.view * Vec4::new(0.0, 0.0, Z_NEAR, 1.0);
        let far = camera.projection * camera.view * Vec4::new(0.0, 0.0, Z_FAR, 1.0);
        assert!((near.z / near.w).abs() < 1e-4);
        assert!((far.z / far.w - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_minimized_surface_keeps_projection() {
        let mut observer = Observer::new(ViewMode::Mono, 500.0, 0.25);
        observer.update_projection(800, 600);
        let before = observer.camera().projection;
        observer.update_projection(0, 0);
        assert_eq!(observer.camera().projection, before);
        assert!(observer.camera().projection.is_finite());
    }
}
