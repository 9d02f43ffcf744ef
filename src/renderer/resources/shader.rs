use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ash::vk;
use color_eyre::Result;
use crate::renderer::error::RenderError;

const SHADERS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders-built");

/// Vertex and fragment modules of one graphics shader, compiled by `build.rs`
pub struct GraphicsShader {
    pub vert_mod: vk::ShaderModule,
    pub frag_mod: vk::ShaderModule,
    device: Arc<ash::Device>,
}

impl GraphicsShader {
    pub fn new(shader_name: &str, device: Arc<ash::Device>) -> Result<Self> {
        let vert_mod = create_shader_module(&spirv_path(shader_name, "vert"), &device)?;
        let frag_mod = match create_shader_module(&spirv_path(shader_name, "frag"), &device) {
            Ok(module) => module,
            Err(err) => {
                unsafe { device.destroy_shader_module(vert_mod, None) };
                return Err(err);
            }
        };
        Ok(Self { vert_mod, frag_mod, device })
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.vert_mod, None);
            self.device.destroy_shader_module(self.frag_mod, None);
        }
    }
}

pub fn spirv_path(shader_name: &str, stage: &str) -> PathBuf {
    Path::new(SHADERS_DIR).join(format!("{}.{}.spv", shader_name, stage))
}

fn create_shader_module(filepath: &Path, device: &ash::Device) -> Result<vk::ShaderModule> {
    let code = read_spirv(filepath)?;

    let shader_module_info = vk::ShaderModuleCreateInfo::default()
        .code(&code);

    let shader_module = unsafe {
        device.create_shader_module(&shader_module_info, None)
    }
        .map_err(|e| RenderError::ShaderBuild(format!("{}: {}", filepath.display(), e)))?;

    Ok(shader_module)
}

fn read_spirv(filepath: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(filepath)
        .map_err(|e| RenderError::ShaderBuild(format!("{}: {}", filepath.display(), e)))?;
    let code = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RenderError::ShaderBuild(format!("{}: {}", filepath.display(), e)))?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spirv_path() {
        let path = spirv_path("stimulus", "frag");
        assert!(path.ends_with("shaders-built/stimulus.frag.spv"));
    }

    #[test]
    fn test_missing_spirv_is_shader_build_error() {
        let report = read_spirv(Path::new("/nonexistent/stimulus.vert.spv")).unwrap_err();
        assert!(matches!(
            report.downcast_ref::<RenderError>(),
            Some(RenderError::ShaderBuild(_))
        ));
    }

    #[test]
    fn test_invalid_spirv_is_shader_build_error() {
        let path = std::env::temp_dir().join("vistim_invalid.spv");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let report = read_spirv(&path).unwrap_err();
        assert!(matches!(
            report.downcast_ref::<RenderError>(),
            Some(RenderError::ShaderBuild(_))
        ));
        let _ = std::fs::remove_file(&path);
    }
}
