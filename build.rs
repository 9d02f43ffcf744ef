use color_eyre::Result;
use color_eyre::eyre::{eyre, OptionExt};
use shaderc::{CompileOptions, Compiler, OptimizationLevel, ShaderKind};
use std::{env, fs, path::Path};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=shaders");

    compile_shaders()?;

    Ok(())
}

fn compile_shaders() -> Result<()> {
    let cargo_manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let shaders_in_dir = Path::new(&cargo_manifest_dir).join("shaders");
    let shaders_out_dir = Path::new(&cargo_manifest_dir).join("shaders-built");
    fs::create_dir_all(&shaders_out_dir)?;

    let compiler = Compiler::new().ok_or_eyre("Failed to create shaderc compiler")?;
    let mut options = CompileOptions::new().ok_or_eyre("Failed to create shaderc options")?;
    options.set_optimization_level(OptimizationLevel::Performance);

    for entry in fs::read_dir(shaders_in_dir)? {
        let entry = entry?;
        let path = entry.path();
        println!("cargo:rerun-if-changed={}", path.display());

        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_eyre(format!("Shader file has no extension: {:?}", path))?;
        let shader_kind = match ext {
            "vert" => ShaderKind::Vertex,
            "frag" => ShaderKind::Fragment,
            _ => {
                log::warn!("Skipping non-GLSL file: {:?}", path);
                continue;
            }
        };

        let file_name = path
            .file_name()
            .ok_or_eyre("Shader file has no name")?
            .to_str()
            .ok_or_eyre("Shader file name is not valid UTF-8")?;

        // Read the GLSL file and compile it to SPIR-V
        let source = fs::read_to_string(&path)?;
        let artifact = compiler
            .compile_into_spirv(&source, shader_kind, file_name, "main", Some(&options))
            .map_err(|e| eyre!("Failed to compile {}: {}", file_name, e))?;
        if artifact.get_num_warnings() > 0 {
            println!("cargo:warning={}: {}", file_name, artifact.get_warning_messages());
        }

        // Keep the stage in the output name so `stimulus.vert` and `stimulus.frag` don't collide
        let output_filepath = shaders_out_dir.join(format!("{}.spv", file_name));
        fs::write(output_filepath, artifact.as_binary_u8())?;
    }

    Ok(())
}
