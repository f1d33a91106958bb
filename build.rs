use std::{ffi::OsStr, path::PathBuf, process::Command};

const SHADER_DIR: &str = "./shaders";
const OUTPUT_DIR: &str = "./shaders/spv";

fn main() {
    println!("cargo:rerun-if-changed={SHADER_DIR}");

    for shader in [
        "shadow.vert",
        "depth_prepass.vert",
        "forward.vert",
        "light_culling.comp",
    ] {
        compile_shader(
            PathBuf::from(SHADER_DIR).join(shader),
            PathBuf::from(OUTPUT_DIR).join(format!("{shader}.spv")),
            &[SHADER_DIR],
            &[],
        );
    }

    // One fragment shader per render strategy
    for (output, defines) in [
        ("forward_plus.frag.spv", &["TILED", "SHADOWS"][..]),
        ("forward.frag.spv", &["SHADOWS"][..]),
        ("forward_unshadowed.frag.spv", &[][..]),
    ] {
        compile_shader(
            PathBuf::from(SHADER_DIR).join("forward.frag"),
            PathBuf::from(OUTPUT_DIR).join(output),
            &[SHADER_DIR],
            defines,
        );
    }
}

fn compile_shader(
    shader_path: impl Into<PathBuf> + AsRef<OsStr>,
    output_path: impl Into<PathBuf> + AsRef<OsStr>,
    include_paths: &[impl Into<PathBuf> + AsRef<OsStr> + Copy],
    defines: &[&str],
) {
    let shader_path = shader_path.into();
    let output_path: PathBuf = output_path.into();

    let inc_paths: Vec<String> = include_paths
        .iter()
        .map(|path| {
            let path: PathBuf = (*path).into();
            format!("-I{}", path.display())
        })
        .collect();

    let def_args: Vec<String> = defines.iter().map(|def| format!("-D{def}")).collect();

    // Create path if it doesn't exist yet
    let mut path_to_out = output_path.clone();
    path_to_out.pop();
    if let Err(err) = std::fs::create_dir_all(&path_to_out) {
        println!("cargo:warning=Unable to create directory `{path_to_out:?}`. Error: {err:?}");
    }

    let stderr = match Command::new("glslc")
        .arg(&shader_path)
        .args(&inc_paths)
        .args(&def_args)
        .arg("--target-env=vulkan1.2")
        .arg("-o")
        .arg(&output_path)
        .output()
    {
        Ok(res) => res.stderr,
        Err(err) => {
            println!("cargo:warning=Unable to compile `{shader_path:?}`. Error: {err:?}");
            return;
        }
    };

    if !stderr.is_empty() {
        let err = String::from_utf8_lossy(&stderr);
        println!("cargo:warning=Unable to compile `{shader_path:?}`. Error: {err:?}");
    }
}
