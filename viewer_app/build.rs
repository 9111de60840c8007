// build.rs
// Compiles the viewer's GLSL shaders to SPIR-V when the Vulkan SDK is available

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_DIR: &str = "shaders";
const TARGET_DIR: &str = "../target/shaders";

/// Output name keeps the stage extension: `cube.vert` -> `cube.vert.spv`
fn output_path(source: &Path, target_dir: &Path) -> Option<PathBuf> {
    let name = source.file_name()?.to_str()?;
    Some(target_dir.join(format!("{}.spv", name)))
}

fn is_stale(source: &Path, output: &Path) -> bool {
    match (std::fs::metadata(source).and_then(|m| m.modified()), std::fs::metadata(output).and_then(|m| m.modified())) {
        (Ok(src), Ok(dst)) => src > dst,
        _ => true,
    }
}

fn compile_shaders(shader_dir: &Path, target_dir: &Path, glslc: &str) -> usize {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stage = matches!(path.extension().and_then(|ext| ext.to_str()), Some("vert" | "frag"));
        if !is_stage {
            continue;
        }
        let Some(out_file) = output_path(&path, target_dir) else {
            continue;
        };
        if !is_stale(&path, &out_file) {
            eprintln!("info: Shader {:?} is up to date", path);
            continue;
        }

        let status = Command::new(glslc).arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {:?} -> {:?}", path, out_file);
                compiled += 1;
            }
            Ok(s) => panic!("glslc failed for {:?} with exit code {}", path, s.code().unwrap_or(-1)),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", path, e),
        }
    }
    compiled
}

fn main() {
    println!("cargo:rerun-if-changed={}", SHADER_DIR);
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let vulkan_sdk = match env::var("VULKAN_SDK") {
        Ok(sdk) => sdk,
        Err(_) => {
            eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
            return;
        }
    };
    let glslc = if cfg!(target_os = "windows") {
        format!("{}\\Bin\\glslc.exe", vulkan_sdk)
    } else {
        format!("{}/bin/glslc", vulkan_sdk)
    };
    if !Path::new(&glslc).exists() {
        eprintln!("warning: glslc not found at {}, shader compilation skipped", glslc);
        return;
    }

    let target_dir = PathBuf::from(TARGET_DIR);
    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {:?}: {}", target_dir, e);
        return;
    }

    let compiled = compile_shaders(Path::new(SHADER_DIR), &target_dir, &glslc);
    eprintln!("info: Compiled {} shader(s)", compiled);
}
