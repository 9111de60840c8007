//! Mesh viewer
//!
//! Opens a window and spins a cube through the render core.
//!
//! ```text
//! viewer [vertex.spv fragment.spv] [--config renderer.toml]
//! ```
//!
//! The shader pair must read the frame block at set 0 and may take the model
//! matrix as a 64 byte push constant. Without arguments the pair compiled by
//! the build script from `viewer_app/shaders` is used when it exists under
//! `target/shaders`. Without any shaders only the clear color is drawn, which
//! still exercises the full acquire/submit/present cycle.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use nalgebra::{Point3, Vector3};
use render_core::foundation::math::{to_cols_array, Mat4, Vec3};
use render_core::platform::{WindowError, WindowEvent};
use render_core::prelude::*;
use render_core::reflection::spirv_words;
use thiserror::Error;

#[derive(Debug, Error)]
enum ViewerError {
    #[error("Window error: {0}")]
    Window(#[from] WindowError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Usage: viewer [vertex.spv fragment.spv] [--config renderer.toml] ({0})")]
    Usage(String),
}

#[derive(Debug, Default)]
struct Args {
    shaders: Option<(PathBuf, PathBuf)>,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, ViewerError> {
    let mut parsed = Args::default();
    let mut positional = Vec::new();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let path = args.next().ok_or_else(|| ViewerError::Usage("--config needs a path".to_string()))?;
            parsed.config = Some(PathBuf::from(path));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }
    match positional.len() {
        0 => {}
        2 => {
            let fragment = positional.pop();
            let vertex = positional.pop();
            parsed.shaders = vertex.zip(fragment);
        }
        n => return Err(ViewerError::Usage(format!("expected 0 or 2 shader paths, got {}", n))),
    }
    Ok(parsed)
}

const COMPILED_SHADERS: (&str, &str) = ("target/shaders/cube.vert.spv", "target/shaders/cube.frag.spv");

fn compiled_shaders() -> Option<(PathBuf, PathBuf)> {
    let (vertex, fragment) = (PathBuf::from(COMPILED_SHADERS.0), PathBuf::from(COMPILED_SHADERS.1));
    (vertex.exists() && fragment.exists()).then_some((vertex, fragment))
}

struct Scene {
    object: RenderObjectHandle,
    push_constant_size: u32,
}

fn load_spirv(path: &Path) -> Result<Vec<u32>, ViewerError> {
    let bytes = std::fs::read(path).map_err(RenderError::from)?;
    log::info!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(spirv_words(&bytes)?)
}

fn load_scene(renderer: &mut Renderer<VulkanDevice>, vertex: &Path, fragment: &Path) -> Result<Scene, ViewerError> {
    let shader = renderer.create_shader(&load_spirv(vertex)?, &load_spirv(fragment)?)?;
    let material = renderer.create_material(shader)?;

    let layout = renderer.shader_layout(shader)?.clone();
    let texture_slots: Vec<u32> = layout
        .bindings
        .iter()
        .filter(|binding| binding.kind == BindingKind::SampledImage)
        .map(|binding| binding.slot)
        .collect();
    if !texture_slots.is_empty() {
        let texture = renderer.create_texture(CHECKER_SIZE, CHECKER_SIZE, &checkerboard())?;
        for slot in texture_slots {
            renderer.set_material_texture(material, slot, texture)?;
        }
    }

    let (vertices, indices) = cube();
    let mesh = renderer.upload_mesh(&vertices, &indices)?;
    let object = renderer.create_render_object(mesh, material)?;
    Ok(Scene { object, push_constant_size: layout.push_constant_size() })
}

const CHECKER_SIZE: u32 = 64;

fn checkerboard() -> Vec<u8> {
    (0..CHECKER_SIZE * CHECKER_SIZE)
        .flat_map(|i| {
            let (x, y) = (i % CHECKER_SIZE / 8, i / CHECKER_SIZE / 8);
            if (x + y) % 2 == 0 { [230, 230, 230, 255] } else { [40, 40, 40, 255] }
        })
        .collect()
}

/// Unit cube with per-face normals
fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u axis, v axis)
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = [
                normal[0] * 0.5 + u[0] * su + v[0] * sv,
                normal[1] * 0.5 + u[1] * su + v[1] * sv,
                normal[2] * 0.5 + u[2] * su + v[2] * sv,
            ];
            vertices.push(Vertex::new(position, normal, [su + 0.5, 0.5 - sv]));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

fn frame_uniforms(extent: (u32, u32), time: f32) -> FrameUniforms {
    let eye = Vec3::new(0.0, 1.5, 3.0);
    let view = Mat4::look_at_rh(&Point3::from(eye), &Point3::origin(), &Vector3::y());
    let aspect = extent.0 as f32 / extent.1.max(1) as f32;
    let mut projection = Mat4::new_perspective(aspect, std::f32::consts::FRAC_PI_4, 0.1, 100.0);
    // Vulkan clip space has Y pointing down
    projection[(1, 1)] *= -1.0;
    FrameUniforms::new(&view, &projection, &eye, time)
}

fn frame_loop(window: &mut Window, renderer: &mut Renderer<VulkanDevice>, args: &Args) -> Result<(), ViewerError> {
    let scene = match args.shaders.clone().or_else(compiled_shaders) {
        Some((vertex, fragment)) => Some(load_scene(renderer, &vertex, &fragment)?),
        None => {
            log::info!("No shaders given, drawing the clear color only");
            None
        }
    };

    let start = Instant::now();
    let mut minimized = false;
    while !window.should_close() {
        let events = if minimized { window.wait_events() } else { window.poll_events() };
        for event in events {
            match event {
                WindowEvent::Resized(width, height) => {
                    renderer.on_resize(width, height)?;
                    minimized = width == 0 || height == 0;
                }
                WindowEvent::CloseRequested | WindowEvent::KeyPressed(glfw::Key::Escape) => {
                    window.set_should_close(true);
                }
                WindowEvent::KeyPressed(_) => {}
            }
        }
        if minimized {
            continue;
        }

        let time = start.elapsed().as_secs_f32();
        let Some(_frame) = renderer.begin_frame()? else {
            continue;
        };
        let extent = renderer.swapchain_extent();
        renderer.update_frame_uniforms(&frame_uniforms((extent.width, extent.height), time))?;

        if let Some(scene) = &scene {
            let model = to_cols_array(&Mat4::from_euler_angles(time * 0.3, time * 0.7, 0.0));
            let push: &[u8] = if scene.push_constant_size >= 64 { bytemuck::bytes_of(&model) } else { &[] };
            renderer.draw(scene.object, push)?;
        }
        renderer.end_frame()?;
    }
    Ok(())
}

fn run(args: Args) -> Result<(), ViewerError> {
    let config = match &args.config {
        Some(path) => RendererConfig::load_from_file(path)?,
        None => RendererConfig::new("Render Core Viewer"),
    };

    let mut window = Window::new(&config.application_name, 1280, 720)?;
    let device = VulkanDevice::new(&mut window, &config)?;
    log::info!("Rendering on {}", device.device_name());
    let mut renderer = Renderer::new(device, config, window.get_framebuffer_size())?;

    let result = frame_loop(&mut window, &mut renderer, &args);
    let shutdown = renderer.shutdown();

    let diagnostics = renderer.diagnostics();
    log::info!(
        "Rendered {} frames ({} skipped, {} swapchain rebuilds)",
        renderer.frame_number(),
        diagnostics.skipped_frames(),
        diagnostics.swapchain_rebuilds()
    );
    drop(renderer);
    drop(window);

    result?;
    shutdown?;
    Ok(())
}

fn main() -> ExitCode {
    render_core::foundation::logging::init_with_filter("info");

    let result = parse_args(std::env::args().skip(1)).and_then(run);
    match result {
        Ok(()) => {
            log::info!("Viewer finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, ViewerError> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn shader_pair_and_config_are_parsed() {
        let parsed = args(&["a.vert.spv", "--config", "r.toml", "a.frag.spv"]).unwrap();
        let (vertex, fragment) = parsed.shaders.unwrap();
        assert_eq!(vertex, PathBuf::from("a.vert.spv"));
        assert_eq!(fragment, PathBuf::from("a.frag.spv"));
        assert_eq!(parsed.config, Some(PathBuf::from("r.toml")));
    }

    #[test]
    fn a_single_shader_is_a_usage_error() {
        assert!(matches!(args(&["only.spv"]), Err(ViewerError::Usage(_))));
        assert!(matches!(args(&["--config"]), Err(ViewerError::Usage(_))));
        assert!(args(&[]).unwrap().shaders.is_none());
    }

    #[test]
    fn cube_faces_point_outward() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        for vertex in &vertices {
            let dot: f32 = (0..3).map(|i| vertex.position[i] * vertex.normal[i]).sum();
            assert!((dot - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn checkerboard_is_rgba() {
        assert_eq!(checkerboard().len(), (CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
    }
}
