//! Test support: SPIR-V fixtures and renderer setup helpers

pub mod spirv;

use crate::config::RendererConfig;
use crate::foundation::logging::Diagnostics;
use crate::gpu::headless::HeadlessDevice;
use crate::renderer::Renderer;

/// Configuration that never touches the filesystem
pub fn test_config() -> RendererConfig {
    RendererConfig::new("render_core tests").without_pipeline_cache()
}

/// Headless renderer at 1280x720
pub fn headless_renderer() -> Renderer<HeadlessDevice> {
    Renderer::with_diagnostics(HeadlessDevice::new(), test_config(), (1280, 720), Diagnostics::new("test"))
        .expect("headless renderer")
}
