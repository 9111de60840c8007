//! # Render Core
//!
//! The GPU resource and frame-synchronization layer of the engine.
//!
//! ## Features
//!
//! - **Explicit resource ownership**: buffers and images live in generation-checked
//!   handle tables and are destroyed exactly once, immediately or deferred
//! - **Frames in flight**: a ring of three frame contexts bounds CPU/GPU overlap
//! - **Shader reflection**: material binding layouts are derived from SPIR-V
//! - **Growable descriptor pools**: sized to the exact binding mix of one layout
//! - **Headless backend**: every component runs against a null device in tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     render_core::foundation::logging::init();
//!
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.application_name, 1280, 720)?;
//!     let device = VulkanDevice::new(&mut window, &config)?;
//!     let mut renderer = Renderer::new(device, config, window.get_framebuffer_size())?;
//!
//!     if let Some(_frame) = renderer.begin_frame()? {
//!         renderer.end_frame()?;
//!     }
//!
//!     renderer.shutdown()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod gpu;
pub mod resources;
pub mod reflection;
pub mod descriptors;
pub mod frame;
pub mod renderer;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig},
        foundation::logging::Diagnostics,
        gpu::{GpuDevice, RenderError, RenderResult, MemoryLocation},
        gpu::headless::HeadlessDevice,
        gpu::vulkan::VulkanDevice,
        reflection::{ShaderBindingLayout, BindingKind, ShaderReflector},
        frame::{FrameUniforms, ActiveFrame},
        renderer::{
            Renderer, Vertex, SceneUniforms, TextureBinding,
            BufferHandle, ImageHandle, TextureHandle, ShaderHandle, MaterialHandle,
            MeshHandle, RenderObjectHandle, FramebufferHandle,
        },
        platform::window::Window,
    };
}
