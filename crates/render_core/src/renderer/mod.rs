//! Renderer orchestration
//!
//! [`Renderer`] ties the resource, descriptor and frame layers together and
//! exposes handle-based creation APIs for meshes, textures, shaders,
//! materials and offscreen framebuffers.

pub mod handles;
pub mod material;
pub mod mesh;
pub mod pipeline;
#[allow(clippy::module_inception)]
mod renderer;
pub mod targets;

#[cfg(test)]
mod renderer_tests;

pub use handles::{
    BufferHandle, FramebufferHandle, ImageHandle, MaterialHandle, MeshHandle, RenderObjectHandle, ShaderHandle,
    TextureHandle,
};
pub use material::{SceneUniforms, TextureBinding};
pub use mesh::Vertex;
pub use pipeline::PipelineCache;
pub use renderer::Renderer;
pub use targets::{OffscreenFramebuffer, SwapchainTargets};
