//! Public handle types
//!
//! Every handle is a slot map key with a generation. Handles of destroyed
//! objects are rejected with [`crate::gpu::RenderError::StaleHandle`].

pub use crate::resources::{BufferHandle, ImageHandle};

slotmap::new_key_type! {
    /// Sampled texture
    pub struct TextureHandle;
    /// Compiled vertex/fragment pair with its pipeline
    pub struct ShaderHandle;
    /// Shader plus bound resources
    pub struct MaterialHandle;
    /// Uploaded vertex and index data
    pub struct MeshHandle;
    /// Mesh drawn with a material
    pub struct RenderObjectHandle;
    /// Offscreen render target
    pub struct FramebufferHandle;
}
