//! Materials, textures and scene uniforms

use ash::vk;
use bytemuck::{Pod, Zeroable};

use super::handles::{FramebufferHandle, MaterialHandle, MeshHandle, ShaderHandle, TextureHandle};
use crate::descriptors::DescriptorBinder;
use crate::reflection::ShaderBindingLayout;
use crate::resources::{BufferHandle, ImageHandle};

/// Lighting data bound at set 1
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    /// Ambient light, alpha unused
    pub ambient_color: [f32; 4],
    /// Direction the main light travels, w unused
    pub light_direction: [f32; 4],
    /// Main light color, alpha is intensity
    pub light_color: [f32; 4],
}

impl SceneUniforms {
    /// Block size in bytes
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl Default for SceneUniforms {
    fn default() -> Self {
        Self {
            ambient_color: [0.1, 0.1, 0.1, 1.0],
            light_direction: [-0.5, -1.0, -0.3, 0.0],
            light_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// View and sampler of a texture, for display by UI collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    /// Image view
    pub view: vk::ImageView,
    /// Sampler
    pub sampler: vk::Sampler,
}

/// Who owns the image behind a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextureSource {
    /// Created by `create_texture`
    Uploaded,
    /// Color attachment of an offscreen framebuffer
    Framebuffer(FramebufferHandle),
}

#[derive(Debug)]
pub(crate) struct Texture {
    pub image: ImageHandle,
    pub sampler: vk::Sampler,
    pub source: TextureSource,
}

#[derive(Debug)]
pub(crate) struct ShaderProgram {
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub layout: ShaderBindingLayout,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub binder: Option<DescriptorBinder>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MaterialUniform {
    pub slot: u32,
    pub buffer: BufferHandle,
    pub size: u64,
}

#[derive(Debug)]
pub(crate) struct Material {
    pub shader: ShaderHandle,
    pub set: Option<vk::DescriptorSet>,
    pub uniforms: Vec<MaterialUniform>,
    pub textures: Vec<(u32, TextureHandle)>,
}

impl Material {
    pub fn uniform(&self, slot: u32) -> Option<&MaterialUniform> {
        self.uniforms.iter().find(|uniform| uniform.slot == slot)
    }

    pub fn uses_texture(&self, texture: TextureHandle) -> bool {
        self.textures.iter().any(|(_, bound)| *bound == texture)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderObject {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_block_is_three_vec4s() {
        assert_eq!(SceneUniforms::SIZE, 48);
    }
}
