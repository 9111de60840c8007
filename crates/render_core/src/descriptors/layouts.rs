//! Static set layouts

use ash::vk;

use crate::gpu::{GpuDevice, RenderResult};
use crate::reflection::{BindingKind, MaterialBinding, ShaderBindingLayout};

/// Set level of the per-frame uniforms
pub const FRAME_SET: u32 = 0;

/// Set level of the scene uniforms
pub const SCENE_SET: u32 = 1;

/// Builder for layouts that are not reflected
#[derive(Debug, Default)]
pub struct DescriptorSetLayoutBuilder {
    set: u32,
    bindings: Vec<MaterialBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Start a layout for a set level
    pub fn new(set: u32) -> Self {
        Self { set, bindings: Vec::new() }
    }

    /// Add a uniform buffer binding of `size` bytes
    pub fn add_uniform_buffer(mut self, slot: u32, size: u64, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(MaterialBinding {
            slot,
            kind: BindingKind::UniformBuffer,
            size,
            stages,
            name: format!("set{}_ubo{}", self.set, slot),
        });
        self
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(mut self, slot: u32, stages: vk::ShaderStageFlags) -> Self {
        self.bindings.push(MaterialBinding {
            slot,
            kind: BindingKind::SampledImage,
            size: 0,
            stages,
            name: format!("set{}_tex{}", self.set, slot),
        });
        self
    }

    /// Finish as a binding layout, sorted by slot
    pub fn build(mut self) -> ShaderBindingLayout {
        self.bindings.sort_by_key(|binding| binding.slot);
        ShaderBindingLayout {
            set: self.set,
            bindings: self.bindings,
            push_constants: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Create the Vulkan layout for a binding layout
pub fn create_set_layout<D: GpuDevice>(device: &D, layout: &ShaderBindingLayout) -> RenderResult<vk::DescriptorSetLayout> {
    device.create_descriptor_set_layout(&layout.layout_bindings())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sorts_bindings() {
        let layout = DescriptorSetLayoutBuilder::new(SCENE_SET)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .add_uniform_buffer(0, 96, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build();

        assert_eq!(layout.set, 1);
        assert_eq!(layout.bindings[0].slot, 0);
        assert_eq!(layout.bindings[0].size, 96);
        assert_eq!(layout.bindings[1].kind, BindingKind::SampledImage);
    }
}
