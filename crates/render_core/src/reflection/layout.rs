//! Reflected binding layout types

use ash::vk;

use crate::gpu::{RenderError, RenderResult};

/// Kind of resource bound at a material slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform buffer block
    UniformBuffer,
    /// Combined image sampler
    SampledImage,
}

impl BindingKind {
    /// Vulkan descriptor type for this kind
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::UniformBuffer => "uniform buffer",
            Self::SampledImage => "sampled image",
        }
    }
}

/// One binding of the material set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialBinding {
    /// Binding slot
    pub slot: u32,
    /// Resource kind
    pub kind: BindingKind,
    /// Uniform block size in bytes, zero for images
    pub size: u64,
    /// Stages that declare the binding
    pub stages: vk::ShaderStageFlags,
    /// Name of the first declaration seen
    pub name: String,
}

/// Push constant byte range visible to some stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushConstantRange {
    /// First byte
    pub offset: u32,
    /// Byte count
    pub size: u32,
    /// Stages the range is visible to
    pub stages: vk::ShaderStageFlags,
}

impl PushConstantRange {
    /// One past the last byte
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

/// A resource the reflector did not turn into a binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedResource {
    /// Declared name, empty when the module is stripped
    pub name: String,
    /// Declared set level
    pub set: u32,
    /// Declared binding slot
    pub binding: u32,
    /// Stage that declared it
    pub stage: vk::ShaderStageFlags,
    /// Why it was skipped
    pub reason: SkipReason,
}

/// Why a resource was left out of the layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Declared at a set level other than the reflected one
    OtherSet,
    /// Descriptor type the material set does not support
    UnsupportedType(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OtherSet => write!(f, "not in the material set"),
            Self::UnsupportedType(ty) => write!(f, "unsupported descriptor type {}", ty),
        }
    }
}

/// Material-level binding layout of a shader pair
///
/// Bindings are unique and ascending by slot. Built once per shader and not
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderBindingLayout {
    /// Descriptor set level the bindings belong to
    pub set: u32,
    /// Bindings ordered by slot
    pub bindings: Vec<MaterialBinding>,
    /// Push constant ranges of both stages
    pub push_constants: Vec<PushConstantRange>,
    /// Resources that were ignored
    pub skipped: Vec<SkippedResource>,
}

impl ShaderBindingLayout {
    /// Binding at a slot
    pub fn binding(&self, slot: u32) -> Option<&MaterialBinding> {
        self.bindings
            .binary_search_by_key(&slot, |binding| binding.slot)
            .ok()
            .map(|index| &self.bindings[index])
    }

    /// Whether the material set has no bindings
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of bindings of one kind
    pub fn count(&self, kind: BindingKind) -> u32 {
        self.bindings.iter().filter(|binding| binding.kind == kind).count() as u32
    }

    /// Descriptor set layout bindings
    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding.slot)
                    .descriptor_type(binding.kind.descriptor_type())
                    .descriptor_count(1)
                    .stage_flags(binding.stages)
                    .build()
            })
            .collect()
    }

    /// Push constant ranges for pipeline layout creation
    pub fn vk_push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: range.stages,
                offset: range.offset,
                size: range.size,
            })
            .collect()
    }

    /// Total push constant bytes the pipeline accepts
    pub fn push_constant_size(&self) -> u32 {
        self.push_constants.iter().map(PushConstantRange::end).max().unwrap_or(0)
    }

    /// Updates covering `[offset, offset + size)`, split at range boundaries
    ///
    /// Each update names exactly the stages whose ranges contain all of its
    /// bytes, so every overlapping range has its stages named and every named
    /// stage owns the whole span. Payload bytes outside all ranges are dropped.
    pub fn push_constant_writes(&self, offset: u32, size: u32) -> RenderResult<Vec<PushConstantRange>> {
        let end = offset.checked_add(size).ok_or_else(|| {
            RenderError::InvalidArgument(format!("push constant range {} + {} overflows", offset, size))
        })?;

        let mut cuts = vec![offset, end];
        for range in &self.push_constants {
            cuts.extend([range.offset, range.end()].into_iter().filter(|cut| (offset..=end).contains(cut)));
        }
        cuts.sort_unstable();
        cuts.dedup();

        let mut writes: Vec<PushConstantRange> = Vec::new();
        for window in cuts.windows(2) {
            let (start, stop) = (window[0], window[1]);
            let stages = self
                .push_constants
                .iter()
                .filter(|range| range.offset <= start && stop <= range.end())
                .fold(vk::ShaderStageFlags::empty(), |stages, range| stages | range.stages);
            if stages.is_empty() {
                continue;
            }
            match writes.last_mut() {
                Some(last) if last.stages == stages && last.end() == start => last.size += stop - start,
                _ => writes.push(PushConstantRange { offset: start, size: stop - start, stages }),
            }
        }
        Ok(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ShaderBindingLayout {
        ShaderBindingLayout {
            set: 2,
            bindings: vec![
                MaterialBinding {
                    slot: 0,
                    kind: BindingKind::UniformBuffer,
                    size: 32,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                    name: "params".to_string(),
                },
                MaterialBinding {
                    slot: 3,
                    kind: BindingKind::SampledImage,
                    size: 0,
                    stages: vk::ShaderStageFlags::FRAGMENT,
                    name: "albedo".to_string(),
                },
            ],
            push_constants: vec![
                PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
                PushConstantRange { offset: 64, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
            ],
            skipped: Vec::new(),
        }
    }

    #[test]
    fn lookup_by_slot() {
        let layout = layout();
        assert_eq!(layout.binding(3).map(|b| b.kind), Some(BindingKind::SampledImage));
        assert!(layout.binding(1).is_none());
        assert_eq!(layout.count(BindingKind::UniformBuffer), 1);
    }

    #[test]
    fn push_writes_keep_each_range_stages() {
        let layout = layout();
        assert_eq!(layout.push_constant_size(), 80);
        assert_eq!(layout.push_constant_writes(0, 64).unwrap(), vec![
            PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
        ]);
        assert_eq!(layout.push_constant_writes(0, 80).unwrap(), vec![
            PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
            PushConstantRange { offset: 64, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
        ]);
        assert_eq!(layout.push_constant_writes(64, 16).unwrap(), vec![
            PushConstantRange { offset: 64, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
        ]);
    }

    #[test]
    fn short_payloads_are_clipped() {
        let writes = layout().push_constant_writes(0, 72).unwrap();
        assert_eq!(writes[1], PushConstantRange { offset: 64, size: 8, stages: vk::ShaderStageFlags::FRAGMENT });
    }

    #[test]
    fn overlapping_ranges_split_where_stages_change() {
        let mut layout = layout();
        layout.push_constants = vec![
            PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
            PushConstantRange { offset: 0, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
        ];
        assert_eq!(layout.push_constant_writes(0, 64).unwrap(), vec![
            PushConstantRange {
                offset: 0,
                size: 16,
                stages: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            },
            PushConstantRange { offset: 16, size: 48, stages: vk::ShaderStageFlags::VERTEX },
        ]);
    }

    #[test]
    fn overflowing_push_range_is_an_error() {
        let result = layout().push_constant_writes(u32::MAX - 4, 16);
        assert!(matches!(result, Err(RenderError::InvalidArgument(_))));
    }

    #[test]
    fn layout_bindings_follow_kinds() {
        let bindings = layout().layout_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[1].binding, 3);
        assert_eq!(bindings[1].descriptor_type, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
