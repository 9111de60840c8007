//! SPIR-V reflection with spirq

use std::collections::BTreeMap;

use ash::vk;
use spirq::ty::DescriptorType;
use spirq::var::Variable;

use super::layout::{
    BindingKind, MaterialBinding, PushConstantRange, ShaderBindingLayout, SkipReason, SkippedResource,
};
use super::size::{member_extent, type_size};
use crate::gpu::{RenderError, RenderResult};

/// Descriptor set level owned by materials
pub const MATERIAL_SET: u32 = 2;

const SPIRV_MAGIC: u32 = 0x0723_0203;
const SPIRV_HEADER_WORDS: usize = 5;

#[derive(Debug, Default)]
struct StageReflection {
    bindings: Vec<MaterialBinding>,
    push_constants: Option<PushConstantRange>,
    skipped: Vec<SkippedResource>,
}

/// Derives material binding layouts from SPIR-V
#[derive(Debug, Clone, Copy)]
pub struct ShaderReflector {
    set: u32,
}

impl ShaderReflector {
    /// Reflector for the material set level
    pub fn new() -> Self {
        Self { set: MATERIAL_SET }
    }

    /// Reflector for another set level
    pub fn for_set(set: u32) -> Self {
        Self { set }
    }

    /// Set level this reflector keeps
    pub fn set(&self) -> u32 {
        self.set
    }

    /// Reflect a vertex and fragment module into one layout
    pub fn reflect(&self, vertex: &[u32], fragment: &[u32]) -> RenderResult<ShaderBindingLayout> {
        let stages = [
            self.reflect_stage(vertex, vk::ShaderStageFlags::VERTEX)?,
            self.reflect_stage(fragment, vk::ShaderStageFlags::FRAGMENT)?,
        ];

        let mut bindings: BTreeMap<u32, MaterialBinding> = BTreeMap::new();
        let mut push_constants: Vec<PushConstantRange> = Vec::new();
        let mut skipped = Vec::new();

        for stage in stages {
            for binding in stage.bindings {
                merge_binding(&mut bindings, binding)?;
            }
            if let Some(range) = stage.push_constants {
                match push_constants.iter_mut().find(|r| r.offset == range.offset && r.size == range.size) {
                    Some(existing) => existing.stages |= range.stages,
                    None => push_constants.push(range),
                }
            }
            skipped.extend(stage.skipped);
        }

        let layout = ShaderBindingLayout {
            set: self.set,
            bindings: bindings.into_values().collect(),
            push_constants,
            skipped,
        };
        log::debug!(
            "[SHADER] Reflected set {}: {} bindings, {} push ranges, {} skipped",
            layout.set, layout.bindings.len(), layout.push_constants.len(), layout.skipped.len()
        );
        Ok(layout)
    }

    fn reflect_stage(&self, code: &[u32], stage: vk::ShaderStageFlags) -> RenderResult<StageReflection> {
        check_header(code, stage)?;
        let entry_points = spirq::ReflectConfig::new()
            .spv(code)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| RenderError::Reflection(format!("{:?} module: {:?}", stage, e)))?;
        if entry_points.is_empty() {
            return Err(RenderError::Reflection(format!("{:?} module has no entry point", stage)));
        }

        let mut reflection = StageReflection::default();
        for entry_point in &entry_points {
            for var in entry_point.vars.iter() {
                match var {
                    Variable::Descriptor { name, desc_bind, desc_ty, ty, .. } => {
                        let name = name.clone().unwrap_or_default();
                        let (set, slot) = (desc_bind.set(), desc_bind.bind());
                        let skip = |reason: SkipReason| SkippedResource {
                            name: name.clone(),
                            set,
                            binding: slot,
                            stage,
                            reason,
                        };

                        if set != self.set {
                            log::trace!("[SHADER] {:?} '{}' at set {} is outside set {}", stage, name, set, self.set);
                            reflection.skipped.push(skip(SkipReason::OtherSet));
                            continue;
                        }

                        let kind = match desc_ty {
                            DescriptorType::UniformBuffer() => BindingKind::UniformBuffer,
                            DescriptorType::CombinedImageSampler() => BindingKind::SampledImage,
                            other => {
                                log::debug!("[SHADER] {:?} '{}' at binding {} has type {:?}", stage, name, slot, other);
                                reflection.skipped.push(skip(SkipReason::UnsupportedType(format!("{:?}", other))));
                                continue;
                            }
                        };
                        let size = match kind {
                            BindingKind::UniformBuffer => type_size(ty),
                            BindingKind::SampledImage => 0,
                        };
                        reflection.bindings.push(MaterialBinding { slot, kind, size, stages: stage, name });
                    }
                    Variable::PushConstant { ty, .. } => {
                        let (start, end) = member_extent(ty);
                        if end <= start {
                            continue;
                        }
                        let (start, end) = match reflection.push_constants {
                            Some(existing) => (start.min(u64::from(existing.offset)), end.max(u64::from(existing.end()))),
                            None => (start, end),
                        };
                        reflection.push_constants = Some(PushConstantRange {
                            offset: to_u32(start)?,
                            size: to_u32(end - start)?,
                            stages: stage,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(reflection)
    }
}

impl Default for ShaderReflector {
    fn default() -> Self {
        Self::new()
    }
}

/// spirq indexes past the header without bounds checks
fn check_header(code: &[u32], stage: vk::ShaderStageFlags) -> RenderResult<()> {
    if code.len() < SPIRV_HEADER_WORDS {
        return Err(RenderError::Reflection(format!(
            "{:?} module is {} words, shorter than the SPIR-V header",
            stage,
            code.len()
        )));
    }
    if code[0] != SPIRV_MAGIC {
        return Err(RenderError::Reflection(format!("{:?} module has bad magic {:#010x}", stage, code[0])));
    }
    Ok(())
}

fn merge_binding(bindings: &mut BTreeMap<u32, MaterialBinding>, binding: MaterialBinding) -> RenderResult<()> {
    match bindings.get_mut(&binding.slot) {
        None => {
            bindings.insert(binding.slot, binding);
        }
        Some(existing) if existing.kind != binding.kind => {
            return Err(RenderError::ReflectionConflict {
                slot: binding.slot,
                first: existing.kind.name(),
                second: binding.kind.name(),
            });
        }
        Some(existing) if existing.size != binding.size => {
            return Err(RenderError::Reflection(format!(
                "uniform block at binding {} is {} bytes in one stage and {} in another",
                binding.slot, existing.size, binding.size
            )));
        }
        Some(existing) => existing.stages |= binding.stages,
    }
    Ok(())
}

fn to_u32(value: u64) -> RenderResult<u32> {
    u32::try_from(value).map_err(|_| RenderError::Reflection(format!("push constant offset {} out of range", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spirv::{Member, Resource, Stage, assemble};

    #[test]
    fn uniform_and_texture_across_stages() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(2, 0, vec![Member::Mat4]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::texture(2, 1),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();

        assert_eq!(layout.set, 2);
        assert_eq!(layout.bindings.len(), 2);
        assert_eq!(layout.bindings[0].slot, 0);
        assert_eq!(layout.bindings[0].kind, BindingKind::UniformBuffer);
        assert_eq!(layout.bindings[0].size, 64);
        assert_eq!(layout.bindings[0].stages, vk::ShaderStageFlags::VERTEX);
        assert_eq!(layout.bindings[1].slot, 1);
        assert_eq!(layout.bindings[1].kind, BindingKind::SampledImage);
        assert_eq!(layout.bindings[1].stages, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn shared_slot_unions_stages() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(2, 0, vec![Member::Vec4]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::uniform(2, 0, vec![Member::Vec4]),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();

        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(
            layout.bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(layout.bindings[0].size, 16);
    }

    #[test]
    fn bindings_come_out_sorted() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(2, 4, vec![Member::Float]),
            Resource::uniform(2, 1, vec![Member::Float]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::texture(2, 2),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();
        let slots: Vec<u32> = layout.bindings.iter().map(|b| b.slot).collect();
        assert_eq!(slots, vec![1, 2, 4]);
    }

    #[test]
    fn nested_sizes_follow_members_and_strides() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(2, 0, vec![
                Member::Mat4,
                Member::Vec4,
                Member::FloatArray { len: 4, stride: 16 },
                Member::Float,
            ]),
        ]);
        let fragment = assemble(Stage::Fragment, &[]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();
        // 148 bytes of members, rounded to the 16 byte block alignment
        assert_eq!(layout.bindings[0].size, 160);
    }

    #[test]
    fn padded_members_extend_the_block() {
        let vertex = assemble(Stage::Vertex, &[]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::uniform_at(2, 0, vec![(0, Member::Float), (16, Member::Vec4)]),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();
        assert_eq!(layout.bindings[0].size, 32);
    }

    #[test]
    fn conflicting_kinds_are_rejected() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(2, 0, vec![Member::Vec4]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::texture(2, 0),
        ]);

        let result = ShaderReflector::new().reflect(&vertex, &fragment);
        assert!(matches!(result, Err(RenderError::ReflectionConflict { slot: 0, .. })));
    }

    #[test]
    fn other_sets_and_separate_images_are_skipped() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::uniform(0, 0, vec![Member::Mat4]),
            Resource::uniform(2, 0, vec![Member::Vec4]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::separate_image(2, 1),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();

        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.skipped.len(), 2);
        assert!(layout.skipped.iter().any(|s| s.set == 0 && s.reason == SkipReason::OtherSet));
        assert!(layout.skipped.iter().any(|s| {
            s.binding == 1 && matches!(s.reason, SkipReason::UnsupportedType(_))
        }));
    }

    #[test]
    fn push_ranges_stay_per_stage() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::push(vec![(0, Member::Mat4)]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::push(vec![(64, Member::Vec4)]),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();

        assert_eq!(layout.push_constants, vec![
            PushConstantRange { offset: 0, size: 64, stages: vk::ShaderStageFlags::VERTEX },
            PushConstantRange { offset: 64, size: 16, stages: vk::ShaderStageFlags::FRAGMENT },
        ]);
    }

    #[test]
    fn identical_push_ranges_share_one_entry() {
        let vertex = assemble(Stage::Vertex, &[
            Resource::push(vec![(0, Member::Vec4)]),
        ]);
        let fragment = assemble(Stage::Fragment, &[
            Resource::push(vec![(0, Member::Vec4)]),
        ]);

        let layout = ShaderReflector::new().reflect(&vertex, &fragment).unwrap();
        assert_eq!(layout.push_constants.len(), 1);
        assert_eq!(
            layout.push_constants[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn garbage_is_a_reflection_error() {
        let fragment = assemble(Stage::Fragment, &[]);
        let result = ShaderReflector::new().reflect(&[1, 2, 3], &fragment);
        assert!(matches!(result, Err(RenderError::Reflection(_))));
    }

    #[test]
    fn bad_magic_is_a_reflection_error() {
        let vertex = assemble(Stage::Vertex, &[]);
        let mut fragment = assemble(Stage::Fragment, &[]);
        fragment[0] = 0xdead_beef;
        let result = ShaderReflector::new().reflect(&vertex, &fragment);
        assert!(matches!(result, Err(RenderError::Reflection(_))));
        assert!(matches!(ShaderReflector::new().reflect(&vertex, &[]), Err(RenderError::Reflection(_))));
    }
}
