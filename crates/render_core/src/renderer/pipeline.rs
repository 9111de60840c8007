//! Pipeline cache persistence and shader program creation

use std::path::{Path, PathBuf};

use ash::vk;

use super::material::ShaderProgram;
use super::mesh::Vertex;
use crate::config::PipelineCacheConfig;
use crate::descriptors::{DescriptorBinder, FRAME_SET, SCENE_SET};
use crate::foundation::logging::{DiagnosticEvent, Diagnostics};
use crate::gpu::{GpuDevice, GraphicsPipelineDesc, RenderResult};
use crate::reflection::{ShaderBindingLayout, ShaderReflector, SkipReason};
use crate::resources::{Deletion, DeletionQueue, ResourceAllocator};

/// Vulkan pipeline cache backed by a file
#[derive(Debug)]
pub struct PipelineCache {
    handle: vk::PipelineCache,
    path: Option<PathBuf>,
}

impl PipelineCache {
    /// Create the cache, seeded from the configured file when it exists
    ///
    /// A missing or unreadable file starts an empty cache.
    pub fn load<D: GpuDevice>(device: &D, config: &PipelineCacheConfig) -> RenderResult<Self> {
        let path = config.enabled.then(|| config.path.clone());
        let initial = match &path {
            Some(path) => read_blob(path),
            None => Vec::new(),
        };
        let handle = device.create_pipeline_cache(&initial)?;
        Ok(Self { handle, path })
    }

    /// Vulkan handle
    pub fn handle(&self) -> vk::PipelineCache {
        self.handle
    }

    /// File the cache is persisted to, if persistence is enabled
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the current cache contents to disk
    pub fn save<D: GpuDevice>(&self, device: &D) -> RenderResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.handle == vk::PipelineCache::null() {
            return Ok(());
        }
        let data = device.pipeline_cache_data(self.handle)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &data)?;
        log::info!("Saved pipeline cache ({} bytes) to {}", data.len(), path.display());
        Ok(())
    }

    /// Hand the cache object to a deletion queue
    pub fn retire(&mut self, queue: &mut DeletionQueue) {
        let handle = std::mem::replace(&mut self.handle, vk::PipelineCache::null());
        if handle != vk::PipelineCache::null() {
            queue.push(Deletion::PipelineCache(handle));
        }
    }
}

fn read_blob(path: &Path) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => {
            log::info!("Loaded pipeline cache ({} bytes) from {}", data.len(), path.display());
            data
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No pipeline cache at {}", path.display());
            Vec::new()
        }
        Err(e) => {
            log::warn!("Ignoring unreadable pipeline cache {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Static state every shader program is built against
pub(crate) struct ProgramTarget<'a> {
    pub render_pass: vk::RenderPass,
    pub frame_layout: vk::DescriptorSetLayout,
    pub scene_layout: vk::DescriptorSetLayout,
    pub cache: vk::PipelineCache,
    pub sets_per_pool: u32,
    pub diagnostics: &'a Diagnostics,
}

/// Reflect a SPIR-V pair and build its modules, material binder and pipeline
///
/// Nothing is left behind on failure.
pub(crate) fn create_shader_program<D: GpuDevice>(
    device: &D,
    allocator: &mut ResourceAllocator<D>,
    target: &ProgramTarget<'_>,
    vertex: &[u32],
    fragment: &[u32],
) -> RenderResult<ShaderProgram> {
    let layout = ShaderReflector::new().reflect(vertex, fragment)?;
    for skipped in &layout.skipped {
        let expected_elsewhere = matches!(skipped.reason, SkipReason::OtherSet)
            && (skipped.set == FRAME_SET || skipped.set == SCENE_SET);
        if !expected_elsewhere {
            target.diagnostics.record(DiagnosticEvent::ReflectionSkipped {
                detail: format!(
                    "'{}' at set {} binding {} in {:?}: {}",
                    skipped.name, skipped.set, skipped.binding, skipped.stage, skipped.reason
                ),
            });
        }
    }

    let mut created = DeletionQueue::new();
    match build_program(device, target, &layout, vertex, fragment, &mut created) {
        Ok(parts) => Ok(ShaderProgram {
            vertex_module: parts.vertex_module,
            fragment_module: parts.fragment_module,
            layout,
            pipeline_layout: parts.pipeline_layout,
            pipeline: parts.pipeline,
            binder: parts.binder,
        }),
        Err(e) => {
            if let Err(cleanup) = created.flush(device, allocator) {
                log::error!("Cleanup after failed shader creation: {}", cleanup);
            }
            Err(e)
        }
    }
}

struct ProgramParts {
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    binder: Option<DescriptorBinder>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

fn build_program<D: GpuDevice>(
    device: &D,
    target: &ProgramTarget<'_>,
    layout: &ShaderBindingLayout,
    vertex: &[u32],
    fragment: &[u32],
    created: &mut DeletionQueue,
) -> RenderResult<ProgramParts> {
    let vertex_module = device.create_shader_module(vertex)?;
    created.push(Deletion::ShaderModule(vertex_module));
    let fragment_module = device.create_shader_module(fragment)?;
    created.push(Deletion::ShaderModule(fragment_module));

    // Materials without set 2 resources get no binder and no set
    let mut binder = if layout.is_empty() {
        None
    } else {
        Some(DescriptorBinder::new(device, layout, target.sets_per_pool)?)
    };

    match build_pipeline(device, target, layout, vertex_module, fragment_module, binder.as_ref(), created) {
        Ok((pipeline_layout, pipeline)) => {
            Ok(ProgramParts { vertex_module, fragment_module, binder, pipeline_layout, pipeline })
        }
        Err(e) => {
            if let Some(binder) = binder.as_mut() {
                binder.retire(created);
            }
            Err(e)
        }
    }
}

fn build_pipeline<D: GpuDevice>(
    device: &D,
    target: &ProgramTarget<'_>,
    layout: &ShaderBindingLayout,
    vertex_module: vk::ShaderModule,
    fragment_module: vk::ShaderModule,
    binder: Option<&DescriptorBinder>,
    created: &mut DeletionQueue,
) -> RenderResult<(vk::PipelineLayout, vk::Pipeline)> {
    let mut set_layouts = vec![target.frame_layout, target.scene_layout];
    if let Some(binder) = binder {
        set_layouts.push(binder.layout());
    }
    let pipeline_layout = device.create_pipeline_layout(&set_layouts, &layout.vk_push_constant_ranges())?;
    created.push(Deletion::PipelineLayout(pipeline_layout));

    let attributes = Vertex::attributes();
    let pipeline = device.create_graphics_pipeline(&GraphicsPipelineDesc {
        vertex_module,
        fragment_module,
        layout: pipeline_layout,
        render_pass: target.render_pass,
        cache: target.cache,
        vertex_stride: Vertex::STRIDE,
        vertex_attributes: &attributes,
        depth_test: true,
    })?;
    Ok((pipeline_layout, pipeline))
}
