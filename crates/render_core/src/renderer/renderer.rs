//! # Renderer
//!
//! Owns the device and every GPU object built on it, and drives the frame
//! loop: `begin_frame` → `update_frame_uniforms` / `draw` → `end_frame`.
//!
//! Objects handed out as handles are destroyed through the frame ring's
//! deletion queues, so a destroy call never races a frame that is still
//! executing on the GPU.

use ash::vk;
use slotmap::{SecondaryMap, SlotMap};

use super::handles::{
    BufferHandle, FramebufferHandle, ImageHandle, MaterialHandle, MeshHandle, RenderObjectHandle, ShaderHandle, TextureHandle,
};
use super::material::{
    Material, MaterialUniform, RenderObject, SceneUniforms, ShaderProgram, Texture, TextureBinding, TextureSource,
};
use super::mesh::{Mesh, Vertex};
use super::pipeline::{create_shader_program, PipelineCache, ProgramTarget};
use super::targets::{render_pass_desc, OffscreenFramebuffer, SwapchainTargets};
use crate::config::RendererConfig;
use crate::descriptors::{DescriptorBinder, DescriptorSetLayoutBuilder, FRAME_SET, SCENE_SET};
use crate::foundation::logging::{DiagnosticEvent, Diagnostics};
use crate::frame::{ActiveFrame, FrameBegin, FrameRing, FrameUniforms};
use crate::gpu::{GpuDevice, ImageTransition, MemoryLocation, RenderError, RenderResult};
use crate::reflection::{BindingKind, PushConstantRange, ShaderBindingLayout, MATERIAL_SET};
use crate::resources::{AllocationStats, Deletion, DeletionQueue, ImageSpec, ResourceAllocator, UploadContext};

/// Format of textures created from RGBA8 data
const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Set 1 buffer and descriptor set of one frame slot
#[derive(Debug)]
struct SceneSlot {
    buffer: BufferHandle,
    set: vk::DescriptorSet,
    dirty: bool,
}

#[derive(Debug)]
struct FramebufferEntry {
    target: OffscreenFramebuffer,
    texture: TextureHandle,
}

#[derive(Debug)]
struct QueuedDraw {
    framebuffer: FramebufferHandle,
    object: RenderObjectHandle,
    push_constants: Vec<u8>,
}

/// Everything a draw needs, resolved before recording starts
struct DrawCall<'a> {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    material_set: Option<vk::DescriptorSet>,
    push_writes: Vec<PushConstantRange>,
    push_constants: &'a [u8],
    vertex_buffer: vk::Buffer,
    index_buffer: vk::Buffer,
    index_count: u32,
}

/// Renderer over a [`GpuDevice`] backend
pub struct Renderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    diagnostics: Diagnostics,

    allocator: ResourceAllocator<D>,
    upload: UploadContext,
    pipeline_cache: PipelineCache,

    targets: SwapchainTargets,
    render_pass: vk::RenderPass,
    offscreen_pass: vk::RenderPass,

    frame_binder: DescriptorBinder,
    scene_binder: DescriptorBinder,
    frames: FrameRing,
    scene: Vec<SceneSlot>,
    scene_uniforms: SceneUniforms,

    default_sampler: vk::Sampler,
    default_texture: TextureHandle,

    user_buffers: SecondaryMap<BufferHandle, ()>,
    textures: SlotMap<TextureHandle, Texture>,
    shaders: SlotMap<ShaderHandle, ShaderProgram>,
    materials: SlotMap<MaterialHandle, Material>,
    meshes: SlotMap<MeshHandle, Mesh>,
    objects: SlotMap<RenderObjectHandle, RenderObject>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferEntry>,
    queued_draws: Vec<QueuedDraw>,

    suspended: bool,
    shut_down: bool,
}

impl<D: GpuDevice> Renderer<D> {
    /// Create a renderer with a default diagnostics context
    pub fn new(device: D, config: RendererConfig, framebuffer_size: (u32, u32)) -> RenderResult<Self> {
        Self::with_diagnostics(device, config, framebuffer_size, Diagnostics::default())
    }

    /// Create a renderer reporting through `diagnostics`
    pub fn with_diagnostics(
        device: D,
        config: RendererConfig,
        framebuffer_size: (u32, u32),
        diagnostics: Diagnostics,
    ) -> RenderResult<Self> {
        config.validate()?;
        let (width, height) = framebuffer_size;
        log::info!("Initializing renderer '{}' at {}x{}", config.application_name, width, height);

        let mut allocator = ResourceAllocator::new();
        let pipeline_cache = PipelineCache::load(&device, &config.pipeline_cache)?;

        let mut targets = SwapchainTargets::new(&device, &mut allocator, vk::Extent2D { width, height })?;
        let depth_format = device.depth_format();
        let render_pass = device.create_render_pass(&render_pass_desc(targets.format(), depth_format, false))?;
        let offscreen_pass = device.create_render_pass(&render_pass_desc(targets.format(), depth_format, true))?;
        targets.create_framebuffers(&device, &allocator, render_pass)?;

        let upload = UploadContext::new(&device)?;

        let slots = config.frames_in_flight as u32;
        let frame_layout = DescriptorSetLayoutBuilder::new(FRAME_SET)
            .add_uniform_buffer(0, FrameUniforms::SIZE, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build();
        let mut frame_binder = DescriptorBinder::new(&device, &frame_layout, slots)?;
        let scene_layout = DescriptorSetLayoutBuilder::new(SCENE_SET)
            .add_uniform_buffer(0, SceneUniforms::SIZE, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .build();
        let mut scene_binder = DescriptorBinder::new(&device, &scene_layout, slots)?;

        let frames = FrameRing::new(&device, &mut allocator, &mut frame_binder, &diagnostics, config.frames_in_flight)?;

        let scene_uniforms = SceneUniforms::default();
        let mut scene = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            let buffer = allocator.create_buffer(
                &device,
                SceneUniforms::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?;
            allocator.write_buffer(&device, buffer, 0, bytemuck::bytes_of(&scene_uniforms))?;
            let set = scene_binder.allocate(&device, &diagnostics)?;
            scene_binder.bind_buffer(&device, set, 0, allocator.buffer(buffer)?.buffer, SceneUniforms::SIZE)?;
            scene.push(SceneSlot { buffer, set, dirty: false });
        }

        let default_sampler = device.create_sampler()?;

        let mut renderer = Self {
            device,
            config,
            diagnostics,
            allocator,
            upload,
            pipeline_cache,
            targets,
            render_pass,
            offscreen_pass,
            frame_binder,
            scene_binder,
            frames,
            scene,
            scene_uniforms,
            default_sampler,
            default_texture: TextureHandle::default(),
            user_buffers: SecondaryMap::new(),
            textures: SlotMap::with_key(),
            shaders: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            objects: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            queued_draws: Vec::new(),
            suspended: false,
            shut_down: false,
        };
        renderer.default_texture = renderer.create_texture(1, 1, &[255, 255, 255, 255])?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight",
            renderer.targets.image_count(),
            renderer.frames.len()
        );
        Ok(renderer)
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Create a buffer owned by the caller
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<BufferHandle> {
        let handle = self.allocator.create_buffer(&self.device, size, usage, location)?;
        self.user_buffers.insert(handle, ());
        Ok(handle)
    }

    /// Copy bytes into a host-visible buffer created with [`Self::create_buffer`]
    pub fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        if !self.user_buffers.contains_key(buffer) {
            return Err(RenderError::StaleHandle { kind: "buffer" });
        }
        self.allocator.write_buffer(&self.device, buffer, offset, data)
    }

    /// Vulkan buffer behind a handle
    pub fn raw_buffer(&self, buffer: BufferHandle) -> RenderResult<vk::Buffer> {
        Ok(self.allocator.buffer(buffer)?.buffer)
    }

    /// Destroy a buffer once no frame in flight can use it
    pub fn destroy_buffer(&mut self, buffer: BufferHandle) -> RenderResult<()> {
        self.user_buffers.remove(buffer).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        self.frames.defer(Deletion::Buffer(buffer))
    }

    // ========================================================================
    // Textures
    // ========================================================================

    /// Upload RGBA8 pixels into a sampled texture
    ///
    /// Blocks until the transfer has completed.
    pub fn create_texture(&mut self, width: u32, height: u32, rgba: &[u8]) -> RenderResult<TextureHandle> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(RenderError::InvalidArgument(format!(
                "{}x{} RGBA texture needs {} bytes, got {}",
                width, height, expected, rgba.len()
            )));
        }

        let image = self.allocator.create_image(&self.device, &ImageSpec::texture(width, height, TEXTURE_FORMAT))?;
        let staging = match self.staging_buffer(rgba) {
            Ok(staging) => staging,
            Err(e) => {
                self.allocator.destroy_image(&self.device, image)?;
                return Err(e);
            }
        };

        let result = self.copy_to_image(staging, image, vk::Extent2D { width, height });
        self.allocator.destroy_buffer(&self.device, staging)?;
        if let Err(e) = result {
            self.allocator.destroy_image(&self.device, image)?;
            return Err(e);
        }

        log::debug!("Uploaded {}x{} texture", width, height);
        Ok(self.textures.insert(Texture {
            image,
            sampler: self.default_sampler,
            source: TextureSource::Uploaded,
        }))
    }

    /// 1x1 white texture bound to every sampled slot of a new material
    pub fn default_texture(&self) -> TextureHandle {
        self.default_texture
    }

    /// View and sampler of a texture, for display outside the renderer
    pub fn texture_binding(&self, texture: TextureHandle) -> RenderResult<TextureBinding> {
        let texture = self.textures.get(texture).ok_or(RenderError::StaleHandle { kind: "texture" })?;
        Ok(TextureBinding {
            view: self.allocator.image(texture.image)?.view,
            sampler: texture.sampler,
        })
    }

    /// Destroy a texture once no frame in flight can use it
    ///
    /// Textures still bound to a material, the default texture and
    /// framebuffer textures cannot be destroyed here.
    pub fn destroy_texture(&mut self, texture: TextureHandle) -> RenderResult<()> {
        let entry = self.textures.get(texture).ok_or(RenderError::StaleHandle { kind: "texture" })?;
        if texture == self.default_texture {
            return Err(RenderError::invalid_operation("the default texture is owned by the renderer"));
        }
        if let TextureSource::Framebuffer(_) = entry.source {
            return Err(RenderError::invalid_operation("framebuffer textures are destroyed with their framebuffer"));
        }
        if self.materials.values().any(|material| material.uses_texture(texture)) {
            return Err(RenderError::invalid_operation("texture is still bound to a material"));
        }
        let image = entry.image;
        self.textures.remove(texture);
        self.frames.defer(Deletion::Image(image))
    }

    // ========================================================================
    // Shaders and materials
    // ========================================================================

    /// Build a shader from a SPIR-V vertex/fragment pair
    ///
    /// The material layout is reflected once here and fixed afterwards.
    pub fn create_shader(&mut self, vertex: &[u32], fragment: &[u32]) -> RenderResult<ShaderHandle> {
        let target = ProgramTarget {
            render_pass: self.render_pass,
            frame_layout: self.frame_binder.layout(),
            scene_layout: self.scene_binder.layout(),
            cache: self.pipeline_cache.handle(),
            sets_per_pool: self.config.descriptors.sets_per_pool,
            diagnostics: &self.diagnostics,
        };
        let program = create_shader_program(&self.device, &mut self.allocator, &target, vertex, fragment)?;
        log::debug!(
            "Created shader with {} material bindings and {} push constant ranges",
            program.layout.bindings.len(),
            program.layout.push_constants.len()
        );
        Ok(self.shaders.insert(program))
    }

    /// Reflected material layout of a shader
    pub fn shader_layout(&self, shader: ShaderHandle) -> RenderResult<&ShaderBindingLayout> {
        Ok(&self.shader(shader)?.layout)
    }

    /// Destroy a shader once no frame in flight can use it
    pub fn destroy_shader(&mut self, shader: ShaderHandle) -> RenderResult<()> {
        self.shader(shader)?;
        if self.materials.values().any(|material| material.shader == shader) {
            return Err(RenderError::invalid_operation("shader is still used by a material"));
        }
        let Some(mut program) = self.shaders.remove(shader) else {
            return Err(RenderError::StaleHandle { kind: "shader" });
        };

        let mut queue = DeletionQueue::new();
        queue.push(Deletion::Pipeline(program.pipeline));
        queue.push(Deletion::PipelineLayout(program.pipeline_layout));
        queue.push(Deletion::ShaderModule(program.vertex_module));
        queue.push(Deletion::ShaderModule(program.fragment_module));
        if let Some(binder) = program.binder.as_mut() {
            binder.retire(&mut queue);
        }
        self.frames.defer_all(&mut queue)
    }

    /// Create a material for a shader
    ///
    /// Every uniform slot gets a zeroed buffer of its reflected size and
    /// every sampled slot starts on the default texture.
    pub fn create_material(&mut self, shader: ShaderHandle) -> RenderResult<MaterialHandle> {
        let default_view = self.texture_binding(self.default_texture)?.view;
        let program = self.shaders.get_mut(shader).ok_or(RenderError::StaleHandle { kind: "shader" })?;
        let Some(binder) = program.binder.as_mut() else {
            return Ok(self.materials.insert(Material {
                shader,
                set: None,
                uniforms: Vec::new(),
                textures: Vec::new(),
            }));
        };

        let set = binder.allocate(&self.device, &self.diagnostics)?;
        let defaults = MaterialDefaults {
            texture: self.default_texture,
            view: default_view,
            sampler: self.default_sampler,
        };
        let mut created = DeletionQueue::new();
        match fill_material(&self.device, &mut self.allocator, binder, set, &defaults, &mut created) {
            Ok((uniforms, textures)) => Ok(self.materials.insert(Material { shader, set: Some(set), uniforms, textures })),
            Err(e) => {
                // The set stays in the append-only pool; only the buffers go
                if let Err(cleanup) = created.flush(&self.device, &mut self.allocator) {
                    log::error!("Cleanup after failed material creation: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Descriptor set holding a material's bindings
    ///
    /// `None` when the shader declares no material resources.
    pub fn material_descriptor_set(&self, material: MaterialHandle) -> RenderResult<Option<vk::DescriptorSet>> {
        Ok(self.material(material)?.set)
    }

    /// Bind a texture to a sampled slot of a material
    ///
    /// The material keeps its descriptor set; only the binding is rewritten.
    /// Waits for the GPU so no frame in flight reads the set during the write.
    pub fn set_material_texture(&mut self, material: MaterialHandle, slot: u32, texture: TextureHandle) -> RenderResult<()> {
        if self.frames.active().is_some() {
            return Err(RenderError::invalid_operation("material bindings cannot change while a frame is recording"));
        }
        let binding = self.texture_binding(texture)?;
        let entry = self.materials.get(material).ok_or(RenderError::StaleHandle { kind: "material" })?;
        let program = self.shaders.get(entry.shader).ok_or(RenderError::StaleHandle { kind: "shader" })?;
        let (Some(binder), Some(set)) = (program.binder.as_ref(), entry.set) else {
            return Err(RenderError::UnknownBinding { slot });
        };
        binder.binding(slot, BindingKind::SampledImage)?;

        self.device.wait_idle()?;
        binder.bind_image(&self.device, set, slot, binding.view, binding.sampler)?;

        if let Some(entry) = self.materials.get_mut(material) {
            match entry.textures.iter_mut().find(|(bound_slot, _)| *bound_slot == slot) {
                Some(bound) => bound.1 = texture,
                None => entry.textures.push((slot, texture)),
            }
        }
        Ok(())
    }

    /// Write a material's uniform block at `slot`
    ///
    /// `data` must be exactly the reflected block size. Not allowed while a
    /// frame is recording; waits for every submitted frame before writing.
    pub fn upload_material_uniform(&mut self, material: MaterialHandle, slot: u32, data: &[u8]) -> RenderResult<()> {
        let entry = self.materials.get(material).ok_or(RenderError::StaleHandle { kind: "material" })?;
        let uniform = match entry.uniform(slot) {
            Some(uniform) => *uniform,
            None => {
                let program = self.shaders.get(entry.shader).ok_or(RenderError::StaleHandle { kind: "shader" })?;
                return Err(match program.binder.as_ref() {
                    Some(binder) => binder.binding(slot, BindingKind::UniformBuffer).err(),
                    None => None,
                }
                .unwrap_or(RenderError::UnknownBinding { slot }));
            }
        };
        if data.len() as u64 != uniform.size {
            return Err(RenderError::UniformSizeMismatch { slot, expected: uniform.size, actual: data.len() as u64 });
        }
        if self.frames.active().is_some() {
            return Err(RenderError::invalid_operation("material uniforms cannot change while a frame is recording"));
        }
        // One buffer per material, so every submitted frame must be done reading it
        self.frames.wait_in_flight(&self.device)?;
        self.allocator.write_buffer(&self.device, uniform.buffer, 0, data)
    }

    /// Destroy a material once no frame in flight can use it
    ///
    /// Its descriptor set stays allocated in the shader's pool.
    pub fn destroy_material(&mut self, material: MaterialHandle) -> RenderResult<()> {
        self.material(material)?;
        if self.objects.values().any(|object| object.material == material) {
            return Err(RenderError::invalid_operation("material is still used by a render object"));
        }
        let Some(entry) = self.materials.remove(material) else {
            return Err(RenderError::StaleHandle { kind: "material" });
        };
        let mut queue = DeletionQueue::new();
        queue.extend(entry.uniforms.iter().map(|uniform| Deletion::Buffer(uniform.buffer)));
        self.frames.defer_all(&mut queue)
    }

    // ========================================================================
    // Meshes and render objects
    // ========================================================================

    /// Upload vertex and index data into device-local buffers
    ///
    /// Blocks until the transfer has completed.
    pub fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> RenderResult<MeshHandle> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::InvalidArgument("meshes need vertices and indices".to_string()));
        }
        if let Some(index) = indices.iter().find(|index| **index as usize >= vertices.len()) {
            return Err(RenderError::InvalidArgument(format!(
                "index {} out of range for {} vertices", index, vertices.len()
            )));
        }

        let vertex_buffer = self.upload_buffer(bytemuck::cast_slice(vertices), vk::BufferUsageFlags::VERTEX_BUFFER)?;
        let index_buffer = match self.upload_buffer(bytemuck::cast_slice(indices), vk::BufferUsageFlags::INDEX_BUFFER) {
            Ok(buffer) => buffer,
            Err(e) => {
                self.allocator.destroy_buffer(&self.device, vertex_buffer)?;
                return Err(e);
            }
        };

        log::debug!("Uploaded mesh: {} vertices, {} indices", vertices.len(), indices.len());
        Ok(self.meshes.insert(Mesh { vertex_buffer, index_buffer, index_count: indices.len() as u32 }))
    }

    /// Destroy a mesh once no frame in flight can use it
    pub fn destroy_mesh(&mut self, mesh: MeshHandle) -> RenderResult<()> {
        if !self.meshes.contains_key(mesh) {
            return Err(RenderError::StaleHandle { kind: "mesh" });
        }
        if self.objects.values().any(|object| object.mesh == mesh) {
            return Err(RenderError::invalid_operation("mesh is still used by a render object"));
        }
        let Some(entry) = self.meshes.remove(mesh) else {
            return Err(RenderError::StaleHandle { kind: "mesh" });
        };
        let mut queue = DeletionQueue::new();
        queue.push(Deletion::Buffer(entry.vertex_buffer));
        queue.push(Deletion::Buffer(entry.index_buffer));
        self.frames.defer_all(&mut queue)
    }

    /// Pair a mesh with a material
    pub fn create_render_object(&mut self, mesh: MeshHandle, material: MaterialHandle) -> RenderResult<RenderObjectHandle> {
        if !self.meshes.contains_key(mesh) {
            return Err(RenderError::StaleHandle { kind: "mesh" });
        }
        self.material(material)?;
        Ok(self.objects.insert(RenderObject { mesh, material }))
    }

    /// Remove a render object; its mesh and material are untouched
    pub fn destroy_render_object(&mut self, object: RenderObjectHandle) -> RenderResult<()> {
        self.objects.remove(object).ok_or(RenderError::StaleHandle { kind: "render object" })?;
        self.queued_draws.retain(|draw| draw.object != object);
        Ok(())
    }

    // ========================================================================
    // Offscreen framebuffers
    // ========================================================================

    /// Create an offscreen color + depth target
    ///
    /// Its color attachment is exposed as a texture that stays valid across
    /// [`Self::resize_framebuffer`].
    pub fn create_framebuffer(&mut self, width: u32, height: u32) -> RenderResult<FramebufferHandle> {
        let target = OffscreenFramebuffer::new(
            &self.device,
            &mut self.allocator,
            &self.upload,
            self.offscreen_pass,
            self.targets.format(),
            vk::Extent2D { width, height },
        )?;
        let color = target.color();
        let handle = self.framebuffers.insert(FramebufferEntry { target, texture: TextureHandle::default() });
        let texture = self.textures.insert(Texture {
            image: color,
            sampler: self.default_sampler,
            source: TextureSource::Framebuffer(handle),
        });
        if let Some(entry) = self.framebuffers.get_mut(handle) {
            entry.texture = texture;
        }
        Ok(handle)
    }

    /// Texture sampling a framebuffer's color attachment
    pub fn framebuffer_texture(&self, framebuffer: FramebufferHandle) -> RenderResult<TextureHandle> {
        Ok(self.framebuffer(framebuffer)?.texture)
    }

    /// Current size of a framebuffer
    pub fn framebuffer_extent(&self, framebuffer: FramebufferHandle) -> RenderResult<vk::Extent2D> {
        Ok(self.framebuffer(framebuffer)?.target.extent())
    }

    /// Recreate a framebuffer's attachments at a new size
    ///
    /// Waits for the GPU. Materials sampling the framebuffer are rebound to
    /// the new color image.
    pub fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> RenderResult<()> {
        if self.frames.active().is_some() {
            return Err(RenderError::invalid_operation("framebuffers cannot be resized while a frame is recording"));
        }
        let extent = vk::Extent2D { width, height };
        let entry = self.framebuffer(framebuffer)?;
        if entry.target.extent() == extent {
            return Ok(());
        }
        let texture = entry.texture;

        let replacement = OffscreenFramebuffer::new(
            &self.device,
            &mut self.allocator,
            &self.upload,
            self.offscreen_pass,
            self.targets.format(),
            extent,
        )?;
        self.device.wait_idle()?;

        let color = replacement.color();
        let Some(entry) = self.framebuffers.get_mut(framebuffer) else {
            return Err(RenderError::StaleHandle { kind: "framebuffer" });
        };
        let previous = std::mem::replace(&mut entry.target, replacement);
        previous.destroy(&self.device, &mut self.allocator)?;
        if let Some(entry) = self.textures.get_mut(texture) {
            entry.image = color;
        }

        self.rebind_texture(texture)?;
        log::debug!("Resized framebuffer to {}x{}", width, height);
        Ok(())
    }

    /// Draw a render object into a framebuffer during the next frame
    ///
    /// Queued draws are recorded before the main pass of the next
    /// [`Self::begin_frame`], in the order they were queued.
    pub fn queue_framebuffer_draw(
        &mut self,
        framebuffer: FramebufferHandle,
        object: RenderObjectHandle,
        push_constants: &[u8],
    ) -> RenderResult<()> {
        self.framebuffer(framebuffer)?;
        self.prepare_draw(object, push_constants)?;
        self.queued_draws.push(QueuedDraw { framebuffer, object, push_constants: push_constants.to_vec() });
        Ok(())
    }

    /// Destroy a framebuffer and its texture once no frame in flight can use them
    pub fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) -> RenderResult<()> {
        let texture = self.framebuffer(framebuffer)?.texture;
        if self.materials.values().any(|material| material.uses_texture(texture)) {
            return Err(RenderError::invalid_operation("framebuffer texture is still bound to a material"));
        }
        let Some(entry) = self.framebuffers.remove(framebuffer) else {
            return Err(RenderError::StaleHandle { kind: "framebuffer" });
        };
        self.textures.remove(entry.texture);
        self.queued_draws.retain(|draw| draw.framebuffer != framebuffer);

        let mut queue = DeletionQueue::new();
        entry.target.retire(&mut queue);
        self.frames.defer_all(&mut queue)
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Start a frame
    ///
    /// Returns `None` when no frame can be rendered: the window is minimized
    /// or the swapchain was out of date and has been rebuilt.
    pub fn begin_frame(&mut self) -> RenderResult<Option<ActiveFrame>> {
        if self.shut_down {
            return Err(RenderError::invalid_operation("renderer has been shut down"));
        }
        if self.suspended {
            return Ok(None);
        }
        let result = self.begin_frame_inner();
        self.report(result)
    }

    fn begin_frame_inner(&mut self) -> RenderResult<Option<ActiveFrame>> {
        let active = match self.frames.acquire(&self.device, &mut self.allocator, self.targets.swapchain())? {
            FrameBegin::Ready(active) => active,
            FrameBegin::Skip => {
                self.diagnostics.record(DiagnosticEvent::FrameSkipped { frame: self.frames.frame_number() });
                self.recreate_swapchain(self.targets.extent())?;
                return Ok(None);
            }
        };

        self.flush_scene_uniforms(active.slot)?;
        self.record_offscreen_passes(active)?;

        let framebuffer = self.targets.framebuffer(active.image_index).ok_or_else(|| {
            RenderError::invalid_operation(format!("no framebuffer for swapchain image {}", active.image_index))
        })?;
        let clear_values = self.clear_values();
        self.frames.begin_main_pass(&self.device, self.render_pass, framebuffer, self.targets.extent(), &clear_values)?;
        Ok(Some(active))
    }

    /// Write this frame's set 0 uniforms
    pub fn update_frame_uniforms(&mut self, uniforms: &FrameUniforms) -> RenderResult<()> {
        self.frames.write_uniforms(&self.device, &mut self.allocator, uniforms)
    }

    /// Replace the set 1 scene uniforms
    ///
    /// Each frame slot picks up the new values the next time it starts.
    pub fn update_scene_uniforms(&mut self, uniforms: &SceneUniforms) -> RenderResult<()> {
        self.scene_uniforms = *uniforms;
        for slot in &mut self.scene {
            slot.dirty = true;
        }
        match self.frames.active() {
            Some(active) => self.flush_scene_uniforms(active.slot),
            None => Ok(()),
        }
    }

    /// Record a draw of a render object into the main pass
    ///
    /// `push_constants` are written from offset 0 to every stage whose
    /// range they overlap.
    pub fn draw(&mut self, object: RenderObjectHandle, push_constants: &[u8]) -> RenderResult<()> {
        let active = self.frames.active().ok_or_else(|| RenderError::invalid_operation("draw outside a frame"))?;
        let call = self.prepare_draw(object, push_constants)?;
        self.record_draw(active, &call);
        Ok(())
    }

    /// Submit and present the frame
    pub fn end_frame(&mut self) -> RenderResult<()> {
        let result = self.frames.end_frame(&self.device, self.targets.swapchain()).map(|_| ());
        self.report(result)
    }

    /// React to a new window framebuffer size
    ///
    /// A zero size suspends rendering until a non-zero size arrives.
    /// Otherwise waits for the GPU and rebuilds the swapchain targets.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if self.frames.active().is_some() {
            return Err(RenderError::invalid_operation("resize while a frame is recording"));
        }
        if width == 0 || height == 0 {
            log::debug!("Framebuffer is {}x{}, suspending rendering", width, height);
            self.suspended = true;
            return Ok(());
        }
        self.suspended = false;
        let result = self.recreate_swapchain(vk::Extent2D { width, height });
        self.report(result)
    }

    /// Change the main pass clear color
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.config.clear_color = color;
    }

    /// Slot of the frame being recorded, or of the next frame
    pub fn frame_index(&self) -> usize {
        self.frames.slot_index()
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Frame being recorded, if any
    pub fn active_frame(&self) -> Option<ActiveFrame> {
        self.frames.active()
    }

    /// Current swapchain size
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.targets.extent()
    }

    /// Buffer and image counts of the allocator
    pub fn allocation_stats(&self) -> AllocationStats {
        self.allocator.stats()
    }

    /// Backend device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Diagnostics context
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Active configuration
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Release every GPU object
    ///
    /// Waits for the GPU, persists the pipeline cache and flushes every
    /// deletion queue. Called by `Drop` when not called explicitly; calling
    /// it twice does nothing.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        log::info!("Shutting down renderer after {} frames", self.frames.frame_number());

        let mut first_error = self.device.wait_idle().err();
        if let Err(e) = self.pipeline_cache.save(&self.device) {
            log::warn!("Pipeline cache not saved: {}", e);
        }
        if let Err(e) = self.frames.flush_all(&self.device, &mut self.allocator) {
            first_error.get_or_insert(e);
        }

        let mut queue = DeletionQueue::new();
        self.queued_draws.clear();
        self.objects.clear();
        for (_, material) in self.materials.drain() {
            queue.extend(material.uniforms.iter().map(|uniform| Deletion::Buffer(uniform.buffer)));
        }
        for (_, mesh) in self.meshes.drain() {
            queue.push(Deletion::Buffer(mesh.vertex_buffer));
            queue.push(Deletion::Buffer(mesh.index_buffer));
        }
        for (_, mut program) in self.shaders.drain() {
            queue.push(Deletion::Pipeline(program.pipeline));
            queue.push(Deletion::PipelineLayout(program.pipeline_layout));
            queue.push(Deletion::ShaderModule(program.vertex_module));
            queue.push(Deletion::ShaderModule(program.fragment_module));
            if let Some(binder) = program.binder.as_mut() {
                binder.retire(&mut queue);
            }
        }
        for (_, entry) in self.framebuffers.drain() {
            entry.target.retire(&mut queue);
        }
        for (_, texture) in self.textures.drain() {
            if texture.source == TextureSource::Uploaded {
                queue.push(Deletion::Image(texture.image));
            }
        }
        queue.extend(self.user_buffers.drain().map(|(buffer, _)| Deletion::Buffer(buffer)));
        queue.extend(self.scene.drain(..).map(|slot| Deletion::Buffer(slot.buffer)));
        queue.push(Deletion::Sampler(std::mem::replace(&mut self.default_sampler, vk::Sampler::null())));

        self.frames.retire(&mut queue);
        self.scene_binder.retire(&mut queue);
        self.frame_binder.retire(&mut queue);
        self.upload.retire(&mut queue);
        self.targets.retire(&mut queue);
        queue.push(Deletion::RenderPass(std::mem::replace(&mut self.render_pass, vk::RenderPass::null())));
        queue.push(Deletion::RenderPass(std::mem::replace(&mut self.offscreen_pass, vk::RenderPass::null())));
        self.pipeline_cache.retire(&mut queue);

        if let Err(e) = queue.flush(&self.device, &mut self.allocator) {
            first_error.get_or_insert(e);
        }
        let leaked = self.allocator.destroy_all(&self.device);
        if leaked > 0 {
            log::warn!("{} allocations were still alive at shutdown", leaked);
        }

        let stats = self.allocator.stats();
        log::info!(
            "Renderer shut down: {} buffers and {} images created, all released",
            stats.buffers_created, stats.images_created
        );
        match first_error {
            Some(e) => self.report(Err(e)),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn shader(&self, shader: ShaderHandle) -> RenderResult<&ShaderProgram> {
        self.shaders.get(shader).ok_or(RenderError::StaleHandle { kind: "shader" })
    }

    fn material(&self, material: MaterialHandle) -> RenderResult<&Material> {
        self.materials.get(material).ok_or(RenderError::StaleHandle { kind: "material" })
    }

    fn framebuffer(&self, framebuffer: FramebufferHandle) -> RenderResult<&FramebufferEntry> {
        self.framebuffers.get(framebuffer).ok_or(RenderError::StaleHandle { kind: "framebuffer" })
    }

    /// Record fatal errors before handing them back
    fn report<T>(&self, result: RenderResult<T>) -> RenderResult<T> {
        if let Err(e) = &result {
            self.diagnostics.record(DiagnosticEvent::Fatal { message: e.to_string() });
        }
        result
    }

    fn clear_values(&self) -> [vk::ClearValue; 2] {
        [
            vk::ClearValue { color: vk::ClearColorValue { float32: self.config.clear_color } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: self.config.clear_depth, stencil: 0 },
            },
        ]
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.targets.rebuild(&self.device, &mut self.allocator, extent, self.render_pass)?;
        let extent = self.targets.extent();
        self.diagnostics.record(DiagnosticEvent::SwapchainRebuilt { width: extent.width, height: extent.height });
        Ok(())
    }

    fn flush_scene_uniforms(&mut self, slot: usize) -> RenderResult<()> {
        let Some(scene) = self.scene.get_mut(slot) else {
            return Ok(());
        };
        if scene.dirty {
            self.allocator.write_buffer(&self.device, scene.buffer, 0, bytemuck::bytes_of(&self.scene_uniforms))?;
            scene.dirty = false;
        }
        Ok(())
    }

    /// Host-visible buffer holding `data`, for one transfer
    fn staging_buffer(&mut self, data: &[u8]) -> RenderResult<BufferHandle> {
        let staging = self.allocator.create_buffer(
            &self.device,
            data.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        if let Err(e) = self.allocator.write_buffer(&self.device, staging, 0, data) {
            self.allocator.destroy_buffer(&self.device, staging)?;
            return Err(e);
        }
        Ok(staging)
    }

    /// Device-local buffer filled through a staging copy
    fn upload_buffer(&mut self, data: &[u8], usage: vk::BufferUsageFlags) -> RenderResult<BufferHandle> {
        let size = data.len() as u64;
        let target = self.allocator.create_buffer(
            &self.device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )?;
        let staging = match self.staging_buffer(data) {
            Ok(staging) => staging,
            Err(e) => {
                self.allocator.destroy_buffer(&self.device, target)?;
                return Err(e);
            }
        };

        let src = self.allocator.buffer(staging)?.buffer;
        let dst = self.allocator.buffer(target)?.buffer;
        let result = self.upload.immediate_submit(&self.device, |device, cmd| {
            device.cmd_copy_buffer(cmd, src, dst, size);
            Ok(())
        });
        self.allocator.destroy_buffer(&self.device, staging)?;
        match result {
            Ok(()) => Ok(target),
            Err(e) => {
                self.allocator.destroy_buffer(&self.device, target)?;
                Err(e)
            }
        }
    }

    fn copy_to_image(&self, staging: BufferHandle, image: ImageHandle, extent: vk::Extent2D) -> RenderResult<()> {
        let src = self.allocator.buffer(staging)?.buffer;
        let dst = self.allocator.image(image)?.image;
        self.upload.immediate_submit(&self.device, |device, cmd| {
            device.cmd_transition_image(cmd, &ImageTransition {
                image: dst,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                aspect: vk::ImageAspectFlags::COLOR,
            });
            device.cmd_copy_buffer_to_image(cmd, src, dst, extent);
            device.cmd_transition_image(cmd, &ImageTransition {
                image: dst,
                old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                aspect: vk::ImageAspectFlags::COLOR,
            });
            Ok(())
        })
    }

    /// Point every material slot sampling `texture` at its current image
    fn rebind_texture(&self, texture: TextureHandle) -> RenderResult<()> {
        let binding = self.texture_binding(texture)?;
        for material in self.materials.values().filter(|material| material.uses_texture(texture)) {
            let (Some(set), Some(binder)) = (
                material.set,
                self.shaders.get(material.shader).and_then(|program| program.binder.as_ref()),
            ) else {
                continue;
            };
            for (slot, _) in material.textures.iter().filter(|(_, bound)| *bound == texture) {
                binder.bind_image(&self.device, set, *slot, binding.view, binding.sampler)?;
            }
        }
        Ok(())
    }

    fn prepare_draw<'a>(&self, object: RenderObjectHandle, push_constants: &'a [u8]) -> RenderResult<DrawCall<'a>> {
        let object = self.objects.get(object).ok_or(RenderError::StaleHandle { kind: "render object" })?;
        let mesh = self.meshes.get(object.mesh).ok_or(RenderError::StaleHandle { kind: "mesh" })?;
        let material = self.material(object.material)?;
        let program = self.shader(material.shader)?;

        let mut push_writes = Vec::new();
        if !push_constants.is_empty() {
            let size = push_constants.len() as u32;
            if size % 4 != 0 || size > program.layout.push_constant_size() {
                return Err(RenderError::InvalidArgument(format!(
                    "{} push constant bytes do not fit the {} byte block",
                    size,
                    program.layout.push_constant_size()
                )));
            }
            push_writes = program.layout.push_constant_writes(0, size)?;
            if push_writes.is_empty() {
                return Err(RenderError::InvalidArgument("push constants do not reach any stage".to_string()));
            }
        }

        Ok(DrawCall {
            pipeline: program.pipeline,
            pipeline_layout: program.pipeline_layout,
            material_set: material.set,
            push_writes,
            push_constants,
            vertex_buffer: self.allocator.buffer(mesh.vertex_buffer)?.buffer,
            index_buffer: self.allocator.buffer(mesh.index_buffer)?.buffer,
            index_count: mesh.index_count,
        })
    }

    fn record_draw(&self, active: ActiveFrame, call: &DrawCall<'_>) {
        let cmd = active.command_buffer;
        let frame_set = self.frames.frame(active.slot).map(|frame| frame.descriptor_set());
        let scene_set = self.scene.get(active.slot).map(|scene| scene.set);

        self.device.cmd_bind_pipeline(cmd, call.pipeline);
        if let (Some(frame_set), Some(scene_set)) = (frame_set, scene_set) {
            self.device.cmd_bind_descriptor_sets(cmd, call.pipeline_layout, FRAME_SET, &[frame_set, scene_set]);
        }
        if let Some(material_set) = call.material_set {
            self.device.cmd_bind_descriptor_sets(cmd, call.pipeline_layout, MATERIAL_SET, &[material_set]);
        }
        for write in &call.push_writes {
            let bytes = &call.push_constants[write.offset as usize..write.end() as usize];
            self.device.cmd_push_constants(cmd, call.pipeline_layout, write.stages, write.offset, bytes);
        }
        self.device.cmd_bind_vertex_buffer(cmd, call.vertex_buffer);
        self.device.cmd_bind_index_buffer(cmd, call.index_buffer);
        self.device.cmd_draw_indexed(cmd, call.index_count);
    }

    fn record_offscreen_passes(&mut self, active: ActiveFrame) -> RenderResult<()> {
        if self.queued_draws.is_empty() {
            return Ok(());
        }
        let queued = std::mem::take(&mut self.queued_draws);

        let mut order: Vec<FramebufferHandle> = Vec::new();
        for draw in &queued {
            if !order.contains(&draw.framebuffer) {
                order.push(draw.framebuffer);
            }
        }

        let clear_values = self.clear_values();
        for handle in order {
            let Ok(entry) = self.framebuffer(handle) else {
                continue;
            };
            let (framebuffer, extent) = (entry.target.framebuffer, entry.target.extent());
            self.device.cmd_begin_render_pass(active.command_buffer, self.offscreen_pass, framebuffer, extent, &clear_values);
            self.device.cmd_set_viewport_and_scissor(active.command_buffer, extent);
            for draw in queued.iter().filter(|draw| draw.framebuffer == handle) {
                match self.prepare_draw(draw.object, &draw.push_constants) {
                    Ok(call) => self.record_draw(active, &call),
                    Err(e) => log::warn!("Dropping queued framebuffer draw: {}", e),
                }
            }
            self.device.cmd_end_render_pass(active.command_buffer);
        }
        Ok(())
    }
}

struct MaterialDefaults {
    texture: TextureHandle,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

/// Zeroed uniform buffers and default textures for a new material set
///
/// Every buffer is pushed to `created` as soon as it exists.
fn fill_material<D: GpuDevice>(
    device: &D,
    allocator: &mut ResourceAllocator<D>,
    binder: &DescriptorBinder,
    set: vk::DescriptorSet,
    defaults: &MaterialDefaults,
    created: &mut DeletionQueue,
) -> RenderResult<(Vec<MaterialUniform>, Vec<(u32, TextureHandle)>)> {
    let mut uniforms: Vec<MaterialUniform> = Vec::new();
    let mut textures = Vec::new();
    for binding in binder.bindings() {
        match binding.kind {
            BindingKind::UniformBuffer => {
                let buffer = allocator.create_buffer(
                    device,
                    binding.size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                )?;
                created.push(Deletion::Buffer(buffer));
                uniforms.push(MaterialUniform { slot: binding.slot, buffer, size: binding.size });
            }
            BindingKind::SampledImage => textures.push((binding.slot, defaults.texture)),
        }
    }

    for uniform in &uniforms {
        let size = usize::try_from(uniform.size)
            .map_err(|_| RenderError::InvalidArgument(format!("uniform block of {} bytes", uniform.size)))?;
        allocator.write_buffer(device, uniform.buffer, 0, &vec![0; size])?;
        let raw = allocator.buffer(uniform.buffer)?.buffer;
        binder.bind_buffer(device, set, uniform.slot, raw, uniform.size)?;
    }
    for (slot, _) in &textures {
        binder.bind_image(device, set, *slot, defaults.view, defaults.sampler)?;
    }
    Ok((uniforms, textures))
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("Renderer shutdown failed: {}", e);
        }
    }
}
