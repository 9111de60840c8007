//! Device trait and the descriptor structs passed through it

use ash::vk;

use super::RenderResult;

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local memory, not mappable
    GpuOnly,
    /// Host-visible, coherent memory written by the CPU every frame
    CpuToGpu,
    /// Host-visible memory read back by the CPU
    GpuToCpu,
}

impl MemoryLocation {
    /// Whether the CPU can map this memory
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::GpuOnly)
    }
}

/// One queue submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitInfo {
    /// Recorded command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore waited on before the given stage
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    /// Semaphore signaled when the work completes
    pub signal: Option<vk::Semaphore>,
    /// Fence signaled when the work completes
    pub fence: vk::Fence,
}

/// Swapchain created by the device
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    /// Swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Presentable images owned by the swapchain
    pub images: Vec<vk::Image>,
    /// Color format of the images
    pub format: vk::Format,
    /// Actual extent chosen for the surface
    pub extent: vk::Extent2D,
}

/// Result of acquiring a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready to be rendered into
    Acquired {
        /// Index into the swapchain images
        image_index: u32,
        /// The swapchain still works but no longer matches the surface
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface
    OutOfDate,
}

/// Result of presenting a swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation
    Presented,
    /// The swapchain is out of date or suboptimal
    OutOfDate,
}

/// Single-subpass render pass with color and depth attachments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDesc {
    /// Color attachment format
    pub color_format: vk::Format,
    /// Depth attachment format
    pub depth_format: vk::Format,
    /// Layout of the color attachment after the pass
    pub final_color_layout: vk::ImageLayout,
}

/// Graphics pipeline over a vertex/fragment pair
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc<'a> {
    /// Vertex stage module
    pub vertex_module: vk::ShaderModule,
    /// Fragment stage module
    pub fragment_module: vk::ShaderModule,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline draws into
    pub render_pass: vk::RenderPass,
    /// Pipeline cache, null when caching is disabled
    pub cache: vk::PipelineCache,
    /// Bytes per vertex
    pub vertex_stride: u32,
    /// Vertex attributes in binding 0
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    /// Whether depth testing and writes are enabled
    pub depth_test: bool,
}

/// Layout transition of a single-mip color or depth image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransition {
    /// Image to transition
    pub image: vk::Image,
    /// Current layout
    pub old_layout: vk::ImageLayout,
    /// Target layout
    pub new_layout: vk::ImageLayout,
    /// Aspect of the subresource range
    pub aspect: vk::ImageAspectFlags,
}

/// Device operations used by the render core
///
/// Methods take `&self`; implementations own the device handles and do their
/// own bookkeeping. Destruction is infallible at this level, as in Vulkan.
/// Command-recording methods never fail; errors surface at submission.
pub trait GpuDevice {
    /// Memory allocation backing a buffer or image
    type Allocation;

    // Memory

    /// Create a buffer and bind memory for it
    fn create_buffer(&self, info: &vk::BufferCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Buffer, Self::Allocation)>;
    /// Destroy a buffer and free its memory
    fn destroy_buffer(&self, buffer: vk::Buffer, allocation: Self::Allocation);
    /// Create an image and bind memory for it
    fn create_image(&self, info: &vk::ImageCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Image, Self::Allocation)>;
    /// Destroy an image and free its memory
    fn destroy_image(&self, image: vk::Image, allocation: Self::Allocation);
    /// Copy bytes into host-visible memory
    fn write_allocation(&self, allocation: &mut Self::Allocation, offset: u64, data: &[u8]) -> RenderResult<()>;

    // Views and samplers

    /// Create a 2D view over the first mip and layer
    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> RenderResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a linear, repeating sampler
    fn create_sampler(&self) -> RenderResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Synchronization

    /// Create a fence, optionally already signaled
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until the fence is signaled, without timeout
    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    /// Return a fence to the unsignaled state
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    /// Query a fence without blocking
    fn fence_signaled(&self, fence: vk::Fence) -> RenderResult<bool>;
    /// Create a binary semaphore
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // Command buffers

    /// Create a resettable command pool on the graphics queue family
    fn create_command_pool(&self) -> RenderResult<vk::CommandPool>;
    /// Destroy a command pool and its command buffers
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate one primary command buffer
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer>;
    /// Reset a command buffer for re-recording
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    /// Begin recording
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, one_time_submit: bool) -> RenderResult<()>;
    /// Finish recording
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;

    // Recording

    /// Begin a render pass over the full framebuffer
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    );
    /// End the current render pass
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    /// Set viewport and scissor to cover the extent
    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    /// Bind descriptor sets starting at `first_set`
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    );
    /// Update push constants
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    /// Draw one indexed instance
    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32);
    /// Copy `size` bytes between buffers
    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64);
    /// Copy tightly packed texels into a color image in `TRANSFER_DST_OPTIMAL`
    fn cmd_copy_buffer_to_image(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D);
    /// Insert a layout transition barrier
    fn cmd_transition_image(&self, command_buffer: vk::CommandBuffer, transition: &ImageTransition);

    // Submission

    /// Submit one command buffer to the graphics queue
    fn queue_submit(&self, submit: &SubmitInfo) -> RenderResult<()>;

    // Presentation

    /// Create a swapchain for the surface, retiring `old`
    fn create_swapchain(&self, extent: vk::Extent2D, old: vk::SwapchainKHR) -> RenderResult<SwapchainInfo>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Acquire the next image, signaling `semaphore` when it is ready
    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome>;
    /// Present an image after `wait` is signaled
    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome>;

    // Render targets

    /// Create a render pass
    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    /// Create a framebuffer over the attachments
    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> RenderResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Descriptors

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> RenderResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a descriptor pool
    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> RenderResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate one set; an exhausted pool reports `ERROR_OUT_OF_POOL_MEMORY`
    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet>;
    /// Point a uniform buffer binding at `range` bytes of a buffer
    fn write_buffer_descriptor(&self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer, range: u64);
    /// Point a combined image sampler binding at a view and sampler
    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler);

    // Pipelines

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> RenderResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a pipeline layout
    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constant_ranges: &[vk::PushConstantRange]) -> RenderResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create a graphics pipeline
    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    /// Create a pipeline cache seeded with a previous blob
    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RenderResult<vk::PipelineCache>;
    /// Read back the cache blob
    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RenderResult<Vec<u8>>;
    /// Destroy a pipeline cache
    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache);

    // Device

    /// Block until all queues are idle
    fn wait_idle(&self) -> RenderResult<()>;
    /// Depth attachment format supported by the device
    fn depth_format(&self) -> vk::Format;
}
