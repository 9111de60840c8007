//! Headless null device
//!
//! Mints opaque handles, simulates fence and semaphore state and counts every
//! object it creates and destroys. Misuse that the validation layers would
//! catch on real hardware (resetting an in-flight command buffer, destroying
//! an object twice, presenting without a signaled semaphore) is recorded as a
//! violation or returned as an error, so tests can assert the render core
//! never does it.

use std::cell::RefCell;
use std::collections::HashMap;

use ash::vk::{self, Handle};

use super::device::{
    AcquireOutcome, GpuDevice, GraphicsPipelineDesc, ImageTransition, MemoryLocation,
    PresentOutcome, RenderPassDesc, SubmitInfo, SwapchainInfo,
};
use super::{RenderError, RenderResult};

/// Kinds of objects the headless device tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Buffer with memory
    Buffer,
    /// Image with memory (swapchain images are not counted)
    Image,
    /// Image view
    ImageView,
    /// Sampler
    Sampler,
    /// Fence
    Fence,
    /// Semaphore
    Semaphore,
    /// Command pool
    CommandPool,
    /// Render pass
    RenderPass,
    /// Framebuffer
    Framebuffer,
    /// Descriptor set layout
    DescriptorSetLayout,
    /// Descriptor pool
    DescriptorPool,
    /// Shader module
    ShaderModule,
    /// Pipeline layout
    PipelineLayout,
    /// Graphics pipeline
    Pipeline,
    /// Pipeline cache
    PipelineCache,
    /// Swapchain
    Swapchain,
}

/// Memory handed out by the headless device
#[derive(Debug)]
pub struct HeadlessAllocation {
    resource: u64,
    size: u64,
    host_visible: bool,
}

/// Last write recorded for a descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform buffer write
    Buffer {
        /// Target buffer
        buffer: vk::Buffer,
        /// Bound range in bytes
        range: u64,
    },
    /// Combined image sampler write
    Image {
        /// Target view
        view: vk::ImageView,
        /// Target sampler
        sampler: vk::Sampler,
    },
}

/// Device calls kept in order for inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    /// Fence wait
    WaitFence(vk::Fence),
    /// Fence reset
    ResetFence(vk::Fence),
    /// Command buffer reset
    ResetCommandBuffer(vk::CommandBuffer),
    /// Render pass begin
    BeginRenderPass {
        /// Target framebuffer
        framebuffer: vk::Framebuffer,
        /// Render area
        extent: vk::Extent2D,
    },
    /// Descriptor set bind
    BindDescriptorSets {
        /// First set index
        first_set: u32,
        /// Number of sets bound
        count: u32,
    },
    /// Push constant update
    PushConstants {
        /// Stages the update is visible to
        stages: vk::ShaderStageFlags,
        /// Byte offset
        offset: u32,
        /// Byte count
        size: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Index count
        index_count: u32,
    },
    /// Queue submission
    Submit {
        /// Submitted command buffer
        command_buffer: vk::CommandBuffer,
        /// Fence signaled on completion
        fence: vk::Fence,
    },
    /// Image acquisition
    Acquire {
        /// Acquired index, `None` when out of date
        image_index: Option<u32>,
    },
    /// Presentation
    Present {
        /// Presented index
        image_index: u32,
    },
    /// Device idle wait
    WaitIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

#[derive(Debug, Default)]
struct CommandBufferState {
    recording: bool,
    in_flight: Option<u64>,
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug)]
struct SwapchainState {
    image_count: u32,
    next_image: u32,
}

#[derive(Debug)]
struct State {
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    created: HashMap<ObjectKind, u64>,
    destroyed: HashMap<ObjectKind, u64>,
    violations: Vec<String>,
    calls: Vec<DeviceCall>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    command_buffers: HashMap<u64, CommandBufferState>,
    descriptor_pools: HashMap<u64, PoolState>,
    descriptor_writes: HashMap<(u64, u32), DescriptorWrite>,
    descriptor_write_count: u64,
    swapchains: HashMap<u64, SwapchainState>,
    image_extents: HashMap<u64, vk::Extent3D>,
    framebuffer_extents: HashMap<u64, vk::Extent2D>,
    buffer_contents: HashMap<u64, Vec<u8>>,
    pipeline_caches: HashMap<u64, Vec<u8>>,
    push_constant_ranges: HashMap<u64, Vec<vk::PushConstantRange>>,
    pipeline_cache_seed: Option<Vec<u8>>,
    swapchain_image_count: u32,
    out_of_date_acquires: u32,
    out_of_date_presents: u32,
    failing_allocations: u32,
    failing_host_writes: u32,
}

/// Null device with simulated synchronization
#[derive(Debug)]
pub struct HeadlessDevice {
    state: RefCell<State>,
}

impl HeadlessDevice {
    /// Create a device whose swapchains hold three images
    pub fn new() -> Self {
        Self::with_swapchain_images(3)
    }

    /// Create a device whose swapchains hold `image_count` images
    pub fn with_swapchain_images(image_count: u32) -> Self {
        Self {
            state: RefCell::new(State {
                next_handle: 0x1000,
                live: HashMap::new(),
                created: HashMap::new(),
                destroyed: HashMap::new(),
                violations: Vec::new(),
                calls: Vec::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                command_buffers: HashMap::new(),
                descriptor_pools: HashMap::new(),
                descriptor_writes: HashMap::new(),
                descriptor_write_count: 0,
                swapchains: HashMap::new(),
                image_extents: HashMap::new(),
                framebuffer_extents: HashMap::new(),
                buffer_contents: HashMap::new(),
                pipeline_caches: HashMap::new(),
                push_constant_ranges: HashMap::new(),
                pipeline_cache_seed: None,
                swapchain_image_count: image_count.max(1),
                out_of_date_acquires: 0,
                out_of_date_presents: 0,
                failing_allocations: 0,
                failing_host_writes: 0,
            }),
        }
    }

    /// Objects of `kind` created and not yet destroyed
    pub fn live(&self, kind: ObjectKind) -> u64 {
        let state = self.state.borrow();
        let created = state.created.get(&kind).copied().unwrap_or(0);
        let destroyed = state.destroyed.get(&kind).copied().unwrap_or(0);
        created - destroyed
    }

    /// Objects of `kind` created so far
    pub fn created(&self, kind: ObjectKind) -> u64 {
        self.state.borrow().created.get(&kind).copied().unwrap_or(0)
    }

    /// Objects of `kind` destroyed so far
    pub fn destroyed(&self, kind: ObjectKind) -> u64 {
        self.state.borrow().destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Total objects still alive across every kind
    pub fn total_live(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Usage errors observed so far
    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Recorded calls in order
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.borrow().calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    /// Whether the fence is currently signaled
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence.as_raw()) == Some(&FenceState::Signaled)
    }

    /// Last write recorded for a descriptor binding
    pub fn descriptor_write(&self, set: vk::DescriptorSet, binding: u32) -> Option<DescriptorWrite> {
        self.state.borrow().descriptor_writes.get(&(set.as_raw(), binding)).copied()
    }

    /// Number of descriptor writes issued
    pub fn descriptor_write_count(&self) -> u64 {
        self.state.borrow().descriptor_write_count
    }

    /// Bytes written into a host-visible buffer
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state.borrow().buffer_contents.get(&buffer.as_raw()).cloned()
    }

    /// Extent of an image created through this device
    pub fn image_extent(&self, image: vk::Image) -> Option<vk::Extent3D> {
        self.state.borrow().image_extents.get(&image.as_raw()).copied()
    }

    /// Extent of a framebuffer created through this device
    pub fn framebuffer_extent(&self, framebuffer: vk::Framebuffer) -> Option<vk::Extent2D> {
        self.state.borrow().framebuffer_extents.get(&framebuffer.as_raw()).copied()
    }

    /// Data the most recent pipeline cache was seeded with
    pub fn pipeline_cache_seed(&self) -> Option<Vec<u8>> {
        self.state.borrow().pipeline_cache_seed.clone()
    }

    /// Make the next `count` acquisitions report out-of-date
    pub fn fail_acquires(&self, count: u32) {
        self.state.borrow_mut().out_of_date_acquires = count;
    }

    /// Make the next `count` presentations report out-of-date
    pub fn fail_presents(&self, count: u32) {
        self.state.borrow_mut().out_of_date_presents = count;
    }

    /// Make the next `count` buffer or image allocations fail
    pub fn fail_allocations(&self, count: u32) {
        self.state.borrow_mut().failing_allocations = count;
    }

    /// Make the next `count` host writes into mapped memory fail
    pub fn fail_host_writes(&self, count: u32) {
        self.state.borrow_mut().failing_host_writes = count;
    }

    fn mint<H: Handle>(&self, kind: ObjectKind) -> H {
        let mut state = self.state.borrow_mut();
        let raw = state.next_handle;
        state.next_handle += 1;
        state.live.insert(raw, kind);
        *state.created.entry(kind).or_insert(0) += 1;
        H::from_raw(raw)
    }

    fn retire<H: Handle>(&self, handle: H, kind: ObjectKind) -> bool {
        let raw = handle.as_raw();
        if raw == 0 {
            return false;
        }
        let mut state = self.state.borrow_mut();
        match state.live.remove(&raw) {
            Some(found) if found == kind => {
                *state.destroyed.entry(kind).or_insert(0) += 1;
                true
            }
            Some(found) => {
                state.live.insert(raw, found);
                state.violations.push(format!("{:?} {:#x} destroyed as {:?}", found, raw, kind));
                false
            }
            None => {
                state.violations.push(format!("{:?} {:#x} destroyed twice or never created", kind, raw));
                false
            }
        }
    }

    fn violation(&self, message: String) {
        log::warn!("[HEADLESS] {}", message);
        self.state.borrow_mut().violations.push(message);
    }

    fn record(&self, call: DeviceCall) {
        self.state.borrow_mut().calls.push(call);
    }

    fn take_allocation_failure(&self, size: u64) -> RenderResult<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_allocations > 0 {
            state.failing_allocations -= 1;
            return Err(RenderError::AllocationFailed {
                size,
                reason: "injected allocation failure".to_string(),
            });
        }
        Ok(())
    }
}

const PUSH_STAGES: [vk::ShaderStageFlags; 6] = [
    vk::ShaderStageFlags::VERTEX,
    vk::ShaderStageFlags::TESSELLATION_CONTROL,
    vk::ShaderStageFlags::TESSELLATION_EVALUATION,
    vk::ShaderStageFlags::GEOMETRY,
    vk::ShaderStageFlags::FRAGMENT,
    vk::ShaderStageFlags::COMPUTE,
];

/// Push constant updates the validation layers would reject
///
/// Every named stage needs one range holding the whole update, and every
/// range the update overlaps must have its stages named.
fn push_constant_misuse(
    ranges: &[vk::PushConstantRange],
    stages: vk::ShaderStageFlags,
    offset: u32,
    size: u32,
) -> Vec<String> {
    let end = u64::from(offset) + u64::from(size);
    let range_end = |range: &vk::PushConstantRange| u64::from(range.offset) + u64::from(range.size);
    let mut misuse = Vec::new();
    for stage in PUSH_STAGES.into_iter().filter(|stage| stages.contains(*stage)) {
        let covered = ranges.iter().any(|range| {
            range.stage_flags.contains(stage) && range.offset <= offset && end <= range_end(range)
        });
        if !covered {
            misuse.push(format!("push {:?} [{}, {}) is not inside one {:?} range", stages, offset, end, stage));
        }
    }
    for range in ranges {
        let overlaps = u64::from(range.offset) < end && u64::from(offset) < range_end(range);
        if overlaps && !stages.contains(range.stage_flags) {
            misuse.push(format!(
                "push {:?} [{}, {}) overlaps a {:?} range without naming its stages",
                stages, offset, end, range.stage_flags
            ));
        }
    }
    misuse
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    type Allocation = HeadlessAllocation;

    fn create_buffer(&self, info: &vk::BufferCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Buffer, HeadlessAllocation)> {
        self.take_allocation_failure(info.size)?;
        let buffer: vk::Buffer = self.mint(ObjectKind::Buffer);
        let host_visible = location.is_host_visible();
        if host_visible {
            let len = usize::try_from(info.size)
                .map_err(|_| RenderError::InvalidArgument(format!("buffer size {} exceeds address space", info.size)))?;
            self.state.borrow_mut().buffer_contents.insert(buffer.as_raw(), vec![0; len]);
        }
        Ok((buffer, HeadlessAllocation { resource: buffer.as_raw(), size: info.size, host_visible }))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, _allocation: HeadlessAllocation) {
        if self.retire(buffer, ObjectKind::Buffer) {
            self.state.borrow_mut().buffer_contents.remove(&buffer.as_raw());
        }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Image, HeadlessAllocation)> {
        let texels = u64::from(info.extent.width) * u64::from(info.extent.height) * u64::from(info.extent.depth);
        self.take_allocation_failure(texels)?;
        let image: vk::Image = self.mint(ObjectKind::Image);
        self.state.borrow_mut().image_extents.insert(image.as_raw(), info.extent);
        Ok((image, HeadlessAllocation {
            resource: image.as_raw(),
            size: texels,
            host_visible: location.is_host_visible(),
        }))
    }

    fn destroy_image(&self, image: vk::Image, _allocation: HeadlessAllocation) {
        if self.retire(image, ObjectKind::Image) {
            self.state.borrow_mut().image_extents.remove(&image.as_raw());
        }
    }

    fn write_allocation(&self, allocation: &mut HeadlessAllocation, offset: u64, data: &[u8]) -> RenderResult<()> {
        if !allocation.host_visible {
            return Err(RenderError::invalid_operation("allocation is not host visible"));
        }
        {
            let mut state = self.state.borrow_mut();
            if state.failing_host_writes > 0 {
                state.failing_host_writes -= 1;
                return Err(RenderError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED));
            }
        }
        let end = offset + data.len() as u64;
        if end > allocation.size {
            return Err(RenderError::InvalidArgument(format!(
                "write of {} bytes at {} exceeds allocation of {}", data.len(), offset, allocation.size
            )));
        }
        let mut state = self.state.borrow_mut();
        if let Some(contents) = state.buffer_contents.get_mut(&allocation.resource) {
            // Bounds were checked against the allocation size above
            let start = offset as usize;
            contents[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format, _aspect: vk::ImageAspectFlags) -> RenderResult<vk::ImageView> {
        if image == vk::Image::null() {
            return Err(RenderError::InvalidArgument("image view over a null image".to_string()));
        }
        Ok(self.mint(ObjectKind::ImageView))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.retire(view, ObjectKind::ImageView);
    }

    fn create_sampler(&self) -> RenderResult<vk::Sampler> {
        Ok(self.mint(ObjectKind::Sampler))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.retire(sampler, ObjectKind::Sampler);
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let fence: vk::Fence = self.mint(ObjectKind::Fence);
        let initial = if signaled { FenceState::Signaled } else { FenceState::Unsignaled };
        self.state.borrow_mut().fences.insert(fence.as_raw(), initial);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let pending = self.state.borrow().fences.get(&fence.as_raw()) == Some(&FenceState::Pending);
        if pending {
            self.violation(format!("fence {:#x} destroyed while in flight", fence.as_raw()));
        }
        if self.retire(fence, ObjectKind::Fence) {
            self.state.borrow_mut().fences.remove(&fence.as_raw());
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        self.record(DeviceCall::WaitFence(fence));
        let mut state = self.state.borrow_mut();
        match state.fences.get_mut(&fence.as_raw()) {
            Some(fence_state @ FenceState::Pending) => {
                *fence_state = FenceState::Signaled;
                Ok(())
            }
            Some(FenceState::Signaled) => Ok(()),
            // Nothing will ever signal it
            Some(FenceState::Unsignaled) => Err(RenderError::Api(vk::Result::TIMEOUT)),
            None => Err(RenderError::Api(vk::Result::ERROR_UNKNOWN)),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        self.record(DeviceCall::ResetFence(fence));
        let mut state = self.state.borrow_mut();
        match state.fences.get_mut(&fence.as_raw()) {
            Some(FenceState::Pending) => Err(RenderError::invalid_operation("fence reset while in flight")),
            Some(fence_state) => {
                *fence_state = FenceState::Unsignaled;
                Ok(())
            }
            None => Err(RenderError::Api(vk::Result::ERROR_UNKNOWN)),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RenderResult<bool> {
        let state = self.state.borrow();
        state.fences.get(&fence.as_raw())
            .map(|fence_state| *fence_state == FenceState::Signaled)
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let semaphore: vk::Semaphore = self.mint(ObjectKind::Semaphore);
        self.state.borrow_mut().semaphores.insert(semaphore.as_raw(), false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        if self.retire(semaphore, ObjectKind::Semaphore) {
            self.state.borrow_mut().semaphores.remove(&semaphore.as_raw());
        }
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        Ok(self.mint(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.retire(pool, ObjectKind::CommandPool);
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer> {
        if !self.state.borrow().live.contains_key(&pool.as_raw()) {
            return Err(RenderError::InvalidArgument("command pool does not exist".to_string()));
        }
        let mut state = self.state.borrow_mut();
        let raw = state.next_handle;
        state.next_handle += 1;
        state.command_buffers.insert(raw, CommandBufferState::default());
        Ok(vk::CommandBuffer::from_raw(raw))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.record(DeviceCall::ResetCommandBuffer(command_buffer));
        let mut state = self.state.borrow_mut();
        let in_flight = state.command_buffers.get(&command_buffer.as_raw())
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))?
            .in_flight;
        if let Some(fence) = in_flight {
            if state.fences.get(&fence) == Some(&FenceState::Pending) {
                return Err(RenderError::invalid_operation("command buffer reset while in flight"));
            }
        }
        if let Some(buffer_state) = state.command_buffers.get_mut(&command_buffer.as_raw()) {
            buffer_state.recording = false;
            buffer_state.in_flight = None;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, _one_time_submit: bool) -> RenderResult<()> {
        let mut state = self.state.borrow_mut();
        let buffer_state = state.command_buffers.get_mut(&command_buffer.as_raw())
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))?;
        if buffer_state.recording {
            return Err(RenderError::invalid_operation("command buffer is already recording"));
        }
        buffer_state.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state.borrow_mut();
        let buffer_state = state.command_buffers.get_mut(&command_buffer.as_raw())
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))?;
        if !buffer_state.recording {
            return Err(RenderError::invalid_operation("command buffer is not recording"));
        }
        buffer_state.recording = false;
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        _clear_values: &[vk::ClearValue],
    ) {
        self.record(DeviceCall::BeginRenderPass { framebuffer, extent });
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {}

    fn cmd_set_viewport_and_scissor(&self, _command_buffer: vk::CommandBuffer, _extent: vk::Extent2D) {}

    fn cmd_bind_pipeline(&self, _command_buffer: vk::CommandBuffer, _pipeline: vk::Pipeline) {}

    fn cmd_bind_descriptor_sets(
        &self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(DeviceCall::BindDescriptorSets { first_set, count: sets.len() as u32 });
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        let size = data.len() as u32;
        self.record(DeviceCall::PushConstants { stages, offset, size });
        let ranges = self.state.borrow().push_constant_ranges.get(&layout.as_raw()).cloned().unwrap_or_default();
        for message in push_constant_misuse(&ranges, stages, offset, size) {
            self.violation(message);
        }
    }

    fn cmd_bind_vertex_buffer(&self, _command_buffer: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_bind_index_buffer(&self, _command_buffer: vk::CommandBuffer, _buffer: vk::Buffer) {}

    fn cmd_draw_indexed(&self, _command_buffer: vk::CommandBuffer, index_count: u32) {
        self.record(DeviceCall::DrawIndexed { index_count });
    }

    fn cmd_copy_buffer(&self, _command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let mut state = self.state.borrow_mut();
        let copied = state.buffer_contents.get(&src.as_raw())
            .map(|contents| contents.iter().take(size as usize).copied().collect::<Vec<_>>());
        if let (Some(bytes), Some(target)) = (copied, state.buffer_contents.get_mut(&dst.as_raw())) {
            let len = bytes.len().min(target.len());
            target[..len].copy_from_slice(&bytes[..len]);
        }
    }

    fn cmd_copy_buffer_to_image(&self, _command_buffer: vk::CommandBuffer, _src: vk::Buffer, _image: vk::Image, _extent: vk::Extent2D) {}

    fn cmd_transition_image(&self, _command_buffer: vk::CommandBuffer, _transition: &ImageTransition) {}

    fn queue_submit(&self, submit: &SubmitInfo) -> RenderResult<()> {
        self.record(DeviceCall::Submit { command_buffer: submit.command_buffer, fence: submit.fence });
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        match state.command_buffers.get(&submit.command_buffer.as_raw()) {
            Some(buffer_state) if buffer_state.recording => {
                return Err(RenderError::invalid_operation("submitted command buffer is still recording"));
            }
            Some(_) => {}
            None => return Err(RenderError::Api(vk::Result::ERROR_UNKNOWN)),
        }
        match state.fences.get(&submit.fence.as_raw()) {
            Some(FenceState::Unsignaled) => {}
            Some(_) => return Err(RenderError::invalid_operation("submission fence is not unsignaled")),
            None => return Err(RenderError::Api(vk::Result::ERROR_UNKNOWN)),
        }
        if let Some((semaphore, _)) = submit.wait {
            match state.semaphores.get_mut(&semaphore.as_raw()) {
                Some(signaled) if *signaled => *signaled = false,
                _ => state.violations.push(format!("submit waits on unsignaled semaphore {:#x}", semaphore.as_raw())),
            }
        }
        if let Some(semaphore) = submit.signal {
            if let Some(signaled) = state.semaphores.get_mut(&semaphore.as_raw()) {
                *signaled = true;
            }
        }
        state.fences.insert(submit.fence.as_raw(), FenceState::Pending);
        if let Some(buffer_state) = state.command_buffers.get_mut(&submit.command_buffer.as_raw()) {
            buffer_state.in_flight = Some(submit.fence.as_raw());
        }
        Ok(())
    }

    fn create_swapchain(&self, extent: vk::Extent2D, old: vk::SwapchainKHR) -> RenderResult<SwapchainInfo> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidArgument("swapchain extent must be non-zero".to_string()));
        }
        if old != vk::SwapchainKHR::null() && !self.state.borrow().swapchains.contains_key(&old.as_raw()) {
            return Err(RenderError::InvalidArgument("retired swapchain does not exist".to_string()));
        }
        let handle: vk::SwapchainKHR = self.mint(ObjectKind::Swapchain);
        let mut state = self.state.borrow_mut();
        let image_count = state.swapchain_image_count;
        let mut images = Vec::with_capacity(image_count as usize);
        for _ in 0..image_count {
            let raw = state.next_handle;
            state.next_handle += 1;
            state.image_extents.insert(raw, vk::Extent3D { width: extent.width, height: extent.height, depth: 1 });
            images.push(vk::Image::from_raw(raw));
        }
        state.swapchains.insert(handle.as_raw(), SwapchainState { image_count, next_image: 0 });
        Ok(SwapchainInfo { handle, images, format: vk::Format::B8G8R8A8_SRGB, extent })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if self.retire(swapchain, ObjectKind::Swapchain) {
            self.state.borrow_mut().swapchains.remove(&swapchain.as_raw());
        }
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        if state.out_of_date_acquires > 0 {
            state.out_of_date_acquires -= 1;
            state.calls.push(DeviceCall::Acquire { image_index: None });
            return Ok(AcquireOutcome::OutOfDate);
        }
        let swapchain_state = state.swapchains.get_mut(&swapchain.as_raw())
            .ok_or(RenderError::Api(vk::Result::ERROR_SURFACE_LOST_KHR))?;
        let image_index = swapchain_state.next_image;
        swapchain_state.next_image = (image_index + 1) % swapchain_state.image_count;
        match state.semaphores.get_mut(&semaphore.as_raw()) {
            Some(signaled) if !*signaled => *signaled = true,
            _ => state.violations.push(format!("acquire signals busy semaphore {:#x}", semaphore.as_raw())),
        }
        state.calls.push(DeviceCall::Acquire { image_index: Some(image_index) });
        Ok(AcquireOutcome::Acquired { image_index, suboptimal: false })
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        let mut state = self.state.borrow_mut();
        let state = &mut *state;
        state.calls.push(DeviceCall::Present { image_index });
        if !state.swapchains.contains_key(&swapchain.as_raw()) {
            return Err(RenderError::Api(vk::Result::ERROR_SURFACE_LOST_KHR));
        }
        match state.semaphores.get_mut(&wait.as_raw()) {
            Some(signaled) if *signaled => *signaled = false,
            _ => state.violations.push(format!("present waits on unsignaled semaphore {:#x}", wait.as_raw())),
        }
        if state.out_of_date_presents > 0 {
            state.out_of_date_presents -= 1;
            return Ok(PresentOutcome::OutOfDate);
        }
        Ok(PresentOutcome::Presented)
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> RenderResult<vk::RenderPass> {
        Ok(self.mint(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.retire(render_pass, ObjectKind::RenderPass);
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> RenderResult<vk::Framebuffer> {
        if render_pass == vk::RenderPass::null() || attachments.is_empty() {
            return Err(RenderError::InvalidArgument("framebuffer needs a render pass and attachments".to_string()));
        }
        let framebuffer: vk::Framebuffer = self.mint(ObjectKind::Framebuffer);
        self.state.borrow_mut().framebuffer_extents.insert(framebuffer.as_raw(), extent);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        if self.retire(framebuffer, ObjectKind::Framebuffer) {
            self.state.borrow_mut().framebuffer_extents.remove(&framebuffer.as_raw());
        }
    }

    fn create_descriptor_set_layout(&self, _bindings: &[vk::DescriptorSetLayoutBinding]) -> RenderResult<vk::DescriptorSetLayout> {
        Ok(self.mint(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.retire(layout, ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> RenderResult<vk::DescriptorPool> {
        if max_sets == 0 || sizes.iter().any(|size| size.descriptor_count == 0) {
            return Err(RenderError::InvalidArgument("descriptor pool sizes must be non-zero".to_string()));
        }
        let pool: vk::DescriptorPool = self.mint(ObjectKind::DescriptorPool);
        self.state.borrow_mut().descriptor_pools.insert(pool.as_raw(), PoolState { max_sets, allocated: 0 });
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        if self.retire(pool, ObjectKind::DescriptorPool) {
            self.state.borrow_mut().descriptor_pools.remove(&pool.as_raw());
        }
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, _layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let mut state = self.state.borrow_mut();
        let pool_state = state.descriptor_pools.get_mut(&pool.as_raw())
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))?;
        if pool_state.allocated >= pool_state.max_sets {
            return Err(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        pool_state.allocated += 1;
        let raw = state.next_handle;
        state.next_handle += 1;
        Ok(vk::DescriptorSet::from_raw(raw))
    }

    fn write_buffer_descriptor(&self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer, range: u64) {
        let mut state = self.state.borrow_mut();
        state.descriptor_write_count += 1;
        state.descriptor_writes.insert((set.as_raw(), binding), DescriptorWrite::Buffer { buffer, range });
    }

    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler) {
        let mut state = self.state.borrow_mut();
        state.descriptor_write_count += 1;
        state.descriptor_writes.insert((set.as_raw(), binding), DescriptorWrite::Image { view, sampler });
    }

    fn create_shader_module(&self, code: &[u32]) -> RenderResult<vk::ShaderModule> {
        if code.first() != Some(&0x0723_0203) {
            return Err(RenderError::Api(vk::Result::ERROR_INVALID_SHADER_NV));
        }
        Ok(self.mint(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.retire(module, ObjectKind::ShaderModule);
    }

    fn create_pipeline_layout(&self, _set_layouts: &[vk::DescriptorSetLayout], push_constant_ranges: &[vk::PushConstantRange]) -> RenderResult<vk::PipelineLayout> {
        let layout: vk::PipelineLayout = self.mint(ObjectKind::PipelineLayout);
        self.state.borrow_mut().push_constant_ranges.insert(layout.as_raw(), push_constant_ranges.to_vec());
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        if self.retire(layout, ObjectKind::PipelineLayout) {
            self.state.borrow_mut().push_constant_ranges.remove(&layout.as_raw());
        }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<vk::Pipeline> {
        if desc.render_pass == vk::RenderPass::null() || desc.layout == vk::PipelineLayout::null() {
            return Err(RenderError::InvalidArgument("pipeline needs a render pass and layout".to_string()));
        }
        Ok(self.mint(ObjectKind::Pipeline))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.retire(pipeline, ObjectKind::Pipeline);
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RenderResult<vk::PipelineCache> {
        let cache: vk::PipelineCache = self.mint(ObjectKind::PipelineCache);
        let data = if initial_data.is_empty() {
            b"headless pipeline cache".to_vec()
        } else {
            initial_data.to_vec()
        };
        let mut state = self.state.borrow_mut();
        state.pipeline_cache_seed = Some(initial_data.to_vec());
        state.pipeline_caches.insert(cache.as_raw(), data);
        Ok(cache)
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RenderResult<Vec<u8>> {
        self.state.borrow().pipeline_caches.get(&cache.as_raw())
            .cloned()
            .ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        if self.retire(cache, ObjectKind::PipelineCache) {
            self.state.borrow_mut().pipeline_caches.remove(&cache.as_raw());
        }
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state.borrow_mut();
        state.calls.push(DeviceCall::WaitIdle);
        for fence_state in state.fences.values_mut() {
            if *fence_state == FenceState::Pending {
                *fence_state = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn depth_format(&self) -> vk::Format {
        vk::Format::D32_SFLOAT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit(device: &HeadlessDevice, command_buffer: vk::CommandBuffer, fence: vk::Fence) -> RenderResult<()> {
        device.begin_command_buffer(command_buffer, true)?;
        device.end_command_buffer(command_buffer)?;
        device.queue_submit(&SubmitInfo { command_buffer, wait: None, signal: None, fence })
    }

    #[test]
    fn fence_follows_submit_and_wait() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(false).unwrap();
        let pool = device.create_command_pool().unwrap();
        let command_buffer = device.allocate_command_buffer(pool).unwrap();

        assert!(matches!(device.wait_for_fence(fence), Err(RenderError::Api(vk::Result::TIMEOUT))));

        submit(&device, command_buffer, fence).unwrap();
        assert!(!device.fence_signaled(fence).unwrap());
        assert!(device.reset_command_buffer(command_buffer).is_err());

        device.wait_for_fence(fence).unwrap();
        assert!(device.is_fence_signaled(fence));
        device.reset_command_buffer(command_buffer).unwrap();
    }

    #[test]
    fn submitting_with_signaled_fence_fails() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        let pool = device.create_command_pool().unwrap();
        let command_buffer = device.allocate_command_buffer(pool).unwrap();
        assert!(submit(&device, command_buffer, fence).is_err());
    }

    #[test]
    fn pushes_must_stay_inside_their_stage_ranges() {
        let device = HeadlessDevice::new();
        let ranges = [
            vk::PushConstantRange { stage_flags: vk::ShaderStageFlags::VERTEX, offset: 0, size: 64 },
            vk::PushConstantRange { stage_flags: vk::ShaderStageFlags::FRAGMENT, offset: 64, size: 16 },
        ];
        let layout = device.create_pipeline_layout(&[], &ranges).unwrap();
        let cmd = vk::CommandBuffer::null();

        device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX, 0, &[0; 64]);
        device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::FRAGMENT, 64, &[0; 16]);
        assert!(device.violations().is_empty());

        // Byte 64 is outside the vertex range
        device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT, 0, &[0; 80]);
        assert_eq!(device.violations().len(), 2);

        // Overlaps the fragment range without naming it
        device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX, 60, &[0; 8]);
        assert_eq!(device.violations().len(), 4);
    }

    #[test]
    fn double_destroy_is_a_violation() {
        let device = HeadlessDevice::new();
        let sampler = device.create_sampler().unwrap();
        device.destroy_sampler(sampler);
        device.destroy_sampler(sampler);

        assert_eq!(device.created(ObjectKind::Sampler), 1);
        assert_eq!(device.destroyed(ObjectKind::Sampler), 1);
        assert_eq!(device.violations().len(), 1);
    }

    #[test]
    fn descriptor_pool_reports_exhaustion() {
        let device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let sizes = [vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 2 }];
        let pool = device.create_descriptor_pool(2, &sizes).unwrap();

        device.allocate_descriptor_set(pool, layout).unwrap();
        device.allocate_descriptor_set(pool, layout).unwrap();
        assert!(matches!(
            device.allocate_descriptor_set(pool, layout),
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
        ));
    }

    #[test]
    fn host_writes_are_bounds_checked() {
        let device = HeadlessDevice::new();
        let info = vk::BufferCreateInfo::builder().size(8).usage(vk::BufferUsageFlags::UNIFORM_BUFFER).build();
        let (buffer, mut allocation) = device.create_buffer(&info, MemoryLocation::CpuToGpu).unwrap();

        device.write_allocation(&mut allocation, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_contents(buffer).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_allocation(&mut allocation, 6, &[1, 2, 3]).is_err());

        device.destroy_buffer(buffer, allocation);
        assert_eq!(device.live(ObjectKind::Buffer), 0);
    }
}
