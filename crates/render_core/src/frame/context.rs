//! One slot of the frame ring

use ash::vk;

use super::uniforms::FrameUniforms;
use crate::descriptors::DescriptorBinder;
use crate::foundation::logging::Diagnostics;
use crate::gpu::{GpuDevice, MemoryLocation, RenderResult};
use crate::resources::{BufferHandle, Deletion, DeletionQueue, ResourceAllocator};

/// Lifecycle of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Fence signaled, nothing recorded
    Idle,
    /// Command buffer open
    Recording,
    /// Work handed to the queue, fence pending
    Submitted,
}

/// Command recording and synchronization objects of one frame
#[derive(Debug)]
pub struct FrameContext {
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) image_available: vk::Semaphore,
    pub(crate) render_finished: vk::Semaphore,
    pub(crate) in_flight: vk::Fence,
    pub(crate) uniform_buffer: BufferHandle,
    pub(crate) descriptor_set: vk::DescriptorSet,
    pub(crate) state: SlotState,
    pub(crate) deletions: DeletionQueue,
}

impl FrameContext {
    /// Create the slot objects
    ///
    /// The fence starts signaled so the first wait returns immediately.
    pub fn new<D: GpuDevice>(
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        frame_binder: &mut DescriptorBinder,
        diagnostics: &Diagnostics,
    ) -> RenderResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let image_available = device.create_semaphore()?;
        let render_finished = device.create_semaphore()?;
        let in_flight = device.create_fence(true)?;

        let uniform_buffer = allocator.create_buffer(
            device,
            FrameUniforms::SIZE,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
        )?;
        allocator.write_buffer(device, uniform_buffer, 0, bytemuck::bytes_of(&FrameUniforms::default()))?;

        let descriptor_set = frame_binder.allocate(device, diagnostics)?;
        let buffer = allocator.buffer(uniform_buffer)?.buffer;
        frame_binder.bind_buffer(device, descriptor_set, 0, buffer, FrameUniforms::SIZE)?;

        Ok(Self {
            command_pool,
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            uniform_buffer,
            descriptor_set,
            state: SlotState::Idle,
            deletions: DeletionQueue::new(),
        })
    }

    /// Current state
    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Fence guarding the slot
    pub fn fence(&self) -> vk::Fence {
        self.in_flight
    }

    /// Command buffer recorded each frame
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Set 0 descriptor set
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    /// Per-frame uniform buffer
    pub fn uniform_buffer(&self) -> BufferHandle {
        self.uniform_buffer
    }

    /// Objects waiting for this slot's fence
    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    /// Hand every owned object to a deletion queue
    pub fn retire(mut self, queue: &mut DeletionQueue) {
        queue.append(&mut self.deletions);
        queue.push(Deletion::Buffer(self.uniform_buffer));
        queue.push(Deletion::CommandPool(self.command_pool));
        queue.push(Deletion::Semaphore(self.image_available));
        queue.push(Deletion::Semaphore(self.render_finished));
        queue.push(Deletion::Fence(self.in_flight));
    }
}
