//! Deferred destruction
//!
//! Objects that may still be referenced by in-flight command buffers are
//! pushed here and destroyed when the owning frame's fence has been waited
//! on, or at shutdown after the device is idle.

use ash::vk;

use super::allocator::{BufferHandle, ImageHandle, ResourceAllocator};
use crate::gpu::{GpuDevice, RenderResult};

/// Ownership record of one object awaiting destruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// Graphics pipeline
    Pipeline(vk::Pipeline),
    /// Pipeline layout
    PipelineLayout(vk::PipelineLayout),
    /// Descriptor pool, freeing its sets
    DescriptorPool(vk::DescriptorPool),
    /// Descriptor set layout
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Framebuffer
    Framebuffer(vk::Framebuffer),
    /// Render pass
    RenderPass(vk::RenderPass),
    /// Shader module
    ShaderModule(vk::ShaderModule),
    /// Sampler
    Sampler(vk::Sampler),
    /// Image view not owned by an allocator image
    ImageView(vk::ImageView),
    /// Allocator image with its default view
    Image(ImageHandle),
    /// Allocator buffer
    Buffer(BufferHandle),
    /// Swapchain
    Swapchain(vk::SwapchainKHR),
    /// Command pool and its command buffers
    CommandPool(vk::CommandPool),
    /// Fence
    Fence(vk::Fence),
    /// Semaphore
    Semaphore(vk::Semaphore),
    /// Pipeline cache
    PipelineCache(vk::PipelineCache),
}

impl Deletion {
    /// Position in the destruction order; users come before what they use
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pipeline(_) => 0,
            Self::PipelineLayout(_) => 1,
            Self::DescriptorPool(_) => 2,
            Self::DescriptorSetLayout(_) => 3,
            Self::Framebuffer(_) => 4,
            Self::RenderPass(_) => 5,
            Self::ShaderModule(_) => 6,
            Self::Sampler(_) => 7,
            Self::ImageView(_) => 8,
            Self::Image(_) => 9,
            Self::Buffer(_) => 10,
            Self::Swapchain(_) => 11,
            Self::CommandPool(_) => 12,
            Self::Fence(_) => 13,
            Self::Semaphore(_) => 14,
            Self::PipelineCache(_) => 15,
        }
    }

    fn destroy<D: GpuDevice>(self, device: &D, allocator: &mut ResourceAllocator<D>) -> RenderResult<()> {
        match self {
            Self::Pipeline(pipeline) => device.destroy_pipeline(pipeline),
            Self::PipelineLayout(layout) => device.destroy_pipeline_layout(layout),
            Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            Self::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            Self::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer),
            Self::RenderPass(render_pass) => device.destroy_render_pass(render_pass),
            Self::ShaderModule(module) => device.destroy_shader_module(module),
            Self::Sampler(sampler) => device.destroy_sampler(sampler),
            Self::ImageView(view) => device.destroy_image_view(view),
            Self::Image(handle) => allocator.destroy_image(device, handle)?,
            Self::Buffer(handle) => allocator.destroy_buffer(device, handle)?,
            Self::Swapchain(swapchain) => device.destroy_swapchain(swapchain),
            Self::CommandPool(pool) => device.destroy_command_pool(pool),
            Self::Fence(fence) => device.destroy_fence(fence),
            Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
            Self::PipelineCache(cache) => device.destroy_pipeline_cache(cache),
        }
        Ok(())
    }
}

/// Batch of pending destructions
#[derive(Debug, Default)]
pub struct DeletionQueue {
    records: Vec<Deletion>,
}

impl DeletionQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an object
    pub fn push(&mut self, record: Deletion) {
        self.records.push(record);
    }

    /// Take ownership of several objects
    pub fn extend(&mut self, records: impl IntoIterator<Item = Deletion>) {
        self.records.extend(records);
    }

    /// Move every record of `other` into this queue
    pub fn append(&mut self, other: &mut DeletionQueue) {
        self.records.append(&mut other.records);
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Destroy everything and clear the queue
    ///
    /// Records are destroyed by [`Deletion::rank`], newest first within a
    /// rank. Every record is attempted; the first failure is returned.
    pub fn flush<D: GpuDevice>(&mut self, device: &D, allocator: &mut ResourceAllocator<D>) -> RenderResult<()> {
        if self.records.is_empty() {
            return Ok(());
        }

        let mut pending = std::mem::take(&mut self.records);
        pending.reverse();
        pending.sort_by_key(Deletion::rank);
        log::trace!("Flushing {} deferred deletions", pending.len());

        let mut first_error = None;
        for record in pending {
            if let Err(e) = record.destroy(device, allocator) {
                log::error!("Deferred deletion of {:?} failed: {}", record, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessDevice, ObjectKind};
    use crate::gpu::{MemoryLocation, RenderError};
    use ash::vk::Handle;

    #[test]
    fn flush_orders_by_dependency_then_lifo() {
        let mut queue = DeletionQueue::new();
        let first_view = vk::ImageView::from_raw(1);
        let second_view = vk::ImageView::from_raw(2);
        queue.push(Deletion::ImageView(first_view));
        queue.push(Deletion::Semaphore(vk::Semaphore::null()));
        queue.push(Deletion::Pipeline(vk::Pipeline::null()));
        queue.push(Deletion::ImageView(second_view));
        queue.push(Deletion::Framebuffer(vk::Framebuffer::null()));

        let mut ordered = std::mem::take(&mut queue.records);
        ordered.reverse();
        ordered.sort_by_key(Deletion::rank);

        assert_eq!(ordered, vec![
            Deletion::Pipeline(vk::Pipeline::null()),
            Deletion::Framebuffer(vk::Framebuffer::null()),
            Deletion::ImageView(second_view),
            Deletion::ImageView(first_view),
            Deletion::Semaphore(vk::Semaphore::null()),
        ]);
    }

    #[test]
    fn flush_destroys_everything_once() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let mut queue = DeletionQueue::new();

        let buffer = allocator
            .create_buffer(&device, 64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();
        queue.push(Deletion::Buffer(buffer));
        queue.push(Deletion::Fence(device.create_fence(true).unwrap()));
        queue.push(Deletion::Sampler(device.create_sampler().unwrap()));

        queue.flush(&device, &mut allocator).unwrap();

        assert!(queue.is_empty());
        assert_eq!(device.total_live(), 0);
        assert!(device.violations().is_empty());
        assert_eq!(allocator.stats().live_buffers(), 0);
    }

    #[test]
    fn flush_continues_past_stale_handles() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let mut queue = DeletionQueue::new();

        let buffer = allocator
            .create_buffer(&device, 64, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();
        allocator.destroy_buffer(&device, buffer).unwrap();
        queue.push(Deletion::Buffer(buffer));
        queue.push(Deletion::Fence(device.create_fence(false).unwrap()));

        let result = queue.flush(&device, &mut allocator);

        assert!(matches!(result, Err(RenderError::StaleHandle { kind: "buffer" })));
        assert_eq!(device.live(ObjectKind::Fence), 0);
    }
}
