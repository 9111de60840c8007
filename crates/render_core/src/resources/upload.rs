//! Blocking one-shot transfers
//!
//! A dedicated command pool, command buffer and fence, reused for every
//! staging copy. Kept apart from the frame ring so uploads never touch a
//! frame's command buffer.

use ash::vk;

use super::deletion_queue::{Deletion, DeletionQueue};
use crate::gpu::{GpuDevice, RenderResult, SubmitInfo};

/// Command pool, command buffer and fence for immediate submission
#[derive(Debug)]
pub struct UploadContext {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

impl UploadContext {
    /// Create the upload objects
    pub fn new<D: GpuDevice>(device: &D) -> RenderResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let fence = device.create_fence(false)?;
        Ok(Self { command_pool, command_buffer, fence })
    }

    /// Record commands with `record`, submit them and wait for completion
    pub fn immediate_submit<D, F>(&self, device: &D, record: F) -> RenderResult<()>
    where
        D: GpuDevice,
        F: FnOnce(&D, vk::CommandBuffer) -> RenderResult<()>,
    {
        device.reset_command_buffer(self.command_buffer)?;
        device.begin_command_buffer(self.command_buffer, true)?;
        record(device, self.command_buffer)?;
        device.end_command_buffer(self.command_buffer)?;

        device.queue_submit(&SubmitInfo {
            command_buffer: self.command_buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;
        device.wait_for_fence(self.fence)?;
        device.reset_fence(self.fence)
    }

    /// Hand the upload objects to a deletion queue
    pub fn retire(&mut self, queue: &mut DeletionQueue) {
        let command_pool = std::mem::replace(&mut self.command_pool, vk::CommandPool::null());
        let fence = std::mem::replace(&mut self.fence, vk::Fence::null());
        self.command_buffer = vk::CommandBuffer::null();
        if command_pool != vk::CommandPool::null() {
            queue.push(Deletion::CommandPool(command_pool));
        }
        if fence != vk::Fence::null() {
            queue.push(Deletion::Fence(fence));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{DeviceCall, HeadlessDevice};
    use crate::gpu::MemoryLocation;
    use crate::resources::ResourceAllocator;

    #[test]
    fn staging_copy_completes_before_return() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let upload = UploadContext::new(&device).unwrap();

        let staging = allocator
            .create_buffer(&device, 4, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)
            .unwrap();
        let target = allocator
            .create_buffer(&device, 4, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuToCpu)
            .unwrap();
        allocator.write_buffer(&device, staging, 0, &[9, 8, 7, 6]).unwrap();

        let src = allocator.buffer(staging).unwrap().buffer;
        let dst = allocator.buffer(target).unwrap().buffer;
        upload.immediate_submit(&device, |device, cmd| {
            device.cmd_copy_buffer(cmd, src, dst, 4);
            Ok(())
        }).unwrap();

        assert_eq!(device.buffer_contents(dst).unwrap(), vec![9, 8, 7, 6]);
        let calls = device.calls();
        let submit = calls.iter().position(|call| matches!(call, DeviceCall::Submit { .. })).unwrap();
        let wait = calls.iter().position(|call| matches!(call, DeviceCall::WaitFence(_))).unwrap();
        assert!(submit < wait);

        // Reusable straight away
        upload.immediate_submit(&device, |_, _| Ok(())).unwrap();
    }
}
