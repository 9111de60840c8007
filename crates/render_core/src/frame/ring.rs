//! Frame ring state machine
//!
//! Per slot: `Idle -> Recording -> Submitted -> Idle`. The transition back to
//! idle happens when the slot's fence has been waited on at the start of its
//! next use, which is also when the slot's deferred deletions run.

use ash::vk;

use super::context::{FrameContext, SlotState};
use super::uniforms::FrameUniforms;
use crate::descriptors::DescriptorBinder;
use crate::foundation::logging::Diagnostics;
use crate::gpu::{AcquireOutcome, GpuDevice, PresentOutcome, RenderError, RenderResult, SubmitInfo};
use crate::resources::{Deletion, DeletionQueue, ResourceAllocator};

/// Frame currently being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFrame {
    /// Ring slot in use
    pub slot: usize,
    /// Swapchain image being rendered
    pub image_index: u32,
    /// Frame counter at begin
    pub frame_number: u64,
    /// Command buffer open for recording
    pub command_buffer: vk::CommandBuffer,
}

/// Result of beginning a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBegin {
    /// Recording may start
    Ready(ActiveFrame),
    /// The swapchain is out of date; nothing was recorded
    Skip,
}

/// Ring of frame contexts
#[derive(Debug)]
pub struct FrameRing {
    frames: Vec<FrameContext>,
    frame_number: u64,
    active: Option<ActiveFrame>,
}

impl FrameRing {
    /// Create `count` frame contexts
    pub fn new<D: GpuDevice>(
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        frame_binder: &mut DescriptorBinder,
        diagnostics: &Diagnostics,
        count: usize,
    ) -> RenderResult<Self> {
        if count == 0 {
            return Err(RenderError::InvalidArgument("frame ring needs at least one slot".to_string()));
        }
        let frames = (0..count)
            .map(|_| FrameContext::new(device, allocator, frame_binder, diagnostics))
            .collect::<RenderResult<Vec<_>>>()?;
        log::debug!("Created frame ring with {} slots", count);
        Ok(Self { frames, frame_number: 0, active: None })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the ring has no slots
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames submitted so far
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Slot the next or current frame uses
    pub fn slot_index(&self) -> usize {
        if self.frames.is_empty() {
            return 0;
        }
        (self.frame_number % self.frames.len() as u64) as usize
    }

    /// Context at a slot
    pub fn frame(&self, slot: usize) -> Option<&FrameContext> {
        self.frames.get(slot)
    }

    /// Context of the next or current frame
    pub fn current(&self) -> Option<&FrameContext> {
        self.frames.get(self.slot_index())
    }

    /// Frame being recorded, if any
    pub fn active(&self) -> Option<ActiveFrame> {
        self.active
    }

    /// Wait for the slot, acquire an image and open the command buffer
    pub fn acquire<D: GpuDevice>(
        &mut self,
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        swapchain: vk::SwapchainKHR,
    ) -> RenderResult<FrameBegin> {
        if self.active.is_some() {
            return Err(RenderError::invalid_operation("begin_frame called twice without end_frame"));
        }

        let slot = self.slot_index();
        let frame = &mut self.frames[slot];

        device.wait_for_fence(frame.in_flight)?;
        frame.state = SlotState::Idle;
        frame.deletions.flush(device, allocator)?;

        let image_index = match device.acquire_next_image(swapchain, frame.image_available)? {
            AcquireOutcome::Acquired { image_index, suboptimal } => {
                if suboptimal {
                    log::trace!("Swapchain suboptimal at frame {}", self.frame_number);
                }
                image_index
            }
            // Fence stays signaled so the next attempt does not block
            AcquireOutcome::OutOfDate => return Ok(FrameBegin::Skip),
        };

        device.reset_fence(frame.in_flight)?;
        device.reset_command_buffer(frame.command_buffer)?;
        device.begin_command_buffer(frame.command_buffer, true)?;
        frame.state = SlotState::Recording;

        let active = ActiveFrame {
            slot,
            image_index,
            frame_number: self.frame_number,
            command_buffer: frame.command_buffer,
        };
        self.active = Some(active);
        log::trace!("Frame {} recording in slot {} (image {})", self.frame_number, slot, image_index);
        Ok(FrameBegin::Ready(active))
    }

    /// Begin the main render pass with the given clear values
    pub fn begin_main_pass<D: GpuDevice>(
        &self,
        device: &D,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) -> RenderResult<()> {
        let active = self.active.ok_or_else(|| RenderError::invalid_operation("no frame is being recorded"))?;
        device.cmd_begin_render_pass(active.command_buffer, render_pass, framebuffer, extent, clear_values);
        device.cmd_set_viewport_and_scissor(active.command_buffer, extent);
        Ok(())
    }

    /// Close the frame, submit it and present
    ///
    /// An out-of-date present is returned to the caller, not treated as an
    /// error; the next acquire reports it again.
    pub fn end_frame<D: GpuDevice>(&mut self, device: &D, swapchain: vk::SwapchainKHR) -> RenderResult<PresentOutcome> {
        let active = self.active.take().ok_or_else(|| RenderError::invalid_operation("end_frame without begin_frame"))?;
        let frame = &mut self.frames[active.slot];

        device.cmd_end_render_pass(frame.command_buffer);
        device.end_command_buffer(frame.command_buffer)?;
        device.queue_submit(&SubmitInfo {
            command_buffer: frame.command_buffer,
            wait: Some((frame.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some(frame.render_finished),
            fence: frame.in_flight,
        })?;
        frame.state = SlotState::Submitted;

        let outcome = device.queue_present(swapchain, active.image_index, frame.render_finished)?;
        if outcome == PresentOutcome::OutOfDate {
            log::debug!("Present reported out of date at frame {}", active.frame_number);
        }
        self.frame_number += 1;
        Ok(outcome)
    }

    /// Write the per-frame uniforms of the frame being recorded
    pub fn write_uniforms<D: GpuDevice>(
        &self,
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        uniforms: &FrameUniforms,
    ) -> RenderResult<()> {
        let active = self.active.ok_or_else(|| RenderError::invalid_operation("frame uniforms written outside a frame"))?;
        allocator.write_buffer(device, self.frames[active.slot].uniform_buffer, 0, bytemuck::bytes_of(uniforms))
    }

    /// Block until every submitted slot has finished on the GPU
    ///
    /// Used before host writes to resources that are not per-slot. Deferred
    /// deletions stay queued until each slot's next acquire.
    pub fn wait_in_flight<D: GpuDevice>(&mut self, device: &D) -> RenderResult<()> {
        if self.active.is_some() {
            return Err(RenderError::invalid_operation("cannot wait for the ring while a frame is recording"));
        }
        for frame in self.frames.iter_mut().filter(|frame| frame.state == SlotState::Submitted) {
            device.wait_for_fence(frame.in_flight)?;
            frame.state = SlotState::Idle;
        }
        Ok(())
    }

    /// Defer destruction until every frame that could reference the object is done
    ///
    /// Records land in the slot of the most recent frame, which is flushed
    /// after that frame's fence is next waited on.
    pub fn defer(&mut self, record: Deletion) -> RenderResult<()> {
        self.deferral_slot()?.deletions.push(record);
        Ok(())
    }

    /// Defer every record of `queue`, leaving it empty
    pub fn defer_all(&mut self, queue: &mut DeletionQueue) -> RenderResult<()> {
        self.deferral_slot()?.deletions.append(queue);
        Ok(())
    }

    fn deferral_slot(&mut self) -> RenderResult<&mut FrameContext> {
        let len = self.frames.len() as u64;
        let slot = match self.active {
            Some(active) => active.slot,
            None if self.frame_number > 0 && len > 0 => ((self.frame_number - 1) % len) as usize,
            None => 0,
        };
        self.frames
            .get_mut(slot)
            .ok_or_else(|| RenderError::invalid_operation("frame ring has been retired"))
    }

    /// Destroy every deferred object; the device must be idle
    pub fn flush_all<D: GpuDevice>(&mut self, device: &D, allocator: &mut ResourceAllocator<D>) -> RenderResult<()> {
        let mut first_error = None;
        for frame in &mut self.frames {
            if let Err(e) = frame.deletions.flush(device, allocator) {
                first_error.get_or_insert(e);
            }
            frame.state = SlotState::Idle;
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Hand every slot to a deletion queue, leaving the ring empty
    pub fn retire(&mut self, queue: &mut DeletionQueue) {
        self.active = None;
        for frame in self.frames.drain(..) {
            frame.retire(queue);
        }
    }
}
