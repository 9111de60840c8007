//! Render targets
//!
//! [`SwapchainTargets`] groups the swapchain with the views, depth buffer and
//! framebuffers derived from it; they are always rebuilt together.
//! [`OffscreenFramebuffer`] is a color + depth target whose color image is
//! sampled afterwards.

use ash::vk;

use crate::gpu::{GpuDevice, ImageTransition, RenderError, RenderPassDesc, RenderResult};
use crate::resources::{Deletion, DeletionQueue, ImageHandle, ImageSpec, ResourceAllocator, UploadContext};

/// Swapchain and everything sized to it
#[derive(Debug)]
pub struct SwapchainTargets {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Option<ImageHandle>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl SwapchainTargets {
    /// Create the swapchain, its image views and the depth buffer
    ///
    /// Framebuffers need a render pass and are created separately.
    pub fn new<D: GpuDevice>(device: &D, allocator: &mut ResourceAllocator<D>, extent: vk::Extent2D) -> RenderResult<Self> {
        let mut targets = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent,
        };
        targets.create_images(device, allocator, extent)?;
        Ok(targets)
    }

    /// Swapchain handle
    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Color format of the swapchain images
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Framebuffer for a swapchain image
    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    /// Create one framebuffer per swapchain image
    pub fn create_framebuffers<D: GpuDevice>(
        &mut self,
        device: &D,
        allocator: &ResourceAllocator<D>,
        render_pass: vk::RenderPass,
    ) -> RenderResult<()> {
        let depth = match self.depth {
            Some(depth) => allocator.image(depth)?.view,
            None => return Err(RenderError::invalid_operation("swapchain targets have no depth buffer")),
        };
        for view in &self.views {
            let framebuffer = device.create_framebuffer(render_pass, &[*view, depth], self.extent)?;
            self.framebuffers.push(framebuffer);
        }
        log::debug!("Created {} swapchain framebuffers at {}x{}", self.framebuffers.len(), self.extent.width, self.extent.height);
        Ok(())
    }

    /// Recreate everything at a new extent
    ///
    /// The device must be idle. The old swapchain is passed to the new one
    /// as its retired predecessor and destroyed afterwards.
    pub fn rebuild<D: GpuDevice>(
        &mut self,
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        extent: vk::Extent2D,
        render_pass: vk::RenderPass,
    ) -> RenderResult<()> {
        let previous_format = self.format;
        self.destroy_dependents(device, allocator)?;
        self.create_images(device, allocator, extent)?;
        if self.format != previous_format {
            log::warn!("Swapchain format changed from {:?} to {:?}", previous_format, self.format);
        }
        self.create_framebuffers(device, allocator, render_pass)
    }

    /// Hand every object to a deletion queue
    pub fn retire(&mut self, queue: &mut DeletionQueue) {
        queue.extend(self.framebuffers.drain(..).map(Deletion::Framebuffer));
        queue.extend(self.views.drain(..).map(Deletion::ImageView));
        if let Some(depth) = self.depth.take() {
            queue.push(Deletion::Image(depth));
        }
        self.images.clear();
        let swapchain = std::mem::replace(&mut self.swapchain, vk::SwapchainKHR::null());
        if swapchain != vk::SwapchainKHR::null() {
            queue.push(Deletion::Swapchain(swapchain));
        }
    }

    fn create_images<D: GpuDevice>(&mut self, device: &D, allocator: &mut ResourceAllocator<D>, extent: vk::Extent2D) -> RenderResult<()> {
        let old = self.swapchain;
        let info = device.create_swapchain(extent, old)?;
        if old != vk::SwapchainKHR::null() {
            device.destroy_swapchain(old);
        }
        self.swapchain = info.handle;
        self.format = info.format;
        self.extent = info.extent;

        for image in &info.images {
            let view = device.create_image_view(*image, info.format, vk::ImageAspectFlags::COLOR)?;
            self.views.push(view);
        }
        self.images = info.images;

        let depth = allocator.create_image(device, &ImageSpec::depth_target(self.extent, device.depth_format()))?;
        self.depth = Some(depth);

        log::debug!(
            "Swapchain {}x{} with {} images ({:?})",
            self.extent.width, self.extent.height, self.images.len(), self.format
        );
        Ok(())
    }

    fn destroy_dependents<D: GpuDevice>(&mut self, device: &D, allocator: &mut ResourceAllocator<D>) -> RenderResult<()> {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view);
        }
        if let Some(depth) = self.depth.take() {
            allocator.destroy_image(device, depth)?;
        }
        self.images.clear();
        Ok(())
    }
}

/// Color render pass description for a target
pub fn render_pass_desc(color_format: vk::Format, depth_format: vk::Format, sampled: bool) -> RenderPassDesc {
    RenderPassDesc {
        color_format,
        depth_format,
        final_color_layout: if sampled {
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
    }
}

/// Offscreen color + depth target
#[derive(Debug)]
pub struct OffscreenFramebuffer {
    pub(crate) color: ImageHandle,
    pub(crate) depth: ImageHandle,
    pub(crate) framebuffer: vk::Framebuffer,
    pub(crate) extent: vk::Extent2D,
}

impl OffscreenFramebuffer {
    /// Create the attachments and framebuffer
    ///
    /// The color image is moved to `SHADER_READ_ONLY_OPTIMAL` straight away
    /// so it can be sampled before the first pass renders into it.
    pub fn new<D: GpuDevice>(
        device: &D,
        allocator: &mut ResourceAllocator<D>,
        upload: &UploadContext,
        render_pass: vk::RenderPass,
        color_format: vk::Format,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let color = allocator.create_image(device, &ImageSpec::color_target(extent, color_format))?;
        let depth = match allocator.create_image(device, &ImageSpec::depth_target(extent, device.depth_format())) {
            Ok(depth) => depth,
            Err(e) => {
                allocator.destroy_image(device, color)?;
                return Err(e);
            }
        };

        let color_image = allocator.image(color)?;
        let (color_view, color_handle) = (color_image.view, color_image.image);
        let depth_view = allocator.image(depth)?.view;
        let framebuffer = device.create_framebuffer(render_pass, &[color_view, depth_view], extent)?;

        upload.immediate_submit(device, |device, cmd| {
            device.cmd_transition_image(cmd, &ImageTransition {
                image: color_handle,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                aspect: vk::ImageAspectFlags::COLOR,
            });
            Ok(())
        })?;

        log::debug!("Created offscreen framebuffer {}x{}", extent.width, extent.height);
        Ok(Self { color, depth, framebuffer, extent })
    }

    /// Current extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Color attachment image
    pub fn color(&self) -> ImageHandle {
        self.color
    }

    /// Destroy immediately; the device must be idle
    pub fn destroy<D: GpuDevice>(self, device: &D, allocator: &mut ResourceAllocator<D>) -> RenderResult<()> {
        device.destroy_framebuffer(self.framebuffer);
        allocator.destroy_image(device, self.color)?;
        allocator.destroy_image(device, self.depth)
    }

    /// Hand every object to a deletion queue
    pub fn retire(self, queue: &mut DeletionQueue) {
        queue.push(Deletion::Framebuffer(self.framebuffer));
        queue.push(Deletion::Image(self.color));
        queue.push(Deletion::Image(self.depth));
    }
}
