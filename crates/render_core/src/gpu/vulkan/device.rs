//! Production backend over ash and vk-mem

use std::ffi::CStr;
use std::mem::ManuallyDrop;

use ash::extensions::khr::Surface;
use ash::vk;
use vk_mem::Alloc;

use super::context::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::swapchain::SwapchainBuilder;
use crate::config::RendererConfig;
use crate::gpu::{
    AcquireOutcome, GpuDevice, GraphicsPipelineDesc, ImageTransition, MemoryLocation, PresentOutcome,
    RenderError, RenderPassDesc, RenderResult, SubmitInfo, SwapchainInfo,
};
use crate::platform::window::Window;

/// vk-mem allocation and the size it was requested with
pub struct VulkanAllocation {
    allocation: vk_mem::Allocation,
    size: u64,
}

impl std::fmt::Debug for VulkanAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanAllocation").field("size", &self.size).finish_non_exhaustive()
    }
}

/// Vulkan device presenting to one window surface
///
/// Field order is drop order: the allocator goes first, the instance last.
pub struct VulkanDevice {
    allocator: ManuallyDrop<vk_mem::Allocator>,
    device: LogicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: Surface,
    physical: PhysicalDeviceInfo,
    depth_format: vk::Format,
    vsync: bool,
    instance: VulkanInstance,
}

impl VulkanDevice {
    /// Create instance, surface, device and allocator for a window
    pub fn new(window: &mut Window, config: &RendererConfig) -> RenderResult<Self> {
        let extensions = window
            .get_required_instance_extensions()
            .map_err(|e| RenderError::InitializationFailed(e.to_string()))?;
        let instance = VulkanInstance::new(&config.application_name, &extensions, config.validation_enabled())?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window
            .create_vulkan_surface(instance.instance.handle())
            .map_err(|e| RenderError::InitializationFailed(format!("Surface creation: {}", e)))?;

        let setup = PhysicalDeviceInfo::select(&instance.instance, surface, &surface_loader).and_then(|physical| {
            let depth_format = physical.find_depth_format(&instance.instance)?;
            let device = LogicalDevice::new(&instance.instance, &physical)?;
            Ok((physical, depth_format, device))
        });
        let (physical, depth_format, device) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(e);
            }
        };

        let allocator = match vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance.instance,
            &device.device,
            physical.device,
        )) {
            Ok(allocator) => allocator,
            Err(e) => {
                drop(device);
                unsafe { surface_loader.destroy_surface(surface, None) };
                return Err(RenderError::InitializationFailed(format!("Memory allocator: {:?}", e)));
            }
        };

        log::info!(
            "Vulkan device ready on {} (graphics family {}, present family {}, depth {:?})",
            physical.name(), physical.graphics_family, physical.present_family, depth_format
        );
        Ok(Self {
            allocator: ManuallyDrop::new(allocator),
            device,
            surface,
            surface_loader,
            physical,
            depth_format,
            vsync: config.vsync,
            instance,
        })
    }

    /// Name of the selected GPU
    pub fn device_name(&self) -> String {
        self.physical.name()
    }

    fn raw(&self) -> &ash::Device {
        &self.device.device
    }

    fn allocation_info(location: MemoryLocation) -> vk_mem::AllocationCreateInfo {
        match location {
            MemoryLocation::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            MemoryLocation::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            MemoryLocation::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            ManuallyDrop::drop(&mut self.allocator);
            self.surface_loader.destroy_surface(self.surface, None);
        }
        log::debug!("Vulkan device destroyed");
    }
}

/// Access mask and pipeline stage that produce or consume an image in `layout`
pub(crate) fn layout_access(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (vk::AccessFlags::empty(), vk::PipelineStageFlags::BOTTOM_OF_PIPE),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

fn allocation_error(size: u64, error: vk::Result) -> RenderError {
    RenderError::AllocationFailed { size, reason: format!("{:?}", error) }
}

impl GpuDevice for VulkanDevice {
    type Allocation = VulkanAllocation;

    fn create_buffer(&self, info: &vk::BufferCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Buffer, VulkanAllocation)> {
        let (buffer, allocation) = unsafe { self.allocator.create_buffer(info, &Self::allocation_info(location)) }
            .map_err(|e| allocation_error(info.size, e))?;
        Ok((buffer, VulkanAllocation { allocation, size: info.size }))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer, mut allocation: VulkanAllocation) {
        unsafe { self.allocator.destroy_buffer(buffer, &mut allocation.allocation) };
    }

    fn create_image(&self, info: &vk::ImageCreateInfo, location: MemoryLocation) -> RenderResult<(vk::Image, VulkanAllocation)> {
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4;
        let (image, allocation) = unsafe { self.allocator.create_image(info, &Self::allocation_info(location)) }
            .map_err(|e| allocation_error(size, e))?;
        Ok((image, VulkanAllocation { allocation, size }))
    }

    fn destroy_image(&self, image: vk::Image, mut allocation: VulkanAllocation) {
        unsafe { self.allocator.destroy_image(image, &mut allocation.allocation) };
    }

    fn write_allocation(&self, allocation: &mut VulkanAllocation, offset: u64, data: &[u8]) -> RenderResult<()> {
        if offset + data.len() as u64 > allocation.size {
            return Err(RenderError::InvalidArgument(format!(
                "write of {} bytes at offset {} exceeds allocation of {} bytes",
                data.len(), offset, allocation.size
            )));
        }
        unsafe {
            let mapped = self.allocator.map_memory(&mut allocation.allocation).map_err(RenderError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
            self.allocator.unmap_memory(&mut allocation.allocation);
        }
        Ok(())
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format, aspect: vk::ImageAspectFlags) -> RenderResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        unsafe { self.raw().create_image_view(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.raw().destroy_image_view(view, None) };
    }

    fn create_sampler(&self) -> RenderResult<vk::Sampler> {
        let anisotropy = self.physical.features.sampler_anisotropy == vk::TRUE;
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { self.physical.properties.limits.max_sampler_anisotropy.min(16.0) } else { 1.0 })
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(0.0);
        unsafe { self.raw().create_sampler(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.raw().destroy_sampler(sampler, None) };
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.raw().create_fence(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.raw().destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.raw().wait_for_fences(&[fence], true, u64::MAX) }.map_err(RenderError::Api)
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.raw().reset_fences(&[fence]) }.map_err(RenderError::Api)
    }

    fn fence_signaled(&self, fence: vk::Fence) -> RenderResult<bool> {
        unsafe { self.raw().get_fence_status(fence) }.map_err(RenderError::Api)
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.raw().create_semaphore(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.raw().destroy_semaphore(semaphore, None) };
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.physical.graphics_family);
        unsafe { self.raw().create_command_pool(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.raw().destroy_command_pool(pool, None) };
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe { self.raw().allocate_command_buffers(&allocate_info) }
            .map_err(RenderError::Api)?
            .into_iter()
            .next()
            .ok_or(RenderError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.raw().reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty()) }
            .map_err(RenderError::Api)
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer, one_time_submit: bool) -> RenderResult<()> {
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.raw().begin_command_buffer(command_buffer, &begin_info) }.map_err(RenderError::Api)
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe { self.raw().end_command_buffer(command_buffer) }.map_err(RenderError::Api)
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_values: &[vk::ClearValue],
    ) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent })
            .clear_values(clear_values);
        unsafe { self.raw().cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE) };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.raw().cmd_end_render_pass(command_buffer) };
    }

    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
        unsafe {
            self.raw().cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.raw().cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe { self.raw().cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline) };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.raw().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                first_set,
                sets,
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.raw().cmd_push_constants(command_buffer, layout, stages, offset, data) };
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.raw().cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]) };
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.raw().cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32) };
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        unsafe { self.raw().cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0) };
    }

    fn cmd_copy_buffer(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        unsafe { self.raw().cmd_copy_buffer(command_buffer, src, dst, &[region]) };
    }

    fn cmd_copy_buffer_to_image(&self, command_buffer: vk::CommandBuffer, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
        };
        unsafe {
            self.raw().cmd_copy_buffer_to_image(
                command_buffer,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn cmd_transition_image(&self, command_buffer: vk::CommandBuffer, transition: &ImageTransition) {
        let (src_access, src_stage) = layout_access(transition.old_layout);
        let (dst_access, dst_stage) = layout_access(transition.new_layout);
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(transition.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: transition.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        unsafe {
            self.raw().cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    fn queue_submit(&self, submit: &SubmitInfo) -> RenderResult<()> {
        let command_buffers = [submit.command_buffer];
        let (wait_semaphores, wait_stages): (Vec<_>, Vec<_>) = submit.wait.into_iter().unzip();
        let signal_semaphores: Vec<vk::Semaphore> = submit.signal.into_iter().collect();
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        unsafe { self.raw().queue_submit(self.device.graphics_queue, &[submit_info], submit.fence) }
            .map_err(RenderError::Api)
    }

    fn create_swapchain(&self, extent: vk::Extent2D, old: vk::SwapchainKHR) -> RenderResult<SwapchainInfo> {
        SwapchainBuilder {
            surface: self.surface,
            surface_loader: &self.surface_loader,
            swapchain_loader: &self.device.swapchain_loader,
            physical: &self.physical,
            vsync: self.vsync,
        }
        .build(extent, old)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.device.swapchain_loader.destroy_swapchain(swapchain, None) };
    }

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        let result = unsafe {
            self.device
                .swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn queue_present(&self, swapchain: vk::SwapchainKHR, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        let wait_semaphores = [wait];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let result = unsafe { self.device.swapchain_loader.queue_present(self.device.present_queue, &present_info) };
        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> RenderResult<vk::RenderPass> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(desc.color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(desc.final_color_layout)
            .build();
        let depth_attachment = vk::AttachmentDescription::builder()
            .format(desc.depth_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();
        let attachments = [color_attachment, depth_attachment];

        let color_refs = [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
        let depth_ref = vk::AttachmentReference { attachment: 1, layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL };
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .depth_stencil_attachment(&depth_ref)
            .build()];

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
        let mut dependencies = vec![vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .build()];
        // Sampled targets are read by later passes of the same command buffer
        if desc.final_color_layout == vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL {
            dependencies.push(
                vk::SubpassDependency::builder()
                    .src_subpass(0)
                    .dst_subpass(vk::SUBPASS_EXTERNAL)
                    .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                    .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
                    .dst_access_mask(vk::AccessFlags::SHADER_READ)
                    .build(),
            );
        }

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        unsafe { self.raw().create_render_pass(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.raw().destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, render_pass: vk::RenderPass, attachments: &[vk::ImageView], extent: vk::Extent2D) -> RenderResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.raw().create_framebuffer(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.raw().destroy_framebuffer(framebuffer, None) };
    }

    fn create_descriptor_set_layout(&self, bindings: &[vk::DescriptorSetLayoutBinding]) -> RenderResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        unsafe { self.raw().create_descriptor_set_layout(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.raw().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(&self, max_sets: u32, sizes: &[vk::DescriptorPoolSize]) -> RenderResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(sizes);
        unsafe { self.raw().create_descriptor_pool(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.raw().destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_set(&self, pool: vk::DescriptorPool, layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        unsafe { self.raw().allocate_descriptor_sets(&allocate_info) }
            .map_err(RenderError::Api)?
            .into_iter()
            .next()
            .ok_or(RenderError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    fn write_buffer_descriptor(&self, set: vk::DescriptorSet, binding: u32, buffer: vk::Buffer, range: u64) {
        let buffer_info = [vk::DescriptorBufferInfo { buffer, offset: 0, range }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.raw().update_descriptor_sets(&[write], &[]) };
    }

    fn write_image_descriptor(&self, set: vk::DescriptorSet, binding: u32, view: vk::ImageView, sampler: vk::Sampler) {
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();
        unsafe { self.raw().update_descriptor_sets(&[write], &[]) };
    }

    fn create_shader_module(&self, code: &[u32]) -> RenderResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.raw().create_shader_module(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.raw().destroy_shader_module(module, None) };
    }

    fn create_pipeline_layout(&self, set_layouts: &[vk::DescriptorSetLayout], push_constant_ranges: &[vk::PushConstantRange]) -> RenderResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe { self.raw().create_pipeline_layout(&create_info, None) }.map_err(RenderError::Api)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.raw().destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> RenderResult<vk::Pipeline> {
        let entry_point = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_module)
                .name(entry_point)
                .build(),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: desc.vertex_stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic so pipelines survive swapchain rebuilds
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_test)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe { self.raw().create_graphics_pipelines(desc.cache, &[pipeline_info], None) }
            .map_err(|(_, e)| RenderError::Api(e))?;
        pipelines.into_iter().next().ok_or(RenderError::Api(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.raw().destroy_pipeline(pipeline, None) };
    }

    fn create_pipeline_cache(&self, initial_data: &[u8]) -> RenderResult<vk::PipelineCache> {
        let create_info = vk::PipelineCacheCreateInfo::builder().initial_data(initial_data);
        match unsafe { self.raw().create_pipeline_cache(&create_info, None) } {
            Ok(cache) => Ok(cache),
            // A blob from another driver or device is rejected; start empty
            Err(e) if !initial_data.is_empty() => {
                log::warn!("Pipeline cache blob rejected ({:?}), starting empty", e);
                let empty = vk::PipelineCacheCreateInfo::builder();
                unsafe { self.raw().create_pipeline_cache(&empty, None) }.map_err(RenderError::Api)
            }
            Err(e) => Err(RenderError::Api(e)),
        }
    }

    fn pipeline_cache_data(&self, cache: vk::PipelineCache) -> RenderResult<Vec<u8>> {
        unsafe { self.raw().get_pipeline_cache_data(cache) }.map_err(RenderError::Api)
    }

    fn destroy_pipeline_cache(&self, cache: vk::PipelineCache) {
        unsafe { self.raw().destroy_pipeline_cache(cache, None) };
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.raw().device_wait_idle() }.map_err(RenderError::Api)
    }

    fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}
