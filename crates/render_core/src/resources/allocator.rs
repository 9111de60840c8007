//! Buffer and image allocation
//!
//! The allocator is a pure ownership wrapper: it creates device objects
//! through the backend, stores them in slot maps and hands out keys. A key
//! carries a generation, so using it after the object is destroyed is
//! reported as [`RenderError::StaleHandle`] instead of touching freed memory.

use ash::vk;
use slotmap::SlotMap;

use crate::gpu::{GpuDevice, MemoryLocation, RenderError, RenderResult};

slotmap::new_key_type! {
    /// Handle to a buffer owned by the [`ResourceAllocator`]
    pub struct BufferHandle;
    /// Handle to an image owned by the [`ResourceAllocator`]
    pub struct ImageHandle;
}

/// Buffer and the memory bound to it
#[derive(Debug)]
pub struct AllocatedBuffer<A> {
    /// Vulkan buffer
    pub buffer: vk::Buffer,
    allocation: A,
    /// Size in bytes
    pub size: u64,
    /// Usage flags the buffer was created with
    pub usage: vk::BufferUsageFlags,
    /// Memory location
    pub location: MemoryLocation,
}

/// Description of a 2D image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
    /// Memory location
    pub location: MemoryLocation,
}

impl ImageSpec {
    /// Sampled color texture filled by a transfer
    pub fn texture(width: u32, height: u32, format: vk::Format) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Color attachment that is sampled afterwards
    pub fn color_target(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Depth attachment
    pub fn depth_target(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            location: MemoryLocation::GpuOnly,
        }
    }
}

/// Image, its memory and its default view
#[derive(Debug)]
pub struct AllocatedImage<A> {
    /// Vulkan image
    pub image: vk::Image,
    allocation: A,
    /// View over the whole image, created with it
    pub view: vk::ImageView,
    /// Texel format
    pub format: vk::Format,
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
}

/// Creation and destruction counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Buffers created
    pub buffers_created: u64,
    /// Buffers destroyed
    pub buffers_destroyed: u64,
    /// Images created
    pub images_created: u64,
    /// Images destroyed
    pub images_destroyed: u64,
}

impl AllocationStats {
    /// Buffers still alive
    pub fn live_buffers(&self) -> u64 {
        self.buffers_created - self.buffers_destroyed
    }

    /// Images still alive
    pub fn live_images(&self) -> u64 {
        self.images_created - self.images_destroyed
    }
}

/// Owner of every buffer and image the render core allocates
pub struct ResourceAllocator<D: GpuDevice> {
    buffers: SlotMap<BufferHandle, AllocatedBuffer<D::Allocation>>,
    images: SlotMap<ImageHandle, AllocatedImage<D::Allocation>>,
    stats: AllocationStats,
}

impl<D: GpuDevice> ResourceAllocator<D> {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            stats: AllocationStats::default(),
        }
    }

    /// Create a buffer
    ///
    /// Contents are not initialized.
    pub fn create_buffer(
        &mut self,
        device: &D,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<BufferHandle> {
        if size == 0 {
            return Err(RenderError::InvalidArgument("buffer size must be non-zero".to_string()));
        }

        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (buffer, allocation) = device.create_buffer(&info, location).map_err(|e| {
            log::error!("Buffer allocation of {} bytes failed: {}", size, e);
            e
        })?;

        self.stats.buffers_created += 1;
        log::trace!("Created buffer {:?} ({} bytes, {:?})", buffer, size, location);
        Ok(self.buffers.insert(AllocatedBuffer { buffer, allocation, size, usage, location }))
    }

    /// Destroy a buffer immediately
    pub fn destroy_buffer(&mut self, device: &D, handle: BufferHandle) -> RenderResult<()> {
        let allocated = self.buffers.remove(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        device.destroy_buffer(allocated.buffer, allocated.allocation);
        self.stats.buffers_destroyed += 1;
        Ok(())
    }

    /// Look up a buffer
    pub fn buffer(&self, handle: BufferHandle) -> RenderResult<&AllocatedBuffer<D::Allocation>> {
        self.buffers.get(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })
    }

    /// Copy bytes into a host-visible buffer
    pub fn write_buffer(&mut self, device: &D, handle: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let allocated = self.buffers.get_mut(handle).ok_or(RenderError::StaleHandle { kind: "buffer" })?;
        if !allocated.location.is_host_visible() {
            return Err(RenderError::invalid_operation("buffer memory is not host visible"));
        }
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > allocated.size) {
            return Err(RenderError::InvalidArgument(format!(
                "write of {} bytes at offset {} exceeds buffer of {} bytes",
                data.len(), offset, allocated.size
            )));
        }
        device.write_allocation(&mut allocated.allocation, offset, data)
    }

    /// Create an image and its default view
    pub fn create_image(&mut self, device: &D, spec: &ImageSpec) -> RenderResult<ImageHandle> {
        if spec.extent.width == 0 || spec.extent.height == 0 {
            return Err(RenderError::InvalidArgument(format!(
                "image extent {}x{} must be non-zero", spec.extent.width, spec.extent.height
            )));
        }

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width: spec.extent.width, height: spec.extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(spec.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(spec.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let (image, allocation) = device.create_image(&info, spec.location).map_err(|e| {
            log::error!("Image allocation {}x{} {:?} failed: {}", spec.extent.width, spec.extent.height, spec.format, e);
            e
        })?;

        let view = match device.create_image_view(image, spec.format, spec.aspect) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_image(image, allocation);
                return Err(e);
            }
        };

        self.stats.images_created += 1;
        log::trace!("Created image {:?} {}x{} {:?}", image, spec.extent.width, spec.extent.height, spec.format);
        Ok(self.images.insert(AllocatedImage {
            image,
            allocation,
            view,
            format: spec.format,
            extent: spec.extent,
            usage: spec.usage,
            aspect: spec.aspect,
        }))
    }

    /// Destroy an image and its default view immediately
    pub fn destroy_image(&mut self, device: &D, handle: ImageHandle) -> RenderResult<()> {
        let allocated = self.images.remove(handle).ok_or(RenderError::StaleHandle { kind: "image" })?;
        device.destroy_image_view(allocated.view);
        device.destroy_image(allocated.image, allocated.allocation);
        self.stats.images_destroyed += 1;
        Ok(())
    }

    /// Look up an image
    pub fn image(&self, handle: ImageHandle) -> RenderResult<&AllocatedImage<D::Allocation>> {
        self.images.get(handle).ok_or(RenderError::StaleHandle { kind: "image" })
    }

    /// Creation and destruction counts
    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    /// Destroy everything still alive
    ///
    /// Returns how many objects were left over. Anything destroyed here was
    /// never handed back by its owner, so it is logged as a leak.
    pub fn destroy_all(&mut self, device: &D) -> usize {
        let leaked = self.buffers.len() + self.images.len();
        if leaked > 0 {
            log::warn!("Destroying {} buffers and {} images that were never released", self.buffers.len(), self.images.len());
        }
        for (_, allocated) in self.buffers.drain() {
            device.destroy_buffer(allocated.buffer, allocated.allocation);
            self.stats.buffers_destroyed += 1;
        }
        for (_, allocated) in self.images.drain() {
            device.destroy_image_view(allocated.view);
            device.destroy_image(allocated.image, allocated.allocation);
            self.stats.images_destroyed += 1;
        }
        leaked
    }
}

impl<D: GpuDevice> Default for ResourceAllocator<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::headless::{HeadlessDevice, ObjectKind};

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let result = allocator.create_buffer(&device, 0, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly);
        assert!(matches!(result, Err(RenderError::InvalidArgument(_))));
        assert_eq!(device.created(ObjectKind::Buffer), 0);
    }

    #[test]
    fn destroyed_handle_is_stale() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let handle = allocator
            .create_buffer(&device, 256, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();

        allocator.destroy_buffer(&device, handle).unwrap();

        assert!(matches!(allocator.destroy_buffer(&device, handle), Err(RenderError::StaleHandle { .. })));
        assert!(allocator.buffer(handle).is_err());
        assert_eq!(device.destroyed(ObjectKind::Buffer), 1);
        assert!(device.violations().is_empty());
    }

    #[test]
    fn slot_reuse_does_not_revive_old_handles() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let first = allocator
            .create_buffer(&device, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();
        allocator.destroy_buffer(&device, first).unwrap();
        let second = allocator
            .create_buffer(&device, 16, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();

        assert_ne!(first, second);
        assert!(allocator.buffer(first).is_err());
        assert!(allocator.buffer(second).is_ok());
    }

    #[test]
    fn writes_are_range_checked() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let handle = allocator
            .create_buffer(&device, 8, vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::CpuToGpu)
            .unwrap();

        allocator.write_buffer(&device, handle, 0, &[7; 8]).unwrap();
        assert!(matches!(
            allocator.write_buffer(&device, handle, 4, &[0; 8]),
            Err(RenderError::InvalidArgument(_))
        ));

        let buffer = allocator.buffer(handle).unwrap().buffer;
        assert_eq!(device.buffer_contents(buffer).unwrap(), vec![7; 8]);
    }

    #[test]
    fn device_local_buffers_cannot_be_mapped() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let handle = allocator
            .create_buffer(&device, 64, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly)
            .unwrap();
        assert!(allocator.write_buffer(&device, handle, 0, &[1, 2, 3]).is_err());
    }

    #[test]
    fn image_owns_its_default_view() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        let handle = allocator
            .create_image(&device, &ImageSpec::texture(4, 4, vk::Format::R8G8B8A8_SRGB))
            .unwrap();

        assert_eq!(device.live(ObjectKind::ImageView), 1);
        let image = allocator.image(handle).unwrap();
        assert_eq!(image.extent, vk::Extent2D { width: 4, height: 4 });

        allocator.destroy_image(&device, handle).unwrap();
        assert_eq!(device.live(ObjectKind::ImageView), 0);
        assert_eq!(device.live(ObjectKind::Image), 0);
        assert_eq!(allocator.stats().live_images(), 0);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        device.fail_allocations(1);
        let result = allocator.create_buffer(&device, 64, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly);
        assert!(matches!(result, Err(RenderError::AllocationFailed { size: 64, .. })));
        assert_eq!(allocator.stats().buffers_created, 0);
    }

    #[test]
    fn destroy_all_reports_leaks() {
        let device = HeadlessDevice::new();
        let mut allocator = ResourceAllocator::new();
        allocator
            .create_buffer(&device, 64, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::GpuOnly)
            .unwrap();
        allocator
            .create_image(&device, &ImageSpec::texture(1, 1, vk::Format::R8G8B8A8_SRGB))
            .unwrap();

        assert_eq!(allocator.destroy_all(&device), 2);
        assert_eq!(device.total_live(), 0);
        assert_eq!(allocator.stats().live_buffers(), 0);
    }
}
