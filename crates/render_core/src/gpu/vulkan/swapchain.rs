//! Swapchain creation
//!
//! Surface format, present mode, extent and image count are chosen by pure
//! functions over the surface's reported capabilities.

use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;

use super::context::PhysicalDeviceInfo;
use crate::gpu::{RenderError, RenderResult, SwapchainInfo};

/// Prefer 8-bit sRGB BGRA, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// FIFO under vsync; otherwise mailbox when available
///
/// FIFO is the only mode every implementation supports.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the surface's extent when it dictates one, else clamp the requested size
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: requested.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image more than the minimum, within the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Everything needed to build swapchains for one surface
pub(crate) struct SwapchainBuilder<'a> {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: &'a Surface,
    pub swapchain_loader: &'a SwapchainLoader,
    pub physical: &'a PhysicalDeviceInfo,
    pub vsync: bool,
}

impl SwapchainBuilder<'_> {
    /// Create a swapchain, retiring `old` when it is not null
    pub fn build(&self, requested: vk::Extent2D, old: vk::SwapchainKHR) -> RenderResult<SwapchainInfo> {
        let pdevice = self.physical.device;
        let caps = unsafe { self.surface_loader.get_physical_device_surface_capabilities(pdevice, self.surface) }
            .map_err(RenderError::Api)?;
        let formats = unsafe { self.surface_loader.get_physical_device_surface_formats(pdevice, self.surface) }
            .map_err(RenderError::Api)?;
        let modes = unsafe { self.surface_loader.get_physical_device_surface_present_modes(pdevice, self.surface) }
            .map_err(RenderError::Api)?;

        let format = choose_surface_format(&formats)
            .ok_or_else(|| RenderError::InitializationFailed("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&modes, self.vsync);
        let extent = choose_extent(&caps, requested);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidArgument("swapchain extent must be non-zero".to_string()));
        }

        let families = [self.physical.graphics_family, self.physical.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let handle = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }.map_err(RenderError::Api)?;
        let images = match unsafe { self.swapchain_loader.get_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { self.swapchain_loader.destroy_swapchain(handle, None) };
                return Err(RenderError::Api(e));
            }
        };

        log::debug!(
            "Swapchain {}x{}, {} images, {:?}, {:?}",
            extent.width, extent.height, images.len(), format.format, present_mode
        );
        Ok(SwapchainInfo { handle, images, format: format.format, extent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_count: u32, max_count: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [
            vk::SurfaceFormatKHR { format: vk::Format::R8G8B8A8_UNORM, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
            vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_SRGB, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR },
        ];
        assert_eq!(choose_surface_format(&formats).map(|sf| sf.format), Some(vk::Format::B8G8R8A8_SRGB));
        assert_eq!(choose_surface_format(&formats[..1]).map(|sf| sf.format), Some(vk::Format::R8G8B8A8_UNORM));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn vsync_forces_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes[..1], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_or_clamps() {
        let requested = vk::Extent2D { width: 8000, height: 600 };
        assert_eq!(choose_extent(&caps((800, 600), 2, 3), requested), vk::Extent2D { width: 800, height: 600 });
        assert_eq!(
            choose_extent(&caps((u32::MAX, u32::MAX), 2, 3), requested),
            vk::Extent2D { width: 4096, height: 600 }
        );
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(choose_image_count(&caps((1, 1), 2, 0)), 3);
        assert_eq!(choose_image_count(&caps((1, 1), 2, 2)), 2);
    }
}
