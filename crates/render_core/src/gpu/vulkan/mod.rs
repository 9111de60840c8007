//! Vulkan backend
//!
//! [`VulkanDevice`] owns the instance, surface, logical device and memory
//! allocator, and implements [`GpuDevice`](crate::gpu::GpuDevice) on top of them.

pub mod context;
pub mod device;
pub mod swapchain;

pub use device::{VulkanAllocation, VulkanDevice};
