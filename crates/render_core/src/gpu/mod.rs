//! GPU backend seam
//!
//! Every device call the render core makes goes through [`GpuDevice`].
//! [`vulkan::VulkanDevice`] drives real hardware; [`headless::HeadlessDevice`]
//! is a null device with simulated synchronization state used by tests and
//! tools that never present.

pub mod device;
pub mod error;
pub mod headless;
pub mod vulkan;

pub use device::{
    AcquireOutcome, GpuDevice, GraphicsPipelineDesc, ImageTransition, MemoryLocation,
    PresentOutcome, RenderPassDesc, SubmitInfo, SwapchainInfo,
};
pub use error::{RenderError, RenderResult};
