//! GPU resource ownership
//!
//! - [`allocator`]: buffers and images in generation-checked tables
//! - [`deletion_queue`]: deferred destruction in dependency order
//! - [`upload`]: blocking one-shot transfers

pub mod allocator;
pub mod deletion_queue;
pub mod upload;

pub use allocator::{
    AllocatedBuffer, AllocatedImage, AllocationStats, BufferHandle, ImageHandle, ImageSpec,
    ResourceAllocator,
};
pub use deletion_queue::{Deletion, DeletionQueue};
pub use upload::UploadContext;
