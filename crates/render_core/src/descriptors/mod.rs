//! Descriptor set layouts and binding
//!
//! Set levels are fixed across every pipeline:
//!
//! | Set | Contents                     | Updated        |
//! |-----|------------------------------|----------------|
//! | 0   | [`crate::frame::FrameUniforms`] | every frame    |
//! | 1   | [`crate::renderer::SceneUniforms`] | when the scene changes |
//! | 2   | material bindings, reflected | per material   |

pub mod binder;
pub mod layouts;

pub use binder::DescriptorBinder;
pub use layouts::{DescriptorSetLayoutBuilder, FRAME_SET, SCENE_SET};
