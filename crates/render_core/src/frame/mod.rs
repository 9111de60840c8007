//! Frames in flight
//!
//! A ring of [`FRAMES_IN_FLIGHT`] frame contexts. Each begin waits on the
//! fence of the slot it is about to reuse, which bounds how far the CPU can
//! run ahead of the GPU.

pub mod context;
pub mod ring;
pub mod uniforms;

pub use context::{FrameContext, SlotState};
pub use ring::{ActiveFrame, FrameBegin, FrameRing};
pub use uniforms::FrameUniforms;

/// Number of frame contexts in the ring
pub const FRAMES_IN_FLIGHT: usize = 3;
