//! Platform layer
//!
//! Windowing through GLFW. The render core itself never touches the window
//! after the Vulkan surface has been created.

pub mod window;

pub use window::{Window, WindowError, WindowEvent, WindowResult};
