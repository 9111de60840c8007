//! Render error types

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by the render core
#[derive(Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// The memory allocator could not satisfy a request
    #[error("Allocation of {size} bytes failed: {reason}")]
    AllocationFailed {
        /// Requested size in bytes
        size: u64,
        /// Allocator message
        reason: String,
    },

    /// A caller passed a value the operation cannot use
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A handle refers to an object that was already destroyed
    #[error("Stale {kind} handle")]
    StaleHandle {
        /// Kind of object the handle names
        kind: &'static str,
    },

    /// The surface changed and the swapchain must be rebuilt
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// SPIR-V could not be parsed
    #[error("Shader reflection failed: {0}")]
    Reflection(String),

    /// Two stages declare different resource kinds at one slot
    #[error("Binding {slot} is declared as {first} and {second}")]
    ReflectionConflict {
        /// Binding slot
        slot: u32,
        /// Kind seen first
        first: &'static str,
        /// Conflicting kind
        second: &'static str,
    },

    /// The material layout has no binding at the slot
    #[error("No binding at slot {slot}")]
    UnknownBinding {
        /// Requested slot
        slot: u32,
    },

    /// The slot holds a different kind of resource
    #[error("Binding {slot} expects {expected}")]
    BindingKindMismatch {
        /// Requested slot
        slot: u32,
        /// Reflected kind
        expected: &'static str,
    },

    /// A uniform payload does not match the reflected block size
    #[error("Uniform at slot {slot} is {expected} bytes, got {actual}")]
    UniformSizeMismatch {
        /// Requested slot
        slot: u32,
        /// Reflected size
        expected: u64,
        /// Supplied size
        actual: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Device or context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RenderError {
    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
