//! Logging utilities and the renderer diagnostics context
//!
//! The `log` facade carries every message. [`Diagnostics`] is handed to the
//! renderer explicitly and keeps counters for the recoverable and fatal
//! events a frame loop cares about, so callers and tests can observe them
//! without scraping log output.

use std::cell::Cell;

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter when `RUST_LOG` is unset
pub fn init_with_filter(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Events the renderer reports through [`Diagnostics`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEvent {
    /// The swapchain and its targets were rebuilt
    SwapchainRebuilt {
        /// New surface width
        width: u32,
        /// New surface height
        height: u32,
    },
    /// Image acquisition reported out-of-date and the frame was dropped
    FrameSkipped {
        /// Frame counter at the time of the skip
        frame: u64,
    },
    /// A descriptor binder added a pool
    DescriptorPoolGrown {
        /// Pools owned by the binder after growing
        pools: usize,
    },
    /// Shader reflection ignored a resource
    ReflectionSkipped {
        /// Resource name and reason
        detail: String,
    },
    /// An unrecoverable error surfaced to the caller
    Fatal {
        /// Error description
        message: String,
    },
}

/// Explicit diagnostics context
///
/// Single-threaded like the renderer that owns it.
#[derive(Debug)]
pub struct Diagnostics {
    target: String,
    swapchain_rebuilds: Cell<u64>,
    skipped_frames: Cell<u64>,
    pool_growths: Cell<u64>,
    reflection_skips: Cell<u64>,
    fatal_errors: Cell<u64>,
}

impl Diagnostics {
    /// Create a context that logs under the given target
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            swapchain_rebuilds: Cell::new(0),
            skipped_frames: Cell::new(0),
            pool_growths: Cell::new(0),
            reflection_skips: Cell::new(0),
            fatal_errors: Cell::new(0),
        }
    }

    /// Log target used for every event
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Record an event and log it at the matching level
    pub fn record(&self, event: DiagnosticEvent) {
        let target = self.target.as_str();
        match &event {
            DiagnosticEvent::SwapchainRebuilt { width, height } => {
                bump(&self.swapchain_rebuilds);
                log::info!(target: target, "Swapchain rebuilt at {}x{}", width, height);
            }
            DiagnosticEvent::FrameSkipped { frame } => {
                bump(&self.skipped_frames);
                log::debug!(target: target, "Frame {} skipped: swapchain out of date", frame);
            }
            DiagnosticEvent::DescriptorPoolGrown { pools } => {
                bump(&self.pool_growths);
                log::debug!(target: target, "Descriptor binder grew to {} pools", pools);
            }
            DiagnosticEvent::ReflectionSkipped { detail } => {
                bump(&self.reflection_skips);
                log::warn!(target: target, "[SHADER] Reflection skipped {}", detail);
            }
            DiagnosticEvent::Fatal { message } => {
                bump(&self.fatal_errors);
                log::error!(target: target, "Fatal render error: {}", message);
            }
        }
    }

    /// Number of swapchain rebuilds so far
    pub fn swapchain_rebuilds(&self) -> u64 {
        self.swapchain_rebuilds.get()
    }

    /// Number of frames dropped because acquisition was out of date
    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames.get()
    }

    /// Number of descriptor pools added after the first
    pub fn pool_growths(&self) -> u64 {
        self.pool_growths.get()
    }

    /// Number of resources ignored by shader reflection
    pub fn reflection_skips(&self) -> u64 {
        self.reflection_skips.get()
    }

    /// Number of fatal errors reported
    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors.get()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new("render_core")
    }
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_update_their_counters() {
        let diagnostics = Diagnostics::new("test");
        diagnostics.record(DiagnosticEvent::FrameSkipped { frame: 4 });
        diagnostics.record(DiagnosticEvent::FrameSkipped { frame: 5 });
        diagnostics.record(DiagnosticEvent::SwapchainRebuilt { width: 640, height: 480 });
        diagnostics.record(DiagnosticEvent::Fatal { message: "device lost".to_string() });

        assert_eq!(diagnostics.skipped_frames(), 2);
        assert_eq!(diagnostics.swapchain_rebuilds(), 1);
        assert_eq!(diagnostics.pool_growths(), 0);
        assert_eq!(diagnostics.fatal_errors(), 1);
        assert_eq!(diagnostics.target(), "test");
    }
}
