//! Foundation module - Core utilities and types
//!
//! - Math aliases used by the uniform structs
//! - Logging initialisation and the diagnostics context

pub mod math;
pub mod logging;
