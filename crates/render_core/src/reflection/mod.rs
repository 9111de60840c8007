//! Shader reflection
//!
//! Material binding layouts are derived from compiled SPIR-V rather than
//! written by hand. [`ShaderReflector`] reads a vertex/fragment pair and
//! produces a [`ShaderBindingLayout`] for the material set level.

pub mod layout;
pub mod reflector;
pub mod size;

pub use layout::{BindingKind, MaterialBinding, PushConstantRange, ShaderBindingLayout, SkipReason, SkippedResource};
pub use reflector::{ShaderReflector, MATERIAL_SET};

use crate::gpu::{RenderError, RenderResult};

/// SPIR-V magic number in host byte order
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Convert SPIR-V bytes read from disk into words
///
/// The byte length must be a multiple of four and the first word must be the
/// SPIR-V magic number.
pub fn spirv_words(bytes: &[u8]) -> RenderResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(RenderError::Reflection(format!(
            "SPIR-V length {} is not a multiple of 4", bytes.len()
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(RenderError::Reflection("missing SPIR-V magic number".to_string()));
    }
    log::debug!("[SHADER] Loaded {} SPIR-V words", words.len());
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_from_little_endian_bytes() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(spirv_words(&bytes).unwrap(), vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        assert!(spirv_words(&[0x03, 0x02, 0x23]).is_err());
        assert!(spirv_words(&[0, 0, 0, 0]).is_err());
    }
}
