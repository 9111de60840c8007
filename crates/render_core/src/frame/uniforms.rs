//! Per-frame uniform block

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{to_cols_array, Mat4, Vec3};

/// Camera data shared by every draw of a frame, bound at set 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip
    pub projection: [[f32; 4]; 4],
    /// World to clip
    pub view_projection: [[f32; 4]; 4],
    /// Camera position in world space, w unused
    pub camera_position: [f32; 4],
    /// Seconds since start
    pub time: f32,
    /// std140 padding
    pub _padding: [f32; 3],
}

impl FrameUniforms {
    /// Block size in bytes
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Build from camera matrices
    pub fn new(view: &Mat4, projection: &Mat4, camera_position: &Vec3, time: f32) -> Self {
        let view_projection = projection * view;
        Self {
            view: to_cols_array(view),
            projection: to_cols_array(projection),
            view_projection: to_cols_array(&view_projection),
            camera_position: [camera_position.x, camera_position.y, camera_position.z, 1.0],
            time,
            _padding: [0.0; 3],
        }
    }
}

impl Default for FrameUniforms {
    fn default() -> Self {
        Self::new(&Mat4::identity(), &Mat4::identity(), &Vec3::zeros(), 0.0)
    }
}
