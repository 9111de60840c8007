//! Math types shared with the GPU
//!
//! Camera math lives with the scene collaborators; this module only carries
//! the aliases and the column-major packing the uniform blocks need.

pub use nalgebra::{Vector3, Vector4, Matrix4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Pack a matrix into the column-major layout GLSL expects
pub fn to_cols_array(matrix: &Mat4) -> [[f32; 4]; 4] {
    let mut cols = [[0.0; 4]; 4];
    for (c, col) in cols.iter_mut().enumerate() {
        for (r, value) in col.iter_mut().enumerate() {
            *value = matrix[(r, c)];
        }
    }
    cols
}
