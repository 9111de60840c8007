//! Uniform block sizes

use spirq::ty::{ScalarType, Type};

/// Byte size of a reflected type
///
/// Structs end at the furthest member (declared offset plus member size),
/// rounded up to the struct's alignment, so std140 padding between and after
/// members is counted. Arrays use their explicit stride when the module
/// declares one. Runtime arrays count as zero.
pub fn type_size(ty: &Type) -> u64 {
    match ty {
        Type::Struct(st) => {
            let mut end = 0;
            for member in &st.members {
                let offset = match member.offset {
                    Some(offset) => offset as u64,
                    None => round_up(end, type_align(&member.ty)),
                };
                end = end.max(offset + type_size(&member.ty));
            }
            round_up(end, type_align(ty))
        }
        Type::Array(array) => {
            let count = match array.nelement {
                Some(count) => count as u64,
                None => return 0,
            };
            match array.stride {
                Some(stride) => count * stride as u64,
                None => count * type_size(&array.element_ty),
            }
        }
        Type::Matrix(matrix) => ty.nbyte().map_or_else(
            || {
                let vector = &matrix.vector_ty;
                matrix.nvector as u64 * vector.nscalar as u64 * scalar_size(&vector.scalar_ty)
            },
            |size| size as u64,
        ),
        _ => ty.nbyte().map_or(0, |size| size as u64),
    }
}

/// Base alignment of a reflected type
///
/// Three component vectors align like four. Matrices and arrays align to
/// their stride when one is declared.
pub fn type_align(ty: &Type) -> u64 {
    match ty {
        Type::Scalar(scalar) => scalar_size(scalar).max(1),
        Type::Vector(vector) => {
            let components = if vector.nscalar == 3 { 4 } else { vector.nscalar as u64 };
            (components * scalar_size(&vector.scalar_ty)).max(1)
        }
        Type::Matrix(matrix) => match matrix.stride {
            Some(stride) => stride as u64,
            None => type_align(&Type::Vector(matrix.vector_ty.clone())),
        },
        Type::Array(array) => match array.stride {
            Some(stride) => stride as u64,
            None => type_align(&array.element_ty),
        },
        Type::Struct(st) => st.members.iter().map(|member| type_align(&member.ty)).max().unwrap_or(1),
        _ => 1,
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    match align {
        0 | 1 => value,
        align => value.div_ceil(align) * align,
    }
}

fn scalar_size(scalar: &ScalarType) -> u64 {
    match scalar {
        ScalarType::Float { bits } => *bits as u64 / 8,
        ScalarType::Integer { .. } | ScalarType::Boolean => 4,
        ScalarType::Void => 0,
    }
}

/// Byte range `[start, end)` covered by the members of a block
pub fn member_extent(ty: &Type) -> (u64, u64) {
    match ty {
        Type::Struct(st) if !st.members.is_empty() => {
            let start = st.members.iter()
                .map(|member| member.offset.map_or(0, |offset| offset as u64))
                .min()
                .unwrap_or(0);
            let end = st.members.iter()
                .map(|member| member.offset.map_or(0, |offset| offset as u64) + type_size(&member.ty))
                .max()
                .unwrap_or(0);
            (start, end)
        }
        _ => (0, type_size(ty)),
    }
}
