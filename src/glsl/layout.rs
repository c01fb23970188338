//! std140 uniform layout.
//!
//! Offsets are computed once at link time and frozen into per-uniform
//! `(offset, stride, size)` records, so the hot-path setters are a single
//! bounds-checked range copy into the staging block.

/// Uniform types the translator admits into a uniform block. Samplers are
/// tracked separately.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UniformType {
    Float,
    Vec2,
    Vec3,
    Vec4,
    Int,
    IVec2,
    IVec3,
    IVec4,
    Mat2,
    Mat3,
    Mat4,
}

impl UniformType {
    pub fn parse(s: &str) -> Option<UniformType> {
        Some(match s {
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "int" => UniformType::Int,
            "ivec2" => UniformType::IVec2,
            "ivec3" => UniformType::IVec3,
            "ivec4" => UniformType::IVec4,
            "mat2" => UniformType::Mat2,
            "mat3" => UniformType::Mat3,
            "mat4" => UniformType::Mat4,
            _ => return None,
        })
    }

    pub fn glsl_name(self) -> &'static str {
        match self {
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::Int => "int",
            UniformType::IVec2 => "ivec2",
            UniformType::IVec3 => "ivec3",
            UniformType::IVec4 => "ivec4",
            UniformType::Mat2 => "mat2",
            UniformType::Mat3 => "mat3",
            UniformType::Mat4 => "mat4",
        }
    }

    /// std140 base alignment. vec3 aligns like vec4; matrices align their
    /// columns to vec4 boundaries.
    pub fn base_align(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 | UniformType::IVec2 => 8,
            UniformType::Vec3
            | UniformType::IVec3
            | UniformType::Vec4
            | UniformType::IVec4
            | UniformType::Mat2
            | UniformType::Mat3
            | UniformType::Mat4 => 16,
        }
    }

    /// std140 size of one element, column padding included for matrices.
    pub fn byte_size(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 4,
            UniformType::Vec2 | UniformType::IVec2 => 8,
            UniformType::Vec3 | UniformType::IVec3 => 12,
            UniformType::Vec4 | UniformType::IVec4 => 16,
            UniformType::Mat2 => 32,
            UniformType::Mat3 => 48,
            UniformType::Mat4 => 64,
        }
    }

    pub fn is_matrix(self) -> bool {
        match self {
            UniformType::Mat2 | UniformType::Mat3 | UniformType::Mat4 => true,
            _ => false,
        }
    }

    pub fn columns(self) -> u32 {
        match self {
            UniformType::Mat2 => 2,
            UniformType::Mat3 => 3,
            UniformType::Mat4 => 4,
            _ => 1,
        }
    }

    /// Bytes of actual data per matrix column (before vec4 padding).
    pub fn column_data_size(self) -> u32 {
        match self {
            UniformType::Mat2 => 8,
            UniformType::Mat3 => 12,
            UniformType::Mat4 => 16,
            _ => 0,
        }
    }

    pub fn is_integer(self) -> bool {
        match self {
            UniformType::Int | UniformType::IVec2 | UniformType::IVec3 | UniformType::IVec4 => true,
            _ => false,
        }
    }

    /// Scalar components per element (matrix padding excluded).
    pub fn components(self) -> u32 {
        match self {
            UniformType::Float | UniformType::Int => 1,
            UniformType::Vec2 | UniformType::IVec2 => 2,
            UniformType::Vec3 | UniformType::IVec3 => 3,
            UniformType::Vec4 | UniformType::IVec4 => 4,
            UniformType::Mat2 => 4,
            UniformType::Mat3 => 9,
            UniformType::Mat4 => 16,
        }
    }

    /// Whether the type may appear as a uniform array element. Array
    /// elements are padded to vec4 alignment, so smaller types are
    /// rejected rather than silently blown up.
    pub fn array_capable(self) -> bool {
        match self {
            UniformType::Vec4
            | UniformType::IVec4
            | UniformType::Mat2
            | UniformType::Mat3
            | UniformType::Mat4 => true,
            _ => false,
        }
    }
}

pub fn align_up(v: u32, align: u32) -> u32 {
    (v + align - 1) & !(align - 1)
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemberLayout {
    pub offset: u32,
    /// Element stride for arrays; element size for plain members.
    pub stride: u32,
    /// Total byte size of the member (all elements).
    pub size: u32,
}

/// Lays out `(type, array_count)` members in declaration order.
/// `array_count == 0` means the member was declared without brackets.
/// Returns the per-member layout and the block size, rounded up to 16.
pub fn layout_block(members: &[(UniformType, u32)]) -> (Vec<MemberLayout>, u32) {
    let mut cursor = 0u32;
    let mut out = Vec::with_capacity(members.len());
    for &(ty, array_count) in members {
        let (align, stride, size) = if array_count > 0 {
            let stride = align_up(ty.byte_size(), 16);
            (16, stride, stride * array_count)
        } else {
            (ty.base_align(), ty.byte_size(), ty.byte_size())
        };
        let offset = align_up(cursor, align);
        out.push(MemberLayout {
            offset,
            stride,
            size,
        });
        cursor = offset + size;
    }
    (out, align_up(cursor, 16))
}
