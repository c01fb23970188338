//! The graphics backend seam.
//!
//! The runtime drives the GPU exclusively through [`GraphicsBackend`]; a
//! concrete device (GL, Metal, …) lives behind it in the platform layer.
//! Ids are plain `u32` with `0` meaning "none", matching the handle
//! sentinel the guest sees.
//!
//! [`RecordingBackend`] is the stub used by the test suite: it hands out
//! monotonically increasing ids and records every call.

use crate::error::{Error, Result};
use crate::glsl::UniformType;

pub type BackendId = u32;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    Rgba8,
    R8,
    Rg8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::R8 => 1,
            PixelFormat::Rg8 => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn byte_size(self) -> usize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// Vertex attribute formats the draw validator can map a
/// `{size, type, normalized}` triple onto.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum VertexFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    Byte4Norm,
    UByte4,
    UByte4Norm,
    Short2,
    Short2Norm,
    Short4,
    Short4Norm,
    UShort2Norm,
    UShort4Norm,
}

impl VertexFormat {
    pub fn byte_size(self) -> u32 {
        match self {
            VertexFormat::Float1 => 4,
            VertexFormat::Float2 => 8,
            VertexFormat::Float3 => 12,
            VertexFormat::Float4 => 16,
            VertexFormat::Byte4Norm | VertexFormat::UByte4 | VertexFormat::UByte4Norm => 4,
            VertexFormat::Short2 | VertexFormat::Short2Norm | VertexFormat::UShort2Norm => 4,
            VertexFormat::Short4 | VertexFormat::Short4Norm | VertexFormat::UShort4Norm => 8,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MinFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl MinFilter {
    pub fn uses_mipmaps(self) -> bool {
        match self {
            MinFilter::Nearest | MinFilter::Linear => false,
            _ => true,
        }
    }

    /// The non-mipmap filter to fall back on when only one mip level
    /// exists.
    pub fn without_mipmaps(self) -> MinFilter {
        match self {
            MinFilter::NearestMipmapNearest | MinFilter::NearestMipmapLinear => MinFilter::Nearest,
            MinFilter::LinearMipmapNearest | MinFilter::LinearMipmapLinear => MinFilter::Linear,
            other => other,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MagFilter {
    Nearest,
    Linear,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BufferDesc {
    pub size: usize,
    pub usage: BufferUsage,
}

#[derive(Clone, Debug)]
pub struct ImageDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub cube: bool,
    /// Immutable contents; cube images carry all six faces back to back.
    pub pixels: Option<&'a [u8]>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct SamplerDesc {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformMemberDesc {
    pub name: String,
    pub ty: UniformType,
    pub array_count: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniformBlockDesc {
    pub size: u32,
    pub members: Vec<UniformMemberDesc>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerKind {
    Tex2d,
    Cube,
}

#[derive(Clone, Debug)]
pub struct SamplerBindingDesc {
    pub name: String,
    pub kind: SamplerKind,
}

pub struct ShaderDesc<'a> {
    pub vs_source: &'a str,
    pub fs_source: &'a str,
    pub attr_names: &'a [String],
    /// std140 member layout per stage, slot 0 = vertex, slot 1 = fragment.
    pub uniform_blocks: [&'a UniformBlockDesc; 2],
    pub samplers: &'a [SamplerBindingDesc],
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NativeProgram {
    pub program: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VertexAttrDesc {
    pub location: u32,
    pub format: VertexFormat,
    pub buffer_slot: u32,
    pub offset: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct VertexLayoutDesc {
    /// Enabled attributes in location order.
    pub attrs: Vec<VertexAttrDesc>,
    /// Byte stride per buffer slot.
    pub strides: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct PipelineDesc<'a> {
    pub shader: BackendId,
    pub primitive: PrimitiveMode,
    pub index_type: Option<IndexType>,
    pub layout: &'a VertexLayoutDesc,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ImageBinding {
    pub unit: u32,
    pub view: BackendId,
    pub sampler: BackendId,
}

#[derive(Clone, Debug, Default)]
pub struct Bindings<'a> {
    pub vertex_buffers: &'a [BackendId],
    pub index_buffer: Option<BackendId>,
    pub index_offset: u32,
    pub images: &'a [ImageBinding],
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UniformSlot {
    Vertex,
    Fragment,
}

pub trait GraphicsBackend {
    fn make_buffer(&mut self, desc: &BufferDesc) -> Result<BackendId>;
    fn update_buffer(&mut self, id: BackendId, bytes: &[u8]) -> Result<()>;
    fn destroy_buffer(&mut self, id: BackendId);

    fn make_image(&mut self, desc: &ImageDesc<'_>) -> Result<BackendId>;
    fn destroy_image(&mut self, id: BackendId);
    fn make_view(&mut self, image: BackendId) -> Result<BackendId>;
    fn destroy_view(&mut self, id: BackendId);
    fn make_sampler(&mut self, desc: &SamplerDesc) -> Result<BackendId>;
    fn destroy_sampler(&mut self, id: BackendId);

    fn make_shader(&mut self, desc: &ShaderDesc<'_>) -> Result<BackendId>;
    fn destroy_shader(&mut self, id: BackendId);
    fn query_shader_valid(&mut self, id: BackendId) -> bool;
    fn query_native_program(&mut self, id: BackendId) -> NativeProgram;

    fn make_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<BackendId>;
    fn destroy_pipeline(&mut self, id: BackendId);

    fn apply_pipeline(&mut self, id: BackendId);
    fn apply_bindings(&mut self, bindings: &Bindings<'_>);
    fn apply_uniforms(&mut self, slot: UniformSlot, bytes: &[u8]);
    fn draw(&mut self, base: u32, count: u32, instances: u32);

    // out-of-band uniform writes for types the block upload can't carry
    fn get_uniform_location(&mut self, program: u32, name: &str) -> i32;
    fn uniform_1i(&mut self, loc: i32, value: i32);
    fn uniform_matrix_2fv(&mut self, loc: i32, count: u32, transpose: bool, values: &[f32]);
    fn uniform_matrix_3fv(&mut self, loc: i32, count: u32, transpose: bool, values: &[f32]);
}

//--------------------------------------------------------------------------------------------------

/// Everything the recording backend remembers about a call.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCall {
    MakeBuffer {
        id: BackendId,
        size: usize,
        usage: BufferUsage,
    },
    UpdateBuffer {
        id: BackendId,
        bytes: Vec<u8>,
    },
    DestroyBuffer(BackendId),
    MakeImage {
        id: BackendId,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        cube: bool,
        pixels: Option<Vec<u8>>,
    },
    DestroyImage(BackendId),
    MakeView {
        id: BackendId,
        image: BackendId,
    },
    DestroyView(BackendId),
    MakeSampler {
        id: BackendId,
        desc: SamplerDesc,
    },
    DestroySampler(BackendId),
    MakeShader {
        id: BackendId,
        vs_source: String,
        fs_source: String,
        attr_names: Vec<String>,
        uniform_blocks: [UniformBlockDesc; 2],
    },
    DestroyShader(BackendId),
    MakePipeline {
        id: BackendId,
        shader: BackendId,
        primitive: PrimitiveMode,
        index_type: Option<IndexType>,
        layout: VertexLayoutDesc,
    },
    DestroyPipeline(BackendId),
    ApplyPipeline(BackendId),
    ApplyBindings {
        vertex_buffers: Vec<BackendId>,
        index_buffer: Option<BackendId>,
        index_offset: u32,
        images: Vec<ImageBinding>,
    },
    ApplyUniforms {
        slot: UniformSlot,
        bytes: Vec<u8>,
    },
    Draw {
        base: u32,
        count: u32,
        instances: u32,
    },
    Uniform1i {
        loc: i32,
        value: i32,
    },
    UniformMatrix {
        loc: i32,
        dim: u32,
        count: u32,
        values: Vec<f32>,
    },
}

/// Call-recording stub backend for the test suite.
#[derive(Default)]
pub struct RecordingBackend {
    next_id: BackendId,
    pub calls: Vec<RecordedCall>,
    /// Force the next `make_pipeline`/`make_image` to fail; lets tests
    /// exercise the drop-and-log path.
    pub fail_next_pipeline: bool,
    pub fail_next_image: bool,
    locations: fxhash::FxHashMap<(u32, String), i32>,
    next_location: i32,
}

impl RecordingBackend {
    pub fn new() -> RecordingBackend {
        RecordingBackend {
            next_id: 0,
            calls: Vec::new(),
            fail_next_pipeline: false,
            fail_next_image: false,
            locations: fxhash::FxHashMap::default(),
            next_location: 100,
        }
    }

    fn fresh_id(&mut self) -> BackendId {
        self.next_id += 1;
        self.next_id
    }

    pub fn count(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn pipelines_created(&self) -> usize {
        self.count(|c| matches!(c, RecordedCall::MakePipeline { .. }))
    }

    pub fn draws(&self) -> Vec<(u32, u32, u32)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                RecordedCall::Draw {
                    base,
                    count,
                    instances,
                } => Some((*base, *count, *instances)),
                _ => None,
            })
            .collect()
    }
}

impl GraphicsBackend for RecordingBackend {
    fn make_buffer(&mut self, desc: &BufferDesc) -> Result<BackendId> {
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakeBuffer {
            id,
            size: desc.size,
            usage: desc.usage,
        });
        Ok(id)
    }

    fn update_buffer(&mut self, id: BackendId, bytes: &[u8]) -> Result<()> {
        self.calls.push(RecordedCall::UpdateBuffer {
            id,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroyBuffer(id));
    }

    fn make_image(&mut self, desc: &ImageDesc<'_>) -> Result<BackendId> {
        if self.fail_next_image {
            self.fail_next_image = false;
            return Err(Error::BackendFailed("image creation"));
        }
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakeImage {
            id,
            width: desc.width,
            height: desc.height,
            pixel_format: desc.pixel_format,
            cube: desc.cube,
            pixels: desc.pixels.map(|p| p.to_vec()),
        });
        Ok(id)
    }

    fn destroy_image(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroyImage(id));
    }

    fn make_view(&mut self, image: BackendId) -> Result<BackendId> {
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakeView { id, image });
        Ok(id)
    }

    fn destroy_view(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroyView(id));
    }

    fn make_sampler(&mut self, desc: &SamplerDesc) -> Result<BackendId> {
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakeSampler { id, desc: *desc });
        Ok(id)
    }

    fn destroy_sampler(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroySampler(id));
    }

    fn make_shader(&mut self, desc: &ShaderDesc<'_>) -> Result<BackendId> {
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakeShader {
            id,
            vs_source: desc.vs_source.to_string(),
            fs_source: desc.fs_source.to_string(),
            attr_names: desc.attr_names.to_vec(),
            uniform_blocks: [desc.uniform_blocks[0].clone(), desc.uniform_blocks[1].clone()],
        });
        Ok(id)
    }

    fn destroy_shader(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroyShader(id));
    }

    fn query_shader_valid(&mut self, _id: BackendId) -> bool {
        true
    }

    fn query_native_program(&mut self, id: BackendId) -> NativeProgram {
        NativeProgram { program: id }
    }

    fn make_pipeline(&mut self, desc: &PipelineDesc<'_>) -> Result<BackendId> {
        if self.fail_next_pipeline {
            self.fail_next_pipeline = false;
            return Err(Error::BackendFailed("pipeline creation"));
        }
        let id = self.fresh_id();
        self.calls.push(RecordedCall::MakePipeline {
            id,
            shader: desc.shader,
            primitive: desc.primitive,
            index_type: desc.index_type,
            layout: desc.layout.clone(),
        });
        Ok(id)
    }

    fn destroy_pipeline(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::DestroyPipeline(id));
    }

    fn apply_pipeline(&mut self, id: BackendId) {
        self.calls.push(RecordedCall::ApplyPipeline(id));
    }

    fn apply_bindings(&mut self, bindings: &Bindings<'_>) {
        self.calls.push(RecordedCall::ApplyBindings {
            vertex_buffers: bindings.vertex_buffers.to_vec(),
            index_buffer: bindings.index_buffer,
            index_offset: bindings.index_offset,
            images: bindings.images.to_vec(),
        });
    }

    fn apply_uniforms(&mut self, slot: UniformSlot, bytes: &[u8]) {
        self.calls.push(RecordedCall::ApplyUniforms {
            slot,
            bytes: bytes.to_vec(),
        });
    }

    fn draw(&mut self, base: u32, count: u32, instances: u32) {
        self.calls.push(RecordedCall::Draw {
            base,
            count,
            instances,
        });
    }

    fn get_uniform_location(&mut self, program: u32, name: &str) -> i32 {
        let next = &mut self.next_location;
        *self
            .locations
            .entry((program, name.to_string()))
            .or_insert_with(|| {
                *next += 1;
                *next
            })
    }

    fn uniform_1i(&mut self, loc: i32, value: i32) {
        self.calls.push(RecordedCall::Uniform1i { loc, value });
    }

    fn uniform_matrix_2fv(&mut self, loc: i32, count: u32, _transpose: bool, values: &[f32]) {
        self.calls.push(RecordedCall::UniformMatrix {
            loc,
            dim: 2,
            count,
            values: values.to_vec(),
        });
    }

    fn uniform_matrix_3fv(&mut self, loc: i32, count: u32, _transpose: bool, values: &[f32]) {
        self.calls.push(RecordedCall::UniformMatrix {
            loc,
            dim: 3,
            count,
            values: values.to_vec(),
        });
    }
}
