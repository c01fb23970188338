//! Draw state and the recorded command queue.
//!
//! Draw calls snapshot the full draw state into a fixed-size queue; nothing
//! is validated at record time so transient guest ordering quirks don't
//! raise errors. Validation happens per command during the end-of-frame
//! flush, and an invalid command is skipped individually — the rest of the
//! frame still renders.

use smallvec::SmallVec;

use crate::backend::{
    Bindings, GraphicsBackend, ImageBinding, IndexType, PipelineDesc, PrimitiveMode,
    VertexAttrDesc, VertexFormat, VertexLayoutDesc,
};
use crate::buffer::BufferStore;
use crate::error::{Error, Result};
use crate::handle::{BufferHandle, ProgramHandle};
use crate::pipeline::PipelineCache;
use crate::pool::StagingPool;
use crate::program::ProgramStore;
use crate::texture::{TexTarget, TextureStore, TextureUnit, TEXTURE_UNITS};
use crate::webgl;

pub const MAX_VERTEX_ATTRIBS: usize = 16;
pub const MAX_QUEUED_COMMANDS: usize = 128;

#[derive(Copy, Clone, Debug, Default)]
pub struct AttribState {
    pub enabled: bool,
    pub size: u8,
    pub component_type: u32,
    pub normalized: bool,
    pub stride: u32,
    pub offset: u32,
    pub buffer: Option<BufferHandle>,
}

#[derive(Copy, Clone, Default)]
pub struct DrawState {
    pub program: Option<ProgramHandle>,
    pub attribs: [AttribState; MAX_VERTEX_ATTRIBS],
}

impl DrawState {
    pub fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program;
    }

    pub fn enable_attrib(&mut self, index: usize) -> Result<()> {
        self.attrib_mut(index)?.enabled = true;
        Ok(())
    }

    pub fn disable_attrib(&mut self, index: usize) -> Result<()> {
        self.attrib_mut(index)?.enabled = false;
        Ok(())
    }

    /// `vertexAttribPointer`: captures the currently bound array buffer as
    /// the attribute's source.
    pub fn attrib_pointer(
        &mut self,
        index: usize,
        size: u32,
        component_type: u32,
        normalized: bool,
        stride: u32,
        offset: u32,
        array_buffer: Option<BufferHandle>,
    ) -> Result<()> {
        if size < 1 || size > 4 {
            return Err(Error::InvalidValue("attribute size must be 1..4"));
        }
        let buffer = array_buffer.ok_or(Error::NoBufferBound)?;
        let attrib = self.attrib_mut(index)?;
        attrib.size = size as u8;
        attrib.component_type = component_type;
        attrib.normalized = normalized;
        attrib.stride = stride;
        attrib.offset = offset;
        attrib.buffer = Some(buffer);
        Ok(())
    }

    fn attrib_mut(&mut self, index: usize) -> Result<&mut AttribState> {
        self.attribs
            .get_mut(index)
            .ok_or(Error::InvalidValue("attribute index out of range"))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrawKind {
    Arrays,
    Elements,
}

/// Snapshot of the draw state plus the draw parameters.
#[derive(Clone)]
pub struct DrawCommand {
    pub state: DrawState,
    pub element_buffer: Option<BufferHandle>,
    pub units: [TextureUnit; TEXTURE_UNITS],
    pub kind: DrawKind,
    pub mode: u32,
    pub first: u32,
    pub count: u32,
    pub index_type: u32,
    pub index_offset: u32,
}

pub struct CommandQueue {
    commands: Vec<DrawCommand>,
    dropped: u64,
}

impl CommandQueue {
    pub fn new() -> CommandQueue {
        CommandQueue {
            commands: Vec::with_capacity(MAX_QUEUED_COMMANDS),
            dropped: 0,
        }
    }

    /// Queue-full drops the command; surfaced in debug builds only.
    pub fn push(&mut self, command: DrawCommand) {
        if self.commands.len() == MAX_QUEUED_COMMANDS {
            self.dropped += 1;
            if cfg!(debug_assertions) {
                warn!("draw queue full, dropping command #{}", self.dropped);
            }
            return;
        }
        self.commands.push(command);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn take(&mut self) -> Vec<DrawCommand> {
        std::mem::replace(&mut self.commands, Vec::with_capacity(MAX_QUEUED_COMMANDS))
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

pub fn primitive_mode(mode: u32) -> Result<PrimitiveMode> {
    Ok(match mode {
        webgl::POINTS => PrimitiveMode::Points,
        webgl::LINES => PrimitiveMode::Lines,
        webgl::LINE_LOOP => PrimitiveMode::LineLoop,
        webgl::LINE_STRIP => PrimitiveMode::LineStrip,
        webgl::TRIANGLES => PrimitiveMode::Triangles,
        webgl::TRIANGLE_STRIP => PrimitiveMode::TriangleStrip,
        webgl::TRIANGLE_FAN => PrimitiveMode::TriangleFan,
        other => return Err(Error::InvalidEnum(other)),
    })
}

pub fn index_type(ty: u32) -> Result<IndexType> {
    Ok(match ty {
        webgl::UNSIGNED_SHORT => IndexType::U16,
        webgl::UNSIGNED_INT => IndexType::U32,
        other => return Err(Error::InvalidEnum(other)),
    })
}

/// Maps a `{size, type, normalized}` triple onto a vertex format.
pub fn vertex_format(size: u8, component_type: u32, normalized: bool) -> Option<VertexFormat> {
    Some(match (component_type, size, normalized) {
        (webgl::FLOAT, 1, _) => VertexFormat::Float1,
        (webgl::FLOAT, 2, _) => VertexFormat::Float2,
        (webgl::FLOAT, 3, _) => VertexFormat::Float3,
        (webgl::FLOAT, 4, _) => VertexFormat::Float4,
        (webgl::BYTE, 4, true) => VertexFormat::Byte4Norm,
        (webgl::UNSIGNED_BYTE, 4, false) => VertexFormat::UByte4,
        (webgl::UNSIGNED_BYTE, 4, true) => VertexFormat::UByte4Norm,
        (webgl::SHORT, 2, false) => VertexFormat::Short2,
        (webgl::SHORT, 2, true) => VertexFormat::Short2Norm,
        (webgl::SHORT, 4, false) => VertexFormat::Short4,
        (webgl::SHORT, 4, true) => VertexFormat::Short4Norm,
        (webgl::UNSIGNED_SHORT, 2, true) => VertexFormat::UShort2Norm,
        (webgl::UNSIGNED_SHORT, 4, true) => VertexFormat::UShort4Norm,
        _ => return None,
    })
}

struct PreparedDraw {
    shader: u32,
    program: ProgramHandle,
    primitive: PrimitiveMode,
    index: Option<IndexType>,
    layout: VertexLayoutDesc,
    vertex_buffers: SmallVec<[u32; 8]>,
    index_buffer: Option<u32>,
    index_offset: u32,
    images: SmallVec<[ImageBinding; 8]>,
    base: u32,
    count: u32,
}

fn prepare(
    cmd: &DrawCommand,
    buffers: &BufferStore,
    programs: &ProgramStore,
    textures: &TextureStore,
) -> Result<PreparedDraw> {
    let program = cmd.state.program.ok_or(Error::NoProgramBound)?;
    let entry = programs.get(program)?;
    if !entry.linked || entry.backend_shader == 0 {
        return Err(Error::InvalidValue("program not linked"));
    }

    let primitive = primitive_mode(cmd.mode)?;

    // vertex layout: enabled attribs in location order, buffer slots
    // assigned by first appearance
    let mut slots: SmallVec<[(BufferHandle, u32, u32); 8]> = SmallVec::new();
    let mut attrs: Vec<VertexAttrDesc> = Vec::new();
    for (location, attrib) in cmd.state.attribs.iter().enumerate() {
        if !attrib.enabled {
            continue;
        }
        let format = vertex_format(attrib.size, attrib.component_type, attrib.normalized)
            .ok_or(Error::InvalidValue("unmappable attribute format"))?;
        let handle = attrib.buffer.ok_or(Error::NoBufferBound)?;
        let buffer = buffers.get(handle)?;
        if buffer.backend_id == 0 {
            return Err(Error::InvalidValue("attribute buffer has no backend mirror"));
        }
        let stride = if attrib.stride != 0 {
            attrib.stride
        } else {
            format.byte_size()
        };
        let slot = match slots.iter().position(|(h, _, _)| *h == handle) {
            Some(i) => {
                if slots[i].1 != stride {
                    return Err(Error::InvalidValue("conflicting strides on buffer slot"));
                }
                i
            }
            None => {
                slots.push((handle, stride, buffer.backend_id));
                slots.len() - 1
            }
        };
        attrs.push(VertexAttrDesc {
            location: location as u32,
            format,
            buffer_slot: slot as u32,
            offset: attrib.offset,
        });
    }

    let (index, index_buffer, base) = match cmd.kind {
        DrawKind::Arrays => (None, None, cmd.first),
        DrawKind::Elements => {
            let ty = index_type(cmd.index_type)?;
            let handle = cmd.element_buffer.ok_or(Error::NoBufferBound)?;
            let buffer = buffers.get(handle)?;
            if buffer.backend_id == 0 {
                return Err(Error::InvalidValue("index buffer has no backend mirror"));
            }
            (Some(ty), Some(buffer.backend_id), 0)
        }
    };

    // sampler → texture unit bindings; a missing texture is logged but
    // does not invalidate the draw
    let mut images: SmallVec<[ImageBinding; 8]> = SmallVec::new();
    for sampler in &entry.samplers {
        let target = match sampler.kind {
            crate::backend::SamplerKind::Tex2d => TexTarget::Tex2d,
            crate::backend::SamplerKind::Cube => TexTarget::Cube,
        };
        let bound = cmd.units[sampler.unit as usize].bound(target);
        match bound.and_then(|t| textures.get(t).ok()) {
            Some(tex) if tex.backend_view != 0 && tex.backend_sampler != 0 => {
                images.push(ImageBinding {
                    unit: sampler.unit,
                    view: tex.backend_view,
                    sampler: tex.backend_sampler,
                });
            }
            _ => debug!(
                "sampler {} has no texture on unit {}",
                sampler.name, sampler.unit
            ),
        }
    }

    Ok(PreparedDraw {
        shader: entry.backend_shader,
        program,
        primitive,
        index,
        layout: VertexLayoutDesc {
            attrs,
            strides: slots.iter().map(|(_, stride, _)| *stride).collect(),
        },
        vertex_buffers: slots.iter().map(|(_, _, id)| *id).collect(),
        index_buffer,
        index_offset: cmd.index_offset,
        images,
        base,
        count: cmd.count,
    })
}

/// End-of-frame flush: dirty texture uploads first, then every queued
/// command is validated, resolved against the pipeline cache and
/// submitted. The queue is cleared regardless of failures.
pub fn flush(
    queue: &mut CommandQueue,
    buffers: &BufferStore,
    programs: &mut ProgramStore,
    textures: &mut TextureStore,
    pipelines: &mut PipelineCache,
    texture_pool: &StagingPool,
    backend: &mut dyn GraphicsBackend,
) {
    textures.flush_uploads(texture_pool, backend);

    for cmd in queue.take() {
        let prepared = match prepare(&cmd, buffers, programs, textures) {
            Ok(p) => p,
            Err(e) => {
                warn!("draw command skipped: {}", e);
                continue;
            }
        };

        let pipeline = match pipelines.lookup_or_create(
            &PipelineDesc {
                shader: prepared.shader,
                primitive: prepared.primitive,
                index_type: prepared.index,
                layout: &prepared.layout,
            },
            backend,
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!("draw command skipped: {}", e);
                continue;
            }
        };

        backend.apply_pipeline(pipeline);

        // mat2/mat3 and sampler uniforms go through native locations,
        // right after the pipeline switch
        if let Ok(entry) = programs.get_mut(prepared.program) {
            entry.apply_out_of_band(backend);
        }

        backend.apply_bindings(&Bindings {
            vertex_buffers: &prepared.vertex_buffers,
            index_buffer: prepared.index_buffer,
            index_offset: prepared.index_offset,
            images: &prepared.images,
        });

        if let Ok(entry) = programs.get(prepared.program) {
            backend.apply_uniforms(crate::backend::UniformSlot::Vertex, &entry.vs_block.data);
            backend.apply_uniforms(crate::backend::UniformSlot::Fragment, &entry.fs_block.data);
        }

        backend.draw(prepared.base, prepared.count, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_format_mapping() {
        assert_eq!(
            vertex_format(3, webgl::FLOAT, false),
            Some(VertexFormat::Float3)
        );
        assert_eq!(
            vertex_format(4, webgl::UNSIGNED_BYTE, true),
            Some(VertexFormat::UByte4Norm)
        );
        // 3-component bytes have no packed equivalent
        assert_eq!(vertex_format(3, webgl::UNSIGNED_BYTE, true), None);
        // unnormalized unsigned short positions are unsupported
        assert_eq!(vertex_format(2, webgl::UNSIGNED_SHORT, false), None);
    }

    #[test]
    fn attrib_pointer_requires_array_binding() {
        let mut state = DrawState::default();
        assert_eq!(
            state
                .attrib_pointer(0, 3, webgl::FLOAT, false, 0, 0, None)
                .unwrap_err(),
            Error::NoBufferBound
        );
    }

    #[test]
    fn attrib_index_bounds() {
        let mut state = DrawState::default();
        assert!(state.enable_attrib(MAX_VERTEX_ATTRIBS - 1).is_ok());
        assert!(state.enable_attrib(MAX_VERTEX_ATTRIBS).is_err());
    }

    #[test]
    fn queue_drops_when_full() {
        let mut queue = CommandQueue::new();
        let cmd = DrawCommand {
            state: DrawState::default(),
            element_buffer: None,
            units: [TextureUnit::default(); TEXTURE_UNITS],
            kind: DrawKind::Arrays,
            mode: webgl::TRIANGLES,
            first: 0,
            count: 3,
            index_type: 0,
            index_offset: 0,
        };
        for _ in 0..MAX_QUEUED_COMMANDS + 5 {
            queue.push(cmd.clone());
        }
        assert_eq!(queue.len(), MAX_QUEUED_COMMANDS);
        let drained = queue.take();
        assert_eq!(drained.len(), MAX_QUEUED_COMMANDS);
        assert!(queue.is_empty());
    }

    #[test]
    fn primitive_mode_mapping() {
        assert_eq!(primitive_mode(webgl::TRIANGLES), Ok(PrimitiveMode::Triangles));
        assert_eq!(primitive_mode(webgl::LINE_LOOP), Ok(PrimitiveMode::LineLoop));
        assert_eq!(
            primitive_mode(webgl::TRIANGLE_FAN),
            Ok(PrimitiveMode::TriangleFan)
        );
        assert_eq!(primitive_mode(0x9999), Err(Error::InvalidEnum(0x9999)));
    }
}
