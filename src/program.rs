//! Program store.
//!
//! Linking is where the real shader work happens: both stages run through
//! the translator, the cross-stage uniform union is computed, std140
//! layouts are frozen into per-uniform records, and the backend shader is
//! built and introspected. Link failures are recorded in the info-log and
//! queried by the guest; they are never raised as errors.

use smallvec::SmallVec;

use crate::backend::{
    BackendId, GraphicsBackend, SamplerBindingDesc, SamplerKind, ShaderDesc, UniformBlockDesc,
    UniformMemberDesc,
};
use crate::error::{Error, Result};
use crate::glsl::{self, layout_block, Stage, UniformDecl, UniformType};
use crate::handle::{HandleTable, ProgramHandle, ProgramTag, ShaderHandle, MAX_PROGRAMS};
use crate::shader::{ShaderKind, ShaderStore, MAX_INFO_LOG};

/// Sentinel for "inactive or optimized-out" locations.
pub const LOCATION_NONE: i32 = -1;

const LOC_INDEX_MASK: i32 = 0xffff;
const LOC_STAGE_FS: i32 = 1 << 16;
const LOC_KIND_SAMPLER: i32 = 1 << 17;

fn encode_location(sampler: bool, stage: Stage, index: usize) -> i32 {
    let mut loc = index as i32 & LOC_INDEX_MASK;
    if stage == Stage::Fragment {
        loc |= LOC_STAGE_FS;
    }
    if sampler {
        loc |= LOC_KIND_SAMPLER;
    }
    loc
}

#[derive(Clone, Debug)]
pub struct UniformInfo {
    pub name: String,
    pub ty: UniformType,
    pub array_count: u32,
    pub offset: u32,
    pub stride: u32,
    pub size: u32,
}

/// One stage's share of the program uniforms plus its staging bytes.
#[derive(Default)]
pub struct UniformBlock {
    pub uniforms: Vec<UniformInfo>,
    pub data: Vec<u8>,
}

impl UniformBlock {
    fn from_decls(decls: &[UniformDecl]) -> UniformBlock {
        let shapes: Vec<(UniformType, u32)> =
            decls.iter().map(|d| (d.ty, d.array_count)).collect();
        let (layouts, size) = layout_block(&shapes);
        let uniforms = decls
            .iter()
            .zip(layouts.iter())
            .map(|(d, l)| UniformInfo {
                name: d.name.clone(),
                ty: d.ty,
                array_count: d.array_count,
                offset: l.offset,
                stride: l.stride,
                size: l.size,
            })
            .collect();
        UniformBlock {
            uniforms,
            data: vec![0u8; size as usize],
        }
    }

    pub fn find(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    fn to_desc(&self) -> UniformBlockDesc {
        UniformBlockDesc {
            size: self.data.len() as u32,
            members: self
                .uniforms
                .iter()
                .map(|u| UniformMemberDesc {
                    name: u.name.clone(),
                    ty: u.ty,
                    array_count: u.array_count,
                    offset: u.offset,
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SamplerInfo {
    pub name: String,
    pub kind: SamplerKind,
    pub stage: Stage,
    /// Texture unit the guest assigned via `uniform1i`; starts at 0.
    pub unit: u32,
    pub dirty: bool,
    pub native_loc: i32,
}

/// mat2/mat3 uniforms bypass the block upload: some backends only accept
/// mat4 columns there, so these are written through native locations
/// resolved at link.
#[derive(Clone, Debug)]
pub struct MatrixUniform {
    pub name: String,
    pub ty: UniformType,
    pub stage: Stage,
    pub native_loc: i32,
}

pub struct ProgramEntry {
    pub vs: Option<ShaderHandle>,
    pub fs: Option<ShaderHandle>,
    pub linked: bool,
    pub info_log: String,
    pub translated_vs: String,
    pub translated_fs: String,
    pub attributes: Vec<String>,
    pub vs_block: UniformBlock,
    pub fs_block: UniformBlock,
    pub samplers: Vec<SamplerInfo>,
    pub matrix_uniforms: Vec<MatrixUniform>,
    pub backend_shader: BackendId,
    pub native_program: u32,
}

impl ProgramEntry {
    fn new() -> ProgramEntry {
        ProgramEntry {
            vs: None,
            fs: None,
            linked: false,
            info_log: String::new(),
            translated_vs: String::new(),
            translated_fs: String::new(),
            attributes: Vec::new(),
            vs_block: UniformBlock::default(),
            fs_block: UniformBlock::default(),
            samplers: Vec::new(),
            matrix_uniforms: Vec::new(),
            backend_shader: 0,
            native_program: 0,
        }
    }

    fn block(&self, stage: Stage) -> &UniformBlock {
        match stage {
            Stage::Vertex => &self.vs_block,
            Stage::Fragment => &self.fs_block,
        }
    }

    /// Writes the out-of-band uniforms (dirty samplers, mat2/mat3 values
    /// de-padded from staging) through native locations. Called by the
    /// flush right after the pipeline is applied.
    pub(crate) fn apply_out_of_band(&mut self, backend: &mut dyn GraphicsBackend) {
        for m in &self.matrix_uniforms {
            if m.native_loc == LOCATION_NONE {
                continue;
            }
            let block = match m.stage {
                Stage::Vertex => &self.vs_block,
                Stage::Fragment => &self.fs_block,
            };
            let info = match block.find(&m.name) {
                Some(i) => i,
                None => continue,
            };
            let dim = m.ty.columns();
            let count = info.array_count.max(1);
            let elem_stride = if info.array_count > 0 {
                info.stride
            } else {
                info.ty.byte_size()
            };
            let mut values: Vec<f32> = Vec::with_capacity((dim * dim * count) as usize);
            for e in 0..count {
                for col in 0..dim {
                    let at = (info.offset + e * elem_stride + col * 16) as usize;
                    for i in 0..dim as usize {
                        values.push(bytemuck::pod_read_unaligned::<f32>(
                            &block.data[at + i * 4..at + i * 4 + 4],
                        ));
                    }
                }
            }
            match dim {
                2 => backend.uniform_matrix_2fv(m.native_loc, count, false, &values),
                3 => backend.uniform_matrix_3fv(m.native_loc, count, false, &values),
                _ => unreachable!(),
            }
        }

        for s in self.samplers.iter_mut() {
            if s.dirty && s.native_loc != LOCATION_NONE {
                backend.uniform_1i(s.native_loc, s.unit as i32);
                s.dirty = false;
            }
        }
    }
}

/// A value arriving through one of the `uniform*` entry points.
pub enum UniformValue<'a> {
    Floats { values: &'a [f32], components: u32 },
    Ints { values: &'a [i32], components: u32 },
    Matrix { values: &'a [f32], dim: u32 },
}

pub struct ProgramStore {
    table: HandleTable<ProgramEntry, ProgramTag>,
}

impl ProgramStore {
    pub fn new() -> ProgramStore {
        ProgramStore {
            table: HandleTable::new(MAX_PROGRAMS),
        }
    }

    pub fn create(&mut self) -> Result<ProgramHandle> {
        self.table.alloc(ProgramEntry::new())
    }

    pub fn attach(
        &mut self,
        program: ProgramHandle,
        shader: ShaderHandle,
        kind: ShaderKind,
    ) -> Result<()> {
        let entry = self.table.get_mut(program)?;
        match kind {
            ShaderKind::Vertex => entry.vs = Some(shader),
            ShaderKind::Fragment => entry.fs = Some(shader),
        }
        entry.linked = false;
        Ok(())
    }

    pub fn link(
        &mut self,
        program: ProgramHandle,
        shaders: &ShaderStore,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let entry = self.table.get_mut(program)?;

        entry.info_log.clear();
        entry.linked = false;
        if entry.backend_shader != 0 {
            backend.destroy_shader(entry.backend_shader);
            entry.backend_shader = 0;
            entry.native_program = 0;
        }

        let fail = |entry: &mut ProgramEntry, msg: &str| {
            entry.info_log = msg.to_string();
            debug!("link failed: {}", msg);
        };

        // resolve both stages
        let vs_source = match entry.vs.and_then(|h| shaders.get(h).ok()) {
            Some(s) if s.compiled => s.source.clone(),
            Some(_) => {
                fail(entry, "shader not compiled");
                return Ok(());
            }
            None => {
                fail(entry, "vertex shader missing");
                return Ok(());
            }
        };
        let fs_source = match entry.fs.and_then(|h| shaders.get(h).ok()) {
            Some(s) if s.compiled => s.source.clone(),
            Some(_) => {
                fail(entry, "shader not compiled");
                return Ok(());
            }
            None => {
                fail(entry, "fragment shader missing");
                return Ok(());
            }
        };

        // discovery pass: per-stage declarations
        let vs_scan = match glsl::translate(&vs_source, Stage::Vertex, None) {
            Ok(t) => t,
            Err(e) => {
                fail(entry, &format!("vertex shader: {}", e));
                return Ok(());
            }
        };
        let fs_scan = match glsl::translate(&fs_source, Stage::Fragment, None) {
            Ok(t) => t,
            Err(e) => {
                fail(entry, &format!("fragment shader: {}", e));
                return Ok(());
            }
        };

        // cross-stage union, then the emit pass filtered per stage
        let union = match glsl::merge_uniforms(&vs_scan.declared, &fs_scan.declared) {
            Ok(u) => u,
            Err(msg) => {
                fail(entry, &msg);
                return Ok(());
            }
        };
        let vs_emit = match glsl::translate(&vs_source, Stage::Vertex, Some(&union)) {
            Ok(t) => t,
            Err(e) => {
                fail(entry, &format!("vertex shader: {}", e));
                return Ok(());
            }
        };
        let fs_emit = match glsl::translate(&fs_source, Stage::Fragment, Some(&union)) {
            Ok(t) => t,
            Err(e) => {
                fail(entry, &format!("fragment shader: {}", e));
                return Ok(());
            }
        };

        if vs_emit.samplers.len() + fs_emit.samplers.len() > glsl::MAX_SAMPLERS {
            fail(entry, "too many samplers");
            return Ok(());
        }

        entry.vs_block = UniformBlock::from_decls(&vs_emit.emitted);
        entry.fs_block = UniformBlock::from_decls(&fs_emit.emitted);
        entry.attributes = vs_emit.attributes.clone();

        entry.samplers = vs_emit
            .samplers
            .iter()
            .map(|s| (s, Stage::Vertex))
            .chain(fs_emit.samplers.iter().map(|s| (s, Stage::Fragment)))
            .map(|(s, stage)| SamplerInfo {
                name: s.name.clone(),
                kind: s.kind,
                stage,
                unit: 0,
                dirty: true,
                native_loc: LOCATION_NONE,
            })
            .collect();

        entry.matrix_uniforms = entry
            .vs_block
            .uniforms
            .iter()
            .map(|u| (u, Stage::Vertex))
            .chain(entry.fs_block.uniforms.iter().map(|u| (u, Stage::Fragment)))
            .filter(|(u, _)| u.ty == UniformType::Mat2 || u.ty == UniformType::Mat3)
            .map(|(u, stage)| MatrixUniform {
                name: u.name.clone(),
                ty: u.ty,
                stage,
                native_loc: LOCATION_NONE,
            })
            .collect();

        entry.translated_vs = vs_emit.source;
        entry.translated_fs = fs_emit.source;

        // backend shader
        let sampler_descs: SmallVec<[SamplerBindingDesc; 12]> = entry
            .samplers
            .iter()
            .map(|s| SamplerBindingDesc {
                name: s.name.clone(),
                kind: s.kind,
            })
            .collect();
        let vs_desc = entry.vs_block.to_desc();
        let fs_desc = entry.fs_block.to_desc();
        let shader_id = match backend.make_shader(&ShaderDesc {
            vs_source: &entry.translated_vs,
            fs_source: &entry.translated_fs,
            attr_names: &entry.attributes,
            uniform_blocks: [&vs_desc, &fs_desc],
            samplers: &sampler_descs,
        }) {
            Ok(id) => id,
            Err(e) => {
                fail(entry, &format!("backend shader creation failed: {}", e));
                return Ok(());
            }
        };
        if !backend.query_shader_valid(shader_id) {
            backend.destroy_shader(shader_id);
            fail(entry, "backend rejected shader");
            return Ok(());
        }

        entry.backend_shader = shader_id;
        entry.native_program = backend.query_native_program(shader_id).program;
        for m in entry.matrix_uniforms.iter_mut() {
            m.native_loc = backend.get_uniform_location(entry.native_program, &m.name);
        }
        for s in entry.samplers.iter_mut() {
            s.native_loc = backend.get_uniform_location(entry.native_program, &s.name);
        }
        entry.linked = true;
        debug!(
            "program {:?} linked: {} attrs, {}+{} uniform bytes, {} samplers",
            program,
            entry.attributes.len(),
            entry.vs_block.data.len(),
            entry.fs_block.data.len(),
            entry.samplers.len()
        );
        Ok(())
    }

    pub fn delete(
        &mut self,
        program: ProgramHandle,
        backend: &mut dyn GraphicsBackend,
    ) -> Result<()> {
        let entry = self.table.free(program)?;
        if entry.backend_shader != 0 {
            backend.destroy_shader(entry.backend_shader);
        }
        Ok(())
    }

    pub fn link_status(&self, program: ProgramHandle) -> Result<bool> {
        Ok(self.table.get(program)?.linked)
    }

    pub fn info_log(&self, program: ProgramHandle) -> Result<&str> {
        let log = self.table.get(program)?.info_log.as_str();
        Ok(&log[..log.len().min(MAX_INFO_LOG)])
    }

    pub fn get(&self, program: ProgramHandle) -> Result<&ProgramEntry> {
        self.table.get(program)
    }

    pub fn get_mut(&mut self, program: ProgramHandle) -> Result<&mut ProgramEntry> {
        self.table.get_mut(program)
    }

    pub fn is_valid(&self, program: ProgramHandle) -> bool {
        self.table.is_valid(program)
    }

    /// Searches VS uniforms, FS uniforms, then samplers.
    pub fn uniform_location(&self, program: ProgramHandle, name: &str) -> Result<i32> {
        let entry = self.table.get(program)?;
        if let Some(i) = entry.vs_block.uniforms.iter().position(|u| u.name == name) {
            return Ok(encode_location(false, Stage::Vertex, i));
        }
        if let Some(i) = entry.fs_block.uniforms.iter().position(|u| u.name == name) {
            return Ok(encode_location(false, Stage::Fragment, i));
        }
        if let Some(i) = entry.samplers.iter().position(|s| s.name == name) {
            return Ok(encode_location(true, entry.samplers[i].stage, i));
        }
        Ok(LOCATION_NONE)
    }

    pub fn attrib_location(&self, program: ProgramHandle, name: &str) -> Result<i32> {
        let entry = self.table.get(program)?;
        Ok(entry
            .attributes
            .iter()
            .position(|a| a == name)
            .map(|i| i as i32)
            .unwrap_or(LOCATION_NONE))
    }

    /// Writes a uniform through an encoded location. Writes land in every
    /// stage block declaring the name, so cross-stage uniforms stay
    /// mirrored. A sentinel location is a no-op, per WebGL.
    pub fn set_uniform(
        &mut self,
        program: ProgramHandle,
        location: i32,
        value: UniformValue<'_>,
    ) -> Result<()> {
        if location == LOCATION_NONE {
            return Ok(());
        }
        let entry = self.table.get_mut(program)?;

        if location & LOC_KIND_SAMPLER != 0 {
            let index = (location & LOC_INDEX_MASK) as usize;
            let sampler = entry
                .samplers
                .get_mut(index)
                .ok_or(Error::InvalidValue("unknown sampler location"))?;
            let unit = match value {
                UniformValue::Ints { values, components: 1 } if !values.is_empty() => values[0],
                _ => return Err(Error::InvalidValue("sampler uniforms take a single int")),
            };
            if unit < 0 || unit as usize >= crate::texture::TEXTURE_UNITS {
                return Err(Error::InvalidValue("texture unit out of range"));
            }
            sampler.unit = unit as u32;
            sampler.dirty = true;
            return Ok(());
        }

        let stage = if location & LOC_STAGE_FS != 0 {
            Stage::Fragment
        } else {
            Stage::Vertex
        };
        let index = (location & LOC_INDEX_MASK) as usize;
        let name = entry
            .block(stage)
            .uniforms
            .get(index)
            .ok_or(Error::InvalidValue("unknown uniform location"))?
            .name
            .clone();

        write_shared_uniform(&mut entry.vs_block, &name, &value)?;
        write_shared_uniform(&mut entry.fs_block, &name, &value)?;
        Ok(())
    }

    pub fn clear(&mut self, backend: &mut dyn GraphicsBackend) {
        self.table.clear(|entry| {
            if entry.backend_shader != 0 {
                backend.destroy_shader(entry.backend_shader);
            }
        });
    }
}

fn write_shared_uniform(
    block: &mut UniformBlock,
    name: &str,
    value: &UniformValue<'_>,
) -> Result<()> {
    let info = match block.find(name) {
        Some(i) => i.clone(),
        None => return Ok(()),
    };
    match *value {
        UniformValue::Floats { values, components } => {
            if info.ty.is_matrix() || info.ty.is_integer() || info.ty.components() != components {
                return Err(Error::InvalidValue("uniform type mismatch"));
            }
            write_vector_elements(block, &info, bytemuck::cast_slice(values), components)
        }
        UniformValue::Ints { values, components } => {
            if info.ty.is_matrix() || !info.ty.is_integer() || info.ty.components() != components {
                return Err(Error::InvalidValue("uniform type mismatch"));
            }
            write_vector_elements(block, &info, bytemuck::cast_slice(values), components)
        }
        UniformValue::Matrix { values, dim } => {
            if info.ty.columns() != dim || !info.ty.is_matrix() {
                return Err(Error::InvalidValue("uniform type mismatch"));
            }
            let floats_per = (dim * dim) as usize;
            let elements = if info.array_count > 0 {
                (values.len() / floats_per).min(info.array_count as usize)
            } else {
                1
            };
            if values.len() < floats_per * elements.max(1) {
                return Err(Error::InvalidValue("not enough matrix data"));
            }
            let elem_stride = if info.array_count > 0 {
                info.stride
            } else {
                info.ty.byte_size()
            };
            for e in 0..elements {
                for col in 0..dim {
                    let src = &values[e * floats_per + (col * dim) as usize..]
                        [..dim as usize];
                    let at = (info.offset + e as u32 * elem_stride + col * 16) as usize;
                    block.data[at..at + dim as usize * 4]
                        .copy_from_slice(bytemuck::cast_slice(src));
                }
            }
            Ok(())
        }
    }
}

fn write_vector_elements(
    block: &mut UniformBlock,
    info: &UniformInfo,
    bytes: &[u8],
    components: u32,
) -> Result<()> {
    let elem_bytes = (components * 4) as usize;
    if bytes.len() < elem_bytes {
        return Err(Error::InvalidValue("not enough uniform data"));
    }
    let elements = if info.array_count > 0 {
        (bytes.len() / elem_bytes).min(info.array_count as usize)
    } else {
        1
    };
    for e in 0..elements {
        let at = (info.offset + e as u32 * info.stride) as usize;
        block.data[at..at + elem_bytes]
            .copy_from_slice(&bytes[e * elem_bytes..(e + 1) * elem_bytes]);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    fn floats(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|c| bytemuck::pod_read_unaligned::<f32>(c))
            .collect()
    }

    fn linked_program(
        vs_src: &str,
        fs_src: &str,
    ) -> (ProgramStore, ProgramHandle, RecordingBackend) {
        let mut shaders = ShaderStore::new();
        let mut programs = ProgramStore::new();
        let mut backend = RecordingBackend::new();

        let vs = shaders.create(ShaderKind::Vertex).unwrap();
        shaders.set_source(vs, vs_src).unwrap();
        shaders.compile(vs).unwrap();
        let fs = shaders.create(ShaderKind::Fragment).unwrap();
        shaders.set_source(fs, fs_src).unwrap();
        shaders.compile(fs).unwrap();

        let p = programs.create().unwrap();
        programs.attach(p, vs, ShaderKind::Vertex).unwrap();
        programs.attach(p, fs, ShaderKind::Fragment).unwrap();
        programs.link(p, &shaders, &mut backend).unwrap();
        (programs, p, backend)
    }

    #[test]
    fn link_without_shaders_sets_log() {
        let shaders = ShaderStore::new();
        let mut programs = ProgramStore::new();
        let mut backend = RecordingBackend::new();
        let p = programs.create().unwrap();
        programs.link(p, &shaders, &mut backend).unwrap();
        assert!(!programs.link_status(p).unwrap());
        assert_eq!(programs.info_log(p).unwrap(), "vertex shader missing");
    }

    #[test]
    fn uniform_union_and_mirroring() {
        let (mut programs, p, _backend) = linked_program(
            "uniform mat4 M;\nattribute vec3 position;\nvoid main(){ gl_Position = M * vec4(position, 1.0); }\n",
            "uniform vec3 C;\nuniform mat4 M;\nvoid main(){ gl_FragColor = M * vec4(C, 1.0); }\n",
        );
        assert!(programs.link_status(p).unwrap());

        let loc = programs.uniform_location(p, "M").unwrap();
        assert_ne!(loc, LOCATION_NONE);
        assert_eq!(
            programs.uniform_location(p, "missing").unwrap(),
            LOCATION_NONE
        );

        let mvp: Vec<f32> = (0..16).map(|i| i as f32).collect();
        programs
            .set_uniform(p, loc, UniformValue::Matrix { values: &mvp, dim: 4 })
            .unwrap();

        let entry = programs.get(p).unwrap();
        let vs_info = entry.vs_block.find("M").unwrap().clone();
        let fs_info = entry.fs_block.find("M").unwrap().clone();
        let vs_bytes =
            &entry.vs_block.data[vs_info.offset as usize..vs_info.offset as usize + 64];
        let fs_bytes =
            &entry.fs_block.data[fs_info.offset as usize..fs_info.offset as usize + 64];
        assert_eq!(vs_bytes, bytemuck::cast_slice::<f32, u8>(&mvp));
        assert_eq!(vs_bytes, fs_bytes);
    }

    #[test]
    fn std140_matrix_staging() {
        let (mut programs, p, _backend) = linked_program(
            "uniform mat2 A;\nuniform mat3 B;\nvoid main(){ gl_Position = vec4(A[0], 0.0, 1.0) + vec4(B[0], 1.0); }\n",
            "void main(){ gl_FragColor = vec4(1.0); }\n",
        );
        assert!(programs.link_status(p).unwrap());

        let a = programs.uniform_location(p, "A").unwrap();
        let b = programs.uniform_location(p, "B").unwrap();
        programs
            .set_uniform(
                p,
                a,
                UniformValue::Matrix {
                    values: &[1.0, 2.0, 3.0, 4.0],
                    dim: 2,
                },
            )
            .unwrap();
        programs
            .set_uniform(
                p,
                b,
                UniformValue::Matrix {
                    values: &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0],
                    dim: 3,
                },
            )
            .unwrap();

        let entry = programs.get(p).unwrap();
        let data = floats(&entry.vs_block.data);
        assert_eq!(entry.vs_block.data.len(), 80);
        // A column 0 at offset 0, column 1 at offset 16, padding zero
        assert_eq!(&data[0..2], &[1.0, 2.0][..]);
        assert_eq!(&data[2..4], &[0.0, 0.0][..]);
        assert_eq!(&data[4..6], &[3.0, 4.0][..]);
        // B columns at 32, 48, 64
        assert_eq!(&data[8..11], &[5.0, 6.0, 7.0][..]);
        assert_eq!(&data[12..15], &[8.0, 9.0, 10.0][..]);
        assert_eq!(&data[16..19], &[11.0, 12.0, 13.0][..]);
        // both are mat2/mat3, so both take the out-of-band path
        assert_eq!(entry.matrix_uniforms.len(), 2);
    }

    #[test]
    fn out_of_band_matrix_depads_columns() {
        let (mut programs, p, mut backend) = linked_program(
            "uniform mat2 A;\nvoid main(){ gl_Position = vec4(A[0], 0.0, 1.0); }\n",
            "void main(){ gl_FragColor = vec4(1.0); }\n",
        );
        let a = programs.uniform_location(p, "A").unwrap();
        programs
            .set_uniform(
                p,
                a,
                UniformValue::Matrix {
                    values: &[1.0, 2.0, 3.0, 4.0],
                    dim: 2,
                },
            )
            .unwrap();
        let entry = programs.get_mut(p).unwrap();
        backend.calls.clear();
        entry.apply_out_of_band(&mut backend);
        let recorded: Vec<_> = backend
            .calls
            .iter()
            .filter_map(|c| match c {
                crate::backend::RecordedCall::UniformMatrix { dim, values, .. } => {
                    Some((*dim, values.clone()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(recorded, vec![(2, vec![1.0, 2.0, 3.0, 4.0])]);
    }

    #[test]
    fn sampler_location_and_unit_assignment() {
        let (mut programs, p, mut backend) = linked_program(
            "void main(){ gl_Position = vec4(0.0); }\n",
            "uniform sampler2D map;\nvoid main(){ gl_FragColor = texture2D(map, vec2(0.5)); }\n",
        );
        let loc = programs.uniform_location(p, "map").unwrap();
        assert_ne!(loc, LOCATION_NONE);
        programs
            .set_uniform(
                p,
                loc,
                UniformValue::Ints {
                    values: &[3],
                    components: 1,
                },
            )
            .unwrap();
        let entry = programs.get_mut(p).unwrap();
        assert_eq!(entry.samplers[0].unit, 3);
        assert!(entry.samplers[0].dirty);
        entry.apply_out_of_band(&mut backend);
        assert!(!entry.samplers[0].dirty);
        assert!(backend
            .calls
            .iter()
            .any(|c| matches!(c, crate::backend::RecordedCall::Uniform1i { value: 3, .. })));
    }

    #[test]
    fn unused_uniform_is_elided_per_stage() {
        // M is only used in the vertex stage; the fragment block must not
        // contain it even though the union does.
        let (programs, p, backend) = linked_program(
            "uniform mat4 M;\nvoid main(){ gl_Position = M * vec4(1.0); }\n",
            "uniform vec3 C;\nvoid main(){ gl_FragColor = vec4(C, 1.0); }\n",
        );
        let entry = programs.get(p).unwrap();
        assert!(entry.vs_block.find("M").is_some());
        assert!(entry.fs_block.find("M").is_none());
        assert!(entry.fs_block.find("C").is_some());
        // and the emitted fragment source never mentions M
        assert!(!crate::glsl::contains_word(&entry.translated_fs, "M"));
        drop(backend);
    }

    #[test]
    fn vector_array_writes_use_vec4_stride() {
        let (mut programs, p, _backend) = linked_program(
            "uniform vec4 pts[3];\nvoid main(){ gl_Position = pts[0]; }\n",
            "void main(){ gl_FragColor = vec4(1.0); }\n",
        );
        let loc = programs.uniform_location(p, "pts").unwrap();
        let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
        programs
            .set_uniform(
                p,
                loc,
                UniformValue::Floats {
                    values: &data,
                    components: 4,
                },
            )
            .unwrap();
        let entry = programs.get(p).unwrap();
        let staged = floats(&entry.vs_block.data);
        assert_eq!(&staged[0..4], &[0.0, 1.0, 2.0, 3.0][..]);
        assert_eq!(&staged[4..8], &[4.0, 5.0, 6.0, 7.0][..]);
        assert_eq!(&staged[8..12], &[8.0, 9.0, 10.0, 11.0][..]);
    }

    #[test]
    fn attrib_locations_follow_declaration_order() {
        let (programs, p, _backend) = linked_program(
            "attribute vec3 position;\nattribute vec2 uv;\nvoid main(){ gl_Position = vec4(position, 1.0) + vec4(uv, 0.0, 0.0); }\n",
            "void main(){ gl_FragColor = vec4(1.0); }\n",
        );
        assert_eq!(programs.attrib_location(p, "position").unwrap(), 0);
        assert_eq!(programs.attrib_location(p, "uv").unwrap(), 1);
        assert_eq!(programs.attrib_location(p, "nope").unwrap(), LOCATION_NONE);
    }

    #[test]
    fn relink_destroys_previous_backend_shader() {
        let mut shaders = ShaderStore::new();
        let mut programs = ProgramStore::new();
        let mut backend = RecordingBackend::new();
        let vs = shaders.create(ShaderKind::Vertex).unwrap();
        shaders
            .set_source(vs, "void main(){ gl_Position = vec4(0.0); }")
            .unwrap();
        shaders.compile(vs).unwrap();
        let fs = shaders.create(ShaderKind::Fragment).unwrap();
        shaders
            .set_source(fs, "void main(){ gl_FragColor = vec4(1.0); }")
            .unwrap();
        shaders.compile(fs).unwrap();
        let p = programs.create().unwrap();
        programs.attach(p, vs, ShaderKind::Vertex).unwrap();
        programs.attach(p, fs, ShaderKind::Fragment).unwrap();
        programs.link(p, &shaders, &mut backend).unwrap();
        let first = programs.get(p).unwrap().backend_shader;
        programs.link(p, &shaders, &mut backend).unwrap();
        assert!(backend
            .calls
            .iter()
            .any(|c| *c == crate::backend::RecordedCall::DestroyShader(first)));
        assert!(programs.link_status(p).unwrap());
    }
}
