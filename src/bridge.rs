//! Script bridge.
//!
//! The embedded engine is reached through the narrow [`ScriptEngine`]
//! trait: the adapter registers every [`Op`] on the guest-visible objects
//! and funnels calls into [`Runtime::dispatch`] with unpacked [`Value`]
//! arguments. String and byte arguments are borrowed for the duration of
//! the call; anything the core keeps (shader sources, names) is copied
//! into core-owned storage before returning.
//!
//! Failures surface to the guest according to their [`Error`]
//! classification: handle/state/argument errors as type-errors, resource
//! and backend errors as internal errors.

use crate::backend::GraphicsBackend;
use crate::buffer::BufferTarget;
use crate::error::{Error, Result};
use crate::events::EventPayload;
use crate::handle::{BufferHandle, Handle, ProgramHandle, ShaderHandle, TextureHandle};
use crate::program::UniformValue;
use crate::shader::ShaderKind;
use crate::texture::{InputFormat, TexTarget, TEXTURE_UNITS};
use crate::webgl;
use crate::Runtime;

/// GC-rooted reference to a guest callable, issued by the engine adapter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ScriptCallback(pub u64);

/// A guest argument, unpacked by the engine adapter. Borrowed data lives
/// until the call returns.
#[derive(Copy, Clone, Debug)]
pub enum Value<'a> {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(&'a str),
    /// A typed byte range (e.g. `Float32Array` contents).
    Bytes { data: &'a [u8], elem_size: u32 },
    Callable(ScriptCallback),
}

/// A value returned to the guest.
#[derive(Clone, Debug, PartialEq)]
pub enum Ret {
    Undefined,
    Bool(bool),
    Int(i32),
    Number(f64),
    Str(String),
}

/// Everything the core needs from the embedded script engine. The engine
/// stores the runtime pointer in its per-context opaque slot and routes
/// every registered op back through [`Runtime::dispatch`].
pub trait ScriptEngine {
    /// Registers `op` as a callable property `object.name` on the guest
    /// global scope.
    fn register_op(&mut self, object: &str, name: &str, op: Op);
    /// Evaluates guest source (the facade, then the application bundle).
    fn eval(&mut self, source: &str, chunk_name: &str) -> Result<()>;
    /// Keeps a callable alive past the current call.
    fn retain(&mut self, callback: ScriptCallback);
    /// Releases a retained callable.
    fn release(&mut self, callback: ScriptCallback);
    /// Invokes a retained callable.
    fn call(&mut self, callback: ScriptCallback, args: &[Ret]);
    /// Delivers an event to the guest listener registry.
    fn dispatch_event(&mut self, kind: &str, payload: &EventPayload);
}

/// Engine stub for tests that drive `dispatch` directly.
pub struct NullEngine {
    pub events: Vec<(String, EventPayload)>,
    pub calls: Vec<(ScriptCallback, Vec<Ret>)>,
    pub released: Vec<ScriptCallback>,
}

impl NullEngine {
    pub fn new() -> NullEngine {
        NullEngine {
            events: Vec::new(),
            calls: Vec::new(),
            released: Vec::new(),
        }
    }
}

impl ScriptEngine for NullEngine {
    fn register_op(&mut self, _object: &str, _name: &str, _op: Op) {}
    fn eval(&mut self, _source: &str, _chunk_name: &str) -> Result<()> {
        Ok(())
    }
    fn retain(&mut self, _callback: ScriptCallback) {}
    fn release(&mut self, callback: ScriptCallback) {
        self.released.push(callback);
    }
    fn call(&mut self, callback: ScriptCallback, args: &[Ret]) {
        self.calls.push((callback, args.to_vec()));
    }
    fn dispatch_event(&mut self, kind: &str, payload: &EventPayload) {
        self.events.push((kind.to_string(), *payload));
    }
}

/// Every operation exported to the guest.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Op {
    // buffers
    CreateBuffer,
    BindBuffer,
    BufferData,
    DeleteBuffer,
    // shaders
    CreateShader,
    ShaderSource,
    CompileShader,
    GetShaderParameter,
    GetShaderInfoLog,
    DeleteShader,
    // programs
    CreateProgram,
    AttachShader,
    LinkProgram,
    UseProgram,
    GetProgramParameter,
    GetProgramInfoLog,
    DeleteProgram,
    GetUniformLocation,
    GetAttribLocation,
    // uniforms
    Uniform1f,
    Uniform2f,
    Uniform3f,
    Uniform4f,
    Uniform1i,
    Uniform2i,
    Uniform3i,
    Uniform4i,
    Uniform1fv,
    Uniform2fv,
    Uniform3fv,
    Uniform4fv,
    Uniform1iv,
    Uniform2iv,
    Uniform3iv,
    Uniform4iv,
    UniformMatrix2fv,
    UniformMatrix3fv,
    UniformMatrix4fv,
    // textures
    CreateTexture,
    ActiveTexture,
    BindTexture,
    TexParameteri,
    TexImage2D,
    DeleteTexture,
    // vertex attribs and draws
    EnableVertexAttribArray,
    DisableVertexAttribArray,
    VertexAttribPointer,
    DrawArrays,
    DrawElements,
    GetError,
    // globals
    GetContext,
    Now,
    RequestAnimationFrame,
    CancelAnimationFrame,
    SetTimeout,
    ClearTimeout,
}

/// The full export table: `(object, property, op)`.
pub const EXPORTS: &[(&str, &str, Op)] = &[
    ("gl", "createBuffer", Op::CreateBuffer),
    ("gl", "bindBuffer", Op::BindBuffer),
    ("gl", "bufferData", Op::BufferData),
    ("gl", "deleteBuffer", Op::DeleteBuffer),
    ("gl", "createShader", Op::CreateShader),
    ("gl", "shaderSource", Op::ShaderSource),
    ("gl", "compileShader", Op::CompileShader),
    ("gl", "getShaderParameter", Op::GetShaderParameter),
    ("gl", "getShaderInfoLog", Op::GetShaderInfoLog),
    ("gl", "deleteShader", Op::DeleteShader),
    ("gl", "createProgram", Op::CreateProgram),
    ("gl", "attachShader", Op::AttachShader),
    ("gl", "linkProgram", Op::LinkProgram),
    ("gl", "useProgram", Op::UseProgram),
    ("gl", "getProgramParameter", Op::GetProgramParameter),
    ("gl", "getProgramInfoLog", Op::GetProgramInfoLog),
    ("gl", "deleteProgram", Op::DeleteProgram),
    ("gl", "getUniformLocation", Op::GetUniformLocation),
    ("gl", "getAttribLocation", Op::GetAttribLocation),
    ("gl", "uniform1f", Op::Uniform1f),
    ("gl", "uniform2f", Op::Uniform2f),
    ("gl", "uniform3f", Op::Uniform3f),
    ("gl", "uniform4f", Op::Uniform4f),
    ("gl", "uniform1i", Op::Uniform1i),
    ("gl", "uniform2i", Op::Uniform2i),
    ("gl", "uniform3i", Op::Uniform3i),
    ("gl", "uniform4i", Op::Uniform4i),
    ("gl", "uniform1fv", Op::Uniform1fv),
    ("gl", "uniform2fv", Op::Uniform2fv),
    ("gl", "uniform3fv", Op::Uniform3fv),
    ("gl", "uniform4fv", Op::Uniform4fv),
    ("gl", "uniform1iv", Op::Uniform1iv),
    ("gl", "uniform2iv", Op::Uniform2iv),
    ("gl", "uniform3iv", Op::Uniform3iv),
    ("gl", "uniform4iv", Op::Uniform4iv),
    ("gl", "uniformMatrix2fv", Op::UniformMatrix2fv),
    ("gl", "uniformMatrix3fv", Op::UniformMatrix3fv),
    ("gl", "uniformMatrix4fv", Op::UniformMatrix4fv),
    ("gl", "createTexture", Op::CreateTexture),
    ("gl", "activeTexture", Op::ActiveTexture),
    ("gl", "bindTexture", Op::BindTexture),
    ("gl", "texParameteri", Op::TexParameteri),
    ("gl", "texImage2D", Op::TexImage2D),
    ("gl", "deleteTexture", Op::DeleteTexture),
    ("gl", "enableVertexAttribArray", Op::EnableVertexAttribArray),
    ("gl", "disableVertexAttribArray", Op::DisableVertexAttribArray),
    ("gl", "vertexAttribPointer", Op::VertexAttribPointer),
    ("gl", "drawArrays", Op::DrawArrays),
    ("gl", "drawElements", Op::DrawElements),
    ("gl", "getError", Op::GetError),
    ("canvas", "getContext", Op::GetContext),
    ("performance", "now", Op::Now),
    ("window", "requestAnimationFrame", Op::RequestAnimationFrame),
    ("window", "cancelAnimationFrame", Op::CancelAnimationFrame),
    ("window", "setTimeout", Op::SetTimeout),
    ("window", "clearTimeout", Op::ClearTimeout),
];

/// Registers the whole export table on the engine.
pub fn register_exports(engine: &mut dyn ScriptEngine) {
    for (object, name, op) in EXPORTS {
        engine.register_op(object, name, *op);
    }
}

/// Argument accessor with the bridge's arity/type error reporting.
pub struct Args<'a, 'v>(pub &'a [Value<'v>]);

impl<'a, 'v> Args<'a, 'v> {
    fn get(&self, index: usize) -> Result<&Value<'v>> {
        self.0.get(index).ok_or(Error::WrongArity {
            expected: index + 1,
            got: self.0.len(),
        })
    }

    pub fn number(&self, index: usize) -> Result<f64> {
        match self.get(index)? {
            Value::Number(n) => Ok(*n),
            Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            _ => Err(Error::WrongType {
                index,
                expected: "number",
            }),
        }
    }

    pub fn u32(&self, index: usize) -> Result<u32> {
        let n = self.number(index)?;
        if !n.is_finite() || n < 0.0 || n > f64::from(u32::max_value()) {
            return Err(Error::WrongType {
                index,
                expected: "unsigned integer",
            });
        }
        Ok(n as u32)
    }

    pub fn i32(&self, index: usize) -> Result<i32> {
        let n = self.number(index)?;
        if !n.is_finite() || n < f64::from(i32::min_value()) || n > f64::from(i32::max_value()) {
            return Err(Error::WrongType {
                index,
                expected: "integer",
            });
        }
        Ok(n as i32)
    }

    pub fn f32(&self, index: usize) -> Result<f32> {
        Ok(self.number(index)? as f32)
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        match self.get(index)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(*n != 0.0),
            _ => Err(Error::WrongType {
                index,
                expected: "boolean",
            }),
        }
    }

    pub fn str(&self, index: usize) -> Result<&'v str> {
        match self.get(index)? {
            Value::Str(s) => Ok(s),
            _ => Err(Error::WrongType {
                index,
                expected: "string",
            }),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<&'v [u8]> {
        match self.get(index)? {
            Value::Bytes { data, .. } => Ok(data),
            _ => Err(Error::WrongType {
                index,
                expected: "typed array",
            }),
        }
    }

    pub fn opt_bytes(&self, index: usize) -> Result<Option<&'v [u8]>> {
        match self.0.get(index) {
            None | Some(Value::Null) | Some(Value::Undefined) => Ok(None),
            Some(Value::Bytes { data, .. }) => Ok(Some(data)),
            Some(_) => Err(Error::WrongType {
                index,
                expected: "typed array or null",
            }),
        }
    }

    /// Reads a `Float32Array` argument into owned floats (unaligned-safe).
    pub fn floats(&self, index: usize) -> Result<Vec<f32>> {
        let bytes = self.bytes(index)?;
        if bytes.len() % 4 != 0 {
            return Err(Error::WrongType {
                index,
                expected: "float32 array",
            });
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| bytemuck::pod_read_unaligned::<f32>(c))
            .collect())
    }

    pub fn ints(&self, index: usize) -> Result<Vec<i32>> {
        let bytes = self.bytes(index)?;
        if bytes.len() % 4 != 0 {
            return Err(Error::WrongType {
                index,
                expected: "int32 array",
            });
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| bytemuck::pod_read_unaligned::<i32>(c))
            .collect())
    }

    /// Handles arrive as raw numbers; `null`/`undefined`/`0` mean unbound.
    pub fn handle<T>(&self, index: usize) -> Result<Option<Handle<T>>> {
        match self.0.get(index) {
            None | Some(Value::Null) | Some(Value::Undefined) => Ok(None),
            Some(Value::Number(n)) => {
                if !n.is_finite() || *n < 0.0 || *n > f64::from(u32::max_value()) {
                    return Err(Error::WrongType {
                        index,
                        expected: "handle",
                    });
                }
                Ok(Handle::from_raw(*n as u32))
            }
            Some(_) => Err(Error::WrongType {
                index,
                expected: "handle",
            }),
        }
    }

    pub fn required_handle<T>(&self, index: usize) -> Result<Handle<T>> {
        self.handle(index)?.ok_or(Error::InvalidHandle)
    }

    pub fn callable(&self, index: usize) -> Result<ScriptCallback> {
        match self.get(index)? {
            Value::Callable(c) => Ok(*c),
            _ => Err(Error::WrongType {
                index,
                expected: "function",
            }),
        }
    }
}

fn buffer_target(value: u32) -> Result<BufferTarget> {
    Ok(match value {
        webgl::ARRAY_BUFFER => BufferTarget::Array,
        webgl::ELEMENT_ARRAY_BUFFER => BufferTarget::ElementArray,
        other => return Err(Error::InvalidEnum(other)),
    })
}

fn texture_bind_target(value: u32) -> Result<TexTarget> {
    Ok(match value {
        webgl::TEXTURE_2D => TexTarget::Tex2d,
        webgl::TEXTURE_CUBE_MAP => TexTarget::Cube,
        other => return Err(Error::InvalidEnum(other)),
    })
}

fn texture_image_target(value: u32) -> Result<(TexTarget, usize)> {
    Ok(match value {
        webgl::TEXTURE_2D => (TexTarget::Tex2d, 0),
        webgl::TEXTURE_CUBE_MAP_POSITIVE_X..=webgl::TEXTURE_CUBE_MAP_NEGATIVE_Z => (
            TexTarget::Cube,
            (value - webgl::TEXTURE_CUBE_MAP_POSITIVE_X) as usize,
        ),
        other => return Err(Error::InvalidEnum(other)),
    })
}

impl<B: GraphicsBackend> Runtime<B> {
    fn current_program(&self) -> Result<ProgramHandle> {
        self.draw.program.ok_or(Error::NoProgramBound)
    }

    fn set_current_uniform(&mut self, location: i32, value: UniformValue<'_>) -> Result<Ret> {
        let program = self.current_program()?;
        self.programs.set_uniform(program, location, value)?;
        Ok(Ret::Undefined)
    }

    /// The single entry point the engine adapter calls for every exported
    /// operation.
    pub fn dispatch(
        &mut self,
        op: Op,
        args: &[Value<'_>],
        engine: &mut dyn ScriptEngine,
    ) -> Result<Ret> {
        let a = Args(args);
        match op {
            // buffers ---------------------------------------------------------
            Op::CreateBuffer => {
                let h = self.buffers.create()?;
                Ok(Ret::Number(f64::from(h.raw())))
            }
            Op::BindBuffer => {
                let target = buffer_target(a.u32(0)?)?;
                let handle: Option<BufferHandle> = a.handle(1)?;
                self.buffers.bind(target, handle)?;
                Ok(Ret::Undefined)
            }
            Op::BufferData => {
                let target = buffer_target(a.u32(0)?)?;
                let bytes = a.bytes(1)?;
                self.buffers
                    .buffer_data(target, bytes, &mut self.buffer_pool, &mut self.backend)?;
                Ok(Ret::Undefined)
            }
            Op::DeleteBuffer => {
                if let Some(h) = a.handle::<crate::handle::BufferTag>(0)? {
                    self.buffers
                        .delete(h, &mut self.buffer_pool, &mut self.backend)?;
                }
                Ok(Ret::Undefined)
            }

            // shaders ---------------------------------------------------------
            Op::CreateShader => {
                let kind = match a.u32(0)? {
                    webgl::VERTEX_SHADER => ShaderKind::Vertex,
                    webgl::FRAGMENT_SHADER => ShaderKind::Fragment,
                    other => return Err(Error::InvalidEnum(other)),
                };
                let h = self.shaders.create(kind)?;
                Ok(Ret::Number(f64::from(h.raw())))
            }
            Op::ShaderSource => {
                let h: ShaderHandle = a.required_handle(0)?;
                self.shaders.set_source(h, a.str(1)?)?;
                Ok(Ret::Undefined)
            }
            Op::CompileShader => {
                let h: ShaderHandle = a.required_handle(0)?;
                self.shaders.compile(h)?;
                Ok(Ret::Undefined)
            }
            Op::GetShaderParameter => {
                let h: ShaderHandle = a.required_handle(0)?;
                match a.u32(1)? {
                    webgl::COMPILE_STATUS => Ok(Ret::Bool(self.shaders.compile_status(h)?)),
                    webgl::DELETE_STATUS => Ok(Ret::Bool(!self.shaders.is_valid(h))),
                    other => Err(Error::InvalidEnum(other)),
                }
            }
            Op::GetShaderInfoLog => {
                let h: ShaderHandle = a.required_handle(0)?;
                Ok(Ret::Str(self.shaders.info_log(h)?.to_string()))
            }
            Op::DeleteShader => {
                if let Some(h) = a.handle::<crate::handle::ShaderTag>(0)? {
                    self.shaders.delete(h)?;
                }
                Ok(Ret::Undefined)
            }

            // programs --------------------------------------------------------
            Op::CreateProgram => {
                let h = self.programs.create()?;
                Ok(Ret::Number(f64::from(h.raw())))
            }
            Op::AttachShader => {
                let p: ProgramHandle = a.required_handle(0)?;
                let s: ShaderHandle = a.required_handle(1)?;
                let kind = self.shaders.get(s)?.kind;
                self.programs.attach(p, s, kind)?;
                Ok(Ret::Undefined)
            }
            Op::LinkProgram => {
                let p: ProgramHandle = a.required_handle(0)?;
                self.programs.link(p, &self.shaders, &mut self.backend)?;
                Ok(Ret::Undefined)
            }
            Op::UseProgram => {
                let handle: Option<ProgramHandle> = a.handle(0)?;
                if let Some(p) = handle {
                    self.programs.get(p)?;
                }
                self.draw.use_program(handle);
                Ok(Ret::Undefined)
            }
            Op::GetProgramParameter => {
                let p: ProgramHandle = a.required_handle(0)?;
                match a.u32(1)? {
                    webgl::LINK_STATUS | webgl::VALIDATE_STATUS => {
                        Ok(Ret::Bool(self.programs.link_status(p)?))
                    }
                    webgl::DELETE_STATUS => Ok(Ret::Bool(!self.programs.is_valid(p))),
                    webgl::ACTIVE_ATTRIBUTES => {
                        Ok(Ret::Int(self.programs.get(p)?.attributes.len() as i32))
                    }
                    webgl::ACTIVE_UNIFORMS => {
                        let entry = self.programs.get(p)?;
                        Ok(Ret::Int(
                            (entry.vs_block.uniforms.len()
                                + entry.fs_block.uniforms.len()
                                + entry.samplers.len()) as i32,
                        ))
                    }
                    other => Err(Error::InvalidEnum(other)),
                }
            }
            Op::GetProgramInfoLog => {
                let p: ProgramHandle = a.required_handle(0)?;
                Ok(Ret::Str(self.programs.info_log(p)?.to_string()))
            }
            Op::DeleteProgram => {
                if let Some(p) = a.handle::<crate::handle::ProgramTag>(0)? {
                    if self.draw.program == Some(p) {
                        self.draw.use_program(None);
                    }
                    self.programs.delete(p, &mut self.backend)?;
                }
                Ok(Ret::Undefined)
            }
            Op::GetUniformLocation => {
                let p: ProgramHandle = a.required_handle(0)?;
                Ok(Ret::Int(self.programs.uniform_location(p, a.str(1)?)?))
            }
            Op::GetAttribLocation => {
                let p: ProgramHandle = a.required_handle(0)?;
                Ok(Ret::Int(self.programs.attrib_location(p, a.str(1)?)?))
            }

            // uniforms --------------------------------------------------------
            Op::Uniform1f | Op::Uniform2f | Op::Uniform3f | Op::Uniform4f => {
                let components = match op {
                    Op::Uniform1f => 1,
                    Op::Uniform2f => 2,
                    Op::Uniform3f => 3,
                    _ => 4,
                };
                let loc = a.i32(0)?;
                let mut values = [0f32; 4];
                for i in 0..components {
                    values[i as usize] = a.f32(1 + i as usize)?;
                }
                self.set_current_uniform(
                    loc,
                    UniformValue::Floats {
                        values: &values[..components as usize],
                        components,
                    },
                )
            }
            Op::Uniform1i | Op::Uniform2i | Op::Uniform3i | Op::Uniform4i => {
                let components = match op {
                    Op::Uniform1i => 1,
                    Op::Uniform2i => 2,
                    Op::Uniform3i => 3,
                    _ => 4,
                };
                let loc = a.i32(0)?;
                let mut values = [0i32; 4];
                for i in 0..components {
                    values[i as usize] = a.i32(1 + i as usize)?;
                }
                self.set_current_uniform(
                    loc,
                    UniformValue::Ints {
                        values: &values[..components as usize],
                        components,
                    },
                )
            }
            Op::Uniform1fv | Op::Uniform2fv | Op::Uniform3fv | Op::Uniform4fv => {
                let components = match op {
                    Op::Uniform1fv => 1,
                    Op::Uniform2fv => 2,
                    Op::Uniform3fv => 3,
                    _ => 4,
                };
                let loc = a.i32(0)?;
                let values = a.floats(1)?;
                self.set_current_uniform(
                    loc,
                    UniformValue::Floats {
                        values: &values,
                        components,
                    },
                )
            }
            Op::Uniform1iv | Op::Uniform2iv | Op::Uniform3iv | Op::Uniform4iv => {
                let components = match op {
                    Op::Uniform1iv => 1,
                    Op::Uniform2iv => 2,
                    Op::Uniform3iv => 3,
                    _ => 4,
                };
                let loc = a.i32(0)?;
                let values = a.ints(1)?;
                self.set_current_uniform(
                    loc,
                    UniformValue::Ints {
                        values: &values,
                        components,
                    },
                )
            }
            Op::UniformMatrix2fv | Op::UniformMatrix3fv | Op::UniformMatrix4fv => {
                let dim = match op {
                    Op::UniformMatrix2fv => 2,
                    Op::UniformMatrix3fv => 3,
                    _ => 4,
                };
                let loc = a.i32(0)?;
                if a.bool(1)? {
                    return Err(Error::InvalidValue("matrix transpose must be false"));
                }
                let values = a.floats(2)?;
                self.set_current_uniform(loc, UniformValue::Matrix { values: &values, dim })
            }

            // textures --------------------------------------------------------
            Op::CreateTexture => {
                let h = self.textures.create()?;
                Ok(Ret::Number(f64::from(h.raw())))
            }
            Op::ActiveTexture => {
                let unit = a.u32(0)?;
                if unit < webgl::TEXTURE0 || unit >= webgl::TEXTURE0 + TEXTURE_UNITS as u32 {
                    return Err(Error::InvalidEnum(unit));
                }
                self.textures.active_texture((unit - webgl::TEXTURE0) as usize)?;
                Ok(Ret::Undefined)
            }
            Op::BindTexture => {
                let target = texture_bind_target(a.u32(0)?)?;
                let handle: Option<TextureHandle> = a.handle(1)?;
                self.textures.bind(target, handle)?;
                Ok(Ret::Undefined)
            }
            Op::TexParameteri => {
                let target = texture_bind_target(a.u32(0)?)?;
                self.textures.tex_parameter(target, a.u32(1)?, a.u32(2)?)?;
                Ok(Ret::Undefined)
            }
            Op::TexImage2D => {
                // (target, level, internalformat, width, height, border,
                //  format, type, pixels?)
                let (target, face) = texture_image_target(a.u32(0)?)?;
                let level = a.u32(1)?;
                if level != 0 {
                    // single-mip storage; higher levels are accepted and dropped
                    debug!("ignoring texImage2D for mip level {}", level);
                    return Ok(Ret::Undefined);
                }
                let width = a.u32(3)?;
                let height = a.u32(4)?;
                if a.u32(5)? != 0 {
                    return Err(Error::InvalidValue("texture border must be 0"));
                }
                let format = InputFormat::from_enum(a.u32(6)?)?;
                let component_type = a.u32(7)?;
                let pixels = a.opt_bytes(8)?;
                self.textures.tex_image_2d(
                    target,
                    face,
                    width,
                    height,
                    format,
                    component_type,
                    pixels,
                    &mut self.texture_pool,
                )?;
                Ok(Ret::Undefined)
            }
            Op::DeleteTexture => {
                if let Some(h) = a.handle::<crate::handle::TextureTag>(0)? {
                    self.textures
                        .delete(h, &mut self.texture_pool, &mut self.backend)?;
                }
                Ok(Ret::Undefined)
            }

            // vertex attribs and draws ---------------------------------------
            Op::EnableVertexAttribArray => {
                self.draw.enable_attrib(a.u32(0)? as usize)?;
                Ok(Ret::Undefined)
            }
            Op::DisableVertexAttribArray => {
                self.draw.disable_attrib(a.u32(0)? as usize)?;
                Ok(Ret::Undefined)
            }
            Op::VertexAttribPointer => {
                let bound = self.buffers.bound(BufferTarget::Array);
                self.draw.attrib_pointer(
                    a.u32(0)? as usize,
                    a.u32(1)?,
                    a.u32(2)?,
                    a.bool(3)?,
                    a.u32(4)?,
                    a.u32(5)?,
                    bound,
                )?;
                Ok(Ret::Undefined)
            }
            Op::DrawArrays => {
                let mode = a.u32(0)?;
                let first = a.u32(1)?;
                let count = a.u32(2)?;
                self.record_draw_arrays(mode, first, count)?;
                Ok(Ret::Undefined)
            }
            Op::DrawElements => {
                let mode = a.u32(0)?;
                let count = a.u32(1)?;
                let index_type = a.u32(2)?;
                let offset = a.u32(3)?;
                self.record_draw_elements(mode, count, index_type, offset)?;
                Ok(Ret::Undefined)
            }
            Op::GetError => Ok(Ret::Int(webgl::NO_ERROR as i32)),

            // globals ---------------------------------------------------------
            Op::GetContext => {
                let h = self.get_context()?;
                Ok(Ret::Number(f64::from(h.raw())))
            }
            Op::Now => Ok(Ret::Number(self.now_ms())),
            Op::RequestAnimationFrame => {
                let cb = a.callable(0)?;
                engine.retain(cb);
                match self.callbacks.request_frame(cb) {
                    Ok(id) => Ok(Ret::Number(f64::from(id))),
                    Err(e) => {
                        engine.release(cb);
                        Err(e)
                    }
                }
            }
            Op::CancelAnimationFrame => {
                if let Some(cb) = self.callbacks.cancel_frame(a.u32(0)?) {
                    engine.release(cb);
                }
                Ok(Ret::Undefined)
            }
            Op::SetTimeout => {
                let cb = a.callable(0)?;
                let delay = a.number(1).unwrap_or(0.0).max(0.0);
                engine.retain(cb);
                match self.callbacks.set_timeout(cb, self.now_ms() + delay) {
                    Ok(id) => Ok(Ret::Number(f64::from(id))),
                    Err(e) => {
                        engine.release(cb);
                        Err(e)
                    }
                }
            }
            Op::ClearTimeout => {
                if let Some(cb) = self.callbacks.clear_timeout(a.u32(0)?) {
                    engine.release(cb);
                }
                Ok(Ret::Undefined)
            }
        }
    }
}
