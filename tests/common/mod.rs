//! Shared harness: a runtime over the recording backend, driven the way
//! the engine adapter would drive it.

#![allow(dead_code)]

use webgl_runtime::backend::RecordingBackend;
use webgl_runtime::bridge::{NullEngine, Op, Ret, Value};
use webgl_runtime::error::Error;
use webgl_runtime::webgl;
use webgl_runtime::{Runtime, RuntimeConfig};

pub struct Harness {
    pub rt: Runtime<RecordingBackend>,
    pub engine: NullEngine,
}

impl Harness {
    pub fn new() -> Harness {
        let _ = pretty_env_logger::try_init();
        Harness {
            rt: Runtime::new(RuntimeConfig::default(), RecordingBackend::new()),
            engine: NullEngine::new(),
        }
    }

    pub fn call(&mut self, op: Op, args: &[Value<'_>]) -> Ret {
        self.rt
            .dispatch(op, args, &mut self.engine)
            .unwrap_or_else(|e| panic!("{:?} failed: {}", op, e))
    }

    pub fn try_call(&mut self, op: Op, args: &[Value<'_>]) -> Result<Ret, Error> {
        self.rt.dispatch(op, args, &mut self.engine)
    }

    /// Calls an op that returns a handle/number.
    pub fn call_num(&mut self, op: Op, args: &[Value<'_>]) -> f64 {
        match self.call(op, args) {
            Ret::Number(n) => n,
            Ret::Int(i) => f64::from(i),
            other => panic!("{:?} returned {:?}, expected a number", op, other),
        }
    }

    pub fn compile_shader(&mut self, kind: u32, source: &str) -> f64 {
        let shader = self.call_num(Op::CreateShader, &[Value::Number(f64::from(kind))]);
        self.call(
            Op::ShaderSource,
            &[Value::Number(shader), Value::Str(source)],
        );
        self.call(Op::CompileShader, &[Value::Number(shader)]);
        match self.call(
            Op::GetShaderParameter,
            &[
                Value::Number(shader),
                Value::Number(f64::from(webgl::COMPILE_STATUS)),
            ],
        ) {
            Ret::Bool(true) => {}
            other => panic!("shader did not compile: {:?}", other),
        }
        shader
    }

    pub fn link_program(&mut self, vs_source: &str, fs_source: &str) -> f64 {
        let vs = self.compile_shader(webgl::VERTEX_SHADER, vs_source);
        let fs = self.compile_shader(webgl::FRAGMENT_SHADER, fs_source);
        let program = self.call_num(Op::CreateProgram, &[]);
        self.call(
            Op::AttachShader,
            &[Value::Number(program), Value::Number(vs)],
        );
        self.call(
            Op::AttachShader,
            &[Value::Number(program), Value::Number(fs)],
        );
        self.call(Op::LinkProgram, &[Value::Number(program)]);
        program
    }

    pub fn link_status(&mut self, program: f64) -> bool {
        match self.call(
            Op::GetProgramParameter,
            &[
                Value::Number(program),
                Value::Number(f64::from(webgl::LINK_STATUS)),
            ],
        ) {
            Ret::Bool(b) => b,
            other => panic!("unexpected LINK_STATUS result {:?}", other),
        }
    }

    pub fn upload_buffer(&mut self, target: u32, bytes: &[u8]) -> f64 {
        let buffer = self.call_num(Op::CreateBuffer, &[]);
        self.call(
            Op::BindBuffer,
            &[Value::Number(f64::from(target)), Value::Number(buffer)],
        );
        self.call(
            Op::BufferData,
            &[
                Value::Number(f64::from(target)),
                Value::Bytes {
                    data: bytes,
                    elem_size: 1,
                },
            ],
        );
        buffer
    }
}

pub fn bytes_of_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes().to_vec()).collect()
}

pub fn bytes_of_u16(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes().to_vec()).collect()
}
