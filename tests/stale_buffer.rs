//! Stale-handle rendering: a queued draw referencing a deleted buffer is
//! skipped at flush; the rest of the frame still renders.

mod common;

use common::{bytes_of_f32, Harness};
use webgl_runtime::bridge::{Op, Value};
use webgl_runtime::webgl;

const VS: &str = "\
attribute vec3 position;
void main() {
    gl_Position = vec4(position, 1.0);
}
";

const FS: &str = "\
void main() {
    gl_FragColor = vec4(1.0, 0.0, 1.0, 1.0);
}
";

fn point_at_first_attrib(h: &mut Harness) {
    h.call(Op::EnableVertexAttribArray, &[Value::Number(0.0)]);
    h.call(
        Op::VertexAttribPointer,
        &[
            Value::Number(0.0),
            Value::Number(3.0),
            Value::Number(f64::from(webgl::FLOAT)),
            Value::Bool(false),
            Value::Number(0.0),
            Value::Number(0.0),
        ],
    );
}

fn draw_triangle(h: &mut Harness) {
    h.call(
        Op::DrawArrays,
        &[
            Value::Number(f64::from(webgl::TRIANGLES)),
            Value::Number(0.0),
            Value::Number(3.0),
        ],
    );
}

#[test]
fn stale_buffer_draw_is_skipped() {
    let mut h = Harness::new();
    let program = h.link_program(VS, FS);
    assert!(h.link_status(program));
    h.call(Op::UseProgram, &[Value::Number(program)]);

    let vertices = bytes_of_f32(&[0.0; 12]); // 48 bytes
    let first = h.upload_buffer(webgl::ARRAY_BUFFER, &vertices);
    point_at_first_attrib(&mut h);
    draw_triangle(&mut h);

    // delete the buffer out from under the recorded command
    h.call(Op::DeleteBuffer, &[Value::Number(first)]);

    // fresh buffer, re-pointed, second draw
    let _second = h.upload_buffer(webgl::ARRAY_BUFFER, &vertices);
    point_at_first_attrib(&mut h);
    draw_triangle(&mut h);

    assert_eq!(h.rt.queued_commands(), 2);
    h.rt.flush();

    // exactly one draw survived
    assert_eq!(h.rt.backend.draws(), vec![(0, 3, 1)]);
    assert_eq!(h.rt.backend.pipelines_created(), 1);
}

#[test]
fn next_frame_renders_normally_after_stale_skip() {
    let mut h = Harness::new();
    let program = h.link_program(VS, FS);
    h.call(Op::UseProgram, &[Value::Number(program)]);

    let vertices = bytes_of_f32(&[0.0; 12]);
    let buffer = h.upload_buffer(webgl::ARRAY_BUFFER, &vertices);
    point_at_first_attrib(&mut h);
    draw_triangle(&mut h);
    h.call(Op::DeleteBuffer, &[Value::Number(buffer)]);
    h.rt.flush();
    assert!(h.rt.backend.draws().is_empty());

    // next frame with a fresh buffer
    h.upload_buffer(webgl::ARRAY_BUFFER, &vertices);
    point_at_first_attrib(&mut h);
    draw_triangle(&mut h);
    h.rt.flush();
    assert_eq!(h.rt.backend.draws().len(), 1);
}

#[test]
fn deleting_bound_buffer_clears_binding() {
    let mut h = Harness::new();
    let buffer = h.upload_buffer(webgl::ARRAY_BUFFER, &[0u8; 16]);
    h.call(Op::DeleteBuffer, &[Value::Number(buffer)]);
    // with the binding gone, a pointer call has no source buffer
    let err = h
        .try_call(
            Op::VertexAttribPointer,
            &[
                Value::Number(0.0),
                Value::Number(3.0),
                Value::Number(f64::from(webgl::FLOAT)),
                Value::Bool(false),
                Value::Number(0.0),
                Value::Number(0.0),
            ],
        )
        .unwrap_err();
    assert_eq!(err, webgl_runtime::error::Error::NoBufferBound);
}
