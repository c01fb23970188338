//! Event delivery and the animation-frame / timer contracts, driven
//! through a full frame the way the window loop would.

mod common;

use common::Harness;
use webgl_runtime::bridge::{Op, Ret, ScriptCallback, Value};
use webgl_runtime::events::{EventPayload, Key, Modifiers, MouseButton, SourceEvent};

#[test]
fn event_drain_delivers_both_families_in_frame() {
    let mut h = Harness::new();
    let events = [
        SourceEvent::MouseDown {
            x: 40,
            y: 30,
            button: MouseButton::Left,
            modifiers: Modifiers::empty(),
        },
        SourceEvent::KeyDown {
            key: Key::Letter(b'w'),
            repeat: false,
            modifiers: Modifiers::empty(),
        },
    ];
    h.rt.run_frame(&events, &mut h.engine);

    let kinds: Vec<&str> = h.engine.events.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(kinds, vec!["mousedown", "keydown"]);

    match h.engine.events[0].1 {
        EventPayload::Mouse(m) => {
            assert_eq!((m.client_x, m.client_y), (40, 30));
            assert_eq!(m.button, 0);
        }
        ref other => panic!("expected mouse payload, got {:?}", other),
    }
    match h.engine.events[1].1 {
        EventPayload::Key(k) => {
            assert_eq!(k.key, "w");
            assert_eq!(k.code, "KeyW");
            assert_eq!(k.key_code, 87);
        }
        ref other => panic!("expected key payload, got {:?}", other),
    }
}

#[test]
fn click_synthesis_through_the_runtime() {
    let mut h = Harness::new();
    let events = [
        SourceEvent::MouseDown {
            x: 100,
            y: 100,
            button: MouseButton::Left,
            modifiers: Modifiers::empty(),
        },
        SourceEvent::MouseUp {
            x: 103,
            y: 98,
            button: MouseButton::Left,
            modifiers: Modifiers::empty(),
        },
    ];
    h.rt.run_frame(&events, &mut h.engine);
    let kinds: Vec<&str> = h.engine.events.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(kinds, vec!["mousedown", "mouseup", "click"]);
}

#[test]
fn animation_frame_fires_exactly_once_with_timestamp() {
    let mut h = Harness::new();
    let cb = ScriptCallback(0xfeed);
    let id = h.call_num(Op::RequestAnimationFrame, &[Value::Callable(cb)]);
    assert!(id >= 1.0);

    h.rt.run_frame(&[], &mut h.engine);
    assert_eq!(h.engine.calls.len(), 1);
    assert_eq!(h.engine.calls[0].0, cb);
    match h.engine.calls[0].1[0] {
        Ret::Number(ts) => assert!(ts >= 0.0),
        ref other => panic!("expected timestamp, got {:?}", other),
    }
    // the slot is released after firing
    assert_eq!(h.engine.released, vec![cb]);

    h.rt.run_frame(&[], &mut h.engine);
    assert_eq!(h.engine.calls.len(), 1);
}

#[test]
fn cancel_animation_frame_prevents_firing() {
    let mut h = Harness::new();
    let cb = ScriptCallback(0xabc);
    let id = h.call_num(Op::RequestAnimationFrame, &[Value::Callable(cb)]);
    h.call(Op::CancelAnimationFrame, &[Value::Number(id)]);
    assert_eq!(h.engine.released, vec![cb]);

    h.rt.run_frame(&[], &mut h.engine);
    assert!(h.engine.calls.is_empty());
}

#[test]
fn timeout_fires_when_due_and_can_be_cleared() {
    let mut h = Harness::new();
    let due_now = ScriptCallback(1);
    let cleared = ScriptCallback(2);
    h.call(
        Op::SetTimeout,
        &[Value::Callable(due_now), Value::Number(0.0)],
    );
    let id = h.call_num(
        Op::SetTimeout,
        &[Value::Callable(cleared), Value::Number(0.0)],
    );
    h.call(Op::ClearTimeout, &[Value::Number(id)]);

    h.rt.run_frame(&[], &mut h.engine);
    let fired: Vec<ScriptCallback> = h.engine.calls.iter().map(|(cb, _)| *cb).collect();
    assert_eq!(fired, vec![due_now]);
}

#[test]
fn performance_now_through_the_bridge() {
    let mut h = Harness::new();
    let a = h.call_num(Op::Now, &[]);
    let b = h.call_num(Op::Now, &[]);
    assert!(b >= a && a >= 0.0);
}

#[test]
fn wrong_argument_type_is_reported() {
    let mut h = Harness::new();
    let err = h
        .try_call(Op::RequestAnimationFrame, &[Value::Number(3.0)])
        .unwrap_err();
    assert!(err.is_type_error());

    let err = h.try_call(Op::BindBuffer, &[]).unwrap_err();
    assert!(matches!(
        err,
        webgl_runtime::error::Error::WrongArity { .. }
    ));
}
