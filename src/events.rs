//! Event normalization and the timing surface.
//!
//! Platform events arrive as [`SourceEvent`]s from whatever pump the
//! executable wires up; this module turns them into browser-shaped
//! payloads, synthesizes `click`/`contextmenu` from matching down/up pairs,
//! and owns the fixed-slot tables behind `requestAnimationFrame` and
//! `setTimeout`.

use bitflags::bitflags;

use crate::bridge::ScriptCallback;
use crate::error::{Error, Result};

/// An up-event within this Chebyshev distance of its down-event
/// synthesizes a click.
pub const CLICK_SLOP_PX: i32 = 5;

/// Pending-callback capacity for animation frames and timeouts alike.
pub const CALLBACK_SLOTS: usize = 16;

bitflags! {
    pub struct Modifiers: u8 {
        const SHIFT = 1;
        const CTRL  = 2;
        const ALT   = 4;
        const META  = 8;
    }
}

bitflags! {
    /// Browser `MouseEvent.buttons` semantics: left=1, right=2, middle=4.
    pub struct Buttons: u8 {
        const LEFT   = 1;
        const RIGHT  = 2;
        const MIDDLE = 4;
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Browser `MouseEvent.button` numbering.
    pub fn number(self) -> i32 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }

    fn bit(self) -> Buttons {
        match self {
            MouseButton::Left => Buttons::LEFT,
            MouseButton::Middle => Buttons::MIDDLE,
            MouseButton::Right => Buttons::RIGHT,
        }
    }

    fn index(self) -> usize {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
        }
    }
}

/// Keys the runtime can name to the guest. The platform layer maps its
/// scancodes onto these; everything else is dropped before it gets here.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Key {
    Letter(u8), // b'a'..=b'z'
    Digit(u8),  // b'0'..=b'9'
    Space,
    Enter,
    Escape,
    Tab,
    Backspace,
    Delete,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    ArrowDown,
    Home,
    End,
    PageUp,
    PageDown,
    Shift,
    Control,
    Alt,
    Meta,
}

const LETTER_KEYS: [&str; 26] = [
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n", "o", "p", "q", "r",
    "s", "t", "u", "v", "w", "x", "y", "z",
];
const LETTER_CODES: [&str; 26] = [
    "KeyA", "KeyB", "KeyC", "KeyD", "KeyE", "KeyF", "KeyG", "KeyH", "KeyI", "KeyJ", "KeyK",
    "KeyL", "KeyM", "KeyN", "KeyO", "KeyP", "KeyQ", "KeyR", "KeyS", "KeyT", "KeyU", "KeyV",
    "KeyW", "KeyX", "KeyY", "KeyZ",
];
const DIGIT_KEYS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];
const DIGIT_CODES: [&str; 10] = [
    "Digit0", "Digit1", "Digit2", "Digit3", "Digit4", "Digit5", "Digit6", "Digit7", "Digit8",
    "Digit9",
];

impl Key {
    /// `(key, code, keyCode)` per standard browser semantics.
    pub fn dom(self) -> (&'static str, &'static str, u32) {
        match self {
            Key::Letter(c) => {
                let i = (c - b'a') as usize;
                (LETTER_KEYS[i], LETTER_CODES[i], u32::from(c - b'a') + 65)
            }
            Key::Digit(d) => {
                let i = (d - b'0') as usize;
                (DIGIT_KEYS[i], DIGIT_CODES[i], u32::from(d))
            }
            Key::Space => (" ", "Space", 32),
            Key::Enter => ("Enter", "Enter", 13),
            Key::Escape => ("Escape", "Escape", 27),
            Key::Tab => ("Tab", "Tab", 9),
            Key::Backspace => ("Backspace", "Backspace", 8),
            Key::Delete => ("Delete", "Delete", 46),
            Key::ArrowLeft => ("ArrowLeft", "ArrowLeft", 37),
            Key::ArrowUp => ("ArrowUp", "ArrowUp", 38),
            Key::ArrowRight => ("ArrowRight", "ArrowRight", 39),
            Key::ArrowDown => ("ArrowDown", "ArrowDown", 40),
            Key::Home => ("Home", "Home", 36),
            Key::End => ("End", "End", 35),
            Key::PageUp => ("PageUp", "PageUp", 33),
            Key::PageDown => ("PageDown", "PageDown", 34),
            Key::Shift => ("Shift", "ShiftLeft", 16),
            Key::Control => ("Control", "ControlLeft", 17),
            Key::Alt => ("Alt", "AltLeft", 18),
            Key::Meta => ("Meta", "MetaLeft", 91),
        }
    }
}

/// Normalized platform event, as delivered by the window pump.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SourceEvent {
    MouseDown {
        x: i32,
        y: i32,
        button: MouseButton,
        modifiers: Modifiers,
    },
    MouseUp {
        x: i32,
        y: i32,
        button: MouseButton,
        modifiers: Modifiers,
    },
    MouseMove {
        x: i32,
        y: i32,
        modifiers: Modifiers,
    },
    Wheel {
        x: i32,
        y: i32,
        delta_x: f64,
        delta_y: f64,
        modifiers: Modifiers,
    },
    KeyDown {
        key: Key,
        repeat: bool,
        modifiers: Modifiers,
    },
    KeyUp {
        key: Key,
        modifiers: Modifiers,
    },
    Resize {
        width: u32,
        height: u32,
    },
    CloseRequested,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MousePayload {
    pub client_x: i32,
    pub client_y: i32,
    pub button: i32,
    pub buttons: Buttons,
    pub modifiers: Modifiers,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WheelPayload {
    pub client_x: i32,
    pub client_y: i32,
    pub delta_x: f64,
    pub delta_y: f64,
    pub modifiers: Modifiers,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct KeyPayload {
    pub key: &'static str,
    pub code: &'static str,
    pub key_code: u32,
    pub repeat: bool,
    pub modifiers: Modifiers,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResizePayload {
    pub width: u32,
    pub height: u32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EventPayload {
    Mouse(MousePayload),
    Wheel(WheelPayload),
    Key(KeyPayload),
    Resize(ResizePayload),
}

/// Per-button press origin used for click synthesis.
#[derive(Copy, Clone, Default)]
struct PressOrigin {
    at: Option<(i32, i32)>,
}

pub struct EventState {
    buttons: Buttons,
    origins: [PressOrigin; 3],
    last_pos: (i32, i32),
}

impl EventState {
    pub fn new() -> EventState {
        EventState {
            buttons: Buttons::empty(),
            origins: [PressOrigin::default(); 3],
            last_pos: (0, 0),
        }
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    /// Turns one platform event into guest dispatches. `sink` receives
    /// `(event_type, payload)` pairs in delivery order.
    pub fn process(
        &mut self,
        event: SourceEvent,
        mut sink: impl FnMut(&'static str, &EventPayload),
    ) {
        match event {
            SourceEvent::MouseDown {
                x,
                y,
                button,
                modifiers,
            } => {
                self.buttons |= button.bit();
                self.origins[button.index()].at = Some((x, y));
                self.last_pos = (x, y);
                sink(
                    "mousedown",
                    &EventPayload::Mouse(self.mouse_payload(x, y, button.number(), modifiers)),
                );
            }
            SourceEvent::MouseUp {
                x,
                y,
                button,
                modifiers,
            } => {
                self.buttons -= button.bit();
                self.last_pos = (x, y);
                let payload =
                    EventPayload::Mouse(self.mouse_payload(x, y, button.number(), modifiers));
                sink("mouseup", &payload);
                if let Some((ox, oy)) = self.origins[button.index()].at.take() {
                    if within_slop(ox, oy, x, y) {
                        match button {
                            MouseButton::Right => sink("contextmenu", &payload),
                            _ => sink("click", &payload),
                        }
                    }
                }
            }
            SourceEvent::MouseMove { x, y, modifiers } => {
                self.last_pos = (x, y);
                // movement beyond the threshold suppresses the pending click
                for origin in self.origins.iter_mut() {
                    if let Some((ox, oy)) = origin.at {
                        if !within_slop(ox, oy, x, y) {
                            origin.at = None;
                        }
                    }
                }
                sink(
                    "mousemove",
                    &EventPayload::Mouse(self.mouse_payload(x, y, 0, modifiers)),
                );
            }
            SourceEvent::Wheel {
                x,
                y,
                delta_x,
                delta_y,
                modifiers,
            } => {
                sink(
                    "wheel",
                    &EventPayload::Wheel(WheelPayload {
                        client_x: x,
                        client_y: y,
                        delta_x,
                        delta_y,
                        modifiers,
                    }),
                );
            }
            SourceEvent::KeyDown {
                key,
                repeat,
                modifiers,
            } => {
                let (k, code, key_code) = key.dom();
                sink(
                    "keydown",
                    &EventPayload::Key(KeyPayload {
                        key: k,
                        code,
                        key_code,
                        repeat,
                        modifiers,
                    }),
                );
            }
            SourceEvent::KeyUp { key, modifiers } => {
                let (k, code, key_code) = key.dom();
                sink(
                    "keyup",
                    &EventPayload::Key(KeyPayload {
                        key: k,
                        code,
                        key_code,
                        repeat: false,
                        modifiers,
                    }),
                );
            }
            SourceEvent::Resize { width, height } => {
                sink("resize", &EventPayload::Resize(ResizePayload { width, height }));
            }
            SourceEvent::CloseRequested => {}
        }
    }

    fn mouse_payload(&self, x: i32, y: i32, button: i32, modifiers: Modifiers) -> MousePayload {
        MousePayload {
            client_x: x,
            client_y: y,
            button,
            buttons: self.buttons,
            modifiers,
        }
    }
}

fn within_slop(ox: i32, oy: i32, x: i32, y: i32) -> bool {
    (x - ox).abs() <= CLICK_SLOP_PX && (y - oy).abs() <= CLICK_SLOP_PX
}

//--------------------------------------------------------------------------------------------------

struct TimerSlot {
    id: u32,
    due_ms: f64,
    callback: ScriptCallback,
}

struct FrameSlot {
    id: u32,
    callback: ScriptCallback,
}

/// Fixed-slot registries behind `requestAnimationFrame` / `setTimeout`.
/// Slots are discovered at tick time, fire exactly once, and are released
/// on firing.
pub struct CallbackSlots {
    frames: [Option<FrameSlot>; CALLBACK_SLOTS],
    timers: [Option<TimerSlot>; CALLBACK_SLOTS],
    next_id: u32,
}

impl CallbackSlots {
    pub fn new() -> CallbackSlots {
        CallbackSlots {
            frames: Default::default(),
            timers: Default::default(),
            next_id: 1,
        }
    }

    fn fresh_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    pub fn request_frame(&mut self, callback: ScriptCallback) -> Result<u32> {
        let id = self.fresh_id();
        let slot = self
            .frames
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(Error::AtCapacity)?;
        *slot = Some(FrameSlot { id, callback });
        Ok(id)
    }

    /// Returns the cancelled callback so the bridge can unroot it.
    pub fn cancel_frame(&mut self, id: u32) -> Option<ScriptCallback> {
        for slot in self.frames.iter_mut() {
            if slot.as_ref().map_or(false, |s| s.id == id) {
                return slot.take().map(|s| s.callback);
            }
        }
        None
    }

    /// Drains every pending animation-frame callback for this tick.
    pub fn take_frames(&mut self) -> Vec<ScriptCallback> {
        self.frames
            .iter_mut()
            .filter_map(|s| s.take().map(|s| s.callback))
            .collect()
    }

    pub fn set_timeout(&mut self, callback: ScriptCallback, due_ms: f64) -> Result<u32> {
        let id = self.fresh_id();
        let slot = self
            .timers
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(Error::AtCapacity)?;
        *slot = Some(TimerSlot {
            id,
            due_ms,
            callback,
        });
        Ok(id)
    }

    pub fn clear_timeout(&mut self, id: u32) -> Option<ScriptCallback> {
        for slot in self.timers.iter_mut() {
            if slot.as_ref().map_or(false, |s| s.id == id) {
                return slot.take().map(|s| s.callback);
            }
        }
        None
    }

    /// Drains the timers whose deadline has passed.
    pub fn take_due_timers(&mut self, now_ms: f64) -> Vec<ScriptCallback> {
        let mut due = Vec::new();
        for slot in self.timers.iter_mut() {
            if slot.as_ref().map_or(false, |s| s.due_ms <= now_ms) {
                due.push(slot.take().unwrap().callback);
            }
        }
        due
    }

    pub fn clear(&mut self) -> Vec<ScriptCallback> {
        let mut all: Vec<ScriptCallback> = self
            .frames
            .iter_mut()
            .filter_map(|s| s.take().map(|s| s.callback))
            .collect();
        all.extend(self.timers.iter_mut().filter_map(|s| s.take().map(|s| s.callback)));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(state: &mut EventState, events: &[SourceEvent]) -> Vec<(&'static str, EventPayload)> {
        let mut out = Vec::new();
        for e in events {
            state.process(*e, |kind, payload| out.push((kind, *payload)));
        }
        out
    }

    #[test]
    fn click_synthesized_within_slop() {
        let mut state = EventState::new();
        let out = collect(
            &mut state,
            &[
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
            ],
        );
        let kinds: Vec<_> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec!["mousedown", "mouseup", "click"]);
        match out[2].1 {
            EventPayload::Mouse(m) => {
                assert_eq!((m.client_x, m.client_y), (103, 98));
                assert_eq!(m.button, 0);
            }
            _ => panic!("expected mouse payload"),
        }
    }

    #[test]
    fn movement_beyond_slop_suppresses_click() {
        let mut state = EventState::new();
        let out = collect(
            &mut state,
            &[
                SourceEvent::MouseDown {
                    x: 0,
                    y: 0,
                    button: MouseButton::Left,
                    modifiers: Modifiers::empty(),
                },
                SourceEvent::MouseMove {
                    x: 20,
                    y: 0,
                    modifiers: Modifiers::empty(),
                },
                SourceEvent::MouseUp {
                    x: 0,
                    y: 0,
                    button: MouseButton::Left,
                    modifiers: Modifiers::empty(),
                },
            ],
        );
        let kinds: Vec<_> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec!["mousedown", "mousemove", "mouseup"]);
    }

    #[test]
    fn right_button_synthesizes_contextmenu() {
        let mut state = EventState::new();
        let out = collect(
            &mut state,
            &[
                SourceEvent::MouseDown {
                    x: 5,
                    y: 5,
                    button: MouseButton::Right,
                    modifiers: Modifiers::empty(),
                },
                SourceEvent::MouseUp {
                    x: 5,
                    y: 5,
                    button: MouseButton::Right,
                    modifiers: Modifiers::empty(),
                },
            ],
        );
        let kinds: Vec<_> = out.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, vec!["mousedown", "mouseup", "contextmenu"]);
    }

    #[test]
    fn buttons_bitfield_tracks_held_buttons() {
        let mut state = EventState::new();
        let out = collect(
            &mut state,
            &[
                SourceEvent::MouseDown {
                    x: 0,
                    y: 0,
                    button: MouseButton::Left,
                    modifiers: Modifiers::empty(),
                },
                SourceEvent::MouseDown {
                    x: 0,
                    y: 0,
                    button: MouseButton::Right,
                    modifiers: Modifiers::empty(),
                },
            ],
        );
        match out[1].1 {
            EventPayload::Mouse(m) => {
                assert_eq!(m.buttons, Buttons::LEFT | Buttons::RIGHT);
                assert_eq!(m.button, 2);
            }
            _ => panic!("expected mouse payload"),
        }
    }

    #[test]
    fn key_payload_carries_dom_identity() {
        let mut state = EventState::new();
        let out = collect(
            &mut state,
            &[SourceEvent::KeyDown {
                key: Key::Letter(b'w'),
                repeat: false,
                modifiers: Modifiers::SHIFT,
            }],
        );
        match out[0].1 {
            EventPayload::Key(k) => {
                assert_eq!(k.key, "w");
                assert_eq!(k.code, "KeyW");
                assert_eq!(k.key_code, 87);
                assert!(k.modifiers.contains(Modifiers::SHIFT));
            }
            _ => panic!("expected key payload"),
        }
    }

    #[test]
    fn frame_slots_fire_once_and_release() {
        let mut slots = CallbackSlots::new();
        let id = slots.request_frame(ScriptCallback(11)).unwrap();
        assert!(id > 0);
        assert_eq!(slots.take_frames(), vec![ScriptCallback(11)]);
        // released after firing
        assert!(slots.take_frames().is_empty());
    }

    #[test]
    fn cancel_frame_prevents_firing() {
        let mut slots = CallbackSlots::new();
        let id = slots.request_frame(ScriptCallback(7)).unwrap();
        assert_eq!(slots.cancel_frame(id), Some(ScriptCallback(7)));
        assert!(slots.take_frames().is_empty());
    }

    #[test]
    fn frame_slot_capacity() {
        let mut slots = CallbackSlots::new();
        for i in 0..CALLBACK_SLOTS {
            slots.request_frame(ScriptCallback(i as u64)).unwrap();
        }
        assert_eq!(
            slots.request_frame(ScriptCallback(99)).unwrap_err(),
            Error::AtCapacity
        );
    }

    #[test]
    fn timers_fire_at_deadline() {
        let mut slots = CallbackSlots::new();
        slots.set_timeout(ScriptCallback(1), 10.0).unwrap();
        slots.set_timeout(ScriptCallback(2), 50.0).unwrap();
        assert!(slots.take_due_timers(5.0).is_empty());
        assert_eq!(slots.take_due_timers(12.0), vec![ScriptCallback(1)]);
        assert_eq!(slots.take_due_timers(60.0), vec![ScriptCallback(2)]);
    }
}
