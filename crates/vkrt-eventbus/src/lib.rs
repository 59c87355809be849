//! Typed event bus layered over the bounded MPMC queue. Grounded on
//! `EventSystem` in `src/core/public/event/system.h` /
//! `src/core/private/event/system.cpp`, with event shapes from
//! `src/core/public/event/types.h`.
//!
//! `process_events` runs on the update thread, drains the queue, and
//! dispatches each event to its type's listener set. The original erases a
//! listener mid-iteration while holding only a *shared* lock on the
//! listener map — a latent data race, since erasing mutates the container.
//! Rust's borrow checker won't let that compile: `retain` takes the map's
//! write lock for the duration of the dispatch instead, which is the
//! correct fix rather than a faithful translation of the bug.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use vkrt_queue::MpmcQueue;

/// FNV-1a, matching the original's `"..."_hash` user-defined literal used
/// to build `ev_t` constants from string names.
pub const fn fnv1a_hash(s: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let bytes = s.as_bytes();
    let mut hash = OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(PRIME);
        i += 1;
    }
    hash
}

/// An event type tag (`ev_t` in the original — a hashed string name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKind(pub u64);

impl EventKind {
    pub const fn from_name(name: &str) -> Self {
        Self(fnv1a_hash(name))
    }
}

/// Well-known event kinds, mirroring `avk::events::Ev*` in `constants.h`.
pub mod kinds {
    use super::EventKind;

    pub const KEY_DOWN: EventKind = EventKind::from_name("KeyDown");
    pub const KEY_UP: EventKind = EventKind::from_name("KeyUp");
    pub const KEY_REPEAT: EventKind = EventKind::from_name("KeyRepeat");
    pub const TEXT_INPUT: EventKind = EventKind::from_name("TextInput");

    pub const MOUSE_BUTTON_DOWN: EventKind = EventKind::from_name("MouseButtonDown");
    pub const MOUSE_BUTTON_UP: EventKind = EventKind::from_name("MouseButtonUp");
    pub const MOUSE_MOVE: EventKind = EventKind::from_name("MouseMove");
    pub const MOUSE_SCROLL_UP: EventKind = EventKind::from_name("MouseScrollUp");
    pub const MOUSE_SCROLL_DOWN: EventKind = EventKind::from_name("MouseScrollDown");
    pub const MOUSE_ENTER: EventKind = EventKind::from_name("MouseEnter");
    pub const MOUSE_LEAVE: EventKind = EventKind::from_name("MouseLeave");

    pub const TOUCH_BEGIN: EventKind = EventKind::from_name("TouchBegin");
    pub const TOUCH_END: EventKind = EventKind::from_name("TouchEnd");
    pub const TOUCH_MOVE: EventKind = EventKind::from_name("TouchMove");
    pub const TOUCH_CANCEL: EventKind = EventKind::from_name("TouchCancel");

    pub const WINDOW_RESIZE: EventKind = EventKind::from_name("WindowResize");
    pub const WINDOW_CLOSE: EventKind = EventKind::from_name("WindowClose");
    pub const WINDOW_FOCUS: EventKind = EventKind::from_name("WindowFocus");
    pub const WINDOW_LOST_FOCUS: EventKind = EventKind::from_name("WindowLostFocus");
    pub const WINDOW_MINIMIZE: EventKind = EventKind::from_name("WindowMinimize");
    pub const WINDOW_MAXIMIZE: EventKind = EventKind::from_name("WindowMaximize");
    pub const WINDOW_RESTORE: EventKind = EventKind::from_name("WindowRestore");

    pub const APP_PAUSE: EventKind = EventKind::from_name("AppPause");
    pub const APP_RESUME: EventKind = EventKind::from_name("AppResume");
    pub const APP_LOW_MEMORY: EventKind = EventKind::from_name("AppLowMemory");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum KeyCode {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Num0, Num1, Num2, Num3, Num4, Num5, Num6, Num7, Num8, Num9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Escape, Tab, CapsLock, Shift, Control, Alt, Super, Menu, Space, Enter, Backspace,
    Left, Right, Up, Down,
    Insert, Delete, Home, End, PageUp, PageDown,
    Minus, Equal, LeftBracket, RightBracket, Backslash, Semicolon,
    Apostrophe, Comma, Period, Slash, GraveAccent,
    NumPad0, NumPad1, NumPad2, NumPad3, NumPad4, NumPad5, NumPad6, NumPad7, NumPad8, NumPad9,
    NumPadDecimal, NumPadDivide, NumPadMultiply, NumPadSubtract, NumPadAdd, NumPadEnter,
    PrintScreen, ScrollLock, Pause, NumLock, VolumeUp, VolumeDown, Mute, MediaNext, MediaPrev, MediaStop, MediaPlayPause,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Button4,
    Button5,
    Button6,
    Button7,
    Button8,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPointer {
    pub id: i32,
    pub x: i32,
    pub y: i32,
    pub pressure: f32,
}

/// The payload carried by an [`Event`] — a tagged-union translation of
/// `avk::Event`'s anonymous C union.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Key {
        key: KeyCode,
        is_repeat: bool,
    },
    Mouse {
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    },
    Touch {
        pointers: Vec<TouchPointer>,
    },
    Window {
        width: i32,
        height: i32,
        focused: bool,
        maximized: bool,
        minimized: bool,
    },
    Custom {
        data: Vec<u64>,
    },
    /// Events that carry no payload (app lifecycle events and the like).
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub emitter_id: u64,
    pub time: Instant,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(kind: EventKind, emitter_id: u64, payload: EventPayload) -> Self {
        Self {
            kind,
            emitter_id,
            time: Instant::now(),
            payload,
        }
    }
}

/// A registered event handler. Returning `true` from `on_event` tells the
/// bus to unregister it, mirroring `IEventListener::onEvent`'s "returns
/// true if it should unregister" contract.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> bool;
}

type ListenerKey = usize;

fn listener_key(listener: &Arc<dyn EventListener>) -> ListenerKey {
    Arc::as_ptr(listener) as *const () as usize
}

/// Typed publish/subscribe bus over a bounded MPMC queue of [`Event`]s.
/// One instance is shared by every thread that emits events; only the
/// update thread is expected to call [`EventBus::process_events`].
pub struct EventBus {
    queue: MpmcQueue<Event>,
    listeners: RwLock<HashMap<EventKind, HashMap<ListenerKey, Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: MpmcQueue::new(capacity),
            listeners: RwLock::new(HashMap::with_capacity(256)),
        }
    }

    /// Registers `kind` as a publishable event type. Returns `false` if it
    /// was already registered. Must be called before `subscribe`/`publish`
    /// for that kind.
    pub fn add_event(&self, kind: EventKind) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.contains_key(&kind) {
            return false;
        }
        listeners.insert(kind, HashMap::with_capacity(256));
        true
    }

    /// Registers `listener` for `kind`. `kind` must already be registered
    /// via `add_event` — calling this first is a caller bug, matching the
    /// original's `assert`.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn EventListener>) -> bool {
        let mut listeners = self.listeners.write();
        let Some(set) = listeners.get_mut(&kind) else {
            debug_assert!(false, "subscribe called for an unregistered EventKind");
            log::warn!("subscribe called for an unregistered event kind, ignoring");
            return false;
        };
        set.insert(listener_key(&listener), listener).is_none()
    }

    /// Unregisters `listener` for `kind`. Must not be called from inside
    /// that listener's own `on_event` — `process_events` already removes
    /// listeners that return `true`, and unsubscribing mid-dispatch would
    /// deadlock on the write lock `process_events` holds.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Arc<dyn EventListener>) {
        let mut listeners = self.listeners.write();
        if let Some(set) = listeners.get_mut(&kind) {
            set.remove(&listener_key(listener));
        }
    }

    /// Publishes `event`, retrying until the queue has room.
    pub fn publish(&self, event: Event) {
        let mut event = event;
        loop {
            match self.queue.try_push(event) {
                Ok(()) => return,
                Err(rejected) => {
                    event = rejected;
                    std::thread::yield_now();
                }
            }
        }
    }

    /// Drains every pending event and dispatches it to its kind's
    /// listeners, dropping any listener whose `on_event` returns `true`.
    /// Intended to run on the update thread once per tick.
    pub fn process_events(&self) {
        while let Ok(event) = self.queue.try_pop() {
            let mut listeners = self.listeners.write();
            if let Some(set) = listeners.get_mut(&event.kind) {
                set.retain(|_, listener| !listener.on_event(&event));
            }
        }
    }
}
