//! In-memory collaborators for unit tests

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::backend::{BackendError, Code, KeyboardBackend, TriggerCallback};
use crate::hook::resolve_groups;
use crate::notify::Notifier;
use crate::overlay::{Overlay, OverlayEvent};
use crate::signal::ReleaseSignal;
use crate::trigger::TriggerSpec;
use crate::tray::{Tray, TrayCommand};

/// Codes used by the fake keyboard layout
pub mod codes {
    use crate::backend::Code;

    pub const ESCAPE: Code = 1;
    pub const CTRL: Code = 29;
    pub const SHIFT: Code = 42;
    pub const RIGHT_SHIFT: Code = 54;
    pub const ALT: Code = 56;
    pub const RIGHT_CTRL: Code = 97;
    pub const RIGHT_ALT: Code = 100;
    pub const LEFT_WINDOWS: Code = 125;
    pub const RIGHT_WINDOWS: Code = 126;
    pub const VOLUME_UP: Code = 115;
    pub const Q: Code = 16;
    pub const U: Code = 22;
    pub const L: Code = 38;
    pub const B: Code = 48;
}

const LETTERS: &[(char, Code)] = &[
    ('q', 16), ('w', 17), ('e', 18), ('r', 19), ('t', 20), ('y', 21), ('u', 22),
    ('i', 23), ('o', 24), ('p', 25), ('a', 30), ('s', 31), ('d', 32), ('f', 33),
    ('g', 34), ('h', 35), ('j', 36), ('k', 37), ('l', 38), ('z', 44), ('x', 45),
    ('c', 46), ('v', 47), ('b', 48), ('n', 49), ('m', 50),
];

const NAMED: &[(&str, &[Code])] = &[
    ("escape", &[codes::ESCAPE]),
    ("enter", &[28]),
    ("space", &[57]),
    ("tab", &[15]),
    ("backspace", &[14]),
    ("ctrl", &[codes::CTRL]),
    ("left ctrl", &[codes::CTRL]),
    ("right ctrl", &[codes::RIGHT_CTRL]),
    ("shift", &[codes::SHIFT]),
    ("left shift", &[codes::SHIFT]),
    ("right shift", &[codes::RIGHT_SHIFT]),
    ("alt", &[codes::ALT]),
    ("left alt", &[codes::ALT]),
    ("right alt", &[codes::RIGHT_ALT]),
    ("windows", &[codes::LEFT_WINDOWS, codes::RIGHT_WINDOWS]),
    ("left windows", &[codes::LEFT_WINDOWS]),
    ("right windows", &[codes::RIGHT_WINDOWS]),
    ("volume mute", &[113]),
    ("volume down", &[114]),
    ("volume up", &[codes::VOLUME_UP]),
    ("next track", &[163]),
    ("play/pause media", &[164]),
    ("previous track", &[165]),
    ("brightness down", &[224]),
    ("brightness up", &[225]),
];

/// Largest code the fake keyboard accepts
const MAX_CODE: Code = 511;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keyboard backend that records blocks and lets tests press hotkeys
#[derive(Default)]
pub struct FakeBackend {
    unsupported: BTreeSet<Code>,
    blocked: Mutex<BTreeSet<Code>>,
    resolved: Mutex<Vec<String>>,
    hotkeys: Mutex<Vec<(TriggerSpec, TriggerCallback)>>,
    on_add_hotkey: Mutex<Option<TriggerCallback>>,
    registrations: AtomicUsize,
    stashes: AtomicUsize,
    fail_hotkeys: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Codes that fail to block, as on keyboards without those keys
    pub fn with_unsupported(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.unsupported.extend(codes);
        self
    }

    pub fn fail_hotkey_registration(&self, fail: bool) {
        self.fail_hotkeys.store(fail, Ordering::SeqCst);
    }

    pub fn is_blocked(&self, code: Code) -> bool {
        lock(&self.blocked).contains(&code)
    }

    pub fn blocked_count(&self) -> usize {
        lock(&self.blocked).len()
    }

    /// Every key name looked up so far, in order
    pub fn resolved_names(&self) -> Vec<String> {
        lock(&self.resolved).clone()
    }

    /// Run `hook` on the registering thread before each hotkey is added
    pub fn on_add_hotkey(&self, hook: impl Fn() + Send + Sync + 'static) {
        *lock(&self.on_add_hotkey) = Some(Arc::new(hook));
    }

    pub fn hotkey_count(&self) -> usize {
        lock(&self.hotkeys).len()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn stash_count(&self) -> usize {
        self.stashes.load(Ordering::SeqCst)
    }

    /// Press a registered hotkey; returns how many callbacks fired
    pub fn press(&self, hotkey: &str) -> usize {
        let Ok(wanted) = TriggerSpec::parse(hotkey) else {
            return 0;
        };
        let callbacks: Vec<TriggerCallback> = lock(&self.hotkeys)
            .iter()
            .filter(|(spec, _)| *spec == wanted)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in &callbacks {
            callback();
        }
        callbacks.len()
    }
}

impl KeyboardBackend for FakeBackend {
    fn resolve_codes(&self, name: &str) -> Vec<Code> {
        lock(&self.resolved).push(name.to_string());
        let mut chars = name.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some((_, code)) = LETTERS.iter().find(|(letter, _)| *letter == c) {
                return vec![*code];
            }
            if let Some(digit) = c.to_digit(10) {
                return vec![if digit == 0 { 11 } else { digit + 1 }];
            }
        }
        if let Some(num) = name.strip_prefix('f').and_then(|n| n.parse::<Code>().ok()) {
            return match num {
                1..=10 => vec![58 + num],
                11 => vec![87],
                12 => vec![88],
                _ => vec![],
            };
        }
        NAMED
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, codes)| codes.to_vec())
            .unwrap_or_default()
    }

    fn block_code(&self, code: Code) -> Result<(), BackendError> {
        if code > MAX_CODE || self.unsupported.contains(&code) {
            return Err(BackendError::UnsupportedCode(code));
        }
        lock(&self.blocked).insert(code);
        Ok(())
    }

    fn unblock_code(&self, code: Code) -> Result<(), BackendError> {
        lock(&self.blocked).remove(&code);
        Ok(())
    }

    fn add_hotkey(
        &self,
        trigger: &TriggerSpec,
        callback: TriggerCallback,
    ) -> Result<(), BackendError> {
        let hook = lock(&self.on_add_hotkey).clone();
        if let Some(hook) = hook {
            hook();
        }
        if self.fail_hotkeys.load(Ordering::SeqCst) {
            return Err(BackendError::HookInstall(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "hook denied",
            )));
        }
        resolve_groups(trigger, |name| self.resolve_codes(name))?;
        self.registrations.fetch_add(1, Ordering::SeqCst);
        lock(&self.hotkeys).push((trigger.clone(), callback));
        Ok(())
    }

    fn remove_all_hotkeys(&self) {
        lock(&self.hotkeys).clear();
    }

    fn stash_state(&self) {
        self.stashes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Notifier that remembers the `enabled` flag of every call
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    calls: Arc<Mutex<Vec<bool>>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<bool> {
        lock(&self.calls).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_locked(&self, enabled: bool) {
        lock(&self.calls).push(enabled);
    }
}

#[derive(Debug, Default)]
pub struct OverlayLog {
    pub shown: usize,
    pub hidden: usize,
    pub open: bool,
    pub last_opacity: Option<f32>,
    pub hint: String,
    pub fail: bool,
}

/// Overlay that records show/hide calls
#[derive(Debug, Clone, Default)]
pub struct FakeOverlay {
    log: Arc<Mutex<OverlayLog>>,
}

impl FakeOverlay {
    pub fn log(&self) -> MutexGuard<'_, OverlayLog> {
        lock(&self.log)
    }
}

impl Overlay for FakeOverlay {
    type Handle = usize;

    fn show(&mut self, opacity: f32) -> Option<usize> {
        let mut log = lock(&self.log);
        if log.fail {
            return None;
        }
        log.shown += 1;
        log.open = true;
        log.last_opacity = Some(opacity);
        Some(log.shown)
    }

    fn hide(&mut self, _handle: usize) {
        let mut log = lock(&self.log);
        log.hidden += 1;
        log.open = false;
    }

    fn poll(&mut self, _handle: &usize, release: &ReleaseSignal) -> OverlayEvent {
        if release.is_set() {
            OverlayEvent::ReleaseRequested
        } else {
            OverlayEvent::Idle
        }
    }

    fn set_unlock_hint(&mut self, hotkey: &str) {
        lock(&self.log).hint = hotkey.to_string();
    }
}

#[derive(Debug, Default)]
pub struct TrayLog {
    pub pending: VecDeque<TrayCommand>,
    pub locked: bool,
    pub notifications: Option<bool>,
    pub opacity: Option<f32>,
}

/// Tray whose menu clicks are queued by the test
#[derive(Debug, Clone, Default)]
pub struct FakeTray {
    log: Arc<Mutex<TrayLog>>,
}

impl FakeTray {
    pub fn click(&self, command: TrayCommand) {
        lock(&self.log).pending.push_back(command);
    }

    pub fn log(&self) -> MutexGuard<'_, TrayLog> {
        lock(&self.log)
    }
}

impl Tray for FakeTray {
    fn poll(&mut self) -> Option<TrayCommand> {
        lock(&self.log).pending.pop_front()
    }

    fn set_locked(&mut self, locked: bool) {
        lock(&self.log).locked = locked;
    }

    fn set_notifications(&mut self, enabled: bool) {
        lock(&self.log).notifications = Some(enabled);
    }

    fn set_opacity(&mut self, opacity: f32) {
        lock(&self.log).opacity = Some(opacity);
    }
}
