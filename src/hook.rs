//! Platform-neutral state consulted by the low-level keyboard hook
//!
//! The OS hook procedure feeds every key event into [`HookState::handle_event`],
//! which decides whether the event is suppressed and fires registered
//! hotkeys. Key-down tracking lives here too; it can go stale when a
//! release is never delivered, so a scavenger thread ages entries out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::backend::{BackendError, Code, TriggerCallback};
use crate::trigger::TriggerSpec;

/// Pressed keys older than this are assumed released
pub const STALE_AFTER: Duration = Duration::from_secs(2);

/// How often the scavenger looks for stale keys
pub const SCAVENGE_INTERVAL: Duration = Duration::from_secs(1);

/// What the hook should do with a key event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Suppress,
}

struct Hotkey {
    groups: Vec<Vec<Code>>,
    callback: TriggerCallback,
}

impl Hotkey {
    fn involves(&self, code: Code) -> bool {
        self.groups.iter().any(|group| group.contains(&code))
    }

    fn is_held(&self, pressed: &PressedKeys) -> bool {
        self.groups
            .iter()
            .all(|group| group.iter().any(|code| pressed.contains(*code)))
    }
}

/// Keys currently held down, with the time each went down
#[derive(Debug, Default)]
pub struct PressedKeys {
    keys: HashMap<Code, Instant>,
}

impl PressedKeys {
    /// Record a key-down; returns false for auto-repeat of a held key
    pub fn press(&mut self, code: Code, now: Instant) -> bool {
        self.keys.insert(code, now).is_none()
    }

    pub fn release(&mut self, code: Code) {
        self.keys.remove(&code);
    }

    pub fn contains(&self, code: Code) -> bool {
        self.keys.contains_key(&code)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Drop keys pressed longer than `max_age` ago, returning them
    pub fn purge_older_than(&mut self, max_age: Duration, now: Instant) -> Vec<Code> {
        let stale: Vec<Code> = self
            .keys
            .iter()
            .filter(|(_, pressed_at)| now.saturating_duration_since(**pressed_at) > max_age)
            .map(|(code, _)| *code)
            .collect();
        for code in &stale {
            self.keys.remove(code);
        }
        stale
    }
}

#[derive(Default)]
pub struct HookState {
    blocked: RwLock<HashSet<Code>>,
    hotkeys: Mutex<Vec<Hotkey>>,
    pressed: Mutex<PressedKeys>,
}

impl HookState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, code: Code) {
        write(&self.blocked).insert(code);
    }

    pub fn unblock(&self, code: Code) {
        write(&self.blocked).remove(&code);
    }

    pub fn is_blocked(&self, code: Code) -> bool {
        read(&self.blocked).contains(&code)
    }

    #[cfg(test)]
    pub fn blocked_count(&self) -> usize {
        read(&self.blocked).len()
    }

    pub fn add_hotkey(&self, groups: Vec<Vec<Code>>, callback: TriggerCallback) {
        lock(&self.hotkeys).push(Hotkey { groups, callback });
    }

    pub fn clear_hotkeys(&self) {
        lock(&self.hotkeys).clear();
    }

    #[cfg(test)]
    pub fn hotkey_count(&self) -> usize {
        lock(&self.hotkeys).len()
    }

    pub fn stash(&self) {
        lock(&self.pressed).clear();
    }

    #[cfg(test)]
    pub fn pressed_count(&self) -> usize {
        lock(&self.pressed).len()
    }

    pub fn purge_stale(&self, max_age: Duration) -> Vec<Code> {
        lock(&self.pressed).purge_older_than(max_age, Instant::now())
    }

    /// Process one key event from the OS hook
    pub fn handle_event(&self, code: Code, key_down: bool) -> Verdict {
        self.handle_event_at(code, key_down, Instant::now())
    }

    fn handle_event_at(&self, code: Code, key_down: bool, now: Instant) -> Verdict {
        let mut fired = Vec::new();

        if key_down {
            let mut pressed = lock(&self.pressed);
            if pressed.press(code, now) {
                let hotkeys = lock(&self.hotkeys);
                fired.extend(
                    hotkeys
                        .iter()
                        .filter(|hotkey| hotkey.involves(code) && hotkey.is_held(&pressed))
                        .map(|hotkey| Arc::clone(&hotkey.callback)),
                );
            }
        } else {
            lock(&self.pressed).release(code);
        }

        if !fired.is_empty() {
            debug!("Hotkey fired on code {code:#x}");
            for callback in fired {
                callback();
            }
            return Verdict::Suppress;
        }

        if self.is_blocked(code) {
            trace!("Blocking code {code:#x}");
            return Verdict::Suppress;
        }

        Verdict::Pass
    }
}

/// Resolve each key of a trigger (with its modifier variants) to codes
pub fn resolve_groups(
    trigger: &TriggerSpec,
    resolve: impl Fn(&str) -> Vec<Code>,
) -> Result<Vec<Vec<Code>>, BackendError> {
    trigger
        .keys()
        .iter()
        .zip(trigger.groups())
        .map(|(key, variants)| {
            let mut codes: Vec<Code> = variants.into_iter().flat_map(&resolve).collect();
            codes.sort_unstable();
            codes.dedup();
            if codes.is_empty() {
                Err(BackendError::UnknownKey(key.clone()))
            } else {
                Ok(codes)
            }
        })
        .collect()
}

/// Periodically age out pressed keys whose release was never seen
pub fn spawn_scavenger(
    hook: Arc<HookState>,
    stop: Arc<AtomicBool>,
    interval: Duration,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("key-state-scavenger".to_string())
        .spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let stale = hook.purge_stale(STALE_AFTER);
                if !stale.is_empty() {
                    debug!("Cleared {} stale pressed keys", stale.len());
                }
                thread::sleep(interval);
            }
        })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
